use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a running pipeline and the
/// control surface.
///
/// Clones share the same flag. Nothing is ever aborted mid-flight: stages
/// consult [`CancelToken::is_set`] before each billed call and stop at the
/// next checkpoint.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_clear() {
        let token = CancelToken::new();
        assert!(!token.is_set());
    }

    #[test]
    fn test_request_and_reset() {
        let token = CancelToken::new();
        token.request();
        assert!(token.is_set());
        token.request();
        assert!(token.is_set());
        token.reset();
        assert!(!token.is_set());
    }

    #[test]
    fn test_clones_share_flag_across_threads() {
        let token = CancelToken::new();
        let remote = token.clone();

        std::thread::spawn(move || remote.request())
            .join()
            .unwrap();

        assert!(token.is_set());
    }
}
