pub mod bot;
pub mod chapter;
pub mod image;
pub mod llm;
pub mod prompts;
pub mod retry;
pub mod speech;
pub mod stages;
pub mod telegram;
pub mod validation;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_support;
