use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::core::model::{ItemKind, StructuralItem};

pub const FRAME_COUNT: usize = 6;

const PRAYER_FIELDS: [&str; 3] = ["prompt_imagen", "texto_imagen", "oracion"];

/// Why a refined item was not accepted.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StructureError {
    #[error("refined output is not a JSON object")]
    NotAnObject,
    #[error("tipo changed from {expected} to {found:?}")]
    TipoMismatch { expected: ItemKind, found: Option<String> },
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("'{field}' keys are {found:?}, expected {expected:?}")]
    WrongKeys {
        field: &'static str,
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("refined output does not deserialize: {0}")]
    Malformed(String),
}

pub fn frame_keys() -> Vec<String> {
    (1..=FRAME_COUNT).map(|i| format!("frame_{}", i)).collect()
}

pub fn transition_keys() -> Vec<String> {
    (1..FRAME_COUNT)
        .map(|i| format!("transicion_{}_{}", i, i + 1))
        .collect()
}

/// Structural check on a raw item, by its `tipo`.
pub fn validate_item(kind: ItemKind, item: &Map<String, Value>) -> Result<(), StructureError> {
    match kind {
        ItemKind::Oracion => {
            for field in PRAYER_FIELDS {
                if !item.contains_key(field) {
                    return Err(StructureError::MissingField(field));
                }
            }
            Ok(())
        }
        ItemKind::Historia | ItemKind::Curiosidad => {
            check_exact_keys(item, "secuencia_visual", frame_keys())?;
            check_exact_keys(item, "transiciones", transition_keys())
        }
    }
}

fn check_exact_keys(
    item: &Map<String, Value>,
    field: &'static str,
    expected: Vec<String>,
) -> Result<(), StructureError> {
    let map = item
        .get(field)
        .and_then(Value::as_object)
        .ok_or(StructureError::MissingField(field))?;

    let found: BTreeSet<&str> = map.keys().map(String::as_str).collect();
    let wanted: BTreeSet<&str> = expected.iter().map(String::as_str).collect();
    if found != wanted {
        return Err(StructureError::WrongKeys {
            field,
            expected,
            found: found.into_iter().map(str::to_string).collect(),
        });
    }
    Ok(())
}

/// Accepts the refinement output only if it keeps the item's `tipo` and
/// passes [`validate_item`].
pub fn accept_refinement(
    original: &StructuralItem,
    refined: Value,
) -> Result<StructuralItem, StructureError> {
    let kind = original.kind();
    let Value::Object(map) = refined else {
        return Err(StructureError::NotAnObject);
    };

    let tipo = map.get("tipo").and_then(Value::as_str);
    if tipo != Some(kind.as_str()) {
        return Err(StructureError::TipoMismatch {
            expected: kind,
            found: tipo.map(str::to_string),
        });
    }

    validate_item(kind, &map)?;

    serde_json::from_value(Value::Object(map)).map_err(|e| StructureError::Malformed(e.to_string()))
}
