//! Shallow argument validation against declared parameters.

use crate::tool::ParameterDefinition;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Arguments must be a JSON object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Field '{field}' must be {article} {expected}")]
    WrongType {
        field: String,
        expected: String,
        article: &'static str,
    },
}

impl ValidationError {
    pub fn field(&self) -> Option<&str> {
        match self {
            ValidationError::NotAnObject => None,
            ValidationError::MissingField(f) | ValidationError::WrongType { field: f, .. } => Some(f),
        }
    }
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        // Unknown types are not checked
        _ => true,
    }
}

/// Required fields must be present and non-null; present fields must match
/// their primitive type. Nested structure is not inspected and unknown
/// fields are allowed.
pub fn validate(
    parameters: &HashMap<String, ParameterDefinition>,
    args: &Value,
) -> Result<(), ValidationError> {
    let empty = serde_json::Map::new();
    let object = match args {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => return Err(ValidationError::NotAnObject),
    };

    let mut names: Vec<&String> = parameters.keys().collect();
    names.sort();

    for name in names {
        let def = &parameters[name];
        match object.get(name.as_str()) {
            None | Some(Value::Null) => {
                if def.required {
                    return Err(ValidationError::MissingField(name.clone()));
                }
            }
            Some(value) => {
                if !matches_type(value, &def.param_type) {
                    let article = if def.param_type.starts_with(['a', 'e', 'i', 'o', 'u']) {
                        "an"
                    } else {
                        "a"
                    };
                    return Err(ValidationError::WrongType {
                        field: name.clone(),
                        expected: def.param_type.clone(),
                        article,
                    });
                }
            }
        }
    }
    Ok(())
}
