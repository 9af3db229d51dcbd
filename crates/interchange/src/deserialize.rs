//! Parsing from raw JSON into typed wire structs.
//!
//! [`parse_action_record`] and [`parse_rule_set`] wrap `serde_json` and
//! report failures as [`InterchangeError`] with the offending document kind.

use std::fmt;

use crate::rules::RuleSet;
use crate::types::ActionRecord;

/// Errors while parsing wire JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterchangeError {
    /// The document is not a JSON object.
    NotAnObject { kind: String },
    /// The document does not match the expected shape.
    Shape { kind: String, message: String },
    /// The document parsed but is internally inconsistent.
    Invalid { kind: String, message: String },
}

impl fmt::Display for InterchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterchangeError::NotAnObject { kind } => {
                write!(f, "{} must be a JSON object", kind)
            }
            InterchangeError::Shape { kind, message } => {
                write!(f, "malformed {}: {}", kind, message)
            }
            InterchangeError::Invalid { kind, message } => {
                write!(f, "invalid {}: {}", kind, message)
            }
        }
    }
}

impl std::error::Error for InterchangeError {}

/// Parse an Action Record from wire JSON.
pub fn parse_action_record(value: &serde_json::Value) -> Result<ActionRecord, InterchangeError> {
    if !value.is_object() {
        return Err(InterchangeError::NotAnObject {
            kind: "action record".to_string(),
        });
    }
    serde_json::from_value(value.clone()).map_err(|e| InterchangeError::Shape {
        kind: "action record".to_string(),
        message: e.to_string(),
    })
}

/// Parse a Rule Set from wire JSON, rejecting duplicate rule ids.
pub fn parse_rule_set(value: &serde_json::Value) -> Result<RuleSet, InterchangeError> {
    if !value.is_object() {
        return Err(InterchangeError::NotAnObject {
            kind: "rule set".to_string(),
        });
    }
    let rule_set: RuleSet =
        serde_json::from_value(value.clone()).map_err(|e| InterchangeError::Shape {
            kind: "rule set".to_string(),
            message: e.to_string(),
        })?;

    let mut seen = std::collections::BTreeSet::new();
    for rule in &rule_set.rules {
        if !seen.insert(rule.id.as_str()) {
            return Err(InterchangeError::Invalid {
                kind: "rule set".to_string(),
                message: format!("duplicate rule id '{}'", rule.id),
            });
        }
    }
    Ok(rule_set)
}
