//! Types shared by the owned custom resources

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One problem found in a Release spec, with the path of the offending field
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{field}: {message} ({hint})")]
pub struct SpecValidationError {
    pub field: String,
    pub message: String,
    /// Suggested correction shown next to the message
    pub hint: String,
}

impl SpecValidationError {
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            hint: hint.into(),
        }
    }
}

/// Status condition in the `metav1.Condition` shape
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    /// `True`, `False` or `Unknown`
    pub status: String,
    /// RFC 3339 time of the last status flip
    pub last_transition_time: String,
    pub reason: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
