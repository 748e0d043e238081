// Opaque continuation cursor handed out by the query service.
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Restart token for the next page. The contents are never interpreted; the
/// cursor is stored, checked for presence, and sent back verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeCursor(Vec<Value>);

impl ResumeCursor {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn as_values(&self) -> &[Value] {
        &self.0
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.0.clone())
    }
}
