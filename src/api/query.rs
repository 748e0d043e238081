//! Purpose: Hold the fixed semantic-query payload and its single variable slot.
//! Exports: `QueryTemplate`.
//! Role: Request construction for the HTTP page source.
//! Invariants: The payload is the service's contract and is sent verbatim.
//! Invariants: The only change per request is `Window.RestartTokens = [cursor]`.
#![allow(clippy::result_large_err)]

use serde_json::{Value, json};

use crate::core::cursor::ResumeCursor;
use crate::core::error::{Error, ErrorKind};

const PERMITS_QUERY: &str = include_str!("query/permits.json");

const WINDOW_POINTER: &str = "/queries/0/Query/Commands/0/SemanticQueryDataShapeCommand/Binding/DataReduction/Primary/Window";

#[derive(Clone, Debug)]
pub struct QueryTemplate {
    payload: Value,
    page_size: usize,
}

impl QueryTemplate {
    /// The permit-listing query this tool exports.
    pub fn builtin() -> Result<Self, Error> {
        Self::from_json(PERMITS_QUERY)
    }

    pub fn from_json(text: &str) -> Result<Self, Error> {
        let payload: Value = serde_json::from_str(text).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("query template is not valid json")
                .with_source(err)
        })?;
        let window = payload
            .pointer(WINDOW_POINTER)
            .and_then(Value::as_object)
            .ok_or_else(|| {
                Error::new(ErrorKind::Internal).with_message("query template has no data window")
            })?;
        let page_size = window
            .get("Count")
            .and_then(Value::as_u64)
            .and_then(|count| usize::try_from(count).ok())
            .filter(|count| *count > 0)
            .ok_or_else(|| {
                Error::new(ErrorKind::Internal)
                    .with_message("query template window has no positive Count")
            })?;
        Ok(Self { payload, page_size })
    }

    /// Rows per page the service returns for this query.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn payload(&self, cursor: Option<&ResumeCursor>) -> Value {
        let mut payload = self.payload.clone();
        if let Some(cursor) = cursor {
            if let Some(window) = payload
                .pointer_mut(WINDOW_POINTER)
                .and_then(Value::as_object_mut)
            {
                window.insert("RestartTokens".to_string(), json!([cursor.to_json()]));
            }
        }
        payload
    }
}
