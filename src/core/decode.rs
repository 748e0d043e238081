//! Purpose: Turn one raw response page into column labels, full rows, and the next cursor.
//! Exports: `DecodedPage`, `decode`, `decode_page`.
//! Role: Orchestrates delta reconstruction, dictionary resolution, and normalization.
//! Invariants: Per record, in page order: reconstruct -> resolve -> normalize.
//! Invariants: Reconstruction reads the previous reconstructed row, before resolution.
//! Invariants: A structurally empty page yields no rows and no cursor.
use serde_json::Value;

use crate::core::cursor::ResumeCursor;
use crate::core::delta::{Row, reconstruct};
use crate::core::dictionary::{ValueDictionaries, resolve};
use crate::core::error::{Error, ErrorKind};
use crate::core::normalize::Normalizer;
use crate::core::wire::{DataSet, Descriptor, RawPage, SelectDescriptor};

/// Select-descriptor kind for grouping keys; their label is the source property.
const KIND_GROUPING: i64 = 1;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedPage {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub next_cursor: Option<ResumeCursor>,
}

impl DecodedPage {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Parses and decodes a raw response body.
pub fn decode(body: &str, normalizer: &Normalizer) -> Result<DecodedPage, Error> {
    let page: RawPage = serde_json::from_str(body).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("invalid response json")
            .with_source(err)
    })?;
    decode_page(page, normalizer)
}

pub fn decode_page(page: RawPage, normalizer: &Normalizer) -> Result<DecodedPage, Error> {
    let Some(data) = page
        .results
        .into_iter()
        .next()
        .and_then(|result| result.result)
        .and_then(|body| body.data)
    else {
        return Ok(DecodedPage::default());
    };
    let Some(data_set) = data.dsr.and_then(|dsr| dsr.data_sets.into_iter().next()) else {
        return Ok(DecodedPage::default());
    };

    let DataSet {
        hierarchies,
        value_dicts,
        restart_tokens,
    } = data_set;
    let records = hierarchies
        .into_iter()
        .next()
        .map(|hierarchy| hierarchy.records)
        .unwrap_or_default();
    if records.is_empty() {
        return Ok(DecodedPage::default());
    }

    let schema = records[0].schema.clone().ok_or_else(|| {
        Error::new(ErrorKind::Decode)
            .with_message("first record carries no column schema")
            .with_record(0)
    })?;
    let width = schema.len();
    let dictionaries = ValueDictionaries::new(value_dicts);

    let mut rows = Vec::with_capacity(records.len());
    let mut previous: Option<Row> = None;
    for (index, record) in records.iter().enumerate() {
        let reconstructed = reconstruct(width, previous.as_deref(), record, index)?;
        let mut row = reconstructed.clone();
        resolve(&schema, &dictionaries, &mut row, index)?;
        normalizer.normalize_row(&mut row);
        rows.push(row);
        previous = Some(reconstructed);
    }

    Ok(DecodedPage {
        columns: column_labels(data.descriptor),
        rows,
        next_cursor: restart_tokens.into_iter().next(),
    })
}

fn column_labels(descriptor: Option<Descriptor>) -> Vec<String> {
    descriptor
        .map(|descriptor| descriptor.select.into_iter().map(column_label).collect())
        .unwrap_or_default()
}

fn column_label(select: SelectDescriptor) -> String {
    if select.kind == Some(KIND_GROUPING) {
        let property = select
            .group_keys
            .into_iter()
            .next()
            .and_then(|key| key.source)
            .and_then(|source| source.property);
        if let Some(property) = property {
            return property;
        }
    }
    select.value.unwrap_or_default()
}

/// Renders a decoded cell as CSV text.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        other => other.to_string(),
    }
}
