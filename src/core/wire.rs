//! Purpose: Serde model of the data-shape result returned by the query service.
//! Exports: `RawPage`, `DataSet`, `DeltaRecord`, `ColumnDescriptor`, `SelectDescriptor`.
//! Role: Thin deserialization layer; the decoder walks it, nothing here interprets values.
//! Invariants: Every container field defaults to empty so structurally empty pages parse.
//! Invariants: Field names match the service's abbreviated keys (`DM0`, `C`, `R`, `Ø`, ...).
use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::core::cursor::ResumeCursor;

#[derive(Debug, Default, Deserialize)]
pub struct RawPage {
    #[serde(default)]
    pub results: Vec<QueryResult>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub result: Option<ResultBody>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResultBody {
    #[serde(default)]
    pub data: Option<ResultData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResultData {
    #[serde(default)]
    pub descriptor: Option<Descriptor>,
    #[serde(default)]
    pub dsr: Option<Dsr>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "Select", default)]
    pub select: Vec<SelectDescriptor>,
}

/// One entry of the select list; only used to derive column labels.
#[derive(Debug, Default, Deserialize)]
pub struct SelectDescriptor {
    #[serde(rename = "Kind", default)]
    pub kind: Option<i64>,
    #[serde(rename = "Value", default)]
    pub value: Option<String>,
    #[serde(rename = "GroupKeys", default)]
    pub group_keys: Vec<GroupKey>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupKey {
    #[serde(rename = "Source", default)]
    pub source: Option<GroupSource>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupSource {
    #[serde(rename = "Property", default)]
    pub property: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Dsr {
    #[serde(rename = "DS", default)]
    pub data_sets: Vec<DataSet>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DataSet {
    #[serde(rename = "PH", default)]
    pub hierarchies: Vec<PrimaryHierarchy>,
    #[serde(rename = "ValueDicts", default)]
    pub value_dicts: HashMap<String, Vec<Value>>,
    #[serde(rename = "RT", default)]
    pub restart_tokens: Vec<ResumeCursor>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PrimaryHierarchy {
    #[serde(rename = "DM0", default)]
    pub records: Vec<DeltaRecord>,
}

/// One encoded row: the cells not covered by a bitset, in column order, plus
/// the copy (`R`) and null (`Ø`) bitsets. The first record of a page also
/// carries the column schema (`S`).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DeltaRecord {
    #[serde(rename = "S", default)]
    pub schema: Option<Vec<ColumnDescriptor>>,
    #[serde(rename = "C", default)]
    pub cells: Vec<Value>,
    #[serde(rename = "R", default)]
    pub copy_bits: Option<u64>,
    #[serde(rename = "Ø", default)]
    pub null_bits: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ColumnDescriptor {
    #[serde(rename = "N", default)]
    pub name: Option<String>,
    #[serde(rename = "T", default)]
    pub type_code: Option<i64>,
    #[serde(rename = "DN", default)]
    pub dictionary: Option<String>,
}

impl ColumnDescriptor {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn with_dictionary(name: impl Into<String>) -> Self {
        Self {
            dictionary: Some(name.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RawPage;

    #[test]
    fn parses_abbreviated_keys() {
        let body = r#"{
            "results": [{"result": {"data": {
                "descriptor": {"Select": [{"Kind": 1, "Value": "G0",
                    "GroupKeys": [{"Source": {"Entity": "Account", "Property": "Account Number"}}]}]},
                "dsr": {"DS": [{
                    "PH": [{"DM0": [
                        {"S": [{"N": "G0", "T": 1, "DN": "D0"}], "C": [0]},
                        {"C": [], "R": 1},
                        {"Ø": 1}
                    ]}],
                    "ValueDicts": {"D0": ["A-1"]},
                    "RT": [["'A-1'"]]
                }]}
            }}}]
        }"#;
        let page: RawPage = serde_json::from_str(body).expect("parse");
        let data = page.results[0]
            .result
            .as_ref()
            .and_then(|r| r.data.as_ref())
            .expect("data");
        let ds = &data.dsr.as_ref().expect("dsr").data_sets[0];
        let records = &ds.hierarchies[0].records;
        assert_eq!(records.len(), 3);
        assert_eq!(
            records[0].schema.as_ref().expect("schema")[0]
                .dictionary
                .as_deref(),
            Some("D0")
        );
        assert_eq!(records[1].copy_bits, Some(1));
        assert_eq!(records[2].null_bits, Some(1));
        assert!(records[2].cells.is_empty());
        assert_eq!(ds.restart_tokens.len(), 1);
    }

    #[test]
    fn empty_object_is_an_empty_page() {
        let page: RawPage = serde_json::from_str("{}").expect("parse");
        assert!(page.results.is_empty());
    }
}
