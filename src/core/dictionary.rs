// Per-page value dictionaries and index-to-literal resolution.
use std::collections::HashMap;

use serde_json::Value;

use crate::core::error::{Error, ErrorKind};
use crate::core::wire::ColumnDescriptor;

/// Dictionaries embedded in one page. Built fresh for every page.
#[derive(Clone, Debug, Default)]
pub struct ValueDictionaries {
    entries: HashMap<String, Vec<Value>>,
}

impl ValueDictionaries {
    pub fn new(entries: HashMap<String, Vec<Value>>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&[Value]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Replaces integer cells of dictionary-backed columns with their literals.
///
/// Cells that are not integers (already literal, null, strings) are left as
/// they are, so resolving a row of literal dictionaries twice changes nothing.
pub fn resolve(
    schema: &[ColumnDescriptor],
    dictionaries: &ValueDictionaries,
    row: &mut [Value],
    record_index: usize,
) -> Result<(), Error> {
    for (column, descriptor) in schema.iter().enumerate() {
        let Some(name) = descriptor.dictionary.as_deref() else {
            continue;
        };
        let Some(cell) = row.get_mut(column) else {
            continue;
        };
        let Some(index) = integer_index(cell) else {
            continue;
        };
        let dictionary = dictionaries.get(name).ok_or_else(|| {
            Error::new(ErrorKind::Decode)
                .with_message(format!("column references unknown dictionary {name:?}"))
                .with_record(record_index)
                .with_column(column)
        })?;
        let literal = usize::try_from(index)
            .ok()
            .and_then(|i| dictionary.get(i))
            .ok_or_else(|| {
                Error::new(ErrorKind::Decode)
                    .with_message(format!(
                        "index {index} out of range for dictionary {name:?} ({} entries)",
                        dictionary.len()
                    ))
                    .with_record(record_index)
                    .with_column(column)
            })?;
        *cell = literal.clone();
    }
    Ok(())
}

fn integer_index(value: &Value) -> Option<i128> {
    let Value::Number(number) = value else {
        return None;
    };
    number
        .as_i64()
        .map(i128::from)
        .or_else(|| number.as_u64().map(i128::from))
}

#[cfg(test)]
mod tests {
    use super::{ValueDictionaries, resolve};
    use crate::core::error::ErrorKind;
    use crate::core::wire::ColumnDescriptor;
    use serde_json::{Value, json};
    use std::collections::HashMap;

    fn colors() -> ValueDictionaries {
        let mut entries = HashMap::new();
        entries.insert(
            "D1".to_string(),
            vec![json!("red"), json!("green"), json!("blue")],
        );
        ValueDictionaries::new(entries)
    }

    #[test]
    fn integer_cells_resolve_to_literals() {
        let schema = vec![
            ColumnDescriptor::with_dictionary("D1"),
            ColumnDescriptor::with_dictionary("D1"),
            ColumnDescriptor::plain(),
        ];
        let mut row = vec![json!(0), json!(2), json!("x")];
        resolve(&schema, &colors(), &mut row, 0).expect("resolve");
        assert_eq!(row, vec![json!("red"), json!("blue"), json!("x")]);
    }

    #[test]
    fn plain_columns_keep_integers() {
        let schema = vec![ColumnDescriptor::plain(), ColumnDescriptor::with_dictionary("D1")];
        let mut row = vec![json!(1), json!(1)];
        resolve(&schema, &colors(), &mut row, 0).expect("resolve");
        assert_eq!(row, vec![json!(1), json!("green")]);
    }

    #[test]
    fn resolving_twice_is_a_no_op() {
        let schema = vec![ColumnDescriptor::with_dictionary("D1"), ColumnDescriptor::plain()];
        let mut row = vec![json!(1), Value::Null];
        resolve(&schema, &colors(), &mut row, 0).expect("first");
        let once = row.clone();
        resolve(&schema, &colors(), &mut row, 0).expect("second");
        assert_eq!(row, once);
    }

    #[test]
    fn non_integer_cells_are_untouched() {
        let schema = vec![ColumnDescriptor::with_dictionary("D1"); 3];
        let mut row = vec![json!("literal"), Value::Null, json!(1.5)];
        resolve(&schema, &colors(), &mut row, 0).expect("resolve");
        assert_eq!(row, vec![json!("literal"), Value::Null, json!(1.5)]);
    }

    #[test]
    fn out_of_range_index_is_decode_error() {
        let schema = vec![ColumnDescriptor::plain(), ColumnDescriptor::with_dictionary("D1")];
        let mut row = vec![json!(0), json!(3)];
        let err = resolve(&schema, &colors(), &mut row, 7).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(err.record(), Some(7));
        assert_eq!(err.column(), Some(1));
    }

    #[test]
    fn negative_index_is_decode_error() {
        let schema = vec![ColumnDescriptor::with_dictionary("D1")];
        let mut row = vec![json!(-1)];
        let err = resolve(&schema, &colors(), &mut row, 0).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn unknown_dictionary_is_decode_error() {
        let schema = vec![ColumnDescriptor::with_dictionary("D9")];
        let mut row = vec![json!(0)];
        let err = resolve(&schema, &colors(), &mut row, 0).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Decode);
    }
}
