// Bit-indexed delta reconstruction of encoded records into full-width rows.
use serde_json::Value;

use crate::core::error::{Error, ErrorKind};
use crate::core::wire::DeltaRecord;

pub type Row = Vec<Value>;

/// Column bitset as sent on the wire. Bits beyond the integer width are unset.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Bitset(u64);

impl Bitset {
    pub fn new(bits: u64) -> Self {
        Self(bits)
    }

    pub fn is_set(self, index: usize) -> bool {
        u32::try_from(index)
            .ok()
            .and_then(|shift| self.0.checked_shr(shift))
            .is_some_and(|shifted| shifted & 1 == 1)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Expands `record` to `width` cells.
///
/// Positions are filled strictly left to right: a copy bit takes the value
/// from `previous`, otherwise a null bit yields null, otherwise the next
/// unconsumed partial cell is placed. `previous` must be the reconstructed
/// (not yet dictionary-resolved) row before this one.
pub fn reconstruct(
    width: usize,
    previous: Option<&[Value]>,
    record: &DeltaRecord,
    record_index: usize,
) -> Result<Row, Error> {
    let copy = Bitset::new(record.copy_bits.unwrap_or(0));
    let null = Bitset::new(record.null_bits.unwrap_or(0));

    let mut partial = record.cells.iter();
    let mut row = Vec::with_capacity(width);
    for i in 0..width {
        if copy.is_set(i) {
            let Some(previous) = previous else {
                return Err(Error::new(ErrorKind::Decode)
                    .with_message("copy bit set without a previous row")
                    .with_record(record_index)
                    .with_column(i));
            };
            let value = previous.get(i).ok_or_else(|| {
                Error::new(ErrorKind::Decode)
                    .with_message("copy bit references a column the previous row lacks")
                    .with_record(record_index)
                    .with_column(i)
            })?;
            row.push(value.clone());
        } else if null.is_set(i) {
            row.push(Value::Null);
        } else {
            let value = partial.next().ok_or_else(|| {
                Error::new(ErrorKind::Decode)
                    .with_message(format!(
                        "row width mismatch: ran out of cells before {width} columns"
                    ))
                    .with_record(record_index)
                    .with_column(i)
            })?;
            row.push(value.clone());
        }
    }

    let leftover = partial.count();
    if leftover > 0 {
        return Err(Error::new(ErrorKind::Decode)
            .with_message(format!(
                "row width mismatch: {leftover} cells left over after {width} columns"
            ))
            .with_record(record_index));
    }
    Ok(row)
}
