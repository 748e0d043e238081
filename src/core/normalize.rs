//! Purpose: Post-process resolved cells before they reach the output file.
//! Exports: `Normalizer`, `CalendarZone`, `EPOCH_MILLIS_THRESHOLD`.
//! Role: Pure value-to-value rewriting applied to every cell of every row.
//! Invariants: Never fails; a value that cannot be converted is returned unchanged.
//! Invariants: Line breaks are removed from strings, never replaced with spaces.
//! Invariants: Dates render as `MM.DD.YYYY`.
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Numbers above this magnitude are taken as epoch milliseconds. Plausible
/// calendar timestamps (after 1973-03-03) exceed it; counts and codes do not.
pub const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Calendar used to render epoch-millisecond values.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CalendarZone {
    /// System offset in effect at each instant; UTC when it cannot be determined.
    Local,
    Utc,
}

#[derive(Clone, Copy, Debug)]
pub struct Normalizer {
    zone: CalendarZone,
}

impl Normalizer {
    pub fn new(zone: CalendarZone) -> Self {
        Self { zone }
    }

    pub fn zone(&self) -> CalendarZone {
        self.zone
    }

    pub fn normalize_row(&self, row: &mut [Value]) {
        for cell in row.iter_mut() {
            let value = std::mem::take(cell);
            *cell = self.normalize(value);
        }
    }

    pub fn normalize(&self, value: Value) -> Value {
        match value {
            Value::String(text) => {
                let text = strip_line_breaks(text);
                match self.iso_to_date(&text) {
                    Some(date) => Value::String(date),
                    None => Value::String(text),
                }
            }
            Value::Number(number) => match self.epoch_millis_to_date(&number) {
                Some(date) => Value::String(date),
                None => Value::Number(number),
            },
            other => other,
        }
    }

    fn epoch_millis_to_date(&self, number: &serde_json::Number) -> Option<String> {
        let nanos = if let Some(ms) = number.as_i64() {
            if ms.unsigned_abs() <= EPOCH_MILLIS_THRESHOLD as u64 {
                return None;
            }
            i128::from(ms) * 1_000_000
        } else if let Some(ms) = number.as_u64() {
            i128::from(ms) * 1_000_000
        } else {
            let ms = number.as_f64()?;
            if ms.abs() <= EPOCH_MILLIS_THRESHOLD as f64 {
                return None;
            }
            (ms * 1_000_000.0) as i128
        };
        let instant = OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?;
        let offset = match self.zone {
            CalendarZone::Utc => UtcOffset::UTC,
            CalendarZone::Local => UtcOffset::local_offset_at(instant).unwrap_or(UtcOffset::UTC),
        };
        let shifted = instant.checked_add(Duration::seconds(i64::from(offset.whole_seconds())))?;
        format_date(shifted.date())
    }

    fn iso_to_date(&self, text: &str) -> Option<String> {
        if !text.contains('T') || !text.contains('-') {
            return None;
        }
        if let Ok(parsed) = OffsetDateTime::parse(text, &Rfc3339) {
            return format_date(parsed.date());
        }
        let naive = [
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
            format_description!("[year]-[month]-[day]T[hour]:[minute]"),
        ];
        naive
            .into_iter()
            .find_map(|format| PrimitiveDateTime::parse(text, format).ok())
            .and_then(|parsed| format_date(parsed.date()))
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(CalendarZone::Local)
    }
}

fn strip_line_breaks(text: String) -> String {
    if text.contains(['\n', '\r']) {
        text.chars().filter(|c| *c != '\n' && *c != '\r').collect()
    } else {
        text
    }
}

fn format_date(date: Date) -> Option<String> {
    date.format(format_description!("[month].[day].[year]")).ok()
}
