use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A single source cell, normalized to the types the target understands.
///
/// Non-scalar source types (lists, sets, maps, UDTs) are carried as `Json`;
/// SQL NULL is represented as the absence of a value (`Option<Value>::None`
/// in a [`crate::core::row::Row`]), never as a variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Decimal(BigDecimal),
    Text(String),
    Uuid(Uuid),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

impl Value {
    /// Renders the value as the text the target's CSV parser will re-read:
    /// timestamps ISO-8601 UTC (microseconds), dates `YYYY-MM-DD`, UUIDs
    /// canonical hex, binary base64, collections JSON.
    pub fn render_text(&self) -> String {
        match self {
            Value::Boolean(v) => v.to_string(),
            Value::TinyInt(v) => v.to_string(),
            Value::SmallInt(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::BigInt(v) => v.to_string(),
            Value::Float(v) => ryu::Buffer::new().format(*v).to_string(),
            Value::Double(v) => ryu::Buffer::new().format(*v).to_string(),
            Value::Decimal(v) => v.to_string(),
            Value::Text(v) => v.clone(),
            Value::Uuid(v) => v.hyphenated().to_string(),
            Value::Bytes(v) => BASE64.encode(v),
            Value::Date(v) => v.format("%Y-%m-%d").to_string(),
            Value::Timestamp(v) => v.to_rfc3339_opts(SecondsFormat::Micros, true),
            Value::Json(v) => v.to_string(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(*v as i64),
            Value::SmallInt(v) => Some(*v as i64),
            Value::Int(v) => Some(*v as i64),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn size_bytes(&self) -> usize {
        match self {
            Value::Boolean(_) => 1,
            Value::TinyInt(_) => 1,
            Value::SmallInt(_) => 2,
            Value::Int(_) | Value::Float(_) => 4,
            Value::BigInt(_) | Value::Double(_) => 8,
            Value::Decimal(v) => v.to_string().len(),
            Value::Text(v) => v.len(),
            Value::Uuid(_) => 16,
            Value::Bytes(v) => v.len(),
            Value::Date(_) => 4,
            Value::Timestamp(_) => 8,
            Value::Json(v) => serde_json::to_string(v).map_or(0, |s| s.len()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    #[test]
    fn timestamps_render_iso8601_utc_micros() {
        let ts = Utc.with_ymd_and_hms(2024, 12, 16, 8, 30, 5).unwrap();
        assert_eq!(
            Value::Timestamp(ts).render_text(),
            "2024-12-16T08:30:05.000000Z"
        );
    }

    #[test]
    fn dates_render_ymd() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(Value::Date(d).render_text(), "2024-02-29");
    }

    #[test]
    fn uuids_render_canonical_hex() {
        let u = Uuid::from_str("A0EEBC99-9C0B-4EF8-BB6D-6BB9BD380A11").unwrap();
        assert_eq!(
            Value::Uuid(u).render_text(),
            "a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11"
        );
    }

    #[test]
    fn bytes_render_base64() {
        assert_eq!(Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef]).render_text(), "3q2+7w==");
    }

    #[test]
    fn collections_render_json() {
        let v = serde_json::json!({"a": [1, 2], "b": null});
        assert_eq!(Value::Json(v).render_text(), r#"{"a":[1,2],"b":null}"#);
    }

    #[test]
    fn decimals_render_plain() {
        let d = BigDecimal::from_str("-12345.6789").unwrap();
        assert_eq!(Value::Decimal(d).render_text(), "-12345.6789");
    }
}
