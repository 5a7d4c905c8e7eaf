use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use model::core::value::Value;
use std::str::FromStr;

/// Parses one configured constant-column value. The grammar is small and
/// parsed once per run:
/// - `true` / `false` → boolean
/// - an optionally signed digit string → integer
/// - digits `.` digits → decimal
/// - `CURRENT_TIMESTAMP` (case-insensitive, quoted or bare) → the run's
///   start instant
/// - anything else → string, with one matched layer of surrounding quotes
///   stripped
pub fn parse_constant(raw: &str, run_start: DateTime<Utc>) -> Value {
    let trimmed = raw.trim();

    match trimmed {
        "true" => return Value::Boolean(true),
        "false" => return Value::Boolean(false),
        _ => {}
    }

    if is_integer_literal(trimmed) {
        return match trimmed.parse::<i64>() {
            Ok(v) => Value::BigInt(v),
            // Wider than i64: keep exact digits as a decimal.
            Err(_) => BigDecimal::from_str(trimmed)
                .map(Value::Decimal)
                .unwrap_or_else(|_| Value::Text(trimmed.to_string())),
        };
    }

    if is_decimal_literal(trimmed) {
        if let Ok(v) = BigDecimal::from_str(trimmed) {
            return Value::Decimal(v);
        }
    }

    let unquoted = strip_one_quote_layer(trimmed);
    if unquoted.eq_ignore_ascii_case("CURRENT_TIMESTAMP") {
        return Value::Timestamp(run_start);
    }
    Value::Text(unquoted.to_string())
}

fn is_integer_literal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_decimal_literal(s: &str) -> bool {
    let Some((int_part, frac_part)) = s.split_once('.') else {
        return false;
    };
    is_integer_literal(int_part)
        && !frac_part.is_empty()
        && frac_part.bytes().all(|b| b.is_ascii_digit())
}

fn strip_one_quote_layer(s: &str) -> &str {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"'))
            || (s.starts_with('\'') && s.ends_with('\'')))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 16, 0, 0, 0).unwrap()
    }

    #[test]
    fn booleans_parse() {
        assert_eq!(parse_constant("true", start()), Value::Boolean(true));
        assert_eq!(parse_constant("false", start()), Value::Boolean(false));
        // Quoted booleans are strings, not booleans.
        assert_eq!(
            parse_constant("'true'", start()),
            Value::Text("true".to_string())
        );
    }

    #[test]
    fn integers_parse() {
        assert_eq!(parse_constant("42", start()), Value::BigInt(42));
        assert_eq!(parse_constant("-7", start()), Value::BigInt(-7));
    }

    #[test]
    fn oversized_integers_keep_exact_digits() {
        let v = parse_constant("99999999999999999999", start());
        assert_eq!(
            v,
            Value::Decimal(BigDecimal::from_str("99999999999999999999").unwrap())
        );
    }

    #[test]
    fn decimals_parse() {
        assert_eq!(
            parse_constant("-3.25", start()),
            Value::Decimal(BigDecimal::from_str("-3.25").unwrap())
        );
        // A bare trailing dot is not a decimal literal.
        assert_eq!(parse_constant("3.", start()), Value::Text("3.".to_string()));
    }

    #[test]
    fn current_timestamp_is_case_insensitive_and_unquotable() {
        for raw in [
            "CURRENT_TIMESTAMP",
            "current_timestamp",
            "'CURRENT_TIMESTAMP'",
            "\"Current_Timestamp\"",
        ] {
            assert_eq!(parse_constant(raw, start()), Value::Timestamp(start()));
        }
    }

    #[test]
    fn strings_lose_exactly_one_quote_layer() {
        assert_eq!(
            parse_constant("'MIGRATION'", start()),
            Value::Text("MIGRATION".to_string())
        );
        assert_eq!(
            parse_constant("\"'nested'\"", start()),
            Value::Text("'nested'".to_string())
        );
        // Mismatched quotes stay as-is.
        assert_eq!(
            parse_constant("'half", start()),
            Value::Text("'half".to_string())
        );
    }

    #[test]
    fn dates_fall_through_as_strings() {
        assert_eq!(
            parse_constant("2024-12-16", start()),
            Value::Text("2024-12-16".to_string())
        );
    }
}
