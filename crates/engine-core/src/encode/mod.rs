use crate::error::EncodeError;
use model::core::{row::Row, value::Value};

pub mod constants;
pub mod csv;

pub use csv::CsvDialect;

/// The run's frozen target column list: mapped source columns in
/// source-declared order, then constant audit columns in config-declared
/// order. Identical for every partition of a run.
#[derive(Debug, Clone)]
pub struct TargetColumns {
    names: Vec<String>,
    source_count: usize,
}

impl TargetColumns {
    pub fn build(
        source_columns: &[String],
        mapping: &[(String, String)],
        constant_names: &[String],
    ) -> Self {
        let mut names: Vec<String> = source_columns
            .iter()
            .map(|source| {
                mapping
                    .iter()
                    .find(|(from, _)| from == source)
                    .map(|(_, to)| to.clone())
                    .unwrap_or_else(|| source.clone())
            })
            .collect();
        let source_count = names.len();
        names.extend(constant_names.iter().cloned());
        Self {
            names,
            source_count,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn source_count(&self) -> usize {
        self.source_count
    }
}

/// Converts source rows to the sink's wire form. One encoder per run; the
/// constant values are parsed once and appended to every row.
#[derive(Debug, Clone)]
pub struct RowEncoder {
    columns: TargetColumns,
    dialect: CsvDialect,
    constants: Vec<Value>,
    /// Pre-rendered constant texts for the CSV path.
    constant_texts: Vec<String>,
}

impl RowEncoder {
    pub fn new(columns: TargetColumns, constants: Vec<Value>, dialect: CsvDialect) -> Self {
        let constant_texts = constants.iter().map(Value::render_text).collect();
        Self {
            columns,
            dialect,
            constants,
            constant_texts,
        }
    }

    pub fn columns(&self) -> &TargetColumns {
        &self.columns
    }

    /// One CSV line, terminated with `\n`, for the streaming COPY sink.
    pub fn encode_csv(&self, row: &Row) -> Result<String, EncodeError> {
        self.check_arity(row)?;

        let mut line = String::with_capacity(row.size_bytes() + self.columns.names.len() * 2);
        for (i, value) in row.values.iter().enumerate() {
            if i > 0 {
                line.push(self.dialect.delimiter);
            }
            let text = value.as_ref().map(Value::render_text);
            self.dialect.write_field(&mut line, text.as_deref());
        }
        for text in &self.constant_texts {
            line.push(self.dialect.delimiter);
            self.dialect.write_field(&mut line, Some(text));
        }
        line.push('\n');
        Ok(line)
    }

    /// Typed positional parameters, row values then constants, for the batch
    /// insert sink.
    pub fn encode_params(&self, row: &Row) -> Result<Vec<Option<Value>>, EncodeError> {
        self.check_arity(row)?;

        let mut params = Vec::with_capacity(self.columns.names.len());
        params.extend(row.values.iter().cloned());
        params.extend(self.constants.iter().cloned().map(Some));
        Ok(params)
    }

    fn check_arity(&self, row: &Row) -> Result<(), EncodeError> {
        if row.len() != self.columns.source_count {
            return Err(EncodeError::Arity {
                expected: self.columns.source_count,
                got: row.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn encoder(constants: Vec<Value>) -> RowEncoder {
        let source = vec!["id".to_string(), "name".to_string(), "note".to_string()];
        let mapping = vec![("name".to_string(), "full_name".to_string())];
        let constant_names: Vec<String> = (0..constants.len())
            .map(|i| format!("const_{i}"))
            .collect();
        let columns = TargetColumns::build(&source, &mapping, &constant_names);
        RowEncoder::new(columns, constants, CsvDialect::default())
    }

    #[test]
    fn target_columns_keep_source_order_and_rename() {
        let enc = encoder(vec![Value::Text("MIGRATION".into())]);
        assert_eq!(
            enc.columns().names(),
            &["id", "full_name", "note", "const_0"]
        );
        assert_eq!(enc.columns().source_count(), 3);
    }

    #[test]
    fn null_empty_and_whitespace_stay_distinct_on_the_wire() {
        let enc = encoder(vec![]);
        let row = Row::new(vec![
            Some(Value::BigInt(1)),
            None,
            Some(Value::Text(String::new())),
        ]);
        assert_eq!(enc.encode_csv(&row).unwrap(), "1,,\"\"\n");

        let row = Row::new(vec![
            Some(Value::BigInt(2)),
            Some(Value::Text("   ".into())),
            None,
        ]);
        assert_eq!(enc.encode_csv(&row).unwrap(), "2,\"   \",\n");
    }

    #[test]
    fn constants_are_appended_to_every_line() {
        let ts = chrono::Utc.with_ymd_and_hms(2024, 12, 16, 0, 0, 0).unwrap();
        let enc = encoder(vec![
            Value::Text("MIGRATION".into()),
            Value::Timestamp(ts),
        ]);
        let row = Row::new(vec![Some(Value::BigInt(1)), None, None]);
        assert_eq!(
            enc.encode_csv(&row).unwrap(),
            "1,,,MIGRATION,2024-12-16T00:00:00.000000Z\n"
        );
    }

    #[test]
    fn params_carry_typed_constants() {
        let enc = encoder(vec![Value::BigInt(7)]);
        let row = Row::new(vec![Some(Value::BigInt(1)), None, None]);
        let params = enc.encode_params(&row).unwrap();
        assert_eq!(params.len(), 4);
        assert_eq!(params[0], Some(Value::BigInt(1)));
        assert_eq!(params[1], None);
        assert_eq!(params[3], Some(Value::BigInt(7)));
    }

    #[test]
    fn arity_mismatch_is_a_row_error() {
        let enc = encoder(vec![]);
        let row = Row::new(vec![Some(Value::BigInt(1))]);
        assert!(matches!(
            enc.encode_csv(&row),
            Err(EncodeError::Arity {
                expected: 3,
                got: 1
            })
        ));
    }
}
