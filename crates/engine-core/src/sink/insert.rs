use crate::{
    error::SinkError,
    sink::{EncodedRow, Sink, quote_ident},
};
use async_trait::async_trait;
use model::core::value::Value;
use rust_decimal::Decimal as RustDecimal;
use std::str::FromStr;
use tokio_postgres::{Statement, Transaction, types::Json as PgJson, types::ToSql};
use tracing::debug;

/// Idempotent batch sink: prepared `INSERT … ON CONFLICT DO NOTHING`.
///
/// Slower than the COPY path, but reprocessing a partition whose earlier
/// attempt committed becomes a no-op, which is what makes resume safe
/// against a non-empty target. Per-row update counts split inserted rows
/// from duplicate skips.
pub struct BatchInsertSink<'a> {
    tx: &'a Transaction<'a>,
    sql: String,
    statement: Option<Statement>,
    batch: Vec<Vec<Option<Value>>>,
    batch_size: usize,
    rows_written: u64,
    duplicates: u64,
    done: bool,
}

impl<'a> BatchInsertSink<'a> {
    pub fn new(
        tx: &'a Transaction<'a>,
        schema: &str,
        table: &str,
        columns: &[String],
        pk_columns: &[String],
        batch_size: usize,
    ) -> Self {
        Self {
            tx,
            sql: insert_statement(schema, table, columns, pk_columns),
            statement: None,
            batch: Vec::with_capacity(batch_size),
            batch_size: batch_size.max(1),
            rows_written: 0,
            duplicates: 0,
            done: false,
        }
    }
}

fn insert_statement(schema: &str, table: &str, columns: &[String], pk_columns: &[String]) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=columns.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let conflict_target = pk_columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {}.{} ({column_list}) VALUES ({placeholders}) \
         ON CONFLICT ({conflict_target}) DO NOTHING",
        quote_ident(schema),
        quote_ident(table),
    )
}

#[async_trait]
impl Sink for BatchInsertSink<'_> {
    async fn start(&mut self) -> Result<(), SinkError> {
        if self.done {
            return Err(SinkError::Closed);
        }
        debug!(statement = %self.sql, "Preparing idempotent insert");
        self.statement = Some(self.tx.prepare(&self.sql).await?);
        Ok(())
    }

    async fn add_row(&mut self, row: EncodedRow) -> Result<(), SinkError> {
        let EncodedRow::Params(params) = row else {
            return Err(SinkError::Protocol(
                "BatchInsertSink accepts positional parameters only".to_string(),
            ));
        };
        if self.statement.is_none() {
            return Err(SinkError::Closed);
        }

        self.batch.push(params);
        if self.batch.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let Some(statement) = self.statement.clone() else {
            return Err(SinkError::Closed);
        };

        let bound: Vec<PgParams> = self.batch.drain(..).map(PgParams::from_row).collect();
        let tx = self.tx;

        // The driver pipelines statements that are in flight concurrently on
        // one connection; that is its batching idiom.
        let counts = futures::future::try_join_all(bound.iter().map(|params| {
            let statement = statement.clone();
            async move {
                let refs = params.as_refs();
                tx.execute(&statement, &refs).await
            }
        }))
        .await?;

        for count in counts {
            if count > 0 {
                self.rows_written += 1;
            } else {
                self.duplicates += 1;
            }
        }
        Ok(())
    }

    async fn end(&mut self) -> Result<u64, SinkError> {
        if self.done {
            return Err(SinkError::Closed);
        }
        self.flush().await?;
        self.done = true;
        self.statement = None;
        Ok(self.rows_written)
    }

    fn rows_skipped_duplicates(&self) -> u64 {
        self.duplicates
    }

    async fn cancel(&mut self) {
        self.batch.clear();
        self.statement = None;
        self.done = true;
    }
}

struct PgParams(Vec<Box<dyn ToSql + Sync + Send>>);

impl PgParams {
    fn from_row(row: Vec<Option<Value>>) -> Self {
        PgParams(row.into_iter().map(bind_value).collect())
    }

    fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.0
            .iter()
            .map(|param| param.as_ref() as &(dyn ToSql + Sync))
            .collect()
    }
}

fn bind_value(value: Option<Value>) -> Box<dyn ToSql + Sync + Send> {
    let Some(value) = value else {
        return Box::new(Option::<String>::None);
    };
    match value {
        Value::Boolean(v) => Box::new(v),
        Value::TinyInt(v) => Box::new(v as i16),
        Value::SmallInt(v) => Box::new(v),
        Value::Int(v) => Box::new(v),
        Value::BigInt(v) => Box::new(v),
        Value::Float(v) => Box::new(v),
        Value::Double(v) => Box::new(v),
        Value::Decimal(v) => match RustDecimal::from_str(&v.to_string()) {
            Ok(decimal) => Box::new(decimal),
            // Out of the binary decimal's range: let the server parse it.
            Err(_) => Box::new(v.to_string()),
        },
        Value::Text(v) => Box::new(v),
        Value::Uuid(v) => Box::new(v),
        Value::Bytes(v) => Box::new(v),
        Value::Date(v) => Box::new(v),
        Value::Timestamp(v) => Box::new(v),
        Value::Json(v) => Box::new(PgJson(v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn insert_statement_targets_the_primary_key() {
        let sql = insert_statement(
            "public",
            "events",
            &cols(&["id", "ts", "payload"]),
            &cols(&["id", "ts"]),
        );
        assert_eq!(
            sql,
            "INSERT INTO \"public\".\"events\" (\"id\", \"ts\", \"payload\") \
             VALUES ($1, $2, $3) ON CONFLICT (\"id\", \"ts\") DO NOTHING"
        );
    }

    #[test]
    fn null_binds_as_typed_none() {
        let params = PgParams::from_row(vec![None, Some(Value::BigInt(1))]);
        assert_eq!(params.as_refs().len(), 2);
    }
}
