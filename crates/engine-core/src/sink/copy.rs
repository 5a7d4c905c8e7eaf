use crate::{
    encode::CsvDialect,
    error::SinkError,
    sink::{EncodedRow, Sink, quote_ident, sql_char_literal},
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::SinkExt;
use std::pin::Pin;
use tokio_postgres::{CopyInSink, Transaction};
use tracing::debug;

/// Streaming CSV COPY sink: the bulk-load hot path.
///
/// Encoded lines accumulate in a byte buffer and go to the COPY stream as
/// whole chunks; there are no intermediate pipes, temporary files, or
/// producer/consumer channels between the encoder and the wire. Exactly one
/// COPY stream per partition.
///
/// With `replace` the statement carries the target's REPLACE extension and
/// the stream upserts instead of aborting on an existing primary key.
pub struct StreamCopySink<'a> {
    tx: &'a Transaction<'a>,
    statement: String,
    buffer: BytesMut,
    buffered_rows: usize,
    flush_every: usize,
    stream: Option<Pin<Box<CopyInSink<Bytes>>>>,
    done: bool,
}

impl<'a> StreamCopySink<'a> {
    pub fn new(
        tx: &'a Transaction<'a>,
        schema: &str,
        table: &str,
        columns: &[String],
        dialect: &CsvDialect,
        replace: bool,
        flush_every: usize,
        buffer_size: usize,
    ) -> Self {
        let statement = copy_statement(schema, table, columns, dialect, replace);
        Self {
            tx,
            statement,
            buffer: BytesMut::with_capacity(buffer_size),
            buffered_rows: 0,
            flush_every: flush_every.max(1),
            stream: None,
            done: false,
        }
    }
}

fn copy_statement(
    schema: &str,
    table: &str,
    columns: &[String],
    dialect: &CsvDialect,
    replace: bool,
) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let mut options = format!(
        "FORMAT csv, DELIMITER {}, NULL '', QUOTE {}, ESCAPE {}",
        sql_char_literal(dialect.delimiter),
        sql_char_literal(dialect.quote),
        sql_char_literal(dialect.quote),
    );
    if replace {
        options.push_str(", REPLACE");
    }
    format!(
        "COPY {}.{} ({column_list}) FROM STDIN WITH ({options})",
        quote_ident(schema),
        quote_ident(table),
    )
}

#[async_trait]
impl Sink for StreamCopySink<'_> {
    async fn start(&mut self) -> Result<(), SinkError> {
        if self.done {
            return Err(SinkError::Closed);
        }
        debug!(statement = %self.statement, "Opening COPY stream");
        let stream = self.tx.copy_in::<_, Bytes>(&self.statement).await?;
        self.stream = Some(Box::pin(stream));
        Ok(())
    }

    async fn add_row(&mut self, row: EncodedRow) -> Result<(), SinkError> {
        let EncodedRow::CsvLine(line) = row else {
            return Err(SinkError::Protocol(
                "StreamCopySink accepts CSV lines only".to_string(),
            ));
        };
        if self.stream.is_none() {
            return Err(SinkError::Closed);
        }

        self.buffer.extend_from_slice(line.as_bytes());
        self.buffered_rows += 1;
        if self.buffered_rows >= self.flush_every {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(SinkError::Closed);
        };

        let chunk = self.buffer.split().freeze();
        stream.as_mut().send(chunk).await?;
        self.buffered_rows = 0;
        Ok(())
    }

    async fn end(&mut self) -> Result<u64, SinkError> {
        self.flush().await?;
        let Some(mut stream) = self.stream.take() else {
            return Err(SinkError::Closed);
        };
        self.done = true;
        let rows = stream.as_mut().finish().await?;
        Ok(rows)
    }

    async fn cancel(&mut self) {
        // Dropping the stream without finish() aborts the server-side COPY;
        // the containing transaction is rolled back by the executor.
        self.stream = None;
        self.buffer.clear();
        self.buffered_rows = 0;
        self.done = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn copy_statement_spells_the_fixed_dialect() {
        let sql = copy_statement(
            "public",
            "events",
            &cols(&["id", "payload"]),
            &CsvDialect::default(),
            false,
        );
        assert_eq!(
            sql,
            "COPY \"public\".\"events\" (\"id\", \"payload\") FROM STDIN \
             WITH (FORMAT csv, DELIMITER ',', NULL '', QUOTE '\"', ESCAPE '\"')"
        );
    }

    #[test]
    fn replace_option_turns_copy_into_upsert() {
        let sql = copy_statement(
            "public",
            "events",
            &cols(&["id"]),
            &CsvDialect::default(),
            true,
        );
        assert!(sql.ends_with(", REPLACE)"));
    }
}
