use crate::{
    error::{ConnectError, ReadError},
    source::{RowStream, SourceEstimate, SourceReader, SplitHint, partition_count_for},
};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, num_bigint::BigInt};
use chrono::{DateTime, NaiveDate, NaiveTime};
use futures::StreamExt;
use model::{
    core::{row::Row, value::Value},
    migration::partition::{PartitionDescriptor, split_token_ring},
};
use scylla::{
    ExecutionProfile, Session, SessionBuilder,
    frame::response::result::CqlValue,
    transport::load_balancing::DefaultPolicy,
};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

const COLUMNS_CQL: &str = "SELECT column_name, kind, position FROM system_schema.columns \
     WHERE keyspace_name = ? AND table_name = ?";

const SIZE_ESTIMATES_CQL: &str = "SELECT mean_partition_size, partitions_count FROM system.size_estimates \
     WHERE keyspace_name = ? AND table_name = ?";

#[derive(Debug, Clone)]
pub struct CassandraOptions {
    pub hosts: Vec<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub local_dc: Option<String>,
    pub fetch_size: i32,
    pub read_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
struct TableShape {
    columns: Vec<String>,
    partition_keys: Vec<String>,
}

/// Token-range reader over a Cassandra/ScyllaDB table. One partition is a
/// half-open slice of the Murmur3 ring; the driver pages within it, so the
/// reader never holds more than one page ahead of the sink.
pub struct CassandraSource {
    session: Session,
    keyspace: String,
    table: String,
    fetch_size: i32,
    shape: OnceCell<TableShape>,
}

impl CassandraSource {
    pub async fn connect(
        options: CassandraOptions,
        keyspace: &str,
        table: &str,
    ) -> Result<Self, ConnectError> {
        let nodes: Vec<String> = options
            .hosts
            .iter()
            .map(|h| format!("{h}:{}", options.port))
            .collect();

        let mut builder = SessionBuilder::new().known_nodes(&nodes);
        if let (Some(user), Some(pass)) = (&options.username, &options.password) {
            builder = builder.user(user.clone(), pass.clone());
        }

        let mut profile = ExecutionProfile::builder();
        if let Some(dc) = &options.local_dc {
            let policy = DefaultPolicy::builder()
                .prefer_datacenter(dc.clone())
                .build();
            profile = profile.load_balancing_policy(policy);
        }
        if let Some(timeout) = options.read_timeout {
            profile = profile.request_timeout(Some(timeout));
        }
        builder = builder.default_execution_profile_handle(profile.build().into_handle());

        let session = builder.build().await?;
        debug!(keyspace, table, "Cassandra session established");

        Ok(Self {
            session,
            keyspace: keyspace.to_string(),
            table: table.to_string(),
            fetch_size: options.fetch_size,
            shape: OnceCell::new(),
        })
    }

    async fn shape(&self) -> Result<&TableShape, ReadError> {
        self.shape
            .get_or_try_init(|| self.load_shape())
            .await
    }

    async fn load_shape(&self) -> Result<TableShape, ReadError> {
        let result = self
            .session
            .query(COLUMNS_CQL, (&self.keyspace, &self.table))
            .await?;

        let mut columns: Vec<(String, String, i32)> = Vec::new();
        let rows = result
            .rows_typed::<(String, String, i32)>()
            .map_err(|e| ReadError::CqlDecode(e.to_string()))?;
        for row in rows {
            columns.push(row.map_err(|e| ReadError::CqlDecode(e.to_string()))?);
        }

        if columns.is_empty() {
            return Err(ReadError::Schema(format!(
                "Table {}.{} has no columns in system_schema",
                self.keyspace, self.table
            )));
        }

        // Source-declared order: partition keys, clustering keys (each by
        // position), then the remaining columns by name.
        columns.sort_by(|a, b| {
            (kind_rank(&a.1), a.2, a.0.as_str()).cmp(&(kind_rank(&b.1), b.2, b.0.as_str()))
        });

        let partition_keys = columns
            .iter()
            .filter(|(_, kind, _)| kind == "partition_key")
            .map(|(name, _, _)| name.clone())
            .collect::<Vec<_>>();
        if partition_keys.is_empty() {
            return Err(ReadError::Schema(format!(
                "Table {}.{} exposes no partition key",
                self.keyspace, self.table
            )));
        }

        Ok(TableShape {
            columns: columns.into_iter().map(|(name, _, _)| name).collect(),
            partition_keys,
        })
    }

    async fn size_estimates(&self) -> Result<Option<SourceEstimate>, ReadError> {
        let result = self
            .session
            .query(SIZE_ESTIMATES_CQL, (&self.keyspace, &self.table))
            .await?;

        let mut range_sizes: Vec<u64> = Vec::new();
        let rows = result
            .rows_typed::<(i64, i64)>()
            .map_err(|e| ReadError::CqlDecode(e.to_string()))?;
        for row in rows {
            let (mean_partition_size, partitions_count) =
                row.map_err(|e| ReadError::CqlDecode(e.to_string()))?;
            let total = (mean_partition_size.max(0) as u64)
                .saturating_mul(partitions_count.max(0) as u64);
            if total > 0 {
                range_sizes.push(total);
            }
        }

        if range_sizes.is_empty() {
            return Ok(None);
        }

        let table_size: u64 = range_sizes.iter().sum();
        let mean = table_size as f64 / range_sizes.len() as f64;
        let max = *range_sizes.iter().max().unwrap_or(&0) as f64;

        Ok(Some(SourceEstimate {
            table_size_bytes: Some(table_size),
            skew_ratio: Some(max / mean),
        }))
    }
}

#[async_trait]
impl SourceReader for CassandraSource {
    async fn columns(&self) -> Result<Vec<String>, ReadError> {
        Ok(self.shape().await?.columns.clone())
    }

    async fn estimate(&self) -> SourceEstimate {
        match self.size_estimates().await {
            Ok(Some(estimate)) => estimate,
            Ok(None) => {
                debug!(
                    keyspace = %self.keyspace,
                    table = %self.table,
                    "No size estimates on the source; treating table size as unknown"
                );
                SourceEstimate::default()
            }
            Err(err) => {
                warn!(%err, "Failed to read source size estimates");
                SourceEstimate::default()
            }
        }
    }

    async fn enumerate_partitions(
        &self,
        split: SplitHint,
    ) -> Result<Vec<PartitionDescriptor>, ReadError> {
        let estimate = self.estimate().await;
        let count = partition_count_for(estimate.table_size_bytes, split.split_mb);
        debug!(
            partitions = count,
            split_mb = split.split_mb,
            "Enumerated token-range partitions"
        );
        Ok(split_token_ring(count))
    }

    async fn read(&self, descriptor: &PartitionDescriptor) -> Result<RowStream<'_>, ReadError> {
        let shape = self.shape().await?;
        let token_expr = format!("token({})", shape.partition_keys.join(", "));
        // The topmost range includes i64::MAX itself; every other range is
        // half-open.
        let upper_op = if descriptor.closes_ring() { "<=" } else { "<" };
        let cql = format!(
            "SELECT {} FROM {}.{} WHERE {token_expr} >= ? AND {token_expr} {upper_op} ?",
            shape.columns.join(", "),
            self.keyspace,
            self.table,
        );

        let mut prepared = self.session.prepare(cql).await?;
        prepared.set_page_size(self.fetch_size);

        let iter = self
            .session
            .execute_iter(prepared, (descriptor.token_min, descriptor.token_max))
            .await?;

        let stream = iter.map(|item| {
            let row = item.map_err(ReadError::from)?;
            Ok(Row::new(
                row.columns
                    .into_iter()
                    .map(|cell| cell.map(cql_to_value))
                    .collect(),
            ))
        });
        Ok(Box::pin(stream))
    }
}

fn kind_rank(kind: &str) -> u8 {
    match kind {
        "partition_key" => 0,
        "clustering" => 1,
        "static" => 2,
        _ => 3,
    }
}

/// Total conversion from a driver cell to the engine value model: scalars map
/// directly, collections and UDTs go to JSON, everything exotic degrades to
/// text rather than failing the row.
fn cql_to_value(value: CqlValue) -> Value {
    match value {
        CqlValue::Ascii(s) | CqlValue::Text(s) => Value::Text(s),
        CqlValue::Boolean(v) => Value::Boolean(v),
        CqlValue::TinyInt(v) => Value::TinyInt(v),
        CqlValue::SmallInt(v) => Value::SmallInt(v),
        CqlValue::Int(v) => Value::Int(v),
        CqlValue::BigInt(v) => Value::BigInt(v),
        CqlValue::Counter(c) => Value::BigInt(c.0),
        CqlValue::Float(v) => Value::Float(v),
        CqlValue::Double(v) => Value::Double(v),
        CqlValue::Decimal(d) => {
            let (digits, exponent) = d.as_signed_be_bytes_slice_and_exponent();
            Value::Decimal(BigDecimal::new(
                BigInt::from_signed_bytes_be(digits),
                exponent as i64,
            ))
        }
        CqlValue::Varint(v) => Value::Decimal(BigDecimal::new(
            BigInt::from_signed_bytes_be(v.as_signed_bytes_be_slice()),
            0,
        )),
        CqlValue::Uuid(u) => Value::Uuid(u),
        CqlValue::Timeuuid(t) => Value::Uuid(Uuid::from(t)),
        CqlValue::Blob(b) => Value::Bytes(b),
        CqlValue::Inet(ip) => Value::Text(ip.to_string()),
        CqlValue::Date(d) => {
            let days_since_epoch = d.0 as i64 - (1 << 31);
            match NaiveDate::from_num_days_from_ce_opt((days_since_epoch + 719_163) as i32) {
                Some(date) => Value::Date(date),
                None => Value::Text(days_since_epoch.to_string()),
            }
        }
        CqlValue::Time(t) => {
            let secs = (t.0 / 1_000_000_000) as u32;
            let nanos = (t.0 % 1_000_000_000) as u32;
            match NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos) {
                Some(time) => Value::Text(time.format("%H:%M:%S%.6f").to_string()),
                None => Value::Text(t.0.to_string()),
            }
        }
        CqlValue::Timestamp(ts) => match DateTime::from_timestamp_millis(ts.0) {
            Some(dt) => Value::Timestamp(dt),
            None => Value::Text(ts.0.to_string()),
        },
        CqlValue::Duration(d) => {
            Value::Text(format!("{}mo{}d{}ns", d.months, d.days, d.nanoseconds))
        }
        CqlValue::Empty => Value::Text(String::new()),
        other => Value::Json(cql_to_json(&other)),
    }
}

fn cql_to_json(value: &CqlValue) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        CqlValue::List(items) | CqlValue::Set(items) => {
            Json::Array(items.iter().map(cql_to_json).collect())
        }
        CqlValue::Tuple(items) => Json::Array(
            items
                .iter()
                .map(|item| item.as_ref().map_or(Json::Null, cql_to_json))
                .collect(),
        ),
        CqlValue::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| (json_key(k), cql_to_json(v)))
                .collect(),
        ),
        CqlValue::UserDefinedType { fields, .. } => Json::Object(
            fields
                .iter()
                .map(|(name, field)| {
                    (
                        name.clone(),
                        field.as_ref().map_or(Json::Null, cql_to_json),
                    )
                })
                .collect(),
        ),
        scalar => scalar_to_json(scalar),
    }
}

fn scalar_to_json(value: &CqlValue) -> serde_json::Value {
    use serde_json::Value as Json;
    match cql_to_value(value.clone()) {
        Value::Boolean(v) => Json::Bool(v),
        Value::TinyInt(v) => Json::from(v),
        Value::SmallInt(v) => Json::from(v),
        Value::Int(v) => Json::from(v),
        Value::BigInt(v) => Json::from(v),
        Value::Float(v) => serde_json::Number::from_f64(v as f64).map_or(Json::Null, Json::Number),
        Value::Double(v) => serde_json::Number::from_f64(v).map_or(Json::Null, Json::Number),
        other => Json::String(other.render_text()),
    }
}

fn json_key(key: &CqlValue) -> String {
    cql_to_value(key.clone()).render_text()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_cells_map_to_typed_values() {
        assert_eq!(
            cql_to_value(CqlValue::Text("abc".into())),
            Value::Text("abc".into())
        );
        assert_eq!(cql_to_value(CqlValue::Int(7)), Value::Int(7));
        assert_eq!(cql_to_value(CqlValue::BigInt(-1)), Value::BigInt(-1));
        assert_eq!(cql_to_value(CqlValue::Boolean(true)), Value::Boolean(true));
        assert_eq!(
            cql_to_value(CqlValue::Blob(vec![1, 2])),
            Value::Bytes(vec![1, 2])
        );
    }

    #[test]
    fn epoch_date_converts() {
        // 1 << 31 is the CQL date encoding of 1970-01-01.
        let v = cql_to_value(CqlValue::Date(scylla::frame::value::CqlDate(1 << 31)));
        assert_eq!(
            v,
            Value::Date(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap())
        );
    }

    #[test]
    fn collections_become_json() {
        let v = cql_to_value(CqlValue::List(vec![
            CqlValue::Int(1),
            CqlValue::Int(2),
        ]));
        assert_eq!(v, Value::Json(serde_json::json!([1, 2])));

        let v = cql_to_value(CqlValue::Map(vec![(
            CqlValue::Text("k".into()),
            CqlValue::BigInt(9),
        )]));
        assert_eq!(v, Value::Json(serde_json::json!({"k": 9})));
    }

    #[test]
    fn empty_cell_is_empty_text_not_null() {
        assert_eq!(cql_to_value(CqlValue::Empty), Value::Text(String::new()));
    }

    #[test]
    fn system_schema_order_is_pk_clustering_then_regular() {
        assert!(kind_rank("partition_key") < kind_rank("clustering"));
        assert!(kind_rank("clustering") < kind_rank("static"));
        assert!(kind_rank("static") < kind_rank("regular"));
    }
}
