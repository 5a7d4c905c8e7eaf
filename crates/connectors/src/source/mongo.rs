use crate::{
    error::{ConnectError, ReadError},
    source::{RowStream, SourceEstimate, SourceReader, SplitHint, partition_count_for},
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use bson::{Bson, Document, doc};
use futures::{StreamExt, TryStreamExt};
use model::{
    core::{row::Row, value::Value},
    migration::partition::PartitionDescriptor,
};
use mongodb::{Client, Collection, Database};
use std::{collections::HashMap, str::FromStr};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// `_id` samples drawn per requested partition when picking boundaries.
const BOUNDARY_OVERSAMPLE: usize = 10;
const MAX_BOUNDARY_SAMPLES: usize = 100_000;
const SIZE_SAMPLE_DOCS: i64 = 100;

#[derive(Debug, Clone)]
pub struct MongoOptions {
    pub uri: String,
    pub database: String,
    pub fetch_size: u32,
}

/// Document-store reader. The collection is split on sampled `_id` boundary
/// keys; descriptors are rangeless (`token_min == token_max == partition_id`)
/// because ObjectId bounds cannot live in the checkpoint schema, so the
/// boundaries stay inside the reader, keyed by partition id.
pub struct MongoSource {
    database: Database,
    collection: Collection<Document>,
    collection_name: String,
    fields: Vec<String>,
    fetch_size: u32,
    bounds: Mutex<HashMap<i32, (Option<Bson>, Option<Bson>)>>,
}

impl MongoSource {
    pub async fn connect(
        options: MongoOptions,
        collection: &str,
        fields: Vec<String>,
    ) -> Result<Self, ConnectError> {
        let client = Client::with_uri_str(&options.uri).await?;
        let database = client.database(&options.database);
        debug!(
            database = %options.database,
            collection,
            "MongoDB client established"
        );

        Ok(Self {
            collection: database.collection::<Document>(collection),
            database,
            collection_name: collection.to_string(),
            fields,
            fetch_size: options.fetch_size,
            bounds: Mutex::new(HashMap::new()),
        })
    }

    async fn coll_stats_size(&self) -> Result<Option<u64>, ReadError> {
        let stats = self
            .database
            .run_command(doc! { "collStats": &self.collection_name })
            .await?;
        Ok(numeric(&stats, "size").map(|v| v as u64))
    }

    /// Sampling fallback: estimated document count times the mean BSON size
    /// of a small sample.
    async fn sampled_size(&self) -> Result<Option<u64>, ReadError> {
        let count = self.collection.estimated_document_count().await?;
        if count == 0 {
            return Ok(None);
        }

        let mut cursor = self
            .collection
            .aggregate(vec![doc! { "$sample": { "size": SIZE_SAMPLE_DOCS } }])
            .await?;
        let mut total = 0usize;
        let mut sampled = 0usize;
        while let Some(document) = cursor.try_next().await? {
            let mut buf = Vec::new();
            if document.to_writer(&mut buf).is_ok() {
                total += buf.len();
                sampled += 1;
            }
        }
        if sampled == 0 {
            return Ok(None);
        }
        Ok(Some(count.saturating_mul((total / sampled) as u64)))
    }

    /// Sorted `_id` boundary keys splitting the collection into roughly even
    /// sub-ranges. The server sorts, so no ordering on `Bson` is needed here.
    async fn sample_boundaries(&self, partitions: usize) -> Result<Vec<Bson>, ReadError> {
        if partitions <= 1 {
            return Ok(Vec::new());
        }

        let samples = (partitions * BOUNDARY_OVERSAMPLE).min(MAX_BOUNDARY_SAMPLES);
        let pipeline = vec![
            doc! { "$sample": { "size": samples as i64 } },
            doc! { "$project": { "_id": 1 } },
            doc! { "$sort": { "_id": 1 } },
        ];

        let mut cursor = self.collection.aggregate(pipeline).await?;
        let mut ids: Vec<Bson> = Vec::new();
        while let Some(document) = cursor.try_next().await? {
            if let Some(id) = document.get("_id") {
                ids.push(id.clone());
            }
        }

        // Index each boundary multiplicatively instead of accumulating a
        // float stride, so rounding drift cannot skip or repeat an index.
        let mut boundaries = Vec::new();
        if !ids.is_empty() {
            let stride = (ids.len() as f64 / partitions as f64).max(1.0);
            for k in 1..partitions {
                let idx = (k as f64 * stride) as usize;
                if idx >= ids.len() {
                    break;
                }
                boundaries.push(ids[idx].clone());
            }
        }
        boundaries.dedup();
        Ok(boundaries)
    }
}

#[async_trait]
impl SourceReader for MongoSource {
    async fn columns(&self) -> Result<Vec<String>, ReadError> {
        if self.fields.is_empty() {
            return Err(ReadError::Schema(
                "Document sources need an explicit column mapping".to_string(),
            ));
        }
        Ok(self.fields.clone())
    }

    async fn estimate(&self) -> SourceEstimate {
        let size = match self.coll_stats_size().await {
            Ok(Some(size)) => Some(size),
            Ok(None) | Err(_) => match self.sampled_size().await {
                Ok(size) => size,
                Err(err) => {
                    warn!(%err, "Failed to estimate collection size");
                    None
                }
            },
        };
        SourceEstimate {
            table_size_bytes: size,
            skew_ratio: None,
        }
    }

    async fn enumerate_partitions(
        &self,
        split: SplitHint,
    ) -> Result<Vec<PartitionDescriptor>, ReadError> {
        let estimate = self.estimate().await;
        let requested = partition_count_for(estimate.table_size_bytes, split.split_mb);
        let boundaries = self.sample_boundaries(requested).await?;
        let count = boundaries.len() + 1;

        let mut bounds = self.bounds.lock().await;
        bounds.clear();
        for i in 0..count {
            let lower = (i > 0).then(|| boundaries[i - 1].clone());
            let upper = (i < count - 1).then(|| boundaries[i].clone());
            bounds.insert(i as i32, (lower, upper));
        }

        if count < requested {
            warn!(
                partitions = count,
                requested,
                "Sampling yielded fewer distinct boundary keys than requested; \
                 continuing with coarser partitions"
            );
        }
        info!(
            partitions = count,
            requested,
            split_mb = split.split_mb,
            "Enumerated sampled document partitions"
        );
        Ok((0..count as i32).map(PartitionDescriptor::rangeless).collect())
    }

    async fn read(&self, descriptor: &PartitionDescriptor) -> Result<RowStream<'_>, ReadError> {
        let (lower, upper) = self
            .bounds
            .lock()
            .await
            .get(&descriptor.partition_id)
            .cloned()
            .ok_or(ReadError::UnknownPartition(descriptor.partition_id))?;

        let mut id_range = Document::new();
        if let Some(lo) = lower {
            id_range.insert("$gte", lo);
        }
        if let Some(hi) = upper {
            id_range.insert("$lt", hi);
        }
        let filter = if id_range.is_empty() {
            Document::new()
        } else {
            doc! { "_id": id_range }
        };

        let mut projection = Document::new();
        for field in &self.fields {
            projection.insert(field.as_str(), 1);
        }
        if !self.fields.iter().any(|f| f == "_id") {
            projection.insert("_id", 0);
        }

        let cursor = self
            .collection
            .find(filter)
            .projection(projection)
            .batch_size(self.fetch_size)
            .await?;

        let fields = self.fields.clone();
        let stream = cursor.map(move |item| {
            let document = item.map_err(ReadError::from)?;
            Ok(row_from_document(&document, &fields))
        });
        Ok(Box::pin(stream))
    }
}

fn row_from_document(document: &Document, fields: &[String]) -> Row {
    Row::new(
        fields
            .iter()
            .map(|field| document.get(field).and_then(bson_to_value))
            .collect(),
    )
}

/// Total conversion; missing fields, `null`, and `undefined` are NULL.
fn bson_to_value(value: &Bson) -> Option<Value> {
    match value {
        Bson::Null | Bson::Undefined => None,
        Bson::Double(v) => Some(Value::Double(*v)),
        Bson::String(s) => Some(Value::Text(s.clone())),
        Bson::Boolean(v) => Some(Value::Boolean(*v)),
        Bson::Int32(v) => Some(Value::Int(*v)),
        Bson::Int64(v) => Some(Value::BigInt(*v)),
        Bson::ObjectId(oid) => Some(Value::Text(oid.to_hex())),
        Bson::DateTime(dt) => Some(Value::Timestamp(dt.to_chrono())),
        Bson::Binary(bin) => Some(Value::Bytes(bin.bytes.clone())),
        Bson::Decimal128(d) => Some(match BigDecimal::from_str(&d.to_string()) {
            Ok(dec) => Value::Decimal(dec),
            Err(_) => Value::Text(d.to_string()),
        }),
        other => Some(Value::Json(other.clone().into_relaxed_extjson())),
    }
}

fn numeric(document: &Document, key: &str) -> Option<f64> {
    match document.get(key) {
        Some(Bson::Int32(v)) => Some(*v as f64),
        Some(Bson::Int64(v)) => Some(*v as f64),
        Some(Bson::Double(v)) => Some(*v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_null_fields_are_sql_null() {
        let document = doc! { "a": 1, "b": Bson::Null };
        let fields = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let row = row_from_document(&document, &fields);
        assert_eq!(row.get(0), Some(&Value::Int(1)));
        assert_eq!(row.get(1), None);
        assert_eq!(row.get(2), None);
    }

    #[test]
    fn object_ids_render_as_hex_text() {
        let oid = bson::oid::ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap();
        assert_eq!(
            bson_to_value(&Bson::ObjectId(oid)),
            Some(Value::Text("507f1f77bcf86cd799439011".to_string()))
        );
    }

    #[test]
    fn nested_documents_become_json() {
        let value = bson_to_value(&Bson::Document(doc! { "x": [1, 2] })).unwrap();
        assert_eq!(value, Value::Json(serde_json::json!({"x": [1, 2]})));
    }

    #[test]
    fn numeric_reads_any_bson_number() {
        let stats = doc! { "a": 1i32, "b": 2i64, "c": 3.5f64, "d": "no" };
        assert_eq!(numeric(&stats, "a"), Some(1.0));
        assert_eq!(numeric(&stats, "b"), Some(2.0));
        assert_eq!(numeric(&stats, "c"), Some(3.5));
        assert_eq!(numeric(&stats, "d"), None);
    }
}
