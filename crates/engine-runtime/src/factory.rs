use crate::error::MigrationError;
use connectors::{
    source::{SourceReader, cassandra::CassandraSource, mongo::MongoSource},
    target::router::ConnectionRouter,
};
use engine_config::config::{MigrationConfig, SourceSettings};
use engine_core::checkpoint::{CheckpointStore, noop::NoopCheckpointStore, pg::PgCheckpointStore};
use std::sync::Arc;

/// Per-run construction of the engine's collaborators. Every subsystem gets
/// the same immutable config by reference; nothing global.
pub async fn create_source(
    config: &MigrationConfig,
) -> Result<Arc<dyn SourceReader>, MigrationError> {
    match &config.source {
        SourceSettings::Cassandra(options) => Ok(Arc::new(
            CassandraSource::connect(
                options.clone(),
                &config.table.source_keyspace,
                &config.table.source_table,
            )
            .await?,
        )),
        SourceSettings::Mongo(options) => {
            // Document stores have no declared column order; the mapping's
            // config order is the row contract.
            let fields: Vec<String> = config
                .table
                .column_mapping
                .iter()
                .map(|(source, _)| source.clone())
                .collect();
            Ok(Arc::new(
                MongoSource::connect(options.clone(), &config.table.source_table, fields).await?,
            ))
        }
    }
}

pub fn create_router(config: &MigrationConfig) -> Result<Arc<ConnectionRouter>, MigrationError> {
    Ok(Arc::new(ConnectionRouter::new(config.target.clone())?))
}

pub async fn create_checkpoint_store(
    config: &MigrationConfig,
    router: &ConnectionRouter,
) -> Result<Arc<dyn CheckpointStore>, MigrationError> {
    if !config.checkpoint.enabled {
        return Ok(Arc::new(NoopCheckpointStore));
    }
    Ok(Arc::new(
        PgCheckpointStore::connect(router, &config.checkpoint.schema).await?,
    ))
}
