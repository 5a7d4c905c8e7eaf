use crate::{error::ConfigError, properties::Properties};
use connectors::{
    source::{DEFAULT_FETCH_SIZE, cassandra::CassandraOptions, mongo::MongoOptions},
    target::router::{IsolationLevel, TargetOptions, TlsMode},
};
use std::{collections::HashMap, path::Path, time::Duration};
use tracing::warn;

const DEFAULT_TARGET_PORT: u16 = 5433;
const DEFAULT_CASSANDRA_PORT: u16 = 9042;
const DEFAULT_BATCH_SIZE: usize = 1_000;
const DEFAULT_FLUSH_EVERY: usize = 20_000;
const DEFAULT_COPY_BUFFER: usize = 4 * 1024 * 1024;
const DEFAULT_SPLIT_FALLBACK_MB: u32 = 256;
const DEFAULT_EXECUTOR_MEMORY_MB: u64 = 4_096;
const DEFAULT_CHECKPOINT_INTERVAL: u64 = 10_000;
const DEFAULT_CONNECTIONS_PER_CORE: usize = 6;

/// Prefixes this engine understands; anything else in the file is warned
/// about rather than silently ignored.
const KNOWN_PREFIXES: &[&str] = &[
    "source.",
    "target.",
    "insert.",
    "copy.",
    "splitSize.",
    "migration.",
    "checkpoint.",
    "table.",
    "validation.",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    Copy,
    Insert,
}

#[derive(Debug, Clone)]
pub enum SourceSettings {
    Cassandra(CassandraOptions),
    Mongo(MongoOptions),
}

#[derive(Debug, Clone)]
pub struct InsertSettings {
    pub mode: InsertMode,
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct CopySettings {
    pub replace: bool,
    pub flush_every: usize,
    pub buffer_size: usize,
    /// CSV dialect on the COPY wire. Configurable, but the null-vs-empty
    /// rule is fixed: unquoted empty is NULL.
    pub delimiter: char,
    pub quote: char,
}

#[derive(Debug, Clone)]
pub struct SplitSettings {
    pub auto_determine: bool,
    pub override_mb: Option<u32>,
    pub fallback_mb: u32,
    pub executor_memory_mb: u64,
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Caller-supplied run id; defaults to wall-clock seconds at start.
    pub run_id: Option<i64>,
    /// 0 for a fresh run, else the run to resume from.
    pub prev_run_id: i64,
    pub run_type: String,
    pub parallelism: usize,
}

#[derive(Debug, Clone)]
pub struct CheckpointSettings {
    pub enabled: bool,
    pub schema: String,
    /// Rows between intermediate STARTED checkpoint updates.
    pub interval: u64,
}

#[derive(Debug, Clone)]
pub struct TableSettings {
    pub source_keyspace: String,
    pub source_table: String,
    pub target_schema: String,
    pub target_table: String,
    /// source column → target column, file order.
    pub column_mapping: Vec<(String, String)>,
    /// constant column name → raw configured value, config-declared order.
    pub constant_columns: Vec<(String, String)>,
    /// Explicit PK list for INSERT mode; empty means "discover from target".
    pub primary_key: Vec<String>,
}

/// The one immutable configuration value, built once and shared by reference
/// with every subsystem.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub source: SourceSettings,
    pub target: TargetOptions,
    pub truncate_target: bool,
    pub insert: InsertSettings,
    pub copy: CopySettings,
    pub split: SplitSettings,
    pub run: RunSettings,
    pub checkpoint: CheckpointSettings,
    pub table: TableSettings,
    pub validation_enabled: bool,
}

impl MigrationConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let props = Properties::load(path)?;
        Self::from_properties(&props)
    }

    /// Loads with an explicit variable map for `${NAME}` interpolation (the
    /// process environment overlaid with an env file).
    pub fn load_with_vars<P: AsRef<Path>>(
        path: P,
        vars: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let props = Properties::load_with_vars(path, vars)?;
        Self::from_properties(&props)
    }

    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        warn_unknown_keys(props);

        let table = parse_table(props)?;
        let source = parse_source(props)?;
        let target = parse_target(props)?;
        let insert = parse_insert(props)?;
        let copy = parse_copy(props)?;
        let split = parse_split(props)?;
        let run = parse_run(props, target.hosts.len())?;
        let checkpoint = parse_checkpoint(props)?;

        let config = MigrationConfig {
            source,
            target,
            truncate_target: props.get_bool("target.truncateBeforeRun", false)?,
            insert,
            copy,
            split,
            run,
            checkpoint,
            table,
            validation_enabled: props.get_bool("validation.enabled", true)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.target.hosts.is_empty() {
            return Err(ConfigError::invalid("target.hosts", "host list is empty"));
        }
        if self.insert.batch_size == 0 {
            return Err(ConfigError::invalid("insert.batchSize", "must be positive"));
        }
        if self.copy.flush_every == 0 {
            return Err(ConfigError::invalid("copy.flushEvery", "must be positive"));
        }
        if self.run.parallelism == 0 {
            return Err(ConfigError::invalid(
                "migration.parallelism",
                "must be positive",
            ));
        }
        if self.run.prev_run_id < 0 {
            return Err(ConfigError::invalid(
                "migration.prevRunId",
                "must be zero or a prior run id",
            ));
        }
        if self.checkpoint.interval == 0 {
            return Err(ConfigError::invalid(
                "checkpoint.interval",
                "must be positive",
            ));
        }
        if self.insert.mode == InsertMode::Insert && self.copy.replace {
            warn!("copy.replace has no effect in INSERT mode");
        }
        if let SourceSettings::Mongo(_) = self.source {
            if self.table.column_mapping.is_empty() {
                return Err(ConfigError::invalid(
                    "table.columnMapping",
                    "document sources need an explicit column mapping",
                ));
            }
        }
        if self.insert.mode == InsertMode::Copy && !self.copy.replace && !self.truncate_target {
            warn!(
                "COPY without REPLACE and without truncate-before-run: resume is only safe \
                 against an empty target table"
            );
        }
        Ok(())
    }
}

fn parse_hosts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .collect()
}

fn parse_source(props: &Properties) -> Result<SourceSettings, ConfigError> {
    match props.get_or("source.type", "cassandra") {
        "cassandra" => {
            let hosts = parse_hosts(props.require("source.host")?);
            if hosts.is_empty() {
                return Err(ConfigError::invalid("source.host", "host list is empty"));
            }
            Ok(SourceSettings::Cassandra(CassandraOptions {
                hosts,
                port: props.get_parse_or("source.port", DEFAULT_CASSANDRA_PORT)?,
                username: props.get("source.username").map(str::to_string),
                password: props.get("source.password").map(str::to_string),
                local_dc: props.get("source.localDc").map(str::to_string),
                fetch_size: props.get_parse_or("source.fetchSize", DEFAULT_FETCH_SIZE)?,
                read_timeout: props
                    .get_parse::<u64>("source.readTimeoutMs")?
                    .map(Duration::from_millis),
            }))
        }
        "mongodb" => Ok(SourceSettings::Mongo(MongoOptions {
            uri: props.require("source.uri")?.to_string(),
            database: props.require("source.database")?.to_string(),
            fetch_size: props.get_parse_or("source.fetchSize", DEFAULT_FETCH_SIZE as u32)?,
        })),
        other => Err(ConfigError::invalid(
            "source.type",
            format!("{other} is not one of cassandra, mongodb"),
        )),
    }
}

fn parse_target(props: &Properties) -> Result<TargetOptions, ConfigError> {
    let tls = match props.get_or("target.sslMode", "disable") {
        "disable" => TlsMode::Disable,
        "prefer" => TlsMode::Prefer,
        "require" => TlsMode::Require,
        other => {
            return Err(ConfigError::invalid(
                "target.sslMode",
                format!("{other} is not one of disable, prefer, require"),
            ));
        }
    };

    let isolation = match props.get_or("target.isolationLevel", "READ_COMMITTED") {
        "READ_COMMITTED" => IsolationLevel::ReadCommitted,
        "REPEATABLE_READ" => IsolationLevel::RepeatableRead,
        "SERIALIZABLE" => IsolationLevel::Serializable,
        other => {
            return Err(ConfigError::invalid(
                "target.isolationLevel",
                format!("{other} is not a supported isolation level"),
            ));
        }
    };

    Ok(TargetOptions {
        hosts: parse_hosts(props.require("target.hosts")?),
        port: props.get_parse_or("target.port", DEFAULT_TARGET_PORT)?,
        database: props.require("target.database")?.to_string(),
        username: props.require("target.username")?.to_string(),
        password: props.get_or("target.password", "").to_string(),
        tls,
        isolation,
        disable_transactional_writes: props
            .get_bool("target.disableTransactionalWrites", false)?,
    })
}

fn parse_insert(props: &Properties) -> Result<InsertSettings, ConfigError> {
    let mode = match props.get_or("insert.mode", "COPY") {
        "COPY" => InsertMode::Copy,
        "INSERT" => InsertMode::Insert,
        other => {
            return Err(ConfigError::invalid(
                "insert.mode",
                format!("{other} is not one of COPY, INSERT"),
            ));
        }
    };
    Ok(InsertSettings {
        mode,
        batch_size: props.get_parse_or("insert.batchSize", DEFAULT_BATCH_SIZE)?,
    })
}

fn parse_copy(props: &Properties) -> Result<CopySettings, ConfigError> {
    Ok(CopySettings {
        replace: props.get_bool("copy.replace", false)?,
        flush_every: props.get_parse_or("copy.flushEvery", DEFAULT_FLUSH_EVERY)?,
        buffer_size: props.get_parse_or("copy.bufferSize", DEFAULT_COPY_BUFFER)?,
        delimiter: parse_char(props, "copy.delimiter", ',')?,
        quote: parse_char(props, "copy.quote", '"')?,
    })
}

fn parse_char(props: &Properties, key: &str, default: char) -> Result<char, ConfigError> {
    match props.get(key) {
        None => Ok(default),
        Some(raw) => {
            let mut chars = raw.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(ConfigError::invalid(key, "must be a single character")),
            }
        }
    }
}

fn parse_split(props: &Properties) -> Result<SplitSettings, ConfigError> {
    Ok(SplitSettings {
        auto_determine: props.get_bool("splitSize.autoDetermine", true)?,
        override_mb: props.get_parse("splitSize.override")?,
        fallback_mb: props.get_parse_or("splitSize.fallback", DEFAULT_SPLIT_FALLBACK_MB)?,
        executor_memory_mb: props
            .get_parse_or("splitSize.executorMemoryMb", DEFAULT_EXECUTOR_MEMORY_MB)?,
    })
}

fn parse_run(props: &Properties, host_count: usize) -> Result<RunSettings, ConfigError> {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let default_parallelism = host_count.max(1) * cores * DEFAULT_CONNECTIONS_PER_CORE;

    Ok(RunSettings {
        run_id: props.get_parse("migration.runId")?,
        prev_run_id: props.get_parse_or("migration.prevRunId", 0)?,
        run_type: props.get_or("migration.runType", "MIGRATE").to_string(),
        parallelism: props.get_parse_or("migration.parallelism", default_parallelism)?,
    })
}

fn parse_checkpoint(props: &Properties) -> Result<CheckpointSettings, ConfigError> {
    Ok(CheckpointSettings {
        enabled: props.get_bool("checkpoint.enabled", true)?,
        schema: props.get_or("checkpoint.keyspace", "public").to_string(),
        interval: props.get_parse_or("checkpoint.interval", DEFAULT_CHECKPOINT_INTERVAL)?,
    })
}

fn parse_table(props: &Properties) -> Result<TableSettings, ConfigError> {
    let names = props
        .get("table.constantColumns.names")
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let values = props
        .get("table.constantColumns.values")
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if names.len() != values.len() {
        return Err(ConfigError::invalid(
            "table.constantColumns",
            format!("{} names but {} values", names.len(), values.len()),
        ));
    }

    let primary_key = props
        .get("table.primaryKey")
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    Ok(TableSettings {
        source_keyspace: props.require("table.source.keyspace")?.to_string(),
        source_table: props.require("table.source.table")?.to_string(),
        target_schema: props.get_or("table.target.schema", "public").to_string(),
        target_table: props.require("table.target.table")?.to_string(),
        column_mapping: props.with_prefix("table.columnMapping"),
        constant_columns: names.into_iter().zip(values).collect(),
        primary_key,
    })
}

fn warn_unknown_keys(props: &Properties) {
    for key in props.keys() {
        if !KNOWN_PREFIXES.iter().any(|p| key.starts_with(p)) {
            warn!(key, "Unrecognized configuration key");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> String {
        "\
source.host=cas1,cas2\n\
target.hosts=yb1,yb2,yb3\n\
target.database=yugabyte\n\
target.username=yugabyte\n\
table.source.keyspace=app\n\
table.source.table=events\n\
table.target.table=events\n"
            .to_string()
    }

    #[test]
    fn minimal_config_loads_with_defaults() {
        let props = Properties::parse(&minimal()).unwrap();
        let config = MigrationConfig::from_properties(&props).unwrap();

        assert_eq!(config.target.hosts, vec!["yb1", "yb2", "yb3"]);
        assert_eq!(config.target.port, DEFAULT_TARGET_PORT);
        assert_eq!(config.insert.mode, InsertMode::Copy);
        assert_eq!(config.insert.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.copy.flush_every, DEFAULT_FLUSH_EVERY);
        assert_eq!(config.checkpoint.schema, "public");
        assert_eq!(config.run.prev_run_id, 0);
        assert!(config.validation_enabled);
        assert!(matches!(config.source, SourceSettings::Cassandra(_)));
    }

    #[test]
    fn empty_target_hosts_is_rejected() {
        let text = minimal().replace("target.hosts=yb1,yb2,yb3", "target.hosts=  ,  ");
        let props = Properties::parse(&text).unwrap();
        assert!(MigrationConfig::from_properties(&props).is_err());
    }

    #[test]
    fn bad_insert_mode_is_rejected() {
        let text = format!("{}insert.mode=UPSERT\n", minimal());
        let props = Properties::parse(&text).unwrap();
        assert!(MigrationConfig::from_properties(&props).is_err());
    }

    #[test]
    fn constant_column_arity_must_match() {
        let text = format!(
            "{}table.constantColumns.names=created_by,migration_date\n\
             table.constantColumns.values=MIGRATION\n",
            minimal()
        );
        let props = Properties::parse(&text).unwrap();
        assert!(MigrationConfig::from_properties(&props).is_err());
    }

    #[test]
    fn constant_columns_keep_declared_order() {
        let text = format!(
            "{}table.constantColumns.names=created_by,migration_date\n\
             table.constantColumns.values=MIGRATION,2024-12-16\n",
            minimal()
        );
        let props = Properties::parse(&text).unwrap();
        let config = MigrationConfig::from_properties(&props).unwrap();
        assert_eq!(
            config.table.constant_columns,
            vec![
                ("created_by".to_string(), "MIGRATION".to_string()),
                ("migration_date".to_string(), "2024-12-16".to_string())
            ]
        );
    }

    #[test]
    fn mongo_source_requires_mapping() {
        let text = "\
source.type=mongodb\n\
source.uri=mongodb://localhost:27017\n\
source.database=app\n\
target.hosts=yb1\n\
target.database=yugabyte\n\
target.username=yugabyte\n\
table.source.keyspace=app\n\
table.source.table=events\n\
table.target.table=events\n";
        let props = Properties::parse(text).unwrap();
        assert!(MigrationConfig::from_properties(&props).is_err());

        let with_mapping = format!("{text}table.columnMapping._id=id\n");
        let props = Properties::parse(&with_mapping).unwrap();
        assert!(MigrationConfig::from_properties(&props).is_ok());
    }
}
