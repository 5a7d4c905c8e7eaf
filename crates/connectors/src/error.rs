use thiserror::Error;

/// Failure to establish a source or target connection. Never retried at this
/// layer; the partition that needed the connection fails and the coordinator
/// carries on with the others.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Target host list is empty")]
    NoHosts,

    #[error("PostgreSQL connection failed: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("Cassandra session failed: {0}")]
    Cassandra(#[from] scylla::transport::errors::NewSessionError),

    #[error("MongoDB connection failed: {0}")]
    Mongo(#[from] mongodb::error::Error),
}

/// Mid-partition source failure. The partition is marked FAIL; there is no
/// mid-partition resume.
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("CQL query failed: {0}")]
    Cql(#[from] scylla::transport::errors::QueryError),

    #[error("CQL row decode failed: {0}")]
    CqlDecode(String),

    #[error("MongoDB read failed: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("Source schema error: {0}")]
    Schema(String),

    #[error("No such partition in this run's plan: {0}")]
    UnknownPartition(i32),
}
