use crate::error::ConnectError;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::time::Duration;
use tokio_postgres::{Client, Config, NoTls};
use tracing::{debug, error, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    #[default]
    Disable,
    Prefer,
    Require,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Target-side connection settings, built once from the run configuration.
#[derive(Debug, Clone)]
pub struct TargetOptions {
    pub hosts: Vec<String>,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub tls: TlsMode,
    pub isolation: IsolationLevel,
    /// Disables the target's distributed-transaction machinery for the
    /// session (`yb_disable_transactional_writes`). Trades durability
    /// semantics for bulk-load throughput; off by default.
    pub disable_transactional_writes: bool,
}

/// One target connection bound to a single node, owned by exactly one
/// partition executor and closed on every exit path.
pub struct TargetConn {
    pub client: Client,
    pub host: String,
}

/// Routes each partition to a target node with `partition_id mod hosts`.
///
/// Driver-level load balancing is not used: with one-shot connection opens it
/// is unreliable, while id-indexed routing is deterministic, evenly spread,
/// and needs no shared counter state.
pub struct ConnectionRouter {
    options: TargetOptions,
}

/// The selection rule, kept as a standalone function so host assignment is
/// checkable without a live target.
pub fn route<'a>(hosts: &'a [String], partition_id: i32) -> Option<&'a str> {
    if hosts.is_empty() {
        return None;
    }
    let idx = (partition_id as i64).rem_euclid(hosts.len() as i64) as usize;
    Some(hosts[idx].as_str())
}

impl ConnectionRouter {
    pub fn new(options: TargetOptions) -> Result<Self, ConnectError> {
        if options.hosts.is_empty() {
            return Err(ConnectError::NoHosts);
        }
        Ok(Self { options })
    }

    pub fn host_for(&self, partition_id: i32) -> &str {
        // new() guarantees a non-empty host list.
        route(&self.options.hosts, partition_id).unwrap_or(&self.options.hosts[0])
    }

    pub fn host_count(&self) -> usize {
        self.options.hosts.len()
    }

    /// Opens a connection to the node this partition routes to and applies
    /// the session directives. Bulk-load streams run for minutes, so there is
    /// no statement timeout; liveness comes from TCP keepalive.
    pub async fn open(&self, partition_id: i32) -> Result<TargetConn, ConnectError> {
        let host = self.host_for(partition_id).to_string();
        debug!(partition_id, %host, "Routing partition to target node");

        let mut config = Config::new();
        config
            .host(&host)
            .port(self.options.port)
            .dbname(&self.options.database)
            .user(&self.options.username)
            .password(&self.options.password)
            .connect_timeout(CONNECT_TIMEOUT)
            .keepalives(true);

        let client = match self.options.tls {
            TlsMode::Disable => connect_without_tls(&config).await?,
            TlsMode::Require => connect_with_tls(&config).await?,
            TlsMode::Prefer => match connect_with_tls(&config).await {
                Ok(client) => client,
                Err(err) => {
                    warn!(%host, %err, "Target TLS handshake failed, retrying without TLS");
                    connect_without_tls(&config).await?
                }
            },
        };

        self.apply_session_directives(&client).await?;
        Ok(TargetConn { client, host })
    }

    async fn apply_session_directives(&self, client: &Client) -> Result<(), ConnectError> {
        client
            .batch_execute(&format!(
                "SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL {}",
                self.options.isolation.as_sql()
            ))
            .await?;

        if self.options.disable_transactional_writes {
            client
                .batch_execute("SET yb_disable_transactional_writes = on")
                .await?;
        }
        Ok(())
    }
}

async fn connect_with_tls(config: &Config) -> Result<Client, ConnectError> {
    let connector = TlsConnector::builder().build()?;
    let tls = MakeTlsConnector::new(connector);
    let (client, connection) = config.connect(tls).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(%err, "Target connection error");
        }
    });
    Ok(client)
}

async fn connect_without_tls(config: &Config) -> Result<Client, ConnectError> {
    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(%err, "Target connection error");
        }
    });
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("node{i}")).collect()
    }

    #[test]
    fn routing_is_exactly_mod_hosts() {
        let hosts = hosts(3);
        let assigned: Vec<&str> = (0..10).map(|i| route(&hosts, i).unwrap()).collect();
        assert_eq!(
            assigned,
            vec![
                "node0", "node1", "node2", "node0", "node1", "node2", "node0", "node1", "node2",
                "node0"
            ]
        );
    }

    #[test]
    fn routing_distribution_is_deterministic() {
        let hosts = hosts(3);
        let mut counts = [0usize; 3];
        for i in 0..10 {
            let host = route(&hosts, i).unwrap();
            let idx = host.trim_start_matches("node").parse::<usize>().unwrap();
            counts[idx] += 1;
        }
        assert_eq!(counts, [4, 3, 3]);
    }

    #[test]
    fn empty_host_list_is_rejected() {
        assert!(route(&[], 0).is_none());

        let options = TargetOptions {
            hosts: Vec::new(),
            port: 5433,
            database: "yugabyte".into(),
            username: "yugabyte".into(),
            password: String::new(),
            tls: TlsMode::Disable,
            isolation: IsolationLevel::ReadCommitted,
            disable_transactional_writes: false,
        };
        assert!(matches!(
            ConnectionRouter::new(options),
            Err(ConnectError::NoHosts)
        ));
    }

    #[test]
    fn single_host_takes_every_partition() {
        let hosts = hosts(1);
        for i in 0..5 {
            assert_eq!(route(&hosts, i).unwrap(), "node0");
        }
    }
}
