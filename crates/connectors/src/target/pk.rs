use tokio_postgres::Client;
use tracing::debug;

const QUERY_PRIMARY_KEY_SQL: &str = "\
SELECT a.attname \
  FROM pg_index i \
  JOIN pg_attribute a \
    ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
 WHERE i.indrelid = $1::regclass \
   AND i.indisprimary \
 ORDER BY array_position(i.indkey, a.attnum)";

/// Looks up the primary-key column names of `schema.table` from the target
/// catalog, in key order. Returns an empty list when the table has no
/// primary key; the caller decides the fallback.
pub async fn discover_primary_key(
    client: &Client,
    schema: &str,
    table: &str,
) -> Result<Vec<String>, tokio_postgres::Error> {
    let relation = format!("{schema}.{table}");
    let rows = client.query(QUERY_PRIMARY_KEY_SQL, &[&relation]).await?;
    let columns: Vec<String> = rows.iter().map(|row| row.get(0)).collect();
    debug!(%relation, ?columns, "Discovered primary-key columns");
    Ok(columns)
}
