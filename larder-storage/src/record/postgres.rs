//! PostgreSQL record store
//!
//! Connection pooling uses deadpool-postgres. Prices are stored as
//! `NUMERIC(10,2)` and cross the wire as `float8`, so the casts live in the
//! SQL rather than in a decimal type on the Rust side.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use larder_core::{Product, ProductFields, ProductId, StoreError, Timestamp};
use tokio_postgres::{NoTls, Row};

use super::{RecordStore, StoreResult};

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

const SELECT_COLUMNS: &str =
    "id, name, price::float8 AS price, COALESCE(description, '') AS description, created_at";

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "larder".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 10,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("LARDER_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("LARDER_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("LARDER_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("LARDER_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("LARDER_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("LARDER_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: Duration::from_secs(
                std::env::var("LARDER_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.timeout.as_secs()),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    ///
    /// No connection is opened here; an unreachable server shows up on the
    /// first query as [`StoreError::Unavailable`].
    pub fn create_pool(&self) -> StoreResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = PoolConfig::new(self.max_size);
        pool_config.timeouts.wait = Some(self.timeout);
        pool_config.timeouts.create = Some(self.timeout);
        cfg.pool = Some(pool_config);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Unavailable {
                reason: format!("Failed to create pool: {}", e),
            })
    }
}

// ============================================================================
// RECORD STORE
// ============================================================================

/// Record store backed by a PostgreSQL `products` table.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: Pool,
}

impl PgRecordStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> StoreResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Create the `products` table if it does not exist yet.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        let conn = self.get_conn().await?;
        conn.batch_execute(SCHEMA_SQL).await.map_err(map_pg_error)
    }

    async fn get_conn(&self) -> StoreResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| StoreError::Unavailable {
            reason: format!("Failed to get connection: {}", e),
        })
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn fetch_all(&self) -> StoreResult<Vec<Product>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {} FROM products ORDER BY id", SELECT_COLUMNS);
        let rows = conn.query(sql.as_str(), &[]).await.map_err(map_pg_error)?;
        rows.iter().map(product_from_row).collect()
    }

    async fn fetch_by_id(&self, id: i64) -> StoreResult<Option<Product>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {} FROM products WHERE id = $1", SELECT_COLUMNS);
        let row = conn
            .query_opt(sql.as_str(), &[&id])
            .await
            .map_err(map_pg_error)?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn insert(&self, fields: &ProductFields, created_at: Timestamp) -> StoreResult<i64> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_one(
                "INSERT INTO products (name, price, description, created_at) \
                 VALUES ($1, CAST($2::float8 AS NUMERIC(10, 2)), $3, $4) \
                 RETURNING id",
                &[&fields.name, &fields.price, &fields.description, &created_at],
            )
            .await
            .map_err(map_pg_error)?;

        row.try_get::<_, i64>(0).map_err(decode_error)
    }

    async fn update(&self, id: i64, fields: &ProductFields) -> StoreResult<u64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE products \
             SET name = $1, price = CAST($2::float8 AS NUMERIC(10, 2)), description = $3 \
             WHERE id = $4",
            &[&fields.name, &fields.price, &fields.description, &id],
        )
        .await
        .map_err(map_pg_error)
    }

    async fn delete(&self, id: i64) -> StoreResult<u64> {
        let conn = self.get_conn().await?;
        conn.execute("DELETE FROM products WHERE id = $1", &[&id])
            .await
            .map_err(map_pg_error)
    }

    async fn count(&self) -> StoreResult<i64> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_one("SELECT COUNT(*) FROM products", &[])
            .await
            .map_err(map_pg_error)?;
        row.try_get::<_, i64>(0).map_err(decode_error)
    }
}

fn product_from_row(row: &Row) -> StoreResult<Product> {
    Ok(Product {
        id: ProductId::Persisted(row.try_get("id").map_err(decode_error)?),
        name: row.try_get("name").map_err(decode_error)?,
        price: row.try_get("price").map_err(decode_error)?,
        description: row.try_get("description").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn decode_error(e: tokio_postgres::Error) -> StoreError {
    StoreError::Decode {
        reason: e.to_string(),
    }
}

/// Closed connections and I/O failures mean the store is unreachable;
/// anything the server itself rejected is a query error.
fn map_pg_error(e: tokio_postgres::Error) -> StoreError {
    if let Some(db_error) = e.as_db_error() {
        return StoreError::Query {
            reason: format!("{}: {}", db_error.code().code(), db_error.message()),
        };
    }

    let is_io = std::error::Error::source(&e)
        .map(|source| source.is::<std::io::Error>())
        .unwrap_or(false);

    if e.is_closed() || is_io {
        StoreError::Unavailable {
            reason: e.to_string(),
        }
    } else {
        StoreError::Query {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_defaults() {
        let config = DbConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "larder");
        assert_eq!(config.max_size, 10);
    }

    #[test]
    fn test_schema_creates_products_table() {
        assert!(SCHEMA_SQL.contains("CREATE TABLE IF NOT EXISTS products"));
        assert!(SCHEMA_SQL.contains("BIGSERIAL"));
    }

    #[tokio::test]
    async fn test_create_pool_is_lazy() {
        // Nothing listens on this port; building the pool must still succeed.
        let config = DbConfig {
            port: 1,
            timeout: Duration::from_millis(50),
            ..DbConfig::default()
        };
        let store = PgRecordStore::from_config(&config).unwrap();
        assert_eq!(store.pool_size(), 0);

        let err = store.count().await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));
    }
}
