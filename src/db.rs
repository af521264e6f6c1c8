use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::migrator::Migrator;
use metrics::{counter, histogram};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbBackend,
    Statement, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle timeout duration
    pub idle_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl DbConfig {
    /// Single-connection in-memory SQLite, the shape used by tests and dry runs.
    /// An in-memory database lives inside one connection, so the pool must not grow.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

/// Establishes a connection pool to the database with custom configuration
///
/// # Errors
/// Returns a `ServiceError::DatabaseError` if the connection cannot be established
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!("Configuring database connection with: {:?}", config);

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    info!(
        "Connecting to database with max_connections={}",
        config.max_connections
    );

    let db_pool = Database::connect(opt).await.map_err(|e| {
        error!("Database connection establishment failed: {}", e);
        ServiceError::db_error(e)
    })?;

    info!("Database connection pool established successfully");
    Ok(db_pool)
}

/// Establish DB pool using AppConfig tuning
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Runs database migrations
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    info!("Running database migrations");
    let start = Instant::now();

    let result = Migrator::up(pool, None).await.map_err(ServiceError::db_error);

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => info!("Database migrations completed successfully in {:?}", elapsed),
        Err(e) => error!("Database migrations failed after {:?}: {}", elapsed, e),
    }

    result
}

/// Checks if the database connection is active
pub async fn check_connection(pool: &DbPool) -> Result<(), ServiceError> {
    debug!("Checking database connection");
    pool.ping().await.map_err(|e| {
        error!("Database connection check failed: {}", e);
        counter!("sitestock_db.connection_failures", 1);
        ServiceError::db_error(e)
    })
}

/// Whether row locks (`SELECT ... FOR UPDATE`) are meaningful on this backend.
pub fn supports_row_locks(backend: DbBackend) -> bool {
    matches!(backend, DbBackend::Postgres | DbBackend::MySql)
}

/// Takes the transaction-scoped advisory lock `(class, id)` on PostgreSQL; a no-op elsewhere.
///
/// Held until the surrounding transaction commits or rolls back. Callers taking several
/// locks must take them in a consistent order.
pub async fn advisory_xact_lock<C>(conn: &C, class: i32, id: i32) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    if conn.get_database_backend() != DbBackend::Postgres {
        return Ok(());
    }
    conn.execute(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT pg_advisory_xact_lock($1, $2)",
        vec![class.into(), id.into()],
    ))
    .await?;
    Ok(())
}

/// A started transaction with timing and metrics attached.
///
/// Dropping the guard without calling [`TxnGuard::commit`] rolls the transaction back.
pub struct TxnGuard {
    txn: DatabaseTransaction,
    id: Uuid,
    operation: &'static str,
    started: Instant,
}

impl TxnGuard {
    pub fn conn(&self) -> &DatabaseTransaction {
        &self.txn
    }

    pub async fn commit(self) -> Result<(), ServiceError> {
        let TxnGuard {
            txn,
            id,
            operation,
            started,
        } = self;
        txn.commit().await.map_err(|e| {
            error!(transaction_id = %id, operation, error = %e, "Transaction commit failed");
            counter!("sitestock_db.transaction.rolled_back", 1);
            ServiceError::db_error(e)
        })?;
        let elapsed = started.elapsed();
        counter!("sitestock_db.transaction.committed", 1);
        histogram!("sitestock_db.transaction.duration", elapsed);
        debug!(transaction_id = %id, operation, "Transaction committed in {:?}", elapsed);
        Ok(())
    }
}

/// Begins a transaction for `operation`.
pub async fn begin(pool: &DbPool, operation: &'static str) -> Result<TxnGuard, ServiceError> {
    let id = Uuid::new_v4();
    debug!(transaction_id = %id, operation, "Starting database transaction");
    counter!("sitestock_db.transaction.started", 1);
    let txn = pool.begin().await.map_err(|e| {
        error!(transaction_id = %id, operation, error = %e, "Failed to begin transaction");
        ServiceError::db_error(e)
    })?;
    Ok(TxnGuard {
        txn,
        id,
        operation,
        started: Instant::now(),
    })
}
