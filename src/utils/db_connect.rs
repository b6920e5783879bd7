// src/utils/db_connect.rs
use anyhow::{Context, Result};
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use log::info;
use std::env;
use std::time::Duration;
use tokio_postgres::{Config, NoTls};

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

const DEFAULT_POOL_SIZE: u32 = 4;

/// Connection settings read from the `POSTGRES_*` variables.
#[derive(Debug, Clone)]
pub struct PgSettings {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// One run reads, embeds and writes sequentially, so a handful is enough.
    pub pool_size: u32,
}

impl Default for PgSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            dbname: "activities".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl PgSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env::var("POSTGRES_HOST").unwrap_or(defaults.host),
            port: env::var("POSTGRES_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            dbname: env::var("POSTGRES_DB").unwrap_or(defaults.dbname),
            user: env::var("POSTGRES_USER").unwrap_or(defaults.user),
            password: env::var("POSTGRES_PASSWORD").unwrap_or(defaults.password),
            pool_size: env::var("POSTGRES_POOL_SIZE")
                .ok()
                .and_then(|p| p.parse().ok())
                .filter(|size| *size > 0)
                .unwrap_or(defaults.pool_size),
        }
    }

    /// `application_name` shows up in `pg_stat_activity`, so each binary (and
    /// each detection run) can be told apart there.
    pub fn to_config(&self, application_name: &str) -> Config {
        let mut config = Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.dbname)
            .user(&self.user)
            .password(&self.password)
            .application_name(application_name)
            .connect_timeout(Duration::from_secs(10));
        config
    }
}

/// Builds the pool for one process and checks it with `SELECT 1`. The pool is
/// released when the caller drops it.
pub async fn connect(application_name: &str) -> Result<PgPool> {
    let settings = PgSettings::from_env();
    info!(
        "DB Config: Host={}, Port={}, DB={}, User={}, Pool={}, App={}",
        settings.host,
        settings.port,
        settings.dbname,
        settings.user,
        settings.pool_size,
        application_name
    );
    let manager = PostgresConnectionManager::new(settings.to_config(application_name), NoTls);

    let pool = Pool::builder()
        .max_size(settings.pool_size)
        .min_idle(Some(1))
        .idle_timeout(Some(Duration::from_secs(180)))
        .connection_timeout(Duration::from_secs(15))
        .build(manager)
        .await
        .context("Failed to build database connection pool")?;

    let conn = pool
        .get()
        .await
        .context("Failed to get test connection from pool")?;
    conn.query_one("SELECT 1", &[])
        .await
        .context("Test query 'SELECT 1' failed")?;
    drop(conn);
    info!("Database connection pool initialized successfully.");
    Ok(pool)
}

/// Returns (total connections, idle connections, connections in use).
pub fn get_pool_status(pool: &PgPool) -> (u32, u32, u32) {
    let state = pool.state();
    (
        state.connections,
        state.idle_connections,
        state.connections.saturating_sub(state.idle_connections),
    )
}
