//! Postgres backend: connection pool, migrations, and health check.
//!
//! Each store call checks a connection out of the pool for its own duration;
//! the pool returns it on every exit path. Timeouts are the pool's concern.

pub mod events;

use crate::error::{Error, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Database handle. Owns the connection pool; cheap to share by reference.
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres with the default pool size.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(url, DEFAULT_MAX_CONNECTIONS).await
    }

    pub async fn connect_with(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
