use std::future::Future;
use std::time::Duration;

use chatrank_domain::DomainResult;
use chatrank_domain::error::DomainError;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::AppConfig;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout: Duration,
}

impl DbConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            url: config.database_url.clone(),
            max_connections: config.database_max_connections.max(1),
            timeout: config.upstream_timeout(),
        }
    }
}

/// Lazily connecting pool; the first query surfaces connection errors.
pub fn connect_lazy(config: &DbConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.timeout)
        .connect_lazy(&config.url)
}

/// Runs a query under `timeout`, mapping both failures to
/// [`DomainError::Upstream`].
pub async fn bounded<T>(
    timeout: Duration,
    operation: &'static str,
    query: impl Future<Output = Result<T, sqlx::Error>>,
) -> DomainResult<T> {
    match tokio::time::timeout(timeout, query).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            tracing::error!(operation, error = %err, "database query failed");
            Err(DomainError::upstream(err))
        }
        Err(_) => {
            tracing::error!(operation, timeout_ms = timeout.as_millis() as u64, "database query timed out");
            Err(DomainError::Upstream(format!("{operation} timed out")))
        }
    }
}
