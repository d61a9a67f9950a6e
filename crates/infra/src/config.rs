//! Runtime configuration read from the process environment.
//!
//! | variable                   | default | meaning                                  |
//! |----------------------------|---------|------------------------------------------|
//! | `DATABASE_URL`             | unset   | Postgres URL; unset means in-memory      |
//! | `DATABASE_MAX_CONNECTIONS` | `10`    | sqlx pool size                           |
//! | `ARCHCAT_PUBLISH_MODE`     | `sync`  | `sync` or `queued` event delivery        |
//! | `ARCHCAT_QUEUE_CAPACITY`   | `1024`  | bound of the queued delivery channel     |

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context as _;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// How committed events reach subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    /// Handlers run on the committing thread before the command returns.
    #[default]
    Sync,
    /// Handlers run on a background worker; read models lag until `flush`.
    Queued,
}

impl FromStr for PublishMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" | "synchronous" => Ok(PublishMode::Sync),
            "queued" | "async" => Ok(PublishMode::Queued),
            other => Err(format!("expected 'sync' or 'queued', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub publish_mode: PublishMode,
    pub queue_capacity: usize,
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            publish_mode: PublishMode::Sync,
            queue_capacity: 1024,
        }
    }
}

impl InfraConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map instead of the environment).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());

        Ok(Self {
            database_url,
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", defaults.max_connections)?,
            publish_mode: parse_or(&lookup, "ARCHCAT_PUBLISH_MODE", defaults.publish_mode)?,
            queue_capacity: parse_or(&lookup, "ARCHCAT_QUEUE_CAPACITY", defaults.queue_capacity)?,
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.database_url.is_some()
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

/// Connect the Postgres pool described by `config`.
pub async fn connect_pool(config: &InfraConfig) -> anyhow::Result<PgPool> {
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set for the Postgres backend")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;

    info!(max_connections = config.max_connections, "postgres pool ready");
    Ok(pool)
}

/// Create the event log and read-model tables (idempotent).
pub async fn apply_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::raw_sql(include_str!("../migrations/0001_event_store.sql"))
        .execute(pool)
        .await
        .context("failed to apply event store migration")?;
    Ok(())
}
