// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//! Environment-driven server configuration.
//!
//! Every setting has a default so the server starts with no environment at
//! all: the in-memory backend on `0.0.0.0:8080`, seeded with one sample
//! record.

use std::str::FromStr;
use std::time::Duration;

use shisha_storage::CouchDbConfig;
use thiserror::Error;
use url::Url;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;

const DEFAULT_DB_HOST: &str = "localhost";
const DEFAULT_DB_PORT: u16 = 26257;
const DEFAULT_DB_USER: &str = "root";
const DEFAULT_DB_NAME: &str = "shisha";

const DEFAULT_COUCHDB_URL: &str = "http://localhost:5984";
const DEFAULT_COUCHDB_TIMEOUT_SECS: u64 = 10;

/// Configuration errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown storage backend {0:?} (expected memory, postgres or couchdb)")]
    UnknownBackend(String),

    #[error("invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },

    #[error("cannot build database URL: {0}")]
    DatabaseUrl(String),
}

/// Which [`shisha_storage::Storage`] implementation to serve from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Postgres,
    CouchDb,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "postgres" | "postgresql" | "cockroach" | "cockroachdb" | "sql" => Ok(Self::Postgres),
            "couchdb" | "couch" => Ok(Self::CouchDb),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Identity of this replica, reported by `/api/info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    /// `POD_NAME`; the hostname is used when unset.
    pub pod_name: Option<String>,
    pub pod_namespace: String,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub backend: BackendKind,
    pub host: String,
    pub port: u16,
    /// Relational connection URL, either `DATABASE_URL` or assembled from
    /// the discrete `DATABASE_*` variables.
    pub database_url: String,
    pub couchdb: CouchDbConfig,
    pub migrate_on_start: bool,
    /// Seed the in-memory backend with one sample record.
    pub seed_sample: bool,
    pub instance: InstanceConfig,
}

impl ServerConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match get("STORAGE_BACKEND") {
            Some(v) => v.parse()?,
            None => BackendKind::Memory,
        };

        let port = match get("PORT") {
            Some(v) => parse_number("PORT", &v)?,
            None => DEFAULT_PORT,
        };

        let database_url = match get("DATABASE_URL") {
            Some(url) => url,
            None => {
                let db_port = match get("DATABASE_PORT") {
                    Some(v) => parse_number("DATABASE_PORT", &v)?,
                    None => DEFAULT_DB_PORT,
                };
                database_url(
                    &get("DATABASE_HOST").unwrap_or_else(|| DEFAULT_DB_HOST.to_string()),
                    db_port,
                    &get("DATABASE_USER").unwrap_or_else(|| DEFAULT_DB_USER.to_string()),
                    get("DATABASE_PASSWORD").as_deref(),
                    &get("DATABASE_NAME").unwrap_or_else(|| DEFAULT_DB_NAME.to_string()),
                )?
            }
        };

        let mut couchdb =
            CouchDbConfig::new(get("COUCHDB_URL").unwrap_or_else(|| DEFAULT_COUCHDB_URL.to_string()));
        if let Some(user) = get("COUCHDB_USER") {
            couchdb = couchdb.with_credentials(user, get("COUCHDB_PASSWORD").unwrap_or_default());
        }
        if let Some(db) = get("COUCHDB_DB") {
            couchdb = couchdb.with_database(db);
        }
        let timeout_secs = match get("COUCHDB_TIMEOUT_SECS") {
            Some(v) => parse_number("COUCHDB_TIMEOUT_SECS", &v)?,
            None => DEFAULT_COUCHDB_TIMEOUT_SECS,
        };
        couchdb.timeout = Duration::from_secs(timeout_secs);

        Ok(Self {
            backend,
            host: get("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            database_url,
            couchdb,
            migrate_on_start: match get("MIGRATE_ON_START") {
                Some(v) => parse_bool("MIGRATE_ON_START", &v)?,
                None => false,
            },
            seed_sample: match get("SEED_SAMPLE") {
                Some(v) => parse_bool("SEED_SAMPLE", &v)?,
                None => true,
            },
            instance: InstanceConfig {
                pod_name: get("POD_NAME"),
                pod_namespace: get("POD_NAMESPACE").unwrap_or_else(|| "default".to_string()),
            },
        })
    }

    /// The `host:port` string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_number<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
    })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
        }),
    }
}

/// Assemble a `postgres://` URL with TLS disabled, percent-encoding the
/// credentials.
fn database_url(
    host: &str,
    port: u16,
    user: &str,
    password: Option<&str>,
    name: &str,
) -> Result<String, ConfigError> {
    let invalid = |what: &str| ConfigError::DatabaseUrl(format!("invalid {what}"));

    let mut url = Url::parse(&format!("postgres://{host}:{port}"))
        .map_err(|e| ConfigError::DatabaseUrl(e.to_string()))?;
    url.set_username(user).map_err(|_| invalid("user"))?;
    if let Some(password) = password {
        url.set_password(Some(password)).map_err(|_| invalid("password"))?;
    }
    url.path_segments_mut()
        .map_err(|_| invalid("database name"))?
        .push(name);
    url.query_pairs_mut().append_pair("sslmode", "disable");
    Ok(url.into())
}
