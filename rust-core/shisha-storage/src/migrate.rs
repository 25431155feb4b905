// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Schema migrations for the relational backend.
//
// The DDL is idempotent, so applying it twice is harmless, but several
// replicas starting at once should not race each other through it. Callers
// therefore run it inside `run_exclusive`, which holds a `MigrationLock`
// for the duration. The Postgres implementation uses a session-level
// advisory lock.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPool;
use sqlx::Postgres;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::StorageError;

/// Ordered, idempotent DDL statements for the relational schema.
pub const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS manufacturers (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_manufacturers_name ON manufacturers (name)",
    "CREATE TABLE IF NOT EXISTS shishas (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        flavor TEXT NOT NULL DEFAULT '',
        manufacturer_id BIGINT REFERENCES manufacturers (id),
        smoked BIGINT DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS ratings (
        id BIGSERIAL PRIMARY KEY,
        shisha_id BIGINT NOT NULL REFERENCES shishas (id) ON DELETE CASCADE,
        user_name TEXT NOT NULL,
        score INT4 NOT NULL,
        created_at BIGINT
    )",
    "CREATE INDEX IF NOT EXISTS idx_ratings_shisha ON ratings (shisha_id)",
    "CREATE TABLE IF NOT EXISTS comments (
        id BIGSERIAL PRIMARY KEY,
        shisha_id BIGINT NOT NULL REFERENCES shishas (id) ON DELETE CASCADE,
        user_name TEXT NOT NULL,
        message TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_comments_shisha ON comments (shisha_id)",
];

/// Advisory lock key shared by every replica ("shisha" in ASCII).
pub const MIGRATION_LOCK_KEY: i64 = 0x0073_6869_7368_61;

/// Upper bound on how long a replica waits for another one to finish migrating.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Cross-replica mutual exclusion for one-shot migration work.
#[async_trait]
pub trait MigrationLock: Send + Sync {
    /// Block until this process holds the lock.
    async fn acquire(&self) -> Result<(), StorageError>;

    /// Give the lock up. Releasing a lock that is not held is a no-op.
    async fn release(&self) -> Result<(), StorageError>;
}

/// Run `work` while holding `lock`.
///
/// The lock is released whether or not `work` succeeds; a release failure
/// is only reported if `work` itself succeeded.
pub async fn run_exclusive<L, F, Fut, T>(lock: &L, work: F) -> Result<T, StorageError>
where
    L: MigrationLock + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    lock.acquire().await?;
    let result = work().await;
    let released = lock.release().await;
    match (result, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_err)) => {
            warn!(error = %release_err, "failed to release migration lock after failed migration");
            Err(e)
        }
    }
}

/// Apply [`SCHEMA`] without any locking.
pub async fn apply_schema(pool: &PgPool) -> Result<(), StorageError> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| StorageError::rejected("migrate", "ddl", e.to_string()))?;
    }
    info!(statements = SCHEMA.len(), "schema applied");
    Ok(())
}

/// Apply [`SCHEMA`] while holding `lock`.
pub async fn migrate(pool: &PgPool, lock: &dyn MigrationLock) -> Result<(), StorageError> {
    run_exclusive(lock, || apply_schema(pool)).await
}

/// A [`MigrationLock`] backed by a Postgres session advisory lock.
///
/// Advisory locks belong to a session, so the connection that took the lock
/// is kept out of the pool until release.
pub struct PgAdvisoryLock {
    pool: PgPool,
    key: i64,
    timeout: Duration,
    held: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PgAdvisoryLock {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            key: MIGRATION_LOCK_KEY,
            timeout: DEFAULT_LOCK_TIMEOUT,
            held: Mutex::new(None),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Lock on `key` instead of [`MIGRATION_LOCK_KEY`].
    pub fn with_key(mut self, key: i64) -> Self {
        self.key = key;
        self
    }
}

#[async_trait]
impl MigrationLock for PgAdvisoryLock {
    async fn acquire(&self) -> Result<(), StorageError> {
        let mut held = self.held.lock().await;
        if held.is_some() {
            return Ok(());
        }
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::unavailable("migration_lock", e))?;

        // Poll the non-blocking variant. A cancelled `pg_advisory_lock` keeps
        // waiting server-side and is later granted to whoever reuses the session.
        let deadline = Instant::now() + self.timeout;
        loop {
            let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
                .bind(self.key)
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| StorageError::rejected("migration_lock", "advisory_lock", e.to_string()))?;
            if locked {
                info!(key = self.key, "acquired migration lock");
                *held = Some(conn);
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(StorageError::unavailable(
                    "migration_lock",
                    format!("timed out after {:?} waiting for migration lock", self.timeout),
                ));
            }
            debug!(key = self.key, "migration lock held elsewhere, waiting");
            tokio::time::sleep(LOCK_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn release(&self) -> Result<(), StorageError> {
        let mut held = self.held.lock().await;
        if let Some(mut conn) = held.take() {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(self.key)
                .execute(&mut *conn)
                .await
                .map_err(|e| StorageError::rejected("migration_lock", "advisory_unlock", e.to_string()))?;
            info!(key = self.key, "released migration lock");
        }
        Ok(())
    }
}
