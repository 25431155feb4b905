// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//! Relational-backend specifics that need a live Postgres.
//!
//! Run with `TEST_DATABASE_URL=postgres://... cargo test -- --ignored`.

use std::time::Duration;

use sqlx::postgres::PgPool;

use shisha_storage::migrate::{migrate, MigrationLock, PgAdvisoryLock};
use shisha_storage::{Manufacturer, PostgresConfig, PostgresStorage, Shisha, Storage, StorageError};

/// Fits in the low 32 bits, so `pg_locks` reports it as `classid = 0`.
const TEST_LOCK_KEY: i64 = 0x5eed_0001;

async fn connect() -> PostgresStorage {
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL not set");
    PostgresStorage::connect(&PostgresConfig::new(url)).await.unwrap()
}

/// Sessions holding or waiting for `key`.
async fn advisory_lock_entries(pool: &PgPool, key: i64) -> i64 {
    sqlx::query_scalar(
        "SELECT count(*) FROM pg_locks \
         WHERE locktype = 'advisory' AND classid = 0 AND objid::int8 = $1 AND objsubid = 1",
    )
    .bind(key)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL pointing at a scratch Postgres database"]
async fn test_lock_timeout_leaves_no_waiting_session() {
    let store = connect().await;
    let pool = store.pool().clone();

    let holder = PgAdvisoryLock::new(pool.clone()).with_key(TEST_LOCK_KEY);
    holder.acquire().await.unwrap();

    let waiter = PgAdvisoryLock::new(pool.clone())
        .with_key(TEST_LOCK_KEY)
        .with_timeout(Duration::from_millis(300));
    let err = waiter.acquire().await.unwrap_err();
    assert!(matches!(err, StorageError::BackendUnavailable { .. }), "{err}");

    // Only the holder's session shows up while it has the lock.
    assert_eq!(advisory_lock_entries(&pool, TEST_LOCK_KEY).await, 1);

    holder.release().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(advisory_lock_entries(&pool, TEST_LOCK_KEY).await, 0);

    // Nobody picked the lock up behind our back.
    let next = PgAdvisoryLock::new(pool.clone())
        .with_key(TEST_LOCK_KEY)
        .with_timeout(Duration::from_secs(2));
    next.acquire().await.unwrap();
    next.release().await.unwrap();
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL pointing at a scratch Postgres database"]
async fn test_ratings_read_back_from_int8_score_column() {
    let store = connect().await;
    let pool = store.pool().clone();
    migrate(&pool, &PgAdvisoryLock::new(pool.clone())).await.unwrap();

    // CockroachDB creates `score INTEGER` as INT8.
    sqlx::query("ALTER TABLE ratings ALTER COLUMN score TYPE INT8")
        .execute(&pool)
        .await
        .unwrap();

    let created = store
        .create_shisha(&Shisha::new("Grape Mint", "Traube Minze", Manufacturer::named("Adalya")))
        .await
        .unwrap();
    store.add_rating(created.id, "alice", 5).await.unwrap();

    let fetched = store.get_shisha(created.id).await.unwrap().unwrap();
    assert_eq!(fetched.ratings.len(), 1);
    assert_eq!(fetched.ratings[0].score, 5);

    let listed = store.list_shishas().await.unwrap();
    let entry = listed.iter().find(|s| s.id == created.id).unwrap();
    assert_eq!(entry.ratings[0].score, 5);

    store.delete_shisha(created.id).await.unwrap();
    sqlx::query("ALTER TABLE ratings ALTER COLUMN score TYPE INT4")
        .execute(&pool)
        .await
        .unwrap();
}
