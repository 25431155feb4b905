// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shisha Tracker Storage Abstraction
//
// This crate provides the storage layer for the shisha tracker. The
// `Storage` trait defines the operations the HTTP layer needs, and three
// interchangeable backends implement it:
//
// - [`memory`] -- a mutex-guarded `HashMap`, for local serving and tests.
// - [`postgres`] -- a relational schema over sqlx (Postgres / CockroachDB).
// - [`couchdb`] -- JSON documents in a CouchDB database over HTTP.
//
// Supporting modules:
//
// - [`model`] -- the records shared by all backends.
// - [`error`] -- the `StorageError` enum covering all backend failure modes.
// - [`metrics`] -- a transparent wrapper that feeds Prometheus collectors.
// - [`migrate`] -- idempotent relational schema plus a cross-replica lock.
//
// # Example
//
// ```rust
// use prometheus::Registry;
// use shisha_storage::{InMemoryStorage, Manufacturer, MeteredStorage, Shisha, Storage, StorageMetrics};
//
// # tokio_test::block_on(async {
// let registry = Registry::new();
// let metrics = StorageMetrics::register(&registry).unwrap();
// let store = MeteredStorage::new(InMemoryStorage::new(), metrics);
//
// let created = store
//     .create_shisha(&Shisha::new("Mint Breeze", "Minze", Manufacturer::named("Al Fakher")))
//     .await
//     .unwrap();
// store.add_rating(created.id, "alice", 4).await.unwrap();
//
// let fetched = store.get_shisha(created.id).await.unwrap().unwrap();
// assert_eq!(fetched.ratings[0].user, "alice");
// # });
// ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod model;

#[cfg(feature = "couchdb")]
pub mod couchdb;
#[cfg(feature = "postgres")]
pub mod migrate;
#[cfg(feature = "postgres")]
pub mod postgres;

// Re-export the most commonly used types at the crate root for convenience.
pub use backend::Storage;
pub use error::StorageError;
pub use memory::InMemoryStorage;
pub use metrics::{MeteredStorage, StorageMetrics};
pub use model::{Comment, DbInfo, Manufacturer, Rating, Shisha, ShishaId};

#[cfg(feature = "couchdb")]
pub use couchdb::{CouchDbConfig, CouchDbStorage};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresStorage};
