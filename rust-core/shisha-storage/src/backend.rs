// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core storage trait for the shisha tracker.
//
// Defines the `Storage` capability set that every backend implements. The
// HTTP layer only ever talks to `dyn Storage`, so the memory, relational and
// document backends are interchangeable at startup.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::model::{Comment, DbInfo, Rating, Shisha, ShishaId};

/// A pluggable shisha store.
///
/// Implementations must be safe to share across threads and tokio tasks.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Return every stored shisha. Order is backend-defined; an empty store
    /// yields an empty vector.
    async fn list_shishas(&self) -> Result<Vec<Shisha>, StorageError>;

    /// Fetch one shisha.
    ///
    /// Returns `Ok(None)` if the id does not exist, rather than an error.
    async fn get_shisha(&self, id: ShishaId) -> Result<Option<Shisha>, StorageError>;

    /// Persist a new shisha under a fresh backend-assigned id.
    ///
    /// Any id, smoke count, ratings or comments on `shisha` are ignored.
    async fn create_shisha(&self, shisha: &Shisha) -> Result<Shisha, StorageError>;

    /// Replace name, flavor and manufacturer of an existing shisha.
    ///
    /// Ratings, comments and the smoke count are left untouched.
    async fn update_shisha(&self, id: ShishaId, shisha: &Shisha) -> Result<Shisha, StorageError>;

    /// Delete a shisha together with its ratings and comments.
    ///
    /// Returns `Ok(true)` if it existed, `Ok(false)` if there was nothing to delete.
    async fn delete_shisha(&self, id: ShishaId) -> Result<bool, StorageError>;

    /// Append a rating stamped with the current time.
    async fn add_rating(&self, id: ShishaId, user: &str, score: i32)
        -> Result<Rating, StorageError>;

    /// Append a comment.
    async fn add_comment(
        &self,
        id: ShishaId,
        user: &str,
        message: &str,
    ) -> Result<Comment, StorageError>;

    /// Increment the smoke counter by one and return the new value.
    async fn add_smoked(&self, id: ShishaId) -> Result<i64, StorageError>;

    /// Succeeds iff the backend is reachable and responsive.
    async fn health(&self) -> Result<(), StorageError>;

    /// Describe the backend topology.
    async fn db_info(&self) -> Result<DbInfo, StorageError>;

    /// A human-readable name for this backend, used in logging and metrics.
    fn name(&self) -> &str;
}
