// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory storage backend.
//
// A `HashMap` from id to shisha plus the next-id counter, both behind one
// tokio `Mutex`. Every operation takes the lock for its whole duration, so
// id allocation and read-modify-write updates are serialized. Intended for
// local development, demos and tests; all state is lost on drop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::backend::Storage;
use crate::error::StorageError;
use crate::model::{Comment, DbInfo, Manufacturer, Rating, Shisha, ShishaId};

#[derive(Debug)]
struct Inner {
    shishas: HashMap<ShishaId, Shisha>,
    next_id: ShishaId,
}

impl Inner {
    fn allocate_id(&mut self) -> ShishaId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn get_mut(&mut self, id: ShishaId) -> Result<&mut Shisha, StorageError> {
        self.shishas.get_mut(&id).ok_or(StorageError::NotFound(id))
    }
}

/// An in-memory shisha store.
///
/// Cloning is cheap and clones share state.
///
/// # Example
///
/// ```rust
/// use shisha_storage::{InMemoryStorage, Manufacturer, Shisha, Storage};
///
/// # tokio_test::block_on(async {
/// let store = InMemoryStorage::new();
/// let created = store
///     .create_shisha(&Shisha::new("Mint Breeze", "Minze", Manufacturer::named("Al Fakher")))
///     .await
///     .unwrap();
/// assert_eq!(created.id, 1);
/// assert_eq!(store.add_smoked(created.id).await.unwrap(), 1);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryStorage {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStorage {
    /// Create a new, empty store. The first id handed out is 1.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                shishas: HashMap::new(),
                next_id: 1,
            })),
        }
    }

    /// Create a store holding the "Mint Breeze" sample record.
    pub fn with_sample() -> Self {
        let mut inner = Inner {
            shishas: HashMap::new(),
            next_id: 1,
        };
        let id = inner.allocate_id();
        let timestamp = Some(chrono::Utc::now().timestamp());
        inner.shishas.insert(
            id,
            Shisha {
                id,
                name: "Mint Breeze".into(),
                flavor: "Minze".into(),
                manufacturer: Manufacturer::new(1, "Al Fakher"),
                smoked: 0,
                ratings: vec![
                    Rating {
                        user: "alice".into(),
                        score: 4,
                        timestamp,
                    },
                    Rating {
                        user: "bob".into(),
                        score: 1,
                        timestamp,
                    },
                ],
                comments: vec![Comment::new("bob", "Leicht und frisch")],
            },
        );
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Number of stored shishas.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.shishas.len()
    }

    /// True if the store holds no shishas.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.shishas.is_empty()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn list_shishas(&self) -> Result<Vec<Shisha>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner.shishas.values().cloned().collect())
    }

    async fn get_shisha(&self, id: ShishaId) -> Result<Option<Shisha>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner.shishas.get(&id).cloned())
    }

    async fn create_shisha(&self, shisha: &Shisha) -> Result<Shisha, StorageError> {
        let mut inner = self.inner.lock().await;
        let id = inner.allocate_id();
        let created = shisha.as_created(id);
        inner.shishas.insert(id, created.clone());
        debug!(id, "created shisha");
        Ok(created)
    }

    async fn update_shisha(&self, id: ShishaId, shisha: &Shisha) -> Result<Shisha, StorageError> {
        let mut inner = self.inner.lock().await;
        let existing = inner.get_mut(id)?;
        existing.apply_update(shisha);
        Ok(existing.clone())
    }

    async fn delete_shisha(&self, id: ShishaId) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.shishas.remove(&id).is_some())
    }

    async fn add_rating(
        &self,
        id: ShishaId,
        user: &str,
        score: i32,
    ) -> Result<Rating, StorageError> {
        let mut inner = self.inner.lock().await;
        let rating = Rating::now(user, score);
        inner.get_mut(id)?.ratings.push(rating.clone());
        Ok(rating)
    }

    async fn add_comment(
        &self,
        id: ShishaId,
        user: &str,
        message: &str,
    ) -> Result<Comment, StorageError> {
        let mut inner = self.inner.lock().await;
        let comment = Comment::new(user, message);
        inner.get_mut(id)?.comments.push(comment.clone());
        Ok(comment)
    }

    async fn add_smoked(&self, id: ShishaId) -> Result<i64, StorageError> {
        let mut inner = self.inner.lock().await;
        let shisha = inner.get_mut(id)?;
        shisha.smoked += 1;
        Ok(shisha.smoked)
    }

    async fn health(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn db_info(&self) -> Result<DbInfo, StorageError> {
        Ok(DbInfo::single_node())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
