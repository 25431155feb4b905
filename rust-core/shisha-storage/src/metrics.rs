// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Metrics-collecting wrapper for shisha storage backends.
//
// Wraps any `Storage` and counts operations, failures and latency into a
// Prometheus registry. The API crate exposes that registry on `/metrics`.

use std::future::Future;
use std::time::Instant;

use async_trait::async_trait;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use tracing::error;

use crate::backend::Storage;
use crate::error::StorageError;
use crate::model::{Comment, DbInfo, Rating, Shisha, ShishaId};

/// Prometheus collectors for storage operations, labelled by operation name.
#[derive(Clone)]
pub struct StorageMetrics {
    requests: IntCounterVec,
    errors: IntCounterVec,
    latency: HistogramVec,
}

impl StorageMetrics {
    /// Create the collectors and register them with `registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let requests = IntCounterVec::new(
            Opts::new("shisha_requests_total", "Storage operations performed"),
            &["operation", "backend"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("shisha_storage_errors_total", "Storage operations that failed"),
            &["operation", "backend"],
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new(
                "shisha_storage_latency_seconds",
                "Wall-clock latency of storage operations",
            ),
            &["operation", "backend"],
        )?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        Ok(Self {
            requests,
            errors,
            latency,
        })
    }

    /// Number of `operation` calls recorded so far against `backend`.
    pub fn request_count(&self, operation: &str, backend: &str) -> u64 {
        self.requests.with_label_values(&[operation, backend]).get()
    }

    /// Number of failed `operation` calls recorded so far against `backend`.
    pub fn error_count(&self, operation: &str, backend: &str) -> u64 {
        self.errors.with_label_values(&[operation, backend]).get()
    }
}

/// A storage wrapper that records every call in [`StorageMetrics`].
///
/// `NotFound` results are expected traffic and are not counted as errors.
pub struct MeteredStorage<S: Storage> {
    inner: S,
    metrics: StorageMetrics,
}

impl<S: Storage> MeteredStorage<S> {
    pub fn new(inner: S, metrics: StorageMetrics) -> Self {
        Self { inner, metrics }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn metrics(&self) -> &StorageMetrics {
        &self.metrics
    }

    async fn observe<T, Fut>(&self, operation: &'static str, call: Fut) -> Result<T, StorageError>
    where
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let backend = self.inner.name();
        let labels = [operation, backend];
        let start = Instant::now();
        let result = call.await;
        self.metrics
            .latency
            .with_label_values(&labels)
            .observe(start.elapsed().as_secs_f64());
        self.metrics.requests.with_label_values(&labels).inc();
        if let Err(e) = &result {
            if !e.is_not_found() {
                self.metrics.errors.with_label_values(&labels).inc();
                error!(operation, backend, error = %e, "storage operation failed");
            }
        }
        result
    }
}

#[async_trait]
impl<S: Storage> Storage for MeteredStorage<S> {
    async fn list_shishas(&self) -> Result<Vec<Shisha>, StorageError> {
        self.observe("list", self.inner.list_shishas()).await
    }

    async fn get_shisha(&self, id: ShishaId) -> Result<Option<Shisha>, StorageError> {
        self.observe("get", self.inner.get_shisha(id)).await
    }

    async fn create_shisha(&self, shisha: &Shisha) -> Result<Shisha, StorageError> {
        self.observe("create", self.inner.create_shisha(shisha)).await
    }

    async fn update_shisha(&self, id: ShishaId, shisha: &Shisha) -> Result<Shisha, StorageError> {
        self.observe("update", self.inner.update_shisha(id, shisha)).await
    }

    async fn delete_shisha(&self, id: ShishaId) -> Result<bool, StorageError> {
        self.observe("delete", self.inner.delete_shisha(id)).await
    }

    async fn add_rating(
        &self,
        id: ShishaId,
        user: &str,
        score: i32,
    ) -> Result<Rating, StorageError> {
        self.observe("add_rating", self.inner.add_rating(id, user, score))
            .await
    }

    async fn add_comment(
        &self,
        id: ShishaId,
        user: &str,
        message: &str,
    ) -> Result<Comment, StorageError> {
        self.observe("add_comment", self.inner.add_comment(id, user, message))
            .await
    }

    async fn add_smoked(&self, id: ShishaId) -> Result<i64, StorageError> {
        self.observe("add_smoked", self.inner.add_smoked(id)).await
    }

    async fn health(&self) -> Result<(), StorageError> {
        self.observe("health", self.inner.health()).await
    }

    async fn db_info(&self) -> Result<DbInfo, StorageError> {
        self.observe("db_info", self.inner.db_info()).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
