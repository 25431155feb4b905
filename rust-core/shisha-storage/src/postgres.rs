// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Relational storage backend over sqlx (Postgres wire protocol).
//
// Schema (see `migrate::SCHEMA`): `manufacturers`, `shishas` with a nullable
// foreign key to a manufacturer, and `ratings` / `comments` child tables
// whose rows cascade away with their shisha. Every operation is a sequence
// of single statements with no application-level transaction; atomicity is
// whatever the database gives a single statement.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, instrument, warn};

use crate::backend::Storage;
use crate::error::StorageError;
use crate::model::{Comment, DbInfo, Manufacturer, Rating, Shisha, ShishaId};

/// Connection pool settings for [`PostgresStorage`].
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Connection string, e.g. `postgres://root@localhost:26257/shisha`.
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ShishaRow {
    id: i64,
    name: String,
    flavor: String,
    smoked: Option<i64>,
    manufacturer_id: Option<i64>,
    manufacturer_name: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct RatingRow {
    shisha_id: i64,
    user_name: String,
    score: i32,
    created_at: Option<i64>,
}

#[derive(Debug, sqlx::FromRow)]
struct CommentRow {
    shisha_id: i64,
    user_name: String,
    message: String,
}

const SELECT_SHISHA: &str = "SELECT s.id, s.name, s.flavor, s.smoked, \
     s.manufacturer_id, m.name AS manufacturer_name \
     FROM shishas s LEFT JOIN manufacturers m ON m.id = s.manufacturer_id";

/// Fold a sqlx error into the storage taxonomy.
fn map_sqlx(operation: &'static str, err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            StorageError::rejected(operation, code, db.message())
        }
        e @ (sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. }) => StorageError::mapping(operation, e),
        other => StorageError::unavailable(operation, other),
    }
}

/// Shisha store backed by a Postgres-compatible database.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Open a connection pool. The schema must already exist
    /// (see [`crate::migrate`]).
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| map_sqlx("connect", e))?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Attach ratings and comments to loaded rows, preserving row order.
    async fn hydrate(
        &self,
        operation: &'static str,
        rows: Vec<ShishaRow>,
    ) -> Result<Vec<Shisha>, StorageError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();

        // Tables created as `score INTEGER` are INT8 on CockroachDB.
        let ratings: Vec<RatingRow> = sqlx::query_as(
            "SELECT shisha_id, user_name, score::INT4 AS score, created_at FROM ratings \
             WHERE shisha_id = ANY($1) ORDER BY id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx(operation, e))?;

        let comments: Vec<CommentRow> = sqlx::query_as(
            "SELECT shisha_id, user_name, message FROM comments \
             WHERE shisha_id = ANY($1) ORDER BY id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx(operation, e))?;

        let mut ratings_by_id: HashMap<i64, Vec<Rating>> = HashMap::new();
        for r in ratings {
            ratings_by_id.entry(r.shisha_id).or_default().push(Rating {
                user: r.user_name,
                score: r.score,
                timestamp: r.created_at,
            });
        }
        let mut comments_by_id: HashMap<i64, Vec<Comment>> = HashMap::new();
        for c in comments {
            comments_by_id
                .entry(c.shisha_id)
                .or_default()
                .push(Comment::new(c.user_name, c.message));
        }

        Ok(rows
            .into_iter()
            .map(|row| Shisha {
                ratings: ratings_by_id.remove(&row.id).unwrap_or_default(),
                comments: comments_by_id.remove(&row.id).unwrap_or_default(),
                id: row.id,
                name: row.name,
                flavor: row.flavor,
                smoked: row.smoked.unwrap_or(0),
                manufacturer: match row.manufacturer_id {
                    Some(mid) => Manufacturer::new(mid, row.manufacturer_name.unwrap_or_default()),
                    None => Manufacturer::default(),
                },
            })
            .collect())
    }

    async fn load(
        &self,
        operation: &'static str,
        id: ShishaId,
    ) -> Result<Option<Shisha>, StorageError> {
        let row: Option<ShishaRow> = sqlx::query_as(&format!("{SELECT_SHISHA} WHERE s.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx(operation, e))?;
        match row {
            Some(row) => Ok(self.hydrate(operation, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    /// Resolve the manufacturer a request refers to.
    ///
    /// An id must exist; a bare name is looked up and created when missing.
    /// The lookup and the insert are separate statements, so two first-time
    /// creates racing on the same name can both insert.
    async fn resolve_manufacturer(
        &self,
        operation: &'static str,
        manufacturer: &Manufacturer,
    ) -> Result<Option<Manufacturer>, StorageError> {
        if manufacturer.is_unset() {
            return Ok(None);
        }

        if manufacturer.id != 0 {
            let name: Option<String> =
                sqlx::query_scalar("SELECT name FROM manufacturers WHERE id = $1")
                    .bind(manufacturer.id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| map_sqlx(operation, e))?;
            return match name {
                Some(name) => Ok(Some(Manufacturer::new(manufacturer.id, name))),
                None => Err(StorageError::InvalidInput(format!(
                    "unknown manufacturer {}",
                    manufacturer.id
                ))),
            };
        }

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM manufacturers WHERE name = $1 ORDER BY id LIMIT 1",
        )
        .bind(&manufacturer.name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx(operation, e))?;

        let id = match existing {
            Some(id) => id,
            None => {
                let id: i64 =
                    sqlx::query_scalar("INSERT INTO manufacturers (name) VALUES ($1) RETURNING id")
                        .bind(&manufacturer.name)
                        .fetch_one(&self.pool)
                        .await
                        .map_err(|e| map_sqlx(operation, e))?;
                debug!(id, name = %manufacturer.name, "created manufacturer");
                id
            }
        };
        Ok(Some(Manufacturer::new(id, manufacturer.name.clone())))
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    #[instrument(skip(self))]
    async fn list_shishas(&self) -> Result<Vec<Shisha>, StorageError> {
        let rows: Vec<ShishaRow> = sqlx::query_as(&format!("{SELECT_SHISHA} ORDER BY s.id"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx("list", e))?;
        self.hydrate("list", rows).await
    }

    #[instrument(skip(self))]
    async fn get_shisha(&self, id: ShishaId) -> Result<Option<Shisha>, StorageError> {
        self.load("get", id).await
    }

    #[instrument(skip(self, shisha), fields(name = %shisha.name))]
    async fn create_shisha(&self, shisha: &Shisha) -> Result<Shisha, StorageError> {
        let manufacturer = self.resolve_manufacturer("create", &shisha.manufacturer).await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO shishas (name, flavor, manufacturer_id, smoked) \
             VALUES ($1, $2, $3, 0) RETURNING id",
        )
        .bind(&shisha.name)
        .bind(&shisha.flavor)
        .bind(manufacturer.as_ref().map(|m| m.id))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx("create", e))?;

        let mut created = shisha.as_created(id);
        created.manufacturer = manufacturer.unwrap_or_default();
        Ok(created)
    }

    #[instrument(skip(self, shisha))]
    async fn update_shisha(&self, id: ShishaId, shisha: &Shisha) -> Result<Shisha, StorageError> {
        let manufacturer = self.resolve_manufacturer("update", &shisha.manufacturer).await?;
        let result = sqlx::query(
            "UPDATE shishas SET name = $2, flavor = $3, manufacturer_id = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(&shisha.name)
        .bind(&shisha.flavor)
        .bind(manufacturer.as_ref().map(|m| m.id))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx("update", e))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id));
        }
        self.load("update", id)
            .await?
            .ok_or(StorageError::NotFound(id))
    }

    #[instrument(skip(self))]
    async fn delete_shisha(&self, id: ShishaId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM shishas WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx("delete", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn add_rating(
        &self,
        id: ShishaId,
        user: &str,
        score: i32,
    ) -> Result<Rating, StorageError> {
        let rating = Rating::now(user, score);
        let result = sqlx::query(
            "INSERT INTO ratings (shisha_id, user_name, score, created_at) \
             SELECT $1, $2, $3, $4 WHERE EXISTS (SELECT 1 FROM shishas WHERE id = $1)",
        )
        .bind(id)
        .bind(&rating.user)
        .bind(rating.score)
        .bind(rating.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx("add_rating", e))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id));
        }
        Ok(rating)
    }

    #[instrument(skip(self, message))]
    async fn add_comment(
        &self,
        id: ShishaId,
        user: &str,
        message: &str,
    ) -> Result<Comment, StorageError> {
        let result = sqlx::query(
            "INSERT INTO comments (shisha_id, user_name, message) \
             SELECT $1, $2, $3 WHERE EXISTS (SELECT 1 FROM shishas WHERE id = $1)",
        )
        .bind(id)
        .bind(user)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx("add_comment", e))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id));
        }
        Ok(Comment::new(user, message))
    }

    #[instrument(skip(self))]
    async fn add_smoked(&self, id: ShishaId) -> Result<i64, StorageError> {
        let smoked: Option<i64> = sqlx::query_scalar(
            "UPDATE shishas SET smoked = COALESCE(smoked, 0) + 1 WHERE id = $1 RETURNING smoked",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("add_smoked", e))?;
        smoked.ok_or(StorageError::NotFound(id))
    }

    async fn health(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx("health", e))?;
        Ok(())
    }

    async fn db_info(&self) -> Result<DbInfo, StorageError> {
        // Only CockroachDB exposes gossip membership; plain Postgres is one node.
        let nodes: Result<i64, _> =
            sqlx::query_scalar("SELECT count(*) FROM crdb_internal.gossip_nodes")
                .fetch_one(&self.pool)
                .await;
        match nodes {
            Ok(n) => Ok(DbInfo::cluster(u32::try_from(n).unwrap_or(u32::MAX))),
            Err(sqlx::Error::Database(db)) => {
                debug!(error = %db.message(), "no cluster membership view, assuming single node");
                Ok(DbInfo::single_node())
            }
            Err(e) => {
                warn!(error = %e, "cluster membership query failed");
                Err(map_sqlx("db_info", e))
            }
        }
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
