// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document-store backend over the CouchDB HTTP API.
//
// Every shisha is one JSON document in a single database, tagged with
// `"type": "shisha"` and carrying the numeric application id in `id`.
// Lookups go through Mango `_find` queries. Writes are whole-document
// overwrites keyed by `_id` + `_rev`; a stale revision comes back as HTTP 409
// and is surfaced as `BackendRejected` without retrying.
//
// Id allocation reads the current maximum id and adds one. Two creates that
// interleave between that read and their write get the same id. There is no
// server-side sequence to lean on, so this is a known limitation of this
// backend rather than something the adapter tries to paper over.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::backend::Storage;
use crate::error::StorageError;
use crate::model::{Comment, DbInfo, Manufacturer, Rating, Shisha, ShishaId};

/// Discriminator value for shisha documents.
pub const SHISHA_TYPE: &str = "shisha";

/// Node name CouchDB reports when it has not been set up as a cluster.
pub const PLACEHOLDER_NODE: &str = "nonode@nohost";

const INDEX_NAME: &str = "idx_type_id_desc";

/// Connection settings for [`CouchDbStorage`].
#[derive(Debug, Clone)]
pub struct CouchDbConfig {
    /// Server base URL, e.g. `http://localhost:5984`. A trailing slash is optional.
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: String,
    /// Per-request timeout. Requests are never retried.
    pub timeout: Duration,
    /// Number of documents fetched per `_find` page when listing.
    pub page_size: usize,
}

impl CouchDbConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            username: None,
            password: None,
            database: "shisha".to_string(),
            timeout: Duration::from_secs(10),
            page_size: 1000,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }
}

/// On-disk shape of a shisha document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ShishaDoc {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    doc_id: Option<String>,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    rev: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    id: ShishaId,
    name: String,
    #[serde(default)]
    flavor: String,
    #[serde(default)]
    manufacturer: Manufacturer,
    #[serde(default)]
    smoked: i64,
    #[serde(default)]
    ratings: Vec<Rating>,
    #[serde(default)]
    comments: Vec<Comment>,
}

impl ShishaDoc {
    fn new(shisha: Shisha) -> Self {
        Self {
            doc_id: None,
            rev: None,
            kind: SHISHA_TYPE.to_string(),
            id: shisha.id,
            name: shisha.name,
            flavor: shisha.flavor,
            manufacturer: shisha.manufacturer,
            smoked: shisha.smoked,
            ratings: shisha.ratings,
            comments: shisha.comments,
        }
    }

    fn to_shisha(&self) -> Shisha {
        Shisha {
            id: self.id,
            name: self.name.clone(),
            flavor: self.flavor.clone(),
            manufacturer: self.manufacturer.clone(),
            smoked: self.smoked,
            ratings: self.ratings.clone(),
            comments: self.comments.clone(),
        }
    }

    /// `_id` and `_rev` of a document read back from the server.
    fn revision(&self, operation: &'static str) -> Result<(&str, &str), StorageError> {
        match (self.doc_id.as_deref(), self.rev.as_deref()) {
            (Some(id), Some(rev)) => Ok((id, rev)),
            _ => Err(StorageError::mapping(
                operation,
                format!("document for shisha {} lacks _id or _rev", self.id),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    docs: Vec<ShishaDoc>,
    #[serde(default)]
    bookmark: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Membership {
    #[serde(default)]
    all_nodes: Vec<String>,
    #[serde(default)]
    cluster_nodes: Vec<String>,
}

impl Membership {
    fn db_info(&self) -> DbInfo {
        let nodes: Vec<&String> = self
            .cluster_nodes
            .iter()
            .chain(self.all_nodes.iter())
            .filter(|n| n.as_str() != PLACEHOLDER_NODE)
            .collect();
        if nodes.is_empty() {
            return DbInfo::single_node();
        }
        let count = self.cluster_nodes.len().max(self.all_nodes.len());
        DbInfo::cluster(u32::try_from(count).unwrap_or(u32::MAX))
    }
}

/// Shisha store backed by a CouchDB database.
#[derive(Debug, Clone)]
pub struct CouchDbStorage {
    http: reqwest::Client,
    base_url: Url,
    database: String,
    credentials: Option<(String, Option<String>)>,
    page_size: usize,
}

impl CouchDbStorage {
    /// Build the client, create the database if missing and ensure the
    /// Mango index used for id allocation.
    pub async fn connect(config: CouchDbConfig) -> Result<Self, StorageError> {
        let storage = Self::new(config)?;
        storage.ensure_database().await?;
        storage.ensure_indexes().await?;
        info!(database = %storage.database, url = %storage.base_url, "couchdb storage ready");
        Ok(storage)
    }

    /// Build the client without touching the server.
    pub fn new(config: CouchDbConfig) -> Result<Self, StorageError> {
        let mut base_url = Url::parse(&config.base_url).map_err(|e| {
            StorageError::InvalidInput(format!("invalid CouchDB URL {:?}: {e}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(StorageError::InvalidInput(format!(
                "CouchDB URL {:?} cannot carry a path",
                config.base_url
            )));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        if config.database.is_empty() {
            return Err(StorageError::InvalidInput("CouchDB database name is empty".into()));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StorageError::unavailable("connect", e))?;

        let credentials = match (config.username, config.password) {
            (None, None) => None,
            (user, password) => Some((user.unwrap_or_default(), password)),
        };

        Ok(Self {
            http,
            base_url,
            database: config.database,
            credentials,
            page_size: config.page_size.max(1),
        })
    }

    /// Base URL the adapter talks to, always ending in `/`.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Build `{base}/{segments...}` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, StorageError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StorageError::InvalidInput("CouchDB URL cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, password.as_ref()),
            None => builder,
        }
    }

    /// Send a request, mapping transport failures to `BackendUnavailable`.
    async fn send(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
    ) -> Result<Response, StorageError> {
        builder.send().await.map_err(|e| {
            warn!(operation, error = %e, "couchdb request failed");
            if e.is_timeout() {
                StorageError::unavailable(operation, format!("timed out: {e}"))
            } else {
                StorageError::unavailable(operation, e)
            }
        })
    }

    /// Turn a non-2xx response into `BackendRejected` carrying status and body.
    async fn check(operation: &'static str, response: Response) -> Result<Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(operation, status = status.as_u16(), %body, "couchdb rejected request");
        Err(StorageError::rejected(operation, status.as_u16(), body))
    }

    async fn decode<T: DeserializeOwned>(
        operation: &'static str,
        response: Response,
    ) -> Result<T, StorageError> {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| StorageError::unavailable(operation, e))?;
        serde_json::from_slice(&bytes).map_err(|e| StorageError::mapping(operation, e))
    }

    async fn find(
        &self,
        operation: &'static str,
        query: serde_json::Value,
    ) -> Result<FindResponse, StorageError> {
        let url = self.endpoint(&[&self.database, "_find"])?;
        let response = self
            .send(operation, self.request(Method::POST, url).json(&query))
            .await?;
        let found: FindResponse = Self::decode(operation, Self::check(operation, response).await?).await?;
        for doc in &found.docs {
            if doc.kind != SHISHA_TYPE {
                return Err(StorageError::mapping(
                    operation,
                    format!("document {:?} has type {:?}", doc.doc_id, doc.kind),
                ));
            }
        }
        Ok(found)
    }

    async fn find_by_id(
        &self,
        operation: &'static str,
        id: ShishaId,
    ) -> Result<Option<ShishaDoc>, StorageError> {
        let query = json!({
            "selector": { "type": SHISHA_TYPE, "id": id },
            "limit": 1,
        });
        Ok(self.find(operation, query).await?.docs.into_iter().next())
    }

    /// Highest stored id plus one, or 1 for an empty database.
    async fn next_id(&self) -> Result<ShishaId, StorageError> {
        let query = json!({
            "selector": { "type": SHISHA_TYPE },
            "sort": [ { "type": "desc" }, { "id": "desc" } ],
            "limit": 1,
        });
        let found = self.find("next_id", query).await?;
        Ok(found.docs.first().map_or(1, |doc| doc.id + 1))
    }

    /// Overwrite an existing document at its current revision.
    async fn put_doc(&self, operation: &'static str, doc: &ShishaDoc) -> Result<(), StorageError> {
        let (doc_id, _) = doc.revision(operation)?;
        let url = self.endpoint(&[&self.database, doc_id])?;
        let response = self
            .send(operation, self.request(Method::PUT, url).json(doc))
            .await?;
        Self::check(operation, response).await?;
        Ok(())
    }

    /// Fetch, mutate and write back one document.
    async fn modify<F>(
        &self,
        operation: &'static str,
        id: ShishaId,
        mutate: F,
    ) -> Result<ShishaDoc, StorageError>
    where
        F: FnOnce(&mut ShishaDoc) + Send,
    {
        let mut doc = self
            .find_by_id(operation, id)
            .await?
            .ok_or(StorageError::NotFound(id))?;
        mutate(&mut doc);
        self.put_doc(operation, &doc).await?;
        Ok(doc)
    }

    /// `PUT /{db}`; an existing database (412) counts as success.
    pub async fn ensure_database(&self) -> Result<(), StorageError> {
        let url = self.endpoint(&[&self.database])?;
        let response = self
            .send("ensure_database", self.request(Method::PUT, url))
            .await?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED => {
                info!(database = %self.database, "created couchdb database");
                Ok(())
            }
            StatusCode::PRECONDITION_FAILED => {
                debug!(database = %self.database, "couchdb database already exists");
                Ok(())
            }
            _ => Self::check("ensure_database", response).await.map(|_| ()),
        }
    }

    /// Create the `[type desc, id desc]` Mango index needed by id allocation.
    pub async fn ensure_indexes(&self) -> Result<(), StorageError> {
        let url = self.endpoint(&[&self.database, "_index"])?;
        let index = json!({
            "index": { "fields": [ { "type": "desc" }, { "id": "desc" } ] },
            "name": INDEX_NAME,
            "ddoc": format!("ddoc_{INDEX_NAME}"),
            "type": "json",
        });
        let response = self
            .send("ensure_indexes", self.request(Method::POST, url).json(&index))
            .await?;
        Self::check("ensure_indexes", response).await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for CouchDbStorage {
    #[instrument(skip(self))]
    async fn list_shishas(&self) -> Result<Vec<Shisha>, StorageError> {
        let mut shishas = Vec::new();
        let mut bookmark: Option<String> = None;
        loop {
            let mut query = json!({
                "selector": { "type": SHISHA_TYPE },
                "limit": self.page_size,
            });
            if let Some(b) = &bookmark {
                query["bookmark"] = json!(b);
            }
            let page = self.find("list", query).await?;
            let fetched = page.docs.len();
            shishas.extend(page.docs.iter().map(ShishaDoc::to_shisha));
            if fetched < self.page_size {
                break;
            }
            match page.bookmark {
                Some(next) if bookmark.as_deref() != Some(next.as_str()) => bookmark = Some(next),
                _ => break,
            }
        }
        debug!(count = shishas.len(), "listed shishas");
        Ok(shishas)
    }

    #[instrument(skip(self))]
    async fn get_shisha(&self, id: ShishaId) -> Result<Option<Shisha>, StorageError> {
        Ok(self.find_by_id("get", id).await?.map(|doc| doc.to_shisha()))
    }

    #[instrument(skip(self, shisha), fields(name = %shisha.name))]
    async fn create_shisha(&self, shisha: &Shisha) -> Result<Shisha, StorageError> {
        let id = self.next_id().await?;
        let created = shisha.as_created(id);
        let url = self.endpoint(&[&self.database])?;
        let doc = ShishaDoc::new(created.clone());
        let response = self
            .send("create", self.request(Method::POST, url).json(&doc))
            .await?;
        Self::check("create", response).await?;
        debug!(id, "created shisha document");
        Ok(created)
    }

    #[instrument(skip(self, shisha))]
    async fn update_shisha(&self, id: ShishaId, shisha: &Shisha) -> Result<Shisha, StorageError> {
        let doc = self
            .modify("update", id, |doc| {
                doc.name = shisha.name.clone();
                doc.flavor = shisha.flavor.clone();
                doc.manufacturer = shisha.manufacturer.clone();
            })
            .await?;
        Ok(doc.to_shisha())
    }

    #[instrument(skip(self))]
    async fn delete_shisha(&self, id: ShishaId) -> Result<bool, StorageError> {
        let Some(doc) = self.find_by_id("delete", id).await? else {
            return Ok(false);
        };
        let (doc_id, rev) = doc.revision("delete")?;
        let url = self.endpoint(&[&self.database, doc_id])?;
        let response = self
            .send("delete", self.request(Method::DELETE, url).query(&[("rev", rev)]))
            .await?;
        Self::check("delete", response).await?;
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn add_rating(
        &self,
        id: ShishaId,
        user: &str,
        score: i32,
    ) -> Result<Rating, StorageError> {
        let rating = Rating::now(user, score);
        let appended = rating.clone();
        self.modify("add_rating", id, move |doc| doc.ratings.push(appended))
            .await?;
        Ok(rating)
    }

    #[instrument(skip(self, message))]
    async fn add_comment(
        &self,
        id: ShishaId,
        user: &str,
        message: &str,
    ) -> Result<Comment, StorageError> {
        let comment = Comment::new(user, message);
        let appended = comment.clone();
        self.modify("add_comment", id, move |doc| doc.comments.push(appended))
            .await?;
        Ok(comment)
    }

    #[instrument(skip(self))]
    async fn add_smoked(&self, id: ShishaId) -> Result<i64, StorageError> {
        let doc = self
            .modify("add_smoked", id, |doc| doc.smoked += 1)
            .await?;
        Ok(doc.smoked)
    }

    async fn health(&self) -> Result<(), StorageError> {
        let url = self.endpoint(&["_up"])?;
        let response = self.send("health", self.request(Method::GET, url)).await?;
        Self::check("health", response).await?;
        Ok(())
    }

    async fn db_info(&self) -> Result<DbInfo, StorageError> {
        let url = self.endpoint(&["_membership"])?;
        let response = self.send("db_info", self.request(Method::GET, url)).await?;
        let membership: Membership =
            Self::decode("db_info", Self::check("db_info", response).await?).await?;
        Ok(membership.db_info())
    }

    fn name(&self) -> &str {
        "couchdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(base: &str) -> CouchDbStorage {
        CouchDbStorage::new(CouchDbConfig::new(base)).unwrap()
    }

    #[test]
    fn test_endpoint_with_and_without_trailing_slash() {
        let want = "http://example.com/shisha/_find";
        assert_eq!(
            storage("http://example.com/").endpoint(&["shisha", "_find"]).unwrap().as_str(),
            want
        );
        assert_eq!(
            storage("http://example.com").endpoint(&["shisha", "_find"]).unwrap().as_str(),
            want
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path_and_encodes_segments() {
        let s = storage("http://proxy.local/couch");
        assert_eq!(
            s.endpoint(&["shisha", "a/b"]).unwrap().as_str(),
            "http://proxy.local/couch/shisha/a%2Fb"
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(CouchDbStorage::new(CouchDbConfig::new("not a url")).is_err());
        assert!(CouchDbStorage::new(CouchDbConfig::new("mailto:x@y")).is_err());
        assert!(
            CouchDbStorage::new(CouchDbConfig::new("http://localhost:5984").with_database(""))
                .is_err()
        );
    }

    #[test]
    fn test_doc_wire_format() {
        let mut shisha = Shisha::new("Mint Breeze", "Minze", Manufacturer::new(1, "Al Fakher"));
        shisha.id = 3;
        let json = serde_json::to_value(ShishaDoc::new(shisha)).unwrap();
        assert_eq!(json["type"], "shisha");
        assert_eq!(json["id"], 3);
        assert_eq!(json["manufacturer"]["name"], "Al Fakher");
        assert!(json.get("_id").is_none());
        assert!(json.get("_rev").is_none());
    }

    #[test]
    fn test_doc_decode_is_strict() {
        // A document without a numeric id is a mapping error, not a default.
        let bad = r#"{"_id": "a", "_rev": "1-x", "type": "shisha", "id": "7", "name": "n"}"#;
        assert!(serde_json::from_str::<ShishaDoc>(bad).is_err());

        let good = r#"{"_id": "a", "_rev": "1-x", "type": "shisha", "id": 7, "name": "n"}"#;
        let doc: ShishaDoc = serde_json::from_str(good).unwrap();
        assert_eq!(doc.revision("test").unwrap(), ("a", "1-x"));
        assert_eq!(doc.to_shisha().id, 7);
    }

    #[test]
    fn test_membership_placeholder_is_single_node() {
        let m: Membership = serde_json::from_str(
            r#"{"all_nodes": ["nonode@nohost"], "cluster_nodes": ["nonode@nohost"]}"#,
        )
        .unwrap();
        assert_eq!(m.db_info(), DbInfo::single_node());
    }

    #[test]
    fn test_membership_cluster() {
        let m: Membership = serde_json::from_str(
            r#"{"all_nodes": ["couchdb@a", "couchdb@b", "couchdb@c"],
                "cluster_nodes": ["couchdb@a", "couchdb@b", "couchdb@c"]}"#,
        )
        .unwrap();
        assert_eq!(m.db_info(), DbInfo::cluster(3));
        assert!(m.db_info().is_cluster);
    }
}
