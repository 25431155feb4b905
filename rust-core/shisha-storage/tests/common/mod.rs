// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//! Shared fixtures for the storage integration tests.
//!
//! [`FakeCouch`] is a small in-process stand-in for the parts of the CouchDB
//! HTTP API the document backend uses: database creation, `_index`, `_find`
//! with equality selectors, descending id sort and bookmarks, document
//! create / overwrite / delete with revision checks, `_up` and `_membership`.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use shisha_storage::{CouchDbConfig, CouchDbStorage, Manufacturer, Shisha};

#[derive(Debug, Default)]
pub struct FakeState {
    pub databases: HashSet<String>,
    pub docs: Vec<Value>,
    /// When set, every sorted `_find` claims this is the highest stored id.
    pub frozen_max_id: Option<i64>,
    /// When set, every document overwrite fails with 409.
    pub conflict_on_put: bool,
    pub membership: Option<Value>,
    pub index_requests: usize,
}

#[derive(Clone)]
pub struct FakeCouch {
    pub url: String,
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeCouch {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let app = Router::new()
            .route("/_up", get(up))
            .route("/_membership", get(membership))
            .route("/{db}", put(create_db).post(create_doc))
            .route("/{db}/_find", post(find))
            .route("/{db}/_index", post(create_index))
            .route("/{db}/{doc_id}", put(put_doc).delete(delete_doc))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    pub fn config(&self) -> CouchDbConfig {
        CouchDbConfig::new(&self.url)
    }

    pub async fn storage(&self) -> CouchDbStorage {
        CouchDbStorage::connect(self.config()).await.unwrap()
    }

    pub fn doc_count(&self) -> usize {
        self.state.lock().unwrap().docs.len()
    }

    /// Insert a raw document, bypassing the adapter.
    pub fn insert_raw(&self, doc: Value) {
        self.state.lock().unwrap().docs.push(doc);
    }
}

pub fn mint_breeze() -> Shisha {
    Shisha::new("Mint Breeze", "Minze", Manufacturer::named("Al Fakher"))
}

fn new_rev(generation: u64) -> String {
    format!("{generation}-{}", uuid::Uuid::new_v4().simple())
}

fn rev_generation(rev: &str) -> u64 {
    rev.split('-').next().and_then(|g| g.parse().ok()).unwrap_or(0)
}

fn error(status: StatusCode, error: &str, reason: &str) -> Response {
    (status, Json(json!({ "error": error, "reason": reason }))).into_response()
}

async fn up() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn membership(State(state): State<Arc<Mutex<FakeState>>>) -> Json<Value> {
    let state = state.lock().unwrap();
    Json(state.membership.clone().unwrap_or_else(|| {
        json!({ "all_nodes": ["nonode@nohost"], "cluster_nodes": ["nonode@nohost"] })
    }))
}

async fn create_db(
    State(state): State<Arc<Mutex<FakeState>>>,
    Path(db): Path<String>,
) -> Response {
    let mut state = state.lock().unwrap();
    if state.databases.insert(db) {
        (StatusCode::CREATED, Json(json!({ "ok": true }))).into_response()
    } else {
        error(StatusCode::PRECONDITION_FAILED, "file_exists", "The database could not be created, the file already exists.")
    }
}

async fn create_index(State(state): State<Arc<Mutex<FakeState>>>) -> Json<Value> {
    let mut state = state.lock().unwrap();
    state.index_requests += 1;
    let result = if state.index_requests == 1 { "created" } else { "exists" };
    Json(json!({ "result": result, "id": "_design/ddoc_idx_type_id_desc", "name": "idx_type_id_desc" }))
}

async fn create_doc(
    State(state): State<Arc<Mutex<FakeState>>>,
    Json(mut doc): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    let id = uuid::Uuid::new_v4().simple().to_string();
    let rev = new_rev(1);
    doc["_id"] = json!(id);
    doc["_rev"] = json!(rev);
    state.docs.push(doc);
    (StatusCode::CREATED, Json(json!({ "ok": true, "id": id, "rev": rev }))).into_response()
}

fn matches(doc: &Value, selector: &Value) -> bool {
    match selector.as_object() {
        Some(fields) => fields.iter().all(|(k, v)| doc.get(k) == Some(v)),
        None => true,
    }
}

async fn find(
    State(state): State<Arc<Mutex<FakeState>>>,
    Json(query): Json<Value>,
) -> Json<Value> {
    let state = state.lock().unwrap();
    let sorted = query.get("sort").is_some();

    if let (true, Some(max)) = (sorted, state.frozen_max_id) {
        return Json(json!({
            "docs": [{ "_id": "frozen", "_rev": "1-frozen", "type": "shisha", "id": max, "name": "frozen" }],
            "bookmark": "nil",
        }));
    }

    let selector = query.get("selector").cloned().unwrap_or(Value::Null);
    let mut docs: Vec<Value> = state
        .docs
        .iter()
        .filter(|d| matches(d, &selector))
        .cloned()
        .collect();
    if sorted {
        docs.sort_by_key(|d| std::cmp::Reverse(d["id"].as_i64().unwrap_or(i64::MIN)));
    }

    let offset: usize = query
        .get("bookmark")
        .and_then(Value::as_str)
        .and_then(|b| b.parse().ok())
        .unwrap_or(0);
    let limit = query.get("limit").and_then(Value::as_u64).unwrap_or(25) as usize;
    let page: Vec<Value> = docs.into_iter().skip(offset).take(limit).collect();
    let bookmark = (offset + page.len()).to_string();
    Json(json!({ "docs": page, "bookmark": bookmark }))
}

async fn put_doc(
    State(state): State<Arc<Mutex<FakeState>>>,
    Path((_db, doc_id)): Path<(String, String)>,
    Json(mut doc): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    if state.conflict_on_put {
        return error(StatusCode::CONFLICT, "conflict", "Document update conflict.");
    }
    let Some(slot) = state.docs.iter_mut().find(|d| d["_id"] == json!(doc_id)) else {
        return error(StatusCode::NOT_FOUND, "not_found", "missing");
    };
    if slot["_rev"] != doc["_rev"] {
        return error(StatusCode::CONFLICT, "conflict", "Document update conflict.");
    }
    let rev = new_rev(rev_generation(slot["_rev"].as_str().unwrap_or("0")) + 1);
    doc["_rev"] = json!(rev);
    *slot = doc;
    (StatusCode::CREATED, Json(json!({ "ok": true, "id": doc_id, "rev": rev }))).into_response()
}

#[derive(Deserialize)]
struct RevQuery {
    rev: Option<String>,
}

async fn delete_doc(
    State(state): State<Arc<Mutex<FakeState>>>,
    Path((_db, doc_id)): Path<(String, String)>,
    Query(query): Query<RevQuery>,
) -> Response {
    let mut state = state.lock().unwrap();
    let Some(pos) = state.docs.iter().position(|d| d["_id"] == json!(doc_id)) else {
        return error(StatusCode::NOT_FOUND, "not_found", "missing");
    };
    if query.rev.as_deref() != state.docs[pos]["_rev"].as_str() {
        return error(StatusCode::CONFLICT, "conflict", "Document update conflict.");
    }
    state.docs.remove(pos);
    (StatusCode::OK, Json(json!({ "ok": true, "id": doc_id }))).into_response()
}
