//! A fake Clio store with its DVID backend, served over HTTP on an
//! ephemeral local port.
//!
//! The dataset's `dvid` entry points back at the same server, so one router
//! answers both the Clio REST API and the DVID node endpoints.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clio_client::auth::IdentitySource;
use clio_client::{ClientConfig, ClioClient};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tempfile::TempDir;

pub const DATASET: &str = "VNC";
pub const HEAD_TAG: &str = "v0.9";
pub const VALID_TOKEN: &str = "valid-token";
pub const IDENTITY_TOKEN: &str = "identity-token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedChunk {
    pub version: Option<String>,
    pub app: Option<String>,
    pub ids: Vec<i64>,
}

pub struct StoreState {
    pub base_url: String,
    pub datasets: Vec<String>,
    pub annotations: BTreeMap<i64, Map<String, Value>>,
    pub segmentation: BTreeSet<i64>,
    /// Tokens the store accepts.
    pub accepted_tokens: BTreeSet<String>,
    /// Token handed out by the token endpoint.
    pub issued_token: String,
    /// One-based write request that answers with HTTP 500.
    pub fail_post: Option<usize>,
    pub posts: Vec<PostedChunk>,
    pub write_attempts: usize,
    /// `path?query` of every request, in arrival order.
    pub requests: Vec<String>,
    /// Bearer token of every authenticated-route request, in arrival order.
    pub bearers: Vec<String>,
    pub unauthorized: usize,
}

pub type SharedStore = Arc<Mutex<StoreState>>;

pub struct FakeStore {
    pub url: String,
    pub state: SharedStore,
}

impl FakeStore {
    /// Start a store holding a single dataset.
    pub async fn start() -> Self {
        Self::with_datasets(&[DATASET]).await
    }

    pub async fn with_datasets(datasets: &[&str]) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let state = Arc::new(Mutex::new(StoreState {
            base_url: url.clone(),
            datasets: datasets.iter().map(|d| d.to_string()).collect(),
            annotations: BTreeMap::new(),
            segmentation: BTreeSet::new(),
            accepted_tokens: BTreeSet::from([VALID_TOKEN.to_string()]),
            issued_token: "fresh-token".to_string(),
            fail_post: None,
            posts: Vec::new(),
            write_attempts: 0,
            requests: Vec::new(),
            bearers: Vec::new(),
            unauthorized: 0,
        }));

        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { url, state }
    }

    pub fn annotate(&self, bodyid: i64, fields: Value) {
        let mut state = self.state.lock().unwrap();
        let Value::Object(fields) = fields else {
            panic!("annotation fields must be an object");
        };
        state.annotations.insert(bodyid, fields);
        state.segmentation.insert(bodyid);
    }

    pub fn add_bodies(&self, ids: impl IntoIterator<Item = i64>) {
        self.state.lock().unwrap().segmentation.extend(ids);
    }

    pub fn fail_write(&self, n: usize) {
        self.state.lock().unwrap().fail_post = Some(n);
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn bearers(&self) -> Vec<String> {
        self.state.lock().unwrap().bearers.clone()
    }

    pub fn posts(&self) -> Vec<PostedChunk> {
        self.state.lock().unwrap().posts.clone()
    }

    /// Client settings for this store. The token cache lives in `cache_dir`.
    pub fn config(&self, cache_dir: &TempDir) -> ClientConfig {
        ClientConfig {
            server: self.url.clone(),
            dataset: None,
            token: Some(VALID_TOKEN.to_string()),
            token_cache: cache_dir.path().join("flyem_token.json"),
            identity: IdentitySource::Disabled,
            read_retries: 0,
            allow_insecure_http: true,
            ..ClientConfig::default()
        }
    }

    pub async fn connect(&self, cache_dir: &TempDir) -> ClioClient {
        ClioClient::connect(self.config(cache_dir)).await.unwrap()
    }
}

fn router(state: SharedStore) -> Router {
    let clio = Router::new()
        .route("/v2/datasets", get(datasets))
        .route("/v2/roles", get(roles))
        .route("/v2/annotations/{dataset}", get(group_annotations))
        .route("/v2/json-annotations/{dataset}/neurons", post(write_neurons))
        .route("/v2/json-annotations/{dataset}/neurons/all", get(all_neurons))
        .route("/v2/json-annotations/{dataset}/neurons/query", post(query_neurons))
        .route(
            "/api/node/{node}/segmentation_annotations/json_schema",
            get(json_schema),
        )
        .route("/api/node/{node}/segmentation_annotations/fields", get(fields))
        .route("/api/node/{node}/segmentation_annotations/keys", get(keys))
        .route("/api/node/{node}/segmentation/sizes", get(sizes))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/v2/server/token", post(issue_token))
        .merge(clio)
        .with_state(state)
}

async fn require_token(State(state): State<SharedStore>, req: Request, next: Next) -> Response {
    let token = bearer(req.headers());
    {
        let mut state = state.lock().unwrap();
        let uri = req.uri();
        let entry = match uri.query() {
            Some(q) => format!("{}?{}", uri.path(), q),
            None => uri.path().to_string(),
        };
        state.requests.push(entry);
        state.bearers.extend(token.clone());

        if !token.is_some_and(|t| state.accepted_tokens.contains(&t)) {
            state.unauthorized += 1;
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    next.run(req).await
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

async fn issue_token(State(state): State<SharedStore>, headers: HeaderMap) -> Response {
    if bearer(&headers).as_deref() != Some(IDENTITY_TOKEN) {
        return (StatusCode::UNAUTHORIZED, "bad identity token").into_response();
    }
    let mut state = state.lock().unwrap();
    let token = state.issued_token.clone();
    state.accepted_tokens.insert(token.clone());
    Json(token).into_response()
}

async fn datasets(State(state): State<SharedStore>) -> Json<Value> {
    let state = state.lock().unwrap();
    let datasets: Map<String, Value> = state
        .datasets
        .iter()
        .map(|name| {
            let meta = json!({
                "title": format!("{name} dataset"),
                "tag": HEAD_TAG,
                "uuid": "a3f0c9",
                "dvid": state.base_url,
            });
            (name.clone(), meta)
        })
        .collect();
    Json(Value::Object(datasets))
}

async fn roles() -> Json<Value> {
    Json(json!({
        "email": "tester@example.org",
        "global_roles": ["clio_general"],
        "groups": ["flyem"],
    }))
}

#[derive(Deserialize)]
struct GroupParams {
    groups: Option<String>,
}

async fn group_annotations(
    Path(dataset): Path<String>,
    Query(params): Query<GroupParams>,
) -> Json<Value> {
    Json(json!([{
        "dataset": dataset,
        "groups": params.groups,
        "pos": [1, 2, 3],
        "kind": "Point",
    }]))
}

fn rows(state: &StoreState, ids: Option<&[i64]>) -> Vec<Value> {
    state
        .annotations
        .iter()
        .filter(|(id, _)| ids.map_or(true, |ids| ids.contains(id)))
        .map(|(id, fields)| {
            let mut row = fields.clone();
            row.insert("bodyid".into(), json!(id));
            Value::Object(row)
        })
        .collect()
}

async fn all_neurons(State(state): State<SharedStore>) -> Json<Vec<Value>> {
    Json(rows(&state.lock().unwrap(), None))
}

async fn query_neurons(
    State(state): State<SharedStore>,
    Json(filter): Json<Map<String, Value>>,
) -> Json<Vec<Value>> {
    let state = state.lock().unwrap();
    let ids: Option<Vec<i64>> = filter
        .get("bodyid")
        .and_then(|v| serde_json::from_value(v.clone()).ok());

    let matched = rows(&state, ids.as_deref())
        .into_iter()
        .filter(|row| {
            filter
                .iter()
                .filter(|(k, _)| k.as_str() != "bodyid")
                .all(|(k, v)| row.get(k) == Some(v))
        })
        .collect();
    Json(matched)
}

#[derive(Deserialize)]
struct WriteParams {
    version: Option<String>,
    app: Option<String>,
}

async fn write_neurons(
    State(state): State<SharedStore>,
    Query(params): Query<WriteParams>,
    Json(records): Json<Vec<Map<String, Value>>>,
) -> Response {
    let mut state = state.lock().unwrap();
    state.write_attempts += 1;
    if state.fail_post == Some(state.write_attempts) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "write failed").into_response();
    }

    let mut ids = Vec::with_capacity(records.len());
    for mut record in records {
        let Some(id) = record.remove("bodyid").and_then(|v| v.as_i64()) else {
            return (StatusCode::BAD_REQUEST, "missing bodyid").into_response();
        };
        let row = state.annotations.entry(id).or_default();
        row.extend(record);
        ids.push(id);
    }
    state.posts.push(PostedChunk {
        version: params.version,
        app: params.app,
        ids,
    });
    StatusCode::OK.into_response()
}

async fn json_schema() -> Json<Value> {
    Json(json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["bodyid"],
        "properties": {
            "bodyid": {"type": "integer"},
            "status": {"type": ["string", "null"]},
            "type": {"type": ["string", "null"]},
            "user": {"type": "string"},
            "soma_side": {"type": ["string", "null"]},
            "entry_nerve": {"type": ["array", "null"]},
        }
    }))
}

async fn fields() -> Json<Vec<&'static str>> {
    Json(vec![
        "bodyid",
        "status",
        "type",
        "user",
        "soma_side",
        "entry_nerve",
        "notes",
    ])
}

async fn keys(State(state): State<SharedStore>) -> Json<Vec<String>> {
    let state = state.lock().unwrap();
    let mut keys: Vec<String> = state.annotations.keys().map(|k| k.to_string()).collect();
    keys.push("not-a-body".to_string());
    Json(keys)
}

async fn sizes(State(state): State<SharedStore>, Json(ids): Json<Vec<i64>>) -> Json<Vec<u64>> {
    let state = state.lock().unwrap();
    Json(
        ids.iter()
            .map(|id| if state.segmentation.contains(id) { 1200 } else { 0 })
            .collect(),
    )
}
