use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use axum::{
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Largest batch envelope the server accepts.
pub const MAX_BATCH_SIZE: usize = 20;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchRequest {
    pub requests: Vec<SubRequest>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubRequest {
    pub id: String,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchResponse {
    pub responses: Vec<SubResponse>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubResponse {
    pub id: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// In-memory stand-in for the remote API.
///
/// Besides the resource table it understands `/status/{code}` (forced
/// status), `/empty` (204 without body) and `/items/{n}` (`{"id": n}`).
#[derive(Debug)]
pub struct MockApi {
    resources: HashMap<String, Value>,
    token: Option<String>,
    hits: AtomicUsize,
}

pub type SharedApi = Arc<MockApi>;

impl Default for MockApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockApi {
    pub fn new() -> Self {
        let mut resources = HashMap::new();
        resources.insert(
            "/me".to_string(),
            json!({"name": "Ada", "mail": "ada@example.com"}),
        );
        resources.insert(
            "/me/calendar".to_string(),
            json!({"name": "Calendar", "owner": {"name": "Ada", "address": "a@b.com"}}),
        );
        resources.insert(
            "/me/drive".to_string(),
            json!({"driveType": "personal", "quota": {"used": 1024}}),
        );
        Self {
            resources,
            token: None,
            hits: AtomicUsize::new(0),
        }
    }

    pub fn with_resource(mut self, path: &str, value: Value) -> Self {
        self.resources.insert(path.to_string(), value);
        self
    }

    /// Require `Authorization: Bearer <token>` on every request.
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// HTTP requests received so far. A batch envelope counts once.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(token) = &self.token else {
            return true;
        };
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|v| v == token)
    }

    /// Status and optional JSON body for `method path`.
    pub fn resolve(&self, method: &str, url: &str) -> (StatusCode, Option<Value>) {
        let path = url.split('?').next().unwrap_or(url);

        if let Some(code) = path.strip_prefix("/status/") {
            return match code.parse::<u16>().ok().and_then(|c| StatusCode::from_u16(c).ok()) {
                Some(status) if status.as_u16() >= 400 => (status, Some(error_body(status))),
                Some(status) => (status, None),
                None => (StatusCode::BAD_REQUEST, Some(error_body(StatusCode::BAD_REQUEST))),
            };
        }
        if path == "/empty" {
            return (StatusCode::NO_CONTENT, None);
        }

        let value = match path.strip_prefix("/items/") {
            Some(id) => id.parse::<u64>().ok().map(|id| json!({"id": id})),
            None => self.resources.get(path).cloned(),
        };
        match (value, method) {
            (None, _) => (StatusCode::NOT_FOUND, Some(error_body(StatusCode::NOT_FOUND))),
            (Some(value), "GET") => (StatusCode::OK, Some(value)),
            (Some(_), _) => (
                StatusCode::METHOD_NOT_ALLOWED,
                Some(error_body(StatusCode::METHOD_NOT_ALLOWED)),
            ),
        }
    }
}

fn error_body(status: StatusCode) -> Value {
    json!({"error": {"code": status.as_u16(), "message": status.canonical_reason().unwrap_or("error")}})
}

pub fn app() -> Router {
    app_with(Arc::new(MockApi::new()))
}

pub fn app_with(api: SharedApi) -> Router {
    Router::new()
        .route("/$batch", post(batch))
        .fallback(resource)
        .with_state(api)
}

pub async fn run_with(listener: TcpListener, api: SharedApi) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(api)).await
}

async fn resource(State(api): State<SharedApi>, method: Method, headers: HeaderMap, uri: Uri) -> Response {
    api.hits.fetch_add(1, Ordering::SeqCst);
    if !api.authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(error_body(StatusCode::UNAUTHORIZED))).into_response();
    }

    let (status, body) = api.resolve(method.as_str(), uri.path());
    tracing::debug!(%method, path = uri.path(), status = status.as_u16(), "resource");
    match body {
        Some(body) => (status, Json(body)).into_response(),
        None => status.into_response(),
    }
}

/// Answers every sub-request from the same resource table. Responses come
/// back in reverse order so clients must correlate by id.
async fn batch(
    State(api): State<SharedApi>,
    headers: HeaderMap,
    Json(input): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, (StatusCode, Json<Value>)> {
    api.hits.fetch_add(1, Ordering::SeqCst);
    if !api.authorized(&headers) {
        return Err((StatusCode::UNAUTHORIZED, Json(error_body(StatusCode::UNAUTHORIZED))));
    }
    if input.requests.len() > MAX_BATCH_SIZE {
        return Err((StatusCode::BAD_REQUEST, Json(error_body(StatusCode::BAD_REQUEST))));
    }
    let mut ids = HashSet::new();
    if !input.requests.iter().all(|r| ids.insert(r.id.as_str())) {
        return Err((StatusCode::BAD_REQUEST, Json(error_body(StatusCode::BAD_REQUEST))));
    }

    tracing::debug!(size = input.requests.len(), "batch");
    let responses = input
        .requests
        .iter()
        .rev()
        .map(|sub| {
            let (status, body) = api.resolve(&sub.method, &sub.url);
            SubResponse {
                id: sub.id.clone(),
                status: status.as_u16(),
                body,
            }
        })
        .collect();
    Ok(Json(BatchResponse { responses }))
}
