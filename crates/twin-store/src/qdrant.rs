//! Qdrant REST client.
//!
//! Speaks the subset of the HTTP API the catalog needs: collection lookup and
//! creation, point upsert, and filtered similarity search.

use crate::error::StoreError;
use crate::schema::{
    validate_collection_name, validate_vector, CollectionInfo, Distance, FacePayload, PayloadFilter, Point,
    ScoredPoint, SearchQuery,
};
use crate::store::VectorStore;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use twin_core::Endpoint;

pub struct QdrantStore {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    timeout_secs: u64,
    /// Dimensions learned from collection lookups, used to reject bad vectors locally.
    known_dims: Mutex<HashMap<String, usize>>,
}

impl QdrantStore {
    pub fn new(endpoint: &Endpoint, timeout_secs: u64) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StoreError::Http(e.to_string()))?;

        Ok(Self {
            base_url: endpoint.url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
            client,
            timeout_secs,
            known_dims: Mutex::new(HashMap::new()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    fn known_dim(&self, name: &str) -> Option<usize> {
        self.known_dims.lock().unwrap_or_else(|e| e.into_inner()).get(name).copied()
    }

    fn remember_dim(&self, name: &str, dim: usize) {
        self.known_dims
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), dim);
    }

    /// Dimension of `name`, asking the server once when it is not cached yet.
    async fn expected_dim(&self, name: &str) -> Result<usize, StoreError> {
        if let Some(dim) = self.known_dim(name) {
            return Ok(dim);
        }
        match self.collection_info(name).await? {
            Some(info) => Ok(info.dimensions),
            None => Err(StoreError::CollectionNotFound(name.to_string())),
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> StoreError {
        if e.is_connect() {
            StoreError::Connection(self.base_url.clone())
        } else if e.is_timeout() {
            StoreError::Timeout(self.timeout_secs)
        } else {
            StoreError::Http(e.to_string())
        }
    }

    /// Send, then return the response or a `Status` error carrying the body.
    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, StoreError> {
        let response = builder.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status { status: status.as_u16(), body })
    }

    async fn parse<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T, StoreError> {
        let envelope: QdrantResponse<T> = response
            .json()
            .await
            .map_err(|e| StoreError::ResponseParsing(e.to_string()))?;
        Ok(envelope.result)
    }
}

#[derive(Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Deserialize)]
struct CollectionDescription {
    #[serde(default)]
    points_count: Option<u64>,
    config: CollectionConfig,
}

#[derive(Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Serialize, Deserialize)]
struct VectorParams {
    size: usize,
    distance: Distance,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    points: Vec<PointStruct<'a>>,
}

#[derive(Serialize)]
struct PointStruct<'a> {
    id: &'a str,
    vector: &'a [f32],
    payload: &'a FacePayload,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    score_threshold: Option<f32>,
}

#[derive(Deserialize)]
struct SearchHit {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<FacePayload>,
}

/// Qdrant `must` filter with one exact match per set field.
fn filter_json(filter: &PayloadFilter) -> Option<Value> {
    if filter.is_empty() {
        return None;
    }
    let mut must = Vec::new();
    if let Some(v) = &filter.model_version {
        must.push(json!({ "key": "model_version", "match": { "value": v } }));
    }
    if let Some(v) = filter.schema_version {
        must.push(json!({ "key": "schema_version", "match": { "value": v } }));
    }
    if let Some(v) = &filter.label {
        must.push(json!({ "key": "label", "match": { "value": v } }));
    }
    Some(json!({ "must": must }))
}

/// Point IDs are UUID strings or unsigned integers.
fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, name: &str, dimensions: usize) -> Result<bool, StoreError> {
        validate_collection_name(name)?;

        if let Some(info) = self.collection_info(name).await? {
            if info.dimensions != dimensions {
                return Err(StoreError::DimensionMismatch {
                    collection: name.to_string(),
                    expected: dimensions,
                    actual: info.dimensions,
                });
            }
            if info.distance != Distance::Cosine {
                return Err(StoreError::DistanceMismatch {
                    collection: name.to_string(),
                    actual: format!("{:?}", info.distance),
                });
            }
            self.remember_dim(name, dimensions);
            tracing::info!(collection = name, points = info.points_count, "collection exists");
            return Ok(false);
        }

        let body = json!({ "vectors": VectorParams { size: dimensions, distance: Distance::Cosine } });
        let result = self
            .send(self.request(reqwest::Method::PUT, &format!("/collections/{name}")).json(&body))
            .await;

        match result {
            Ok(_) => {
                tracing::info!(collection = name, dimensions, "created collection");
                self.remember_dim(name, dimensions);
                Ok(true)
            }
            // Created concurrently by another writer.
            Err(StoreError::Status { status, .. }) if status == StatusCode::CONFLICT.as_u16() => {
                self.remember_dim(name, dimensions);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn upsert(&self, name: &str, points: &[Point]) -> Result<(), StoreError> {
        validate_collection_name(name)?;
        if points.is_empty() {
            return Ok(());
        }

        let dim = self.expected_dim(name).await?;
        for point in points {
            validate_vector(&point.vector, Some(dim))?;
        }

        let body = UpsertRequest {
            points: points
                .iter()
                .map(|p| PointStruct { id: &p.id, vector: &p.vector, payload: &p.payload })
                .collect(),
        };

        let path = format!("/collections/{name}/points?wait=true");
        match self.send(self.request(reqwest::Method::PUT, &path).json(&body)).await {
            Ok(_) => {
                tracing::debug!(collection = name, count = points.len(), "upserted points");
                Ok(())
            }
            Err(StoreError::Status { status: 404, .. }) => Err(StoreError::CollectionNotFound(name.to_string())),
            Err(e) => Err(e),
        }
    }

    async fn search(&self, name: &str, query: &SearchQuery) -> Result<Vec<ScoredPoint>, StoreError> {
        validate_collection_name(name)?;
        if query.limit == 0 {
            return Ok(Vec::new());
        }
        let dim = self.expected_dim(name).await?;
        validate_vector(&query.vector, Some(dim))?;

        let body = SearchRequest {
            vector: &query.vector,
            limit: query.limit,
            with_payload: true,
            filter: filter_json(&query.filter),
            score_threshold: query.score_threshold,
        };

        let path = format!("/collections/{name}/points/search");
        let response = match self.send(self.request(reqwest::Method::POST, &path).json(&body)).await {
            Ok(r) => r,
            Err(StoreError::Status { status: 404, .. }) => {
                return Err(StoreError::CollectionNotFound(name.to_string()))
            }
            Err(e) => return Err(e),
        };

        let hits: Vec<SearchHit> = Self::parse(response).await?;
        Ok(hits
            .into_iter()
            .map(|h| ScoredPoint {
                id: id_to_string(&h.id),
                score: h.score,
                payload: h.payload.unwrap_or_default(),
            })
            .collect())
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>, StoreError> {
        validate_collection_name(name)?;
        let path = format!("/collections/{name}");
        let response = match self.send(self.request(reqwest::Method::GET, &path)).await {
            Ok(r) => r,
            Err(StoreError::Status { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let description: CollectionDescription = Self::parse(response).await?;
        let params = description.config.params.vectors;
        self.remember_dim(name, params.size);
        Ok(Some(CollectionInfo {
            name: name.to_string(),
            dimensions: params.size,
            distance: params.distance,
            points_count: description.points_count.unwrap_or(0),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Minimal stand-in for the Qdrant REST API.
    #[derive(Default)]
    struct MockQdrant {
        collections: Mutex<HashMap<String, (usize, String, Vec<Value>)>>,
        fail_upserts: AtomicU32,
        last_search: Mutex<Option<Value>>,
        last_api_key: Mutex<Option<String>>,
    }

    fn ok(result: Value) -> axum::response::Response {
        Json(json!({ "result": result, "status": "ok", "time": 0.001 })).into_response()
    }

    fn not_found() -> axum::response::Response {
        (StatusCode::NOT_FOUND, Json(json!({ "status": { "error": "Not found" } }))).into_response()
    }

    async fn get_collection(State(m): State<Arc<MockQdrant>>, headers: HeaderMap, Path(name): Path<String>) -> axum::response::Response {
        *m.last_api_key.lock().unwrap() = headers.get("api-key").map(|v| v.to_str().unwrap().to_string());
        let collections = m.collections.lock().unwrap();
        match collections.get(&name) {
            Some((size, distance, points)) => ok(json!({
                "status": "green",
                "points_count": points.len(),
                "config": { "params": { "vectors": { "size": size, "distance": distance } } }
            })),
            None => not_found(),
        }
    }

    async fn create_collection(State(m): State<Arc<MockQdrant>>, Path(name): Path<String>, Json(body): Json<Value>) -> axum::response::Response {
        let size = body["vectors"]["size"].as_u64().unwrap() as usize;
        let distance = body["vectors"]["distance"].as_str().unwrap().to_string();
        m.collections.lock().unwrap().insert(name, (size, distance, Vec::new()));
        ok(json!(true))
    }

    async fn upsert_points(State(m): State<Arc<MockQdrant>>, Path(name): Path<String>, Json(body): Json<Value>) -> axum::response::Response {
        if m.fail_upserts.load(Ordering::SeqCst) > 0 {
            m.fail_upserts.fetch_sub(1, Ordering::SeqCst);
            return (StatusCode::SERVICE_UNAVAILABLE, "overloaded").into_response();
        }
        let mut collections = m.collections.lock().unwrap();
        let Some((_, _, points)) = collections.get_mut(&name) else {
            return not_found();
        };
        for p in body["points"].as_array().unwrap() {
            points.retain(|existing| existing["id"] != p["id"]);
            points.push(p.clone());
        }
        ok(json!({ "operation_id": 1, "status": "completed" }))
    }

    async fn search_points(State(m): State<Arc<MockQdrant>>, Path(name): Path<String>, Json(body): Json<Value>) -> axum::response::Response {
        *m.last_search.lock().unwrap() = Some(body.clone());
        let collections = m.collections.lock().unwrap();
        let Some((_, _, points)) = collections.get(&name) else {
            return not_found();
        };
        let query: Vec<f32> = serde_json::from_value(body["vector"].clone()).unwrap();
        let mut hits: Vec<Value> = points
            .iter()
            .map(|p| {
                let v: Vec<f32> = serde_json::from_value(p["vector"].clone()).unwrap();
                json!({
                    "id": p["id"],
                    "version": 0,
                    "score": twin_core::types::cosine_similarity(&query, &v),
                    "payload": p["payload"],
                })
            })
            .collect();
        hits.sort_by(|a, b| b["score"].as_f64().unwrap().total_cmp(&a["score"].as_f64().unwrap()));
        hits.truncate(body["limit"].as_u64().unwrap() as usize);
        ok(Value::Array(hits))
    }

    async fn spawn_mock(mock: Arc<MockQdrant>) -> String {
        let app = Router::new()
            .route("/collections/:name", get(get_collection).put(create_collection))
            .route("/collections/:name/points", put(upsert_points))
            .route("/collections/:name/points/search", post(search_points))
            .with_state(mock);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn store(url: String, api_key: Option<&str>) -> QdrantStore {
        let endpoint = Endpoint { url, api_key: api_key.map(str::to_string) };
        QdrantStore::new(&endpoint, 5).unwrap()
    }

    fn point(id: &str, label: &str, vector: Vec<f32>) -> Point {
        Point { id: id.into(), vector, payload: FacePayload::new(label, "w600k_r50", "test") }
    }

    #[tokio::test]
    async fn creates_collection_once() {
        let mock = Arc::new(MockQdrant::default());
        let store = store(spawn_mock(mock.clone()).await, None);

        assert!(store.ensure_collection("celebrities", 3).await.unwrap());
        assert!(!store.ensure_collection("celebrities", 3).await.unwrap());

        let info = store.collection_info("celebrities").await.unwrap().unwrap();
        assert_eq!(info.dimensions, 3);
        assert_eq!(info.distance, Distance::Cosine);
        assert_eq!(info.points_count, 0);
    }

    #[tokio::test]
    async fn existing_collection_with_other_dimension_is_refused() {
        let mock = Arc::new(MockQdrant::default());
        mock.collections
            .lock()
            .unwrap()
            .insert("celebrities".into(), (128, "Cosine".into(), Vec::new()));
        let store = store(spawn_mock(mock).await, None);

        let err = store.ensure_collection("celebrities", 512).await.unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 512, actual: 128, .. }));
    }

    #[tokio::test]
    async fn existing_collection_with_other_distance_is_refused() {
        let mock = Arc::new(MockQdrant::default());
        mock.collections
            .lock()
            .unwrap()
            .insert("celebrities".into(), (3, "Euclid".into(), Vec::new()));
        let store = store(spawn_mock(mock).await, None);

        let err = store.ensure_collection("celebrities", 3).await.unwrap_err();
        assert!(matches!(err, StoreError::DistanceMismatch { .. }));
    }

    #[tokio::test]
    async fn upsert_then_search() {
        let mock = Arc::new(MockQdrant::default());
        let store = store(spawn_mock(mock.clone()).await, None);
        store.ensure_collection("celebrities", 3).await.unwrap();
        store
            .upsert(
                "celebrities",
                &[
                    point("5f0c9a3e-0000-4000-8000-000000000001", "Brad Pitt", vec![1.0, 0.0, 0.0]),
                    point("5f0c9a3e-0000-4000-8000-000000000002", "Angelina Jolie", vec![0.0, 1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let query = SearchQuery {
            vector: vec![0.1, 0.9, 0.0],
            limit: 1,
            filter: PayloadFilter::compatible_with("w600k_r50"),
            score_threshold: Some(0.2),
        };
        let hits = store.search("celebrities", &query).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.label, "Angelina Jolie");
        assert_eq!(hits[0].id, "5f0c9a3e-0000-4000-8000-000000000002");

        let sent = mock.last_search.lock().unwrap().clone().unwrap();
        assert_eq!(sent["with_payload"], json!(true));
        assert_eq!(sent["score_threshold"].as_f64().map(|v| v as f32), Some(0.2));
        let must = sent["filter"]["must"].as_array().unwrap();
        assert_eq!(must.len(), 2);
        assert_eq!(must[0]["key"], "model_version");
        assert_eq!(must[1]["match"]["value"], json!(crate::SCHEMA_VERSION));
    }

    #[tokio::test]
    async fn wrong_dimension_rejected_before_request() {
        let mock = Arc::new(MockQdrant::default());
        let store = store(spawn_mock(mock).await, None);
        store.ensure_collection("celebrities", 3).await.unwrap();

        let err = store
            .upsert("celebrities", &[point("1", "x", vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidVector(_)));
    }

    #[tokio::test]
    async fn fresh_store_checks_query_dimension_before_searching() {
        let mock = Arc::new(MockQdrant::default());
        mock.collections
            .lock()
            .unwrap()
            .insert("celebrities".into(), (3, "Cosine".into(), Vec::new()));
        let store = store(spawn_mock(mock.clone()).await, None);

        let query = SearchQuery {
            vector: vec![1.0, 0.0],
            limit: 1,
            filter: PayloadFilter::default(),
            score_threshold: None,
        };
        let err = store.search("celebrities", &query).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidVector(_)), "got {err:?}");
        assert!(mock.last_search.lock().unwrap().is_none());

        let err = store
            .upsert("celebrities", &[point("1", "x", vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidVector(_)));
        assert!(mock.collections.lock().unwrap()["celebrities"].2.is_empty());
    }

    #[tokio::test]
    async fn upsert_into_missing_collection_is_not_found() {
        let mock = Arc::new(MockQdrant::default());
        let store = store(spawn_mock(mock).await, None);
        let err = store
            .upsert("celebrities", &[point("1", "x", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CollectionNotFound(_)));
    }

    #[tokio::test]
    async fn server_error_is_retryable_status() {
        let mock = Arc::new(MockQdrant::default());
        let store = store(spawn_mock(mock.clone()).await, None);
        store.ensure_collection("celebrities", 3).await.unwrap();
        mock.fail_upserts.store(1, Ordering::SeqCst);

        let err = store
            .upsert("celebrities", &[point("1", "x", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn search_missing_collection() {
        let mock = Arc::new(MockQdrant::default());
        let store = store(spawn_mock(mock).await, None);
        let query = SearchQuery {
            vector: vec![1.0],
            limit: 1,
            filter: PayloadFilter::default(),
            score_threshold: None,
        };
        let err = store.search("nope", &query).await.unwrap_err();
        assert!(matches!(err, StoreError::CollectionNotFound(_)));
        assert!(store.collection_info("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sends_api_key_header() {
        let mock = Arc::new(MockQdrant::default());
        let store = store(spawn_mock(mock.clone()).await, Some("secret-key"));
        store.collection_info("celebrities").await.unwrap();
        assert_eq!(mock.last_api_key.lock().unwrap().as_deref(), Some("secret-key"));
    }

    #[tokio::test]
    async fn unreachable_server_is_connection_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = store(format!("http://{addr}"), None);
        let err = store.collection_info("celebrities").await.unwrap_err();
        assert!(matches!(err, StoreError::Connection(_)), "got {err:?}");
        assert!(err.is_retryable());
    }

    #[test]
    fn integer_ids_are_stringified() {
        assert_eq!(id_to_string(&json!(42)), "42");
        assert_eq!(id_to_string(&json!("abc")), "abc");
    }

    #[test]
    fn empty_filter_is_omitted() {
        assert!(filter_json(&PayloadFilter::default()).is_none());
    }
}
