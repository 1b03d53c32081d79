//! Common test utilities for in-process API testing.
//!
//! The fixture builds the real router over a crucible with built-in jars
//! and an in-memory position store, so requests go through the same
//! handlers the binary serves.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use alembic_core::{
    Cabinet, Composer, Config, Crucible, MemoryPositionStore, PipelineDefinition, Recipes,
};
use alembic_server::{api::create_router, state::AppState};

/// Test fixture wrapping the router and the crucible behind it.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_pipeline_creation() {
///     let fixture = TestFixture::new();
///
///     let response = fixture.post("/api/v1/pipelines", json!({
///         "name": "numbers",
///         "source": { "jar": "values", "values": [1, 2, 3] }
///     })).await;
///
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Crucible shared with the router state
    pub crucible: Crucible,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a fixture with no recipes.
    pub fn new() -> Self {
        Self::with_recipes(Vec::new())
    }

    /// Create a fixture whose composer knows the given recipes.
    pub fn with_recipes(recipes: Vec<PipelineDefinition>) -> Self {
        let config = Config {
            recipes: recipes.clone(),
            ..Default::default()
        };

        let composer = Composer::new(
            Arc::new(Cabinet::with_builtin_jars()),
            Arc::new(Recipes::new(recipes)),
        );
        let crucible = Crucible::new(composer, config.crucible.prefetch)
            .with_position_store(Arc::new(MemoryPositionStore::new()));

        let state = Arc::new(AppState::new(
            config,
            "0123456789abcdef".to_string(),
            crucible.clone(),
        ));
        let router = create_router(state);

        Self { router, crucible }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a GET request and return the raw body as text.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Poll a pipeline until it reaches a terminal state.
    pub async fn wait_for_terminal(&self, id: &str) -> Value {
        for _ in 0..100 {
            let response = self.get(&format!("/api/v1/pipelines/{}", id)).await;
            let state = response.body["state"].as_str().unwrap_or_default();
            if matches!(state, "completed" | "failed" | "cancelled") {
                return response.body;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("Pipeline {} did not finish in time", id);
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
