//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that builds the router in-process
//! with a real orchestrator over mock collaborators, so requests can be
//! driven with `oneshot` and no network.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use dropwatch_core::{
    create_activity_system, create_authenticator, load_config_from_str,
    testing::{MockAcquisitionAction, MockAvailabilityFeed, MockTeardownAction},
    ActivityStore, CycleOrchestrator, EventBroadcaster, MemoryActivityStore, OrchestratorDeps,
    StateStore,
};
use dropwatch_server::state::AppState;

/// API key used when `TestConfig::api_key` is enabled.
pub const TEST_API_KEY: &str = "test-key";

/// Config file with two tracked items, `a` before `b`.
pub const BASE_CONFIG: &str = r#"
[auth]
method = "none"

[storage]
backend = "memory"

[feed]
source = "static"
available = ["a"]

[[items]]
id = "a"
name = "Limited edition widget"

[[items]]
id = "b"
"#;

/// Knobs for building a fixture.
#[derive(Debug, Default)]
pub struct TestConfig {
    /// Require `TEST_API_KEY` on API routes.
    pub api_key: bool,
}

/// Test fixture holding the router and the mocks behind it.
pub struct TestFixture {
    pub router: Router,
    pub orchestrator: Arc<CycleOrchestrator>,
    pub feed: Arc<MockAvailabilityFeed>,
    pub action: Arc<MockAcquisitionAction>,
    pub teardown: Arc<MockTeardownAction>,
    pub activity_store: Arc<MemoryActivityStore>,
    /// Config file the server was "started" from; rewrite it to test reloads.
    pub config_path: PathBuf,
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

fn config_text(api_key: bool) -> String {
    if api_key {
        BASE_CONFIG.replace(
            "method = \"none\"",
            &format!("method = \"api_key\"\napi_key = \"{}\"", TEST_API_KEY),
        )
    } else {
        BASE_CONFIG.to_string()
    }
}

impl TestFixture {
    /// Fixture with no authentication.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("config.toml");

        let text = config_text(test_config.api_key);
        std::fs::write(&config_path, &text).expect("Failed to write config");
        let config = load_config_from_str(&text).expect("Failed to parse test config");

        let feed = Arc::new(MockAvailabilityFeed::available(&["a"]));
        let action = Arc::new(MockAcquisitionAction::new());
        let teardown = Arc::new(MockTeardownAction::new());

        let activity_store = Arc::new(MemoryActivityStore::new(1000));
        let (activity, writer) =
            create_activity_system(activity_store.clone() as Arc<dyn ActivityStore>, 100);
        tokio::spawn(writer.run());

        let orchestrator = Arc::new(CycleOrchestrator::new(
            config.cycle_settings(),
            OrchestratorDeps {
                store: Arc::new(StateStore::in_memory()),
                feed: feed.clone(),
                action: action.clone(),
                teardown: teardown.clone(),
                broadcaster: EventBroadcaster::default(),
                activity: Some(activity.clone()),
            },
        ));

        let authenticator =
            Arc::from(create_authenticator(&config.auth).expect("Failed to create authenticator"));

        let state = Arc::new(AppState::new(
            config,
            Some(config_path.clone()),
            authenticator,
            activity,
            activity_store.clone(),
            orchestrator.clone(),
        ));
        let router = dropwatch_server::api::create_router(state);

        Self {
            router,
            orchestrator,
            feed,
            action,
            teardown,
            activity_store,
            config_path,
            temp_dir,
        }
    }

    /// Run one cycle and wait for its workers to finish.
    pub async fn run_cycle_and_settle(&self) {
        self.orchestrator.run_cycle().await;
        assert!(
            self.orchestrator
                .registry()
                .wait_for_drain(Duration::from_secs(5))
                .await,
            "workers did not finish"
        );
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None, &[]).await
    }

    pub async fn get_with_headers(&self, path: &str, headers: &[(&str, &str)]) -> TestResponse {
        self.request("GET", path, None, headers).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body), &[]).await
    }

    /// POST without a body, as the control endpoints expect.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None, &[]).await
    }

    pub async fn post_with_headers(&self, path: &str, headers: &[(&str, &str)]) -> TestResponse {
        self.request("POST", path, None, headers).await
    }

    /// Send a request to the router.
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(serde_json::to_string(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

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

        let text = String::from_utf8_lossy(&body_bytes).into_owned();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }

    /// Poll the activity store until `event_type` has at least `count`
    /// records. The writer stores events asynchronously.
    pub async fn wait_for_activity(&self, event_type: &str, count: usize) -> bool {
        let filter = dropwatch_core::ActivityFilter::new().with_event_type(event_type);
        for _ in 0..100 {
            if self.activity_store.count(&filter).unwrap_or(0) >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}
