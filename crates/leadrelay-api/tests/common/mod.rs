//! Router helpers shared by the API tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{body::Body, Router};
use http::{HeaderMap, Method, Request, StatusCode};
use leadrelay_api::{create_router, AppState};
use leadrelay_testing::TestEnv;
use serde_json::Value;
use tower::ServiceExt;

/// Production state wired to the test env's storage, clock and relay.
pub fn app_state(env: &TestEnv) -> AppState {
    AppState::new(
        env.storage_dyn(),
        Arc::new(env.clock.clone()),
        env.client(),
        env.client(),
        env.callback_urls(),
    )
}

/// Router over [`app_state`].
pub fn app(env: &TestEnv) -> Router {
    create_router(app_state(env))
}

/// What a request produced.
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Parsed JSON body, `Value::Null` when the body is empty or not JSON.
    pub body: Value,
}

impl Reply {
    /// The `data` member of a success envelope.
    pub fn data(&self) -> &Value {
        assert_eq!(self.body["success"], Value::Bool(true), "not a success envelope: {}", self.body);
        &self.body["data"]
    }

    /// The `error` member of a failure envelope.
    pub fn error(&self) -> &str {
        assert_eq!(self.body["success"], Value::Bool(false), "not a failure envelope: {}", self.body);
        self.body["error"].as_str().expect("error is a string")
    }
}

/// Sends one request through a fresh clone of the router.
pub async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Reply {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).expect("json serializes")))
            .expect("request builds"),
        None => builder.body(Body::empty()).expect("request builds"),
    };

    send(app, request).await
}

/// Sends a raw body, for malformed-payload cases.
pub async fn call_raw(app: &Router, method: Method, uri: &str, body: &'static str) -> Reply {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .expect("request builds");

    send(app, request).await
}

pub async fn send(app: &Router, request: Request<Body>) -> Reply {
    let response = app.clone().oneshot(request).await.expect("router answers");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body reads");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    Reply { status, headers, body }
}
