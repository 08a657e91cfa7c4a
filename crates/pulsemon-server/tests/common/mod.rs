#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use pulsemon_crypto::Decryptor;
use pulsemon_server::http::{build_router, AppState};
use pulsemon_server::service::MetricService;
use pulsemon_server::subnet::TrustedSubnet;
use pulsemon_storage::FileBackuper;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub struct TestContext {
    pub app: Router,
    pub service: MetricService,
    pub dir: TempDir,
}

pub struct TestOptions {
    pub key: Option<String>,
    pub trusted: Option<String>,
    pub decryptor: Option<Decryptor>,
    pub restore: bool,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            key: None,
            trusted: None,
            decryptor: None,
            restore: false,
        }
    }
}

/// Builds an app backed by a file backuper in a fresh temp dir, saving
/// synchronously so restart tests observe every write.
pub fn build_app(opts: TestOptions) -> TestContext {
    build_app_in(TempDir::new().unwrap(), opts)
}

/// Same as [`build_app`] but reusing an existing data dir, for restart
/// scenarios.
pub fn build_app_in(dir: TempDir, opts: TestOptions) -> TestContext {
    let backuper = Box::new(FileBackuper::new(dir.path().join("metrics.json")));
    let service = MetricService::new(backuper, true, opts.key, opts.restore).unwrap();
    let trusted: Option<TrustedSubnet> = opts.trusted.map(|s| s.parse().unwrap());
    let state = AppState {
        service: service.clone(),
        decryptor: opts.decryptor.map(Arc::new),
        trusted,
    };
    TestContext {
        app: build_router(state),
        service,
        dir,
    }
}

pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Vec<u8>,
) -> (StatusCode, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(Body::from(body)).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

pub async fn post_json(
    app: &Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, Vec<u8>) {
    send(
        app,
        "POST",
        uri,
        &[("content-type", "application/json")],
        serde_json::to_vec(body).unwrap(),
    )
    .await
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    send(app, "GET", uri, &[], Vec::new()).await
}
