use super::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use pulsemon_common::types::Metric;
use serde::Deserialize;
use std::fmt::Write;

/// Saves one metric from a JSON body.
/// URI: `POST /update/`.
pub async fn update_one(State(state): State<AppState>, body: Bytes) -> Response {
    let m: Metric = match serde_json::from_slice(&body) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "rejected malformed metric");
            return (StatusCode::BAD_REQUEST, "invalid metric payload").into_response();
        }
    };
    if let Err(e) = state.service.verify(&m) {
        tracing::warn!(error = %e, "rejected metric with bad hash");
        return (StatusCode::BAD_REQUEST, "hash validation error").into_response();
    }
    state.service.update_one(m);
    StatusCode::OK.into_response()
}

/// Saves a list of metrics from a JSON array body. An empty array is an
/// accepted no-op.
/// URI: `POST /updates/`.
pub async fn update_many(State(state): State<AppState>, body: Bytes) -> Response {
    let list: Vec<Metric> = match serde_json::from_slice(&body) {
        Ok(list) => list,
        Err(e) => {
            tracing::warn!(error = %e, "rejected malformed metric list");
            return (StatusCode::BAD_REQUEST, "invalid metric list payload").into_response();
        }
    };
    for m in &list {
        if let Err(e) = state.service.verify(m) {
            tracing::warn!(metric = %m.id, error = %e, "rejected batch with bad hash");
            return (StatusCode::BAD_REQUEST, "hash validation error").into_response();
        }
    }
    state.service.update_many(list);
    StatusCode::OK.into_response()
}

/// Query body for a point lookup: only the id matters.
#[derive(Deserialize)]
struct MetricQuery {
    id: String,
}

/// Returns the metric named in the JSON body, with a freshly computed tag
/// when the collector holds a key.
/// URI: `POST /value/`.
pub async fn get_one(State(state): State<AppState>, body: Bytes) -> Response {
    let query: MetricQuery = match serde_json::from_slice(&body) {
        Ok(q) => q,
        Err(e) => {
            tracing::warn!(error = %e, "rejected malformed metric query");
            return (StatusCode::BAD_REQUEST, "invalid metric query").into_response();
        }
    };
    match state.service.get(&query.id) {
        Some(m) => Json(m).into_response(),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

/// HTML page listing every metric's last-known value.
/// URI: `GET /`.
pub async fn list_page(State(state): State<AppState>) -> Html<String> {
    let mut metrics = state.service.list();
    metrics.sort_by(|a, b| a.id.cmp(&b.id));

    let mut rows = String::new();
    for m in &metrics {
        let _ = write!(
            rows,
            "<tr><td>{}</td><td>{}</td></tr>",
            m.id,
            m.value.as_f64()
        );
    }
    Html(format!(
        "<!DOCTYPE html><html><head><title>pulsemon</title></head>\
         <body><h1>Metrics</h1><table>{rows}</table></body></html>"
    ))
}

/// Storage liveness probe.
/// URI: `GET /ping`.
pub async fn health(State(state): State<AppState>) -> Response {
    match state.service.health() {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "storage health probe failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "storage is inaccessible").into_response()
        }
    }
}

/// Deprecated text path: the kind, name, and value travel as URL segments.
/// URI: `POST /update/{kind}/{name}/{value}`.
pub async fn update_legacy(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Response {
    let metric = match kind.as_str() {
        "gauge" => match value.parse::<f64>() {
            Ok(v) => Metric::gauge(name, v),
            Err(_) => {
                return (StatusCode::BAD_REQUEST, "parsing error, bad request").into_response();
            }
        },
        "counter" => match value.parse::<i64>() {
            Ok(d) => Metric::counter(name, d),
            Err(_) => {
                return (StatusCode::BAD_REQUEST, "parsing error, bad request").into_response();
            }
        },
        _ => {
            return (StatusCode::NOT_IMPLEMENTED, "unknown type").into_response();
        }
    };
    state.service.update_one(metric);
    StatusCode::OK.into_response()
}

/// Deprecated text path with the name segment missing.
/// URI: `POST /update/{kind}`.
pub async fn legacy_not_found() -> Response {
    (StatusCode::NOT_FOUND, "not found").into_response()
}
