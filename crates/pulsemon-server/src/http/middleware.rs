use super::AppState;
use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::IpAddr;
use std::time::Instant;

/// Request bodies larger than this are rejected outright.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Rejects requests whose declared source IP is absent from or outside the
/// trusted subnet. Passes everything through when no subnet is configured.
pub async fn trusted_network_check(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(subnet) = state.trusted else {
        return next.run(req).await;
    };

    let header = req
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if header.is_empty() {
        tracing::warn!("request rejected: missing X-Real-Ip header");
        return (
            StatusCode::FORBIDDEN,
            "request does not have X-Real-Ip header",
        )
            .into_response();
    }

    match header.parse::<IpAddr>() {
        Ok(ip) if subnet.contains(ip) => next.run(req).await,
        Ok(ip) => {
            tracing::warn!(ip = %ip, subnet = %subnet, "request rejected: untrusted source");
            (
                StatusCode::FORBIDDEN,
                format!("access is forbidden for {ip}"),
            )
                .into_response()
        }
        Err(_) => {
            tracing::warn!(header, "request rejected: unparseable X-Real-Ip");
            (StatusCode::FORBIDDEN, "invalid X-Real-Ip header").into_response()
        }
    }
}

/// Decrypts the request body with the configured private key before the
/// handlers parse it. Empty bodies pass through untouched.
pub async fn decrypt_body(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(decryptor) = state.decryptor.clone() else {
        return next.run(req).await;
    };

    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, "could not read request body").into_response();
        }
    };
    if bytes.is_empty() {
        return next.run(Request::from_parts(parts, Body::from(bytes))).await;
    }

    match decryptor.decrypt(&bytes) {
        Ok(plain) => next.run(Request::from_parts(parts, Body::from(plain))).await,
        Err(e) => {
            tracing::warn!(error = %e, "request rejected: undecryptable body");
            (StatusCode::BAD_REQUEST, "could not decrypt message").into_response()
        }
    }
}

/// Logs every request with its status and elapsed time.
pub async fn request_logging(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    tracing::info!(
        %method,
        path,
        status = response.status().as_u16(),
        elapsed_us = start.elapsed().as_micros() as u64,
        "request"
    );
    response
}
