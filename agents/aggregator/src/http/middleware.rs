use std::net::IpAddr;

use axum::body::{boxed, Body};
use axum::extract::State;
use axum::http::header::{ACCEPT, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use collector_core::codec::gzip;

use super::AppState;

const GZIP_BODY_TYPES: &[&str] = &["application/json", "text/html"];

fn header_is(headers: &HeaderMap, name: impl axum::http::header::AsHeaderName, value: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains(value))
        .unwrap_or(false)
}

/// Reject requests whose advertised `X-Real-IP` falls outside the trusted
/// subnet. Absence of either the header or a configured subnet disables
/// the check.
pub async fn check_real_ip(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next<Body>,
) -> Response {
    if let (Some(subnet), Some(header)) = (state.trusted_subnet, request.headers().get("x-real-ip"))
    {
        let allowed = header
            .to_str()
            .ok()
            .and_then(|raw| raw.parse::<IpAddr>().ok())
            .map(|ip| subnet.contains(ip))
            .unwrap_or(false);
        if !allowed {
            warn!(header = ?header, %subnet, "Rejecting sender outside trusted subnet");
            return StatusCode::FORBIDDEN.into_response();
        }
    }
    next.run(request).await
}

/// Unwrap the asymmetric envelope when a private key is configured. A body
/// that does not decrypt passes through untouched; not every fleet
/// encrypts, and the downstream parser rejects true garbage anyway.
pub async fn decrypt_envelope(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next<Body>,
) -> Response {
    let Some(key) = state.decrypt_key.clone() else {
        return next.run(request).await;
    };

    let (parts, body) = request.into_parts();
    let Ok(sealed) = hyper::body::to_bytes(body).await else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let body = match key.decrypt(&sealed) {
        Ok(plain) => plain,
        Err(_) => sealed.to_vec(),
    };
    next.run(Request::from_parts(parts, Body::from(body))).await
}

/// Bidirectional gzip: inflate the request body on `Content-Encoding:
/// gzip`; deflate the response when the client accepts gzip and declared a
/// `Content-Type` or `Accept` of `application/json` or `text/html`, for
/// statuses below 300.
pub async fn gzip_bidir(
    State(_state): State<AppState>,
    request: Request<Body>,
    next: Next<Body>,
) -> Response {
    let compress_response = {
        let headers = request.headers();
        header_is(headers, ACCEPT_ENCODING, "gzip")
            && GZIP_BODY_TYPES.iter().any(|ct| {
                headers.get(CONTENT_TYPE).map(|v| v.as_bytes() == ct.as_bytes()) == Some(true)
                    || headers.get(ACCEPT).map(|v| v.as_bytes() == ct.as_bytes()) == Some(true)
            })
    };
    let request_gzipped = header_is(request.headers(), CONTENT_ENCODING, "gzip");

    let request = if request_gzipped {
        let (mut parts, body) = request.into_parts();
        let Ok(compressed) = hyper::body::to_bytes(body).await else {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        };
        match gzip::decompress(&compressed) {
            Ok(plain) => {
                parts.headers.remove(CONTENT_ENCODING);
                parts.headers.remove(CONTENT_LENGTH);
                Request::from_parts(parts, Body::from(plain))
            }
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        }
    } else {
        request
    };

    let response = next.run(request).await;
    if !compress_response || response.status().as_u16() >= 300 {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let Ok(plain) = hyper::body::to_bytes(body).await else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    match gzip::compress(&plain) {
        Ok(compressed) => {
            parts
                .headers
                .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            parts.headers.remove(CONTENT_LENGTH);
            Response::from_parts(parts, boxed(Body::from(compressed)))
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Request log plus the ingest counter, labeled by matched route.
pub async fn log_requests(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next<Body>,
) -> Response {
    let method = request.method().clone();
    let route = request
        .extensions()
        .get::<axum::extract::MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());

    let started = std::time::Instant::now();
    let response = next.run(request).await;
    let status = response.status().as_u16();

    state.metrics.observe_ingest(&route, status);
    info!(
        %method,
        route,
        status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Handled request"
    );
    response
}
