use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use tracing::{debug, warn};

use collector_base::ServiceError;
use collector_core::codec::signing::{self, TAG_HEADER};
use collector_core::{format_gauge, is_valid_name, Metric, MetricKind};

use crate::ingest::{parse_batch, WireMetric};

use super::AppState;

fn service_failure(err: &ServiceError) -> Response {
    warn!(%err, "Storage operation failed");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

/// `POST /update/{kind}/{name}/{value}` — one metric via URL segments.
pub async fn update_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Response {
    let Ok(kind) = kind.parse::<MetricKind>() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if !is_valid_name(&name) {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let outcome = match kind {
        MetricKind::Gauge => match value.parse::<f64>() {
            Ok(v) => state.service.add_gauge(&name, v).await,
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        },
        MetricKind::Counter => match value.parse::<i64>() {
            Ok(delta) => state.service.add_counter(&name, delta, false).await.map(|_| ()),
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        },
    };
    match outcome {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => service_failure(&err),
    }
}

/// `POST /update/` — one metric as JSON; answers with the post-apply state
/// of that metric.
pub async fn update_json(State(state): State<AppState>, body: Bytes) -> Response {
    let Ok(raw) = serde_json::from_slice::<WireMetric>(&body) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some(metric) = raw.validate() else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let applied = match metric.kind {
        MetricKind::Gauge => state
            .service
            .add_gauge(&metric.name, metric.value.unwrap_or_default())
            .await
            .map(|()| metric.clone()),
        MetricKind::Counter => state
            .service
            .add_counter(&metric.name, metric.delta.unwrap_or_default(), false)
            .await
            .map(|total| Metric::counter(metric.name.clone(), total)),
    };
    match applied {
        Ok(current) => Json(current).into_response(),
        Err(err) => service_failure(&err),
    }
}

/// `POST /updates/` — a batch as JSON. The body at this point is already
/// decrypted and inflated; the signature is verified here, over exactly
/// these bytes. Invalid entries are dropped, the valid remainder commits,
/// and the response mirrors the whole repository.
pub async fn update_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let (Some(key), Some(tag)) = (state.hmac_key.as_deref(), headers.get(TAG_HEADER)) {
        let verified = tag
            .to_str()
            .ok()
            .map(|tag| signing::verify(&body, tag, key).is_ok())
            .unwrap_or(false);
        if !verified {
            return StatusCode::BAD_REQUEST.into_response();
        }
    }
    if body.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let parsed = match parse_batch(&body) {
        Ok(parsed) => parsed,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    if parsed.dropped > 0 {
        debug!(dropped = parsed.dropped, "Dropped invalid batch entries");
    }
    if let Err(err) = state.service.apply_batch(&parsed.accepted, false).await {
        return service_failure(&err);
    }

    let dump = match state.service.all_metrics().await {
        Ok(dump) => dump,
        Err(err) => return service_failure(&err),
    };
    // The dump also refreshes the stored-series gauges.
    let counters = dump
        .iter()
        .filter(|m| m.kind == MetricKind::Counter)
        .count();
    state.metrics.set_stored_series("counter", counters as i64);
    state
        .metrics
        .set_stored_series("gauge", (dump.len() - counters) as i64);

    let body = match serde_json::to_vec(&dump) {
        Ok(body) => body,
        Err(err) => {
            warn!(%err, "Could not encode repository dump");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let mut response = (
        StatusCode::OK,
        [("Content-Type", "application/json")],
        body.clone(),
    )
        .into_response();
    if let Some(key) = state.hmac_key.as_deref() {
        if let Ok(tag) = signing::sign(&body, key).parse() {
            response
                .headers_mut()
                .insert(HeaderName::from_static("hashsha256"), tag);
        }
    }
    response
}

/// `POST /value/` — look one metric up by JSON request.
pub async fn value_json(State(state): State<AppState>, body: Bytes) -> Response {
    #[derive(serde::Deserialize)]
    struct Lookup {
        id: String,
        #[serde(rename = "type")]
        kind: String,
    }

    let Ok(lookup) = serde_json::from_slice::<Lookup>(&body) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Ok(kind) = lookup.kind.parse::<MetricKind>() else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let found = match kind {
        MetricKind::Gauge => state
            .service
            .gauge(&lookup.id)
            .await
            .map(|v| Metric::gauge(lookup.id.clone(), v)),
        MetricKind::Counter => state
            .service
            .counter(&lookup.id)
            .await
            .map(|v| Metric::counter(lookup.id.clone(), v)),
    };
    match found {
        Ok(metric) => Json(metric).into_response(),
        Err(ServiceError::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => service_failure(&err),
    }
}

/// `GET /value/{kind}/{name}` — the bare value as text.
pub async fn value_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Response {
    let Ok(kind) = kind.parse::<MetricKind>() else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let rendered = match kind {
        MetricKind::Gauge => state.service.gauge(&name).await.map(format_gauge),
        MetricKind::Counter => state.service.counter(&name).await.map(|v| v.to_string()),
    };
    match rendered {
        Ok(text) => text.into_response(),
        Err(ServiceError::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => service_failure(&err),
    }
}

/// `GET /` — every stored metric as an HTML table.
pub async fn index(State(state): State<AppState>) -> Response {
    let dump = match state.service.all_metrics().await {
        Ok(dump) => dump,
        Err(err) => return service_failure(&err),
    };

    let mut rows = String::new();
    for metric in &dump {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>\n",
            metric.name,
            metric.display_value()
        ));
    }
    let page = format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Metrics</title></head>\n\
         <body>\n<table>\n<tr><th>Name</th><th>Value</th></tr>\n{rows}</table>\n</body>\n</html>\n"
    );
    Html(page).into_response()
}

/// `GET /ping` — storage liveness.
pub async fn ping(State(state): State<AppState>) -> Response {
    match state.service.ping().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => service_failure(&err),
    }
}
