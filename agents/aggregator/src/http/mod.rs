//! The HTTP surface: routing and the per-route middleware stacks.

use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use ipnetwork::IpNetwork;

use collector_base::{CoreMetrics, MetricService};
use collector_core::codec::envelope::DecryptKey;

mod handlers;
mod middleware;

/// Shared handler context.
#[derive(Clone)]
pub struct AppState {
    /// The deadline-bounded repository façade.
    pub service: Arc<MetricService>,
    /// Shared HMAC key, when signature checking is configured.
    pub hmac_key: Option<String>,
    /// Envelope private key, when decryption is configured.
    pub decrypt_key: Option<Arc<DecryptKey>>,
    /// CIDR allow-list applied to `X-Real-IP`.
    pub trusted_subnet: Option<IpNetwork>,
    /// Self-telemetry.
    pub metrics: Arc<CoreMetrics>,
}

/// Build the router. The batch ingest route runs the full chain
/// (allow-list → decrypt → gzip → handler-side signature check); the other
/// JSON/HTML endpoints only negotiate gzip; everything is request-logged.
pub fn router(state: AppState) -> Router {
    // Layers added first sit closest to the handler.
    let gzip = from_fn_with_state(state.clone(), middleware::gzip_bidir);
    let decrypt = from_fn_with_state(state.clone(), middleware::decrypt_envelope);
    let allow_list = from_fn_with_state(state.clone(), middleware::check_real_ip);

    Router::new()
        .route("/update/:kind/:name/:value", post(handlers::update_path))
        .route("/value/:kind/:name", get(handlers::value_path))
        .route(
            "/updates/",
            post(handlers::update_batch)
                .layer(gzip.clone())
                .layer(decrypt)
                .layer(allow_list),
        )
        .route("/update/", post(handlers::update_json).layer(gzip.clone()))
        .route("/value/", post(handlers::value_json).layer(gzip.clone()))
        .route("/", get(handlers::index).layer(gzip.clone()))
        .route("/ping", get(handlers::ping).layer(gzip))
        .layer(from_fn_with_state(state.clone(), middleware::log_requests))
        .with_state(state)
}
