use std::future::ready;
use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use common_metrics::track_metrics;
use limiters::RateLimiter;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::api::endpoints;
use crate::client_ip::ClientIpPolicy;
use crate::pipeline::LeadPipeline;
use crate::recaptcha::BotVerifier;

/// Form submissions are small; anything larger is not from our forms.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<LeadPipeline>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub bot_verifier: Arc<dyn BotVerifier>,
    pub client_ip_policy: Arc<ClientIpPolicy>,
}

async fn index() -> &'static str {
    "lead-capture"
}

pub fn router(state: AppState, metrics: Option<PrometheusHandle>) -> Router {
    // Forms are embedded on several marketing domains.
    let cors = CorsLayer::new()
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_origin(AllowOrigin::mirror_request());

    let status_router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(index));

    let api_router = Router::new()
        .route("/api/contact", post(endpoints::submit_contact))
        .route("/api/leads", post(endpoints::submit_lead))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors);

    let router = Router::new()
        .merge(status_router)
        .merge(api_router)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Only mounted when the global recorder was installed; tests build many routers.
    match metrics {
        Some(handle) => router.route("/metrics", get(move || ready(handle.render()))),
        None => router,
    }
}
