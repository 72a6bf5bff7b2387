use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap};
use axum::Json;
use lead_common::validation::{validate_contact, validate_lead};
use limiters::DEFAULT_WINDOW;
use serde::Serialize;
use serde_json::Value;
use tracing::instrument;

use crate::api::ApiError;
use crate::client_ip::client_ip;
use crate::pipeline::{ProcessOptions, ProcessResult, CONTACT_WEBHOOK_TYPE};
use crate::router::AppState;

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
}

impl From<ProcessResult> for SubmitResponse {
    fn from(result: ProcessResult) -> Self {
        Self {
            success: true,
            contact_id: result.contact_id,
        }
    }
}

async fn enforce_rate_limit(
    state: &AppState,
    route: &'static str,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
) -> Result<(), ApiError> {
    // One budget per client across both submission routes.
    let ip = client_ip(headers, peer, &state.client_ip_policy);
    let decision = state.rate_limiter.check(&ip, None, None).await;

    let labels = [
        ("route".to_string(), route.to_string()),
        ("backend".to_string(), state.rate_limiter.backend().to_string()),
        ("allowed".to_string(), decision.allowed.to_string()),
    ];
    common_metrics::inc("lead_rate_limit_decisions_total", &labels, 1);

    if decision.allowed {
        Ok(())
    } else {
        tracing::info!(route, ip = %ip, "rate limit exceeded");
        Err(ApiError::RateLimited {
            retry_after: DEFAULT_WINDOW,
        })
    }
}

fn process_options(headers: &HeaderMap) -> ProcessOptions {
    ProcessOptions {
        referer: headers
            .get(header::REFERER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

#[instrument(skip_all, fields(route = "contact"))]
pub async fn submit_contact(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SubmitResponse>, ApiError> {
    enforce_rate_limit(&state, "contact", &headers, connect_info.map(|c| c.0)).await?;

    let body: Value = serde_json::from_slice(&body)?;
    let contact = validate_contact(&body)?;

    let verification = state
        .bot_verifier
        .verify(contact.recaptcha_token.as_deref(), CONTACT_WEBHOOK_TYPE)
        .await;
    if !verification.success {
        let failure = verification
            .failure
            .unwrap_or(crate::recaptcha::VerificationFailure::Rejected);
        tracing::info!(reason = failure.as_str(), score = verification.score, "bot check failed");
        return Err(ApiError::BotCheckFailed(failure));
    }

    let result = state
        .pipeline
        .process_contact(&contact, &process_options(&headers))
        .await;
    Ok(Json(result.into()))
}

#[instrument(skip_all, fields(route = "leads"))]
pub async fn submit_lead(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SubmitResponse>, ApiError> {
    enforce_rate_limit(&state, "leads", &headers, connect_info.map(|c| c.0)).await?;

    let body: Value = serde_json::from_slice(&body)?;
    let lead = validate_lead(&body)?;

    let verification = state
        .bot_verifier
        .verify(lead.recaptcha_token.as_deref(), lead.lead_type.as_str())
        .await;
    if !verification.success {
        let failure = verification
            .failure
            .unwrap_or(crate::recaptcha::VerificationFailure::Rejected);
        tracing::info!(
            reason = failure.as_str(),
            score = verification.score,
            lead_type = %lead.lead_type,
            "bot check failed"
        );
        return Err(ApiError::BotCheckFailed(failure));
    }

    let result = state
        .pipeline
        .process_lead(&lead, &process_options(&headers))
        .await;
    Ok(Json(result.into()))
}
