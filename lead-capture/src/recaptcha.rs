use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Environment;

pub const SCORE_THRESHOLD: f64 = 0.5;
pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a token was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationFailure {
    NotConfigured,
    MissingToken,
    Unavailable,
    Rejected,
    ActionMismatch,
    LowScore,
}

impl VerificationFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationFailure::NotConfigured => "not_configured",
            VerificationFailure::MissingToken => "missing_token",
            VerificationFailure::Unavailable => "unavailable",
            VerificationFailure::Rejected => "rejected",
            VerificationFailure::ActionMismatch => "action_mismatch",
            VerificationFailure::LowScore => "low_score",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub success: bool,
    pub score: f64,
    pub failure: Option<VerificationFailure>,
}

impl Verification {
    fn passed(score: f64) -> Self {
        Self {
            success: true,
            score,
            failure: None,
        }
    }

    fn failed(failure: VerificationFailure, score: f64) -> Self {
        Self {
            success: false,
            score,
            failure: Some(failure),
        }
    }
}

/// Anti-abuse gate in front of the submission endpoints.
#[async_trait]
pub trait BotVerifier: Send + Sync {
    async fn verify(&self, token: Option<&str>, expected_action: &str) -> Verification;
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// reCAPTCHA v3 verifier. Fails closed on every doubt, except in development
/// without a secret, where it lets everything through with a perfect score.
pub struct RecaptchaVerifier {
    http: reqwest::Client,
    secret: Option<String>,
    verify_url: String,
    environment: Environment,
}

impl RecaptchaVerifier {
    pub fn new(
        secret: Option<&str>,
        verify_url: &str,
        environment: Environment,
    ) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("lead-capture")
            .timeout(VERIFY_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            secret: secret.map(str::to_string),
            verify_url: verify_url.to_string(),
            environment,
        })
    }

    async fn site_verify(
        &self,
        secret: &str,
        token: &str,
    ) -> Result<SiteVerifyResponse, reqwest::Error> {
        self.http
            .post(&self.verify_url)
            .form(&[("secret", secret), ("response", token)])
            .send()
            .await?
            .error_for_status()?
            .json::<SiteVerifyResponse>()
            .await
    }
}

#[async_trait]
impl BotVerifier for RecaptchaVerifier {
    async fn verify(&self, token: Option<&str>, expected_action: &str) -> Verification {
        let Some(secret) = self.secret.as_deref() else {
            if self.environment == Environment::Development {
                tracing::debug!("no recaptcha secret in development, skipping verification");
                return Verification::passed(1.0);
            }
            tracing::error!("recaptcha secret missing, rejecting submission");
            return Verification::failed(VerificationFailure::NotConfigured, 0.0);
        };

        let token = token.map(str::trim).unwrap_or_default();
        if token.is_empty() {
            return Verification::failed(VerificationFailure::MissingToken, 0.0);
        }

        let response = match self.site_verify(secret, token).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, timeout = e.is_timeout(), "recaptcha verification call failed");
                return Verification::failed(VerificationFailure::Unavailable, 0.0);
            }
        };

        let score = response.score.unwrap_or(0.0);
        if !response.success {
            tracing::info!(error_codes = ?response.error_codes, "recaptcha token rejected");
            return Verification::failed(VerificationFailure::Rejected, score);
        }
        if response.action.as_deref() != Some(expected_action) {
            tracing::info!(
                expected = expected_action,
                actual = ?response.action,
                "recaptcha action mismatch"
            );
            return Verification::failed(VerificationFailure::ActionMismatch, score);
        }
        if score < SCORE_THRESHOLD {
            return Verification::failed(VerificationFailure::LowScore, score);
        }

        Verification::passed(score)
    }
}
