use chrono::{DateTime, SecondsFormat, Utc};
use lead_common::signing::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use lead_common::{SigningError, WebhookSigner};
use reqwest::{header, StatusCode, Url};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("invalid webhook url: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("failed to serialize webhook payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook endpoint returned {0}")]
    Status(StatusCode),
}

/// Normalized snapshot sent to the webhook: the submission's JSON form plus
/// `timestamp` (RFC 3339) and `pageUrl`.
///
/// Submissions never serialize their bot-check token, so it cannot leak here.
pub fn build_webhook_payload<T: Serialize>(
    submission: &T,
    page_url: &str,
    timestamp: DateTime<Utc>,
) -> Result<Map<String, Value>, WebhookError> {
    let Value::Object(mut fields) = serde_json::to_value(submission)? else {
        return Err(WebhookError::NotAnObject);
    };
    fields.insert(
        "timestamp".to_string(),
        Value::String(timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    fields.insert("pageUrl".to_string(), Value::String(page_url.to_string()));
    Ok(fields)
}

/// Posts signed JSON to one configured endpoint.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: Url,
    signer: Option<WebhookSigner>,
}

impl WebhookNotifier {
    pub fn new(url: &str, secret: Option<&str>) -> Result<Self, WebhookError> {
        let url = Url::parse(url).map_err(|e| WebhookError::InvalidUrl(e.to_string()))?;
        let signer = secret.map(WebhookSigner::new).transpose()?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("lead-capture webhook")
            .build()?;

        Ok(Self { http, url, signer })
    }

    pub fn is_signed(&self) -> bool {
        self.signer.is_some()
    }

    pub async fn deliver(&self, payload: &Map<String, Value>) -> Result<(), WebhookError> {
        let body = serde_json::to_string(payload)?;
        let now = Utc::now().timestamp();

        let mut request = self
            .http
            .post(self.url.clone())
            .header(TIMESTAMP_HEADER, now.to_string());
        if let Some(signer) = &self.signer {
            request = request.header(SIGNATURE_HEADER, signer.sign(now, &body).signature);
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::Status(status));
        }
        Ok(())
    }
}
