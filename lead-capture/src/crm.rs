use async_trait::async_trait;
use reqwest::header;
use serde::{Deserialize, Serialize};

use crate::config::CrmConfig;

/// Contact fields sent to the CRM, derived per call from a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrmContactInput {
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company_name: Option<String>,
    pub tags: Vec<String>,
    pub source: String,
}

impl CrmContactInput {
    pub fn new(
        full_name: &str,
        email: &str,
        phone: Option<&str>,
        company_name: Option<String>,
        tags: Vec<String>,
        source: &str,
    ) -> Self {
        let (first_name, last_name) = split_name(full_name);
        Self {
            first_name,
            last_name,
            full_name: full_name.trim().to_string(),
            email: email.to_string(),
            phone: phone.map(str::to_string),
            company_name,
            tags,
            source: source.to_string(),
        }
    }
}

/// Splits on the first whitespace run: "Mary Ann Smith" is ("Mary", "Ann Smith").
pub fn split_name(full_name: &str) -> (String, String) {
    let trimmed = full_name.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrmResult {
    pub success: bool,
    pub contact_id: Option<String>,
    pub error: Option<String>,
}

impl CrmResult {
    pub fn created(contact_id: impl Into<String>) -> Self {
        Self {
            success: true,
            contact_id: Some(contact_id.into()),
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            contact_id: None,
            error: Some(reason.into()),
        }
    }
}

/// Creates contacts in the CRM. Implementations report failure through
/// [`CrmResult`] and never return early with an error.
#[async_trait]
pub trait CrmClient: Send + Sync {
    async fn create_contact(&self, input: &CrmContactInput) -> CrmResult;
}

/// Stand-in used when no CRM credentials are configured.
pub struct DisabledCrm;

#[async_trait]
impl CrmClient for DisabledCrm {
    async fn create_contact(&self, _input: &CrmContactInput) -> CrmResult {
        CrmResult::failed("CRM not configured")
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GhlContactRequest<'a> {
    first_name: &'a str,
    last_name: &'a str,
    name: &'a str,
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    company_name: Option<&'a str>,
    tags: &'a [String],
    source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    location_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct GhlContactResponse {
    contact: Option<GhlContact>,
}

#[derive(Deserialize)]
struct GhlContact {
    id: String,
}

/// GoHighLevel contacts API client.
pub struct GhlClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_version: String,
    location_id: Option<String>,
}

impl GhlClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        api_version: &str,
        location_id: Option<&str>,
    ) -> reqwest::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("lead-capture")
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_version: api_version.to_string(),
            location_id: location_id.map(str::to_string),
        })
    }

    /// `None` when no API key is configured.
    pub fn from_config(config: &CrmConfig) -> Option<reqwest::Result<Self>> {
        let api_key = config.ghl_api_key.as_ref()?;
        Some(Self::new(
            &config.ghl_api_base_url,
            api_key.as_str(),
            &config.ghl_api_version,
            config.ghl_location_id.as_ref().map(|l| l.as_str()),
        ))
    }
}

#[async_trait]
impl CrmClient for GhlClient {
    async fn create_contact(&self, input: &CrmContactInput) -> CrmResult {
        let body = GhlContactRequest {
            first_name: &input.first_name,
            last_name: &input.last_name,
            name: &input.full_name,
            email: &input.email,
            phone: input.phone.as_deref(),
            company_name: input.company_name.as_deref(),
            tags: &input.tags,
            source: &input.source,
            location_id: self.location_id.as_deref(),
        };

        let response = match self
            .http
            .post(format!("{}/contacts/", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Version", &self.api_version)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return CrmResult::failed(format!("CRM request failed: {e}")),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "CRM rejected contact");
            return CrmResult::failed(format!("CRM returned {status}"));
        }

        match response.json::<GhlContactResponse>().await {
            Ok(GhlContactResponse {
                contact: Some(contact),
            }) => CrmResult::created(contact.id),
            Ok(_) => CrmResult::failed("CRM response has no contact id"),
            Err(e) => CrmResult::failed(format!("unreadable CRM response: {e}")),
        }
    }
}
