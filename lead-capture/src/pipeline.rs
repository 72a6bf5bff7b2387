use std::sync::Arc;

use chrono::Utc;
use lead_common::tags::{contact_tags, lead_tags};
use lead_common::{ContactPayload, LeadPayload};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::Instrument;

use crate::crm::{CrmClient, CrmContactInput};
use crate::persistence::{ContactRow, LeadRow, LeadStore, StoreError};
use crate::webhook::{build_webhook_payload, WebhookNotifier};

pub const CONTACT_CRM_SOURCE: &str = "Website Contact Form";
pub const LEAD_CRM_SOURCE: &str = "Website Lead Capture";
pub const CONTACT_WEBHOOK_TYPE: &str = "contact_form";
pub const WEBHOOK_FAILURE_MESSAGE: &str = "webhook delivery failed (non-critical)";
pub const CRM_MISSING_ID_MESSAGE: &str = "CRM reported success without a contact id";
pub const STORE_UNAVAILABLE_MESSAGE: &str = "database insert failed (non-critical)";

#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Page the submission came from; the webhook falls back to the site URL.
    pub referer: Option<String>,
}

/// What one fan-out step did, mirroring what was logged for it.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Skipped,
    Succeeded,
    Warning(String),
    Error(Value),
}

impl StepOutcome {
    fn label(&self) -> &'static str {
        match self {
            StepOutcome::Skipped => "skipped",
            StepOutcome::Succeeded => "success",
            StepOutcome::Warning(_) => "warning",
            StepOutcome::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub crm: StepOutcome,
    pub webhook: StepOutcome,
    pub persistence: StepOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessResult {
    /// Present only when the CRM created the contact.
    pub contact_id: Option<String>,
    pub report: PipelineReport,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Organization if given, else church name, else nothing.
pub fn resolve_company_name(lead: &LeadPayload) -> Option<String> {
    non_empty(lead.organization.as_deref()).or_else(|| non_empty(lead.church_name.as_deref()))
}

/// Fans a validated submission out to the CRM, the webhook and the database,
/// strictly in that order.
///
/// None of the three can fail the call: each failure is logged once and the
/// submission is still accepted. The webhook and database steps are skipped
/// entirely when not configured.
pub struct LeadPipeline {
    crm: Arc<dyn CrmClient>,
    webhook: Option<Arc<WebhookNotifier>>,
    store: Option<Arc<dyn LeadStore>>,
    site_url: String,
}

impl LeadPipeline {
    pub fn new(
        crm: Arc<dyn CrmClient>,
        webhook: Option<Arc<WebhookNotifier>>,
        store: Option<Arc<dyn LeadStore>>,
        site_url: impl Into<String>,
    ) -> Self {
        Self {
            crm,
            webhook,
            store,
            site_url: site_url.into(),
        }
    }

    pub async fn process_contact(
        &self,
        contact: &ContactPayload,
        options: &ProcessOptions,
    ) -> ProcessResult {
        let span = tracing::info_span!("process_contact");
        async {
            let input = CrmContactInput::new(
                &contact.name,
                &contact.email,
                contact.phone.as_deref(),
                non_empty(contact.organization.as_deref()),
                contact_tags(contact),
                CONTACT_CRM_SOURCE,
            );
            let (contact_id, crm) = self.create_crm_contact(&input).await;

            let webhook = self
                .notify(contact, Some(CONTACT_WEBHOOK_TYPE), options)
                .await;

            let persistence = match &self.store {
                Some(store) => {
                    let row = ContactRow {
                        name: contact.name.clone(),
                        email: contact.email.clone(),
                        phone: non_empty(contact.phone.as_deref()),
                        organization: non_empty(contact.organization.as_deref()),
                        service: non_empty(contact.service.as_deref()),
                        message: contact.message.clone(),
                        source: non_empty(contact.source.as_deref()),
                        ghl_contact_id: contact_id.clone(),
                    };
                    let timer = common_metrics::step_timer("lead_step_duration_seconds")
                        .label("step", "persistence");
                    let result = store.insert_contact(&row).await;
                    timer.fin();
                    record_insert(result)
                }
                None => StepOutcome::Skipped,
            };

            finish("contact", contact_id, crm, webhook, persistence)
        }
        .instrument(span)
        .await
    }

    pub async fn process_lead(&self, lead: &LeadPayload, options: &ProcessOptions) -> ProcessResult {
        let span = tracing::info_span!("process_lead", lead_type = %lead.lead_type);
        async {
            let company_name = resolve_company_name(lead);
            let input = CrmContactInput::new(
                &lead.name,
                &lead.email,
                lead.phone.as_deref(),
                company_name.clone(),
                lead_tags(lead),
                LEAD_CRM_SOURCE,
            );
            let (contact_id, crm) = self.create_crm_contact(&input).await;

            let webhook = self.notify(lead, None, options).await;

            let persistence = match &self.store {
                Some(store) => {
                    let row = LeadRow {
                        lead_type: lead.lead_type.to_string(),
                        name: lead.name.clone(),
                        email: lead.email.clone(),
                        phone: non_empty(lead.phone.as_deref()),
                        organization: company_name,
                        message: non_empty(lead.message.as_deref()),
                        source: non_empty(lead.source.as_deref()),
                        ghl_contact_id: contact_id.clone(),
                        extra: lead.extra_fields().map(Value::Object),
                    };
                    let timer = common_metrics::step_timer("lead_step_duration_seconds")
                        .label("step", "persistence");
                    let result = store.insert_lead(&row).await;
                    timer.fin();
                    record_insert(result)
                }
                None => StepOutcome::Skipped,
            };

            finish("lead", contact_id, crm, webhook, persistence)
        }
        .instrument(span)
        .await
    }

    async fn create_crm_contact(&self, input: &CrmContactInput) -> (Option<String>, StepOutcome) {
        let timer = common_metrics::step_timer("lead_step_duration_seconds").label("step", "crm");
        let result = self.crm.create_contact(input).await;
        timer.fin();

        match result.contact_id {
            Some(contact_id) if result.success => {
                tracing::info!(contact_id = %contact_id, "CRM contact created");
                (Some(contact_id), StepOutcome::Succeeded)
            }
            _ => {
                let reason = match result.error {
                    Some(error) => error,
                    None if result.success => CRM_MISSING_ID_MESSAGE.to_string(),
                    None => "unknown CRM error".to_string(),
                };
                tracing::warn!(reason = %reason, "CRM contact creation failed, continuing without contact id");
                (None, StepOutcome::Warning(reason))
            }
        }
    }

    async fn notify<T: Serialize>(
        &self,
        submission: &T,
        webhook_type: Option<&str>,
        options: &ProcessOptions,
    ) -> StepOutcome {
        let Some(notifier) = &self.webhook else {
            return StepOutcome::Skipped;
        };

        let page_url = non_empty(options.referer.as_deref()).unwrap_or_else(|| self.site_url.clone());
        let timer = common_metrics::step_timer("lead_step_duration_seconds").label("step", "webhook");
        let delivery = match build_webhook_payload(submission, &page_url, Utc::now()) {
            Ok(mut payload) => {
                if let Some(webhook_type) = webhook_type {
                    payload.insert("type".to_string(), json!(webhook_type));
                }
                notifier.deliver(&payload).await
            }
            Err(e) => Err(e),
        };
        timer.fin();

        match delivery {
            Ok(()) => StepOutcome::Succeeded,
            Err(e) => {
                // Receivers may echo submitted data in their errors, keep it out of the logs.
                tracing::debug!(kind = error_kind(&e), "webhook delivery error");
                tracing::warn!("{WEBHOOK_FAILURE_MESSAGE}");
                StepOutcome::Warning(WEBHOOK_FAILURE_MESSAGE.to_string())
            }
        }
    }
}

fn error_kind(err: &crate::webhook::WebhookError) -> &'static str {
    use crate::webhook::WebhookError;
    match err {
        WebhookError::InvalidUrl(_) => "invalid_url",
        WebhookError::Signing(_) => "signing",
        WebhookError::NotAnObject | WebhookError::Serialize(_) => "payload",
        WebhookError::Request(_) => "request",
        WebhookError::Status(_) => "status",
    }
}

fn record_insert(result: Result<(), StoreError>) -> StepOutcome {
    match result {
        Ok(()) => StepOutcome::Succeeded,
        Err(StoreError::Backend(detail)) => {
            let detail = serde_json::to_value(&detail).unwrap_or(Value::Null);
            tracing::error!(error = %detail, "database rejected insert");
            StepOutcome::Error(detail)
        }
        Err(StoreError::Transport(reason)) => {
            tracing::warn!(reason = %reason, "{STORE_UNAVAILABLE_MESSAGE}");
            StepOutcome::Warning(STORE_UNAVAILABLE_MESSAGE.to_string())
        }
    }
}

fn finish(
    pipeline: &'static str,
    contact_id: Option<String>,
    crm: StepOutcome,
    webhook: StepOutcome,
    persistence: StepOutcome,
) -> ProcessResult {
    for (step, outcome) in [("crm", &crm), ("webhook", &webhook), ("persistence", &persistence)] {
        let labels = [
            ("pipeline".to_string(), pipeline.to_string()),
            ("step".to_string(), step.to_string()),
            ("outcome".to_string(), outcome.label().to_string()),
        ];
        common_metrics::inc("lead_pipeline_steps_total", &labels, 1);
    }

    ProcessResult {
        contact_id,
        report: PipelineReport {
            crm,
            webhook,
            persistence,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::CrmResult;
    use crate::persistence::BackendErrorDetail;
    use crate::test_utils::{LogCapture, MockCrmClient, MockLeadStore};
    use httpmock::prelude::*;
    use tracing::Level;

    fn lead(value: Value) -> LeadPayload {
        serde_json::from_value(value).unwrap()
    }

    fn exit_intent() -> LeadPayload {
        lead(json!({
            "type": "exit_intent_lead",
            "name": "Jane Doe",
            "email": "jane@example.com",
            "phone": "5559876543",
            "source": "exit-intent-popup",
            "recaptchaToken": "tok-abc"
        }))
    }

    fn pipeline(
        crm: &MockCrmClient,
        webhook: Option<Arc<WebhookNotifier>>,
        store: Option<&MockLeadStore>,
    ) -> LeadPipeline {
        LeadPipeline::new(
            Arc::new(crm.clone()),
            webhook,
            store.map(|s| -> Arc<dyn LeadStore> { Arc::new(s.clone()) }),
            "https://www.example.org",
        )
    }

    fn notifier(server: &MockServer) -> Option<Arc<WebhookNotifier>> {
        Some(Arc::new(
            WebhookNotifier::new(&server.url("/hook"), Some("whsec")).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_crm_failure_still_succeeds_without_contact_id() {
        let crm = MockCrmClient::new(CrmResult::failed("CRM returned 500"));
        let store = MockLeadStore::new();
        let result = pipeline(&crm, None, Some(&store))
            .process_lead(&exit_intent(), &ProcessOptions::default())
            .await;

        assert_eq!(result.contact_id, None);
        assert_eq!(
            result.report.crm,
            StepOutcome::Warning("CRM returned 500".to_string())
        );
        assert_eq!(store.leads()[0].ghl_contact_id, None);
    }

    #[tokio::test]
    async fn test_crm_success_propagates_contact_id() {
        let crm = MockCrmClient::new(CrmResult::created("ghl-123"));
        let result = pipeline(&crm, None, None)
            .process_lead(&exit_intent(), &ProcessOptions::default())
            .await;

        assert_eq!(result.contact_id.as_deref(), Some("ghl-123"));
        assert_eq!(result.report.crm, StepOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_crm_success_without_id_is_warning() {
        let crm = MockCrmClient::new(CrmResult {
            success: true,
            contact_id: None,
            error: None,
        });

        let logs = LogCapture::new();
        let _guard = logs.install();

        let result = pipeline(&crm, None, None)
            .process_lead(&exit_intent(), &ProcessOptions::default())
            .await;

        assert_eq!(result.contact_id, None);
        assert_eq!(
            result.report.crm,
            StepOutcome::Warning(CRM_MISSING_ID_MESSAGE.to_string())
        );
        let warnings = logs.at_level(Level::WARN);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].fields["reason"], CRM_MISSING_ID_MESSAGE);
    }

    #[tokio::test]
    async fn test_webhook_failure_log_omits_detail() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/hook");
            then.status(500).body("jane@example.com rejected");
        });
        let crm = MockCrmClient::new(CrmResult::created("ghl-5"));

        let logs = LogCapture::new();
        let _guard = logs.install();

        pipeline(&crm, notifier(&server), None)
            .process_lead(&exit_intent(), &ProcessOptions::default())
            .await;

        let warnings = logs.at_level(Level::WARN);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message, WEBHOOK_FAILURE_MESSAGE);
        assert!(warnings[0].fields.is_empty());
    }

    #[tokio::test]
    async fn test_crm_input_for_lead() {
        let crm = MockCrmClient::new(CrmResult::created("ghl-1"));
        let lead = lead(json!({
            "type": "white_paper_download",
            "name": "Jane Doe",
            "email": "jane@example.com",
            "organization": "",
            "churchName": "Grace Chapel",
            "serviceName": "Group Travel"
        }));
        pipeline(&crm, None, None)
            .process_lead(&lead, &ProcessOptions::default())
            .await;

        let inputs = crm.inputs();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].first_name, "Jane");
        assert_eq!(inputs[0].last_name, "Doe");
        assert_eq!(inputs[0].company_name.as_deref(), Some("Grace Chapel"));
        assert_eq!(inputs[0].tags, vec!["white-paper-download", "wp-group-travel"]);
        assert_eq!(inputs[0].source, LEAD_CRM_SOURCE);
    }

    #[tokio::test]
    async fn test_empty_organization_is_absent_everywhere() {
        let crm = MockCrmClient::new(CrmResult::created("ghl-1"));
        let store = MockLeadStore::new();
        let lead = lead(json!({
            "type": "exit_intent_lead",
            "name": "Jane Doe",
            "email": "jane@example.com",
            "organization": ""
        }));
        pipeline(&crm, None, Some(&store))
            .process_lead(&lead, &ProcessOptions::default())
            .await;

        assert_eq!(crm.inputs()[0].company_name, None);
        assert_eq!(store.leads()[0].organization, None);
    }

    #[tokio::test]
    async fn test_no_webhook_configured_makes_no_call() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.any_request();
            then.status(200);
        });

        let logs = LogCapture::new();
        let _guard = logs.install();

        let crm = MockCrmClient::new(CrmResult::created("ghl-1"));
        let result = pipeline(&crm, None, None)
            .process_lead(&exit_intent(), &ProcessOptions::default())
            .await;

        mock.assert_hits(0);
        assert_eq!(result.report.webhook, StepOutcome::Skipped);
        assert_eq!(logs.at_level(Level::WARN), vec![]);
        assert_eq!(logs.at_level(Level::ERROR), vec![]);
    }

    #[tokio::test]
    async fn test_webhook_payload_shape() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/hook").matches(|req| {
                let body: Value =
                    serde_json::from_slice(req.body.as_deref().unwrap_or_default())
                        .unwrap_or_default();
                body.get("recaptchaToken").is_none()
                    && body["type"] == "exit_intent_lead"
                    && body["pageUrl"] == "https://www.example.org/pricing"
                    && body["timestamp"].is_string()
                    && body["email"] == "jane@example.com"
            });
            then.status(200);
        });

        let crm = MockCrmClient::new(CrmResult::created("ghl-1"));
        let options = ProcessOptions {
            referer: Some("https://www.example.org/pricing".to_string()),
        };
        let result = pipeline(&crm, notifier(&server), None)
            .process_lead(&exit_intent(), &options)
            .await;

        mock.assert();
        assert_eq!(result.report.webhook, StepOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_webhook_page_url_defaults_to_site() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/hook")
                .json_body_partial(r#"{"pageUrl": "https://www.example.org"}"#);
            then.status(200);
        });

        let crm = MockCrmClient::new(CrmResult::failed("down"));
        pipeline(&crm, notifier(&server), None)
            .process_lead(&exit_intent(), &ProcessOptions::default())
            .await;

        mock.assert();
    }

    #[tokio::test]
    async fn test_webhook_failure_is_non_critical() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/hook");
            then.status(502).body("upstream says jane@example.com is bad");
        });

        let crm = MockCrmClient::new(CrmResult::created("ghl-9"));
        let store = MockLeadStore::new();
        let result = pipeline(&crm, notifier(&server), Some(&store))
            .process_lead(&exit_intent(), &ProcessOptions::default())
            .await;

        assert_eq!(result.contact_id.as_deref(), Some("ghl-9"));
        assert_eq!(
            result.report.webhook,
            StepOutcome::Warning(WEBHOOK_FAILURE_MESSAGE.to_string())
        );
        // Persistence still ran after the webhook failed.
        assert_eq!(store.leads().len(), 1);
    }

    #[tokio::test]
    async fn test_no_store_configured_skips_insert() {
        let crm = MockCrmClient::new(CrmResult::created("ghl-2"));
        let result = pipeline(&crm, None, None)
            .process_lead(&exit_intent(), &ProcessOptions::default())
            .await;

        assert_eq!(result.contact_id.as_deref(), Some("ghl-2"));
        assert_eq!(result.report.persistence, StepOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_backend_insert_error_reported_with_detail() {
        let detail = BackendErrorDetail {
            code: Some("42P01".to_string()),
            message: "relation \"leads\" does not exist".to_string(),
            details: None,
            hint: Some("run migrations".to_string()),
        };
        let store = MockLeadStore::new().fail_with_backend(detail.clone());
        let crm = MockCrmClient::new(CrmResult::created("ghl-3"));

        let logs = LogCapture::new();
        let _guard = logs.install();

        let result = pipeline(&crm, None, Some(&store))
            .process_lead(&exit_intent(), &ProcessOptions::default())
            .await;

        let errors = logs.at_level(Level::ERROR);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "database rejected insert");
        let logged: Value = serde_json::from_str(&errors[0].fields["error"]).unwrap();
        assert_eq!(logged, serde_json::to_value(&detail).unwrap());
        assert_eq!(logs.at_level(Level::WARN), vec![]);

        assert_eq!(result.contact_id.as_deref(), Some("ghl-3"));
        assert_eq!(
            result.report.persistence,
            StepOutcome::Error(serde_json::to_value(&detail).unwrap())
        );
    }

    #[tokio::test]
    async fn test_transport_insert_error_is_warning() {
        let store = MockLeadStore::new().fail_with_transport("pool timed out");
        let crm = MockCrmClient::new(CrmResult::created("ghl-4"));

        let result = pipeline(&crm, None, Some(&store))
            .process_lead(&exit_intent(), &ProcessOptions::default())
            .await;

        assert_eq!(result.contact_id.as_deref(), Some("ghl-4"));
        assert_eq!(
            result.report.persistence,
            StepOutcome::Warning(STORE_UNAVAILABLE_MESSAGE.to_string())
        );
    }

    #[tokio::test]
    async fn test_lead_row_extra_holds_type_details() {
        let store = MockLeadStore::new();
        let crm = MockCrmClient::new(CrmResult::failed("down"));
        let lead = lead(json!({
            "type": "trip_planner",
            "name": "Jane Doe",
            "email": "jane@example.com",
            "tripType": "Mission Trip",
            "groupSize": 14
        }));

        pipeline(&crm, None, Some(&store))
            .process_lead(&lead, &ProcessOptions::default())
            .await;

        let row = &store.leads()[0];
        assert_eq!(row.lead_type, "trip_planner");
        assert_eq!(
            row.extra,
            Some(json!({"tripType": "Mission Trip", "groupSize": "14"}))
        );
    }

    #[tokio::test]
    async fn test_contact_pipeline() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/hook")
                .json_body_partial(r#"{"type": "contact_form", "service": "Retreats"}"#);
            then.status(200);
        });
        let store = MockLeadStore::new();
        let crm = MockCrmClient::new(CrmResult::created("ghl-c1"));
        let contact: ContactPayload = serde_json::from_value(json!({
            "name": "Jane Doe",
            "email": "jane@example.com",
            "organization": " ",
            "service": "Retreats",
            "message": "Interested in a retreat for 40 people.",
            "recaptchaToken": "tok"
        }))
        .unwrap();

        let result = pipeline(&crm, notifier(&server), Some(&store))
            .process_contact(&contact, &ProcessOptions::default())
            .await;

        mock.assert();
        assert_eq!(result.contact_id.as_deref(), Some("ghl-c1"));
        assert_eq!(crm.inputs()[0].tags, vec!["contact-form", "service-retreats"]);
        assert_eq!(crm.inputs()[0].source, CONTACT_CRM_SOURCE);
        assert_eq!(crm.inputs()[0].company_name, None);

        let rows = store.contacts();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].organization, None);
        assert_eq!(rows[0].ghl_contact_id.as_deref(), Some("ghl-c1"));
    }

    #[tokio::test]
    async fn test_exit_intent_end_to_end() {
        let server = MockServer::start();
        let hook = server.mock(|when, then| {
            when.method(POST).path("/hook");
            then.status(200);
        });
        let crm = MockCrmClient::new(CrmResult::created("ghl-lead-456"));
        let store = MockLeadStore::new();

        let result = pipeline(&crm, notifier(&server), Some(&store))
            .process_lead(&exit_intent(), &ProcessOptions::default())
            .await;

        hook.assert();
        assert_eq!(result.contact_id.as_deref(), Some("ghl-lead-456"));
        assert_eq!(
            result.report,
            PipelineReport {
                crm: StepOutcome::Succeeded,
                webhook: StepOutcome::Succeeded,
                persistence: StepOutcome::Succeeded,
            }
        );

        let rows = store.leads();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].lead_type, "exit_intent_lead");
        assert_eq!(rows[0].ghl_contact_id.as_deref(), Some("ghl-lead-456"));
        assert_eq!(rows[0].extra, None);
        assert_eq!(rows[0].source.as_deref(), Some("exit-intent-popup"));
    }
}
