use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use crate::crm::{CrmClient, CrmContactInput, CrmResult};
use crate::persistence::{BackendErrorDetail, ContactRow, LeadRow, LeadStore, StoreError};
use crate::recaptcha::{BotVerifier, Verification, VerificationFailure};

/// CRM that answers every call with the same result and remembers its inputs.
#[derive(Clone)]
pub struct MockCrmClient {
    result: CrmResult,
    inputs: Arc<Mutex<Vec<CrmContactInput>>>,
}

impl MockCrmClient {
    pub fn new(result: CrmResult) -> Self {
        Self {
            result,
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn inputs(&self) -> Vec<CrmContactInput> {
        self.inputs.lock().map(|i| i.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CrmClient for MockCrmClient {
    async fn create_contact(&self, input: &CrmContactInput) -> CrmResult {
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.push(input.clone());
        }
        self.result.clone()
    }
}

#[derive(Clone)]
enum StoreFailure {
    Backend(BackendErrorDetail),
    Transport(String),
}

/// In-memory store. Rows are recorded even when configured to fail, so tests
/// can see what would have been written.
#[derive(Clone, Default)]
pub struct MockLeadStore {
    failure: Option<StoreFailure>,
    contacts: Arc<Mutex<Vec<ContactRow>>>,
    leads: Arc<Mutex<Vec<LeadRow>>>,
}

impl MockLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with_backend(mut self, detail: BackendErrorDetail) -> Self {
        self.failure = Some(StoreFailure::Backend(detail));
        self
    }

    pub fn fail_with_transport(mut self, reason: &str) -> Self {
        self.failure = Some(StoreFailure::Transport(reason.to_string()));
        self
    }

    pub fn contacts(&self) -> Vec<ContactRow> {
        self.contacts.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn leads(&self) -> Vec<LeadRow> {
        self.leads.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn outcome(&self) -> Result<(), StoreError> {
        match &self.failure {
            None => Ok(()),
            Some(StoreFailure::Backend(detail)) => Err(StoreError::Backend(detail.clone())),
            Some(StoreFailure::Transport(reason)) => Err(StoreError::Transport(reason.clone())),
        }
    }
}

#[async_trait]
impl LeadStore for MockLeadStore {
    async fn insert_contact(&self, row: &ContactRow) -> Result<(), StoreError> {
        if let Ok(mut contacts) = self.contacts.lock() {
            contacts.push(row.clone());
        }
        self.outcome()
    }

    async fn insert_lead(&self, row: &LeadRow) -> Result<(), StoreError> {
        if let Ok(mut leads) = self.leads.lock() {
            leads.push(row.clone());
        }
        self.outcome()
    }
}

/// Bot check with a fixed verdict. Records the actions it was asked about.
#[derive(Clone)]
pub struct MockBotVerifier {
    verdict: Verification,
    actions: Arc<Mutex<Vec<String>>>,
}

impl MockBotVerifier {
    pub fn passing() -> Self {
        Self::with(Verification {
            success: true,
            score: 0.9,
            failure: None,
        })
    }

    pub fn failing(failure: VerificationFailure) -> Self {
        Self::with(Verification {
            success: false,
            score: 0.1,
            failure: Some(failure),
        })
    }

    fn with(verdict: Verification) -> Self {
        Self {
            verdict,
            actions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl BotVerifier for MockBotVerifier {
    async fn verify(&self, _token: Option<&str>, expected_action: &str) -> Verification {
        if let Ok(mut actions) = self.actions.lock() {
            actions.push(expected_action.to_string());
        }
        self.verdict.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
    pub fields: HashMap<String, String>,
}

/// Tracing layer that keeps every event it sees, for asserting on logs.
#[derive(Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes this thread's events here until the guard drops.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn at_level(&self, level: Level) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.level == level)
            .collect()
    }
}

struct FieldVisitor<'a> {
    message: &'a mut String,
    fields: &'a mut HashMap<String, String>,
}

impl FieldVisitor<'_> {
    fn record(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            *self.message = value;
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record(field, format!("{value:?}"));
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = String::new();
        let mut fields = HashMap::new();
        event.record(&mut FieldVisitor {
            message: &mut message,
            fields: &mut fields,
        });

        if let Ok(mut events) = self.events.lock() {
            events.push(CapturedEvent {
                level: *event.metadata().level(),
                message,
                fields,
            });
        }
    }
}
