use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Where a lead came from. Unknown tags are kept verbatim rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LeadType {
    ExitIntent,
    WhitePaperDownload,
    TripPlanner,
    CookieConsent,
    Other(String),
}

impl LeadType {
    pub fn as_str(&self) -> &str {
        match self {
            LeadType::ExitIntent => "exit_intent_lead",
            LeadType::WhitePaperDownload => "white_paper_download",
            LeadType::TripPlanner => "trip_planner",
            LeadType::CookieConsent => "cookie_consent",
            LeadType::Other(raw) => raw,
        }
    }
}

impl From<&str> for LeadType {
    fn from(raw: &str) -> Self {
        match raw {
            "exit_intent_lead" => LeadType::ExitIntent,
            "white_paper_download" => LeadType::WhitePaperDownload,
            "trip_planner" => LeadType::TripPlanner,
            "cookie_consent" => LeadType::CookieConsent,
            other => LeadType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for LeadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for LeadType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LeadType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(LeadType::from(raw.as_str()))
    }
}

/// Cookie-consent choices as the site's banner stores them. Essential cookies
/// cannot be declined, so `essential` is always true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsentPreferences {
    pub essential: bool,
    pub analytics: bool,
    pub marketing: bool,
    pub functional: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ConsentPreferences {
    /// Lenient read of a stored consent object: missing or non-boolean flags
    /// count as declined.
    pub fn from_value(value: &Value) -> Self {
        let flag = |name: &str| value.get(name).and_then(Value::as_bool).unwrap_or(false);
        Self {
            essential: true,
            analytics: flag("analytics"),
            marketing: flag("marketing"),
            functional: flag("functional"),
            timestamp: value
                .get("timestamp")
                .and_then(scalar_to_string),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TripDetails {
    pub trip_type: Option<String>,
    pub destination: Option<String>,
    pub travel_dates: Option<String>,
    pub group_size: Option<String>,
    pub budget: Option<String>,
}

const TRIP_FIELDS: [&str; 5] = [
    "tripType",
    "destination",
    "travelDates",
    "groupSize",
    "budget",
];

/// Fields that only make sense for one lead type, keyed by that type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadDetails {
    None,
    WhitePaper { service_name: Option<String> },
    TripPlanner(TripDetails),
    CookieConsent(ConsentPreferences),
}

impl LeadDetails {
    /// Pulls the type-specific fields for `lead_type` out of `fields`,
    /// leaving everything else behind.
    fn extract(lead_type: &LeadType, fields: &mut Map<String, Value>) -> Self {
        // Blank or non-scalar values stay behind as free-form fields.
        let mut take = |key: &str| {
            let value = fields.get(key).and_then(scalar_to_string)?;
            fields.remove(key);
            Some(value)
        };

        match lead_type {
            LeadType::WhitePaperDownload => LeadDetails::WhitePaper {
                service_name: take("serviceName"),
            },
            LeadType::TripPlanner => {
                let [trip_type, destination, travel_dates, group_size, budget] =
                    TRIP_FIELDS.map(&mut take);
                LeadDetails::TripPlanner(TripDetails {
                    trip_type,
                    destination,
                    travel_dates,
                    group_size,
                    budget,
                })
            }
            LeadType::CookieConsent => match fields.get("preferences") {
                Some(preferences) if preferences.is_object() => {
                    let preferences = ConsentPreferences::from_value(preferences);
                    fields.remove("preferences");
                    LeadDetails::CookieConsent(preferences)
                }
                _ => LeadDetails::None,
            },
            LeadType::ExitIntent | LeadType::Other(_) => LeadDetails::None,
        }
    }

    /// The wire form of these details, as camelCase JSON fields.
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        match self {
            LeadDetails::None => {}
            LeadDetails::WhitePaper { service_name } => {
                if let Some(name) = service_name {
                    fields.insert("serviceName".to_string(), Value::String(name.clone()));
                }
            }
            LeadDetails::TripPlanner(trip) => {
                let values = [
                    &trip.trip_type,
                    &trip.destination,
                    &trip.travel_dates,
                    &trip.group_size,
                    &trip.budget,
                ];
                for (key, value) in TRIP_FIELDS.iter().zip(values) {
                    if let Some(value) = value {
                        fields.insert(key.to_string(), Value::String(value.clone()));
                    }
                }
            }
            LeadDetails::CookieConsent(preferences) => {
                if let Ok(value) = serde_json::to_value(preferences) {
                    fields.insert("preferences".to_string(), value);
                }
            }
        }
        fields
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A lead as submitted by one of the site's capture surfaces.
///
/// Immutable once received; each processing step borrows it and derives its
/// own output. `recaptcha_token` is accepted on input but never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireLead", into = "WireLead")]
pub struct LeadPayload {
    pub lead_type: LeadType,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub organization: Option<String>,
    pub church_name: Option<String>,
    pub message: Option<String>,
    pub source: Option<String>,
    pub recaptcha_token: Option<String>,
    pub details: LeadDetails,
    /// Free-form fields with no typed home.
    pub extra: Map<String, Value>,
}

impl LeadPayload {
    /// Type-specific details and free-form fields merged into one bag, or
    /// `None` when there are neither.
    pub fn extra_fields(&self) -> Option<Map<String, Value>> {
        let mut fields = self.details.to_fields();
        for (key, value) in &self.extra {
            fields.entry(key.clone()).or_insert_with(|| value.clone());
        }
        if fields.is_empty() {
            None
        } else {
            Some(fields)
        }
    }

    pub fn service_name(&self) -> Option<&str> {
        match &self.details {
            LeadDetails::WhitePaper { service_name } => service_name.as_deref(),
            _ => None,
        }
    }

    pub fn trip_type(&self) -> Option<&str> {
        match &self.details {
            LeadDetails::TripPlanner(trip) => trip.trip_type.as_deref(),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLead {
    #[serde(rename = "type")]
    lead_type: LeadType,
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    church_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(default, skip_serializing)]
    recaptcha_token: Option<String>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl From<WireLead> for LeadPayload {
    fn from(mut wire: WireLead) -> Self {
        let details = LeadDetails::extract(&wire.lead_type, &mut wire.rest);
        LeadPayload {
            lead_type: wire.lead_type,
            name: wire.name,
            email: wire.email,
            phone: wire.phone,
            organization: wire.organization,
            church_name: wire.church_name,
            message: wire.message,
            source: wire.source,
            recaptcha_token: wire.recaptcha_token,
            details,
            extra: wire.rest,
        }
    }
}

impl From<LeadPayload> for WireLead {
    fn from(lead: LeadPayload) -> Self {
        let mut rest = lead.extra;
        rest.extend(lead.details.to_fields());
        WireLead {
            lead_type: lead.lead_type,
            name: lead.name,
            email: lead.email,
            phone: lead.phone,
            organization: lead.organization,
            church_name: lead.church_name,
            message: lead.message,
            source: lead.source,
            recaptcha_token: None,
            rest,
        }
    }
}

/// A general inquiry from the contact page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPayload {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing)]
    pub recaptcha_token: Option<String>,
}
