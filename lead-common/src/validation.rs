use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::payload::{ContactPayload, LeadPayload};

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("invalid tag regex"));
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("invalid email regex"));

pub const NAME_MIN_CHARS: usize = 2;
pub const NAME_MAX_CHARS: usize = 100;
pub const EMAIL_MAX_CHARS: usize = 254;
pub const PHONE_MIN_DIGITS: usize = 10;
pub const PHONE_MAX_DIGITS: usize = 15;
pub const MESSAGE_MIN_CHARS: usize = 10;
pub const MESSAGE_MAX_CHARS: usize = 5000;

/// A rejected form field. `message` is safe to show to the visitor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Strips anything that looks like an HTML tag, then trims.
pub fn sanitize(input: &str) -> String {
    HTML_TAG.replace_all(input, "").trim().to_string()
}

fn required_string<'a>(
    value: &'a Value,
    field: &'static str,
    label: &str,
) -> Result<&'a str, ValidationError> {
    value
        .as_str()
        .ok_or_else(|| ValidationError::new(field, format!("{label} is required")))
}

pub fn validate_name(value: &Value) -> Result<String, ValidationError> {
    let name = sanitize(required_string(value, "name", "Name")?);
    let chars = name.chars().count();
    if chars < NAME_MIN_CHARS {
        return Err(ValidationError::new(
            "name",
            "Name must be at least 2 characters",
        ));
    }
    if chars > NAME_MAX_CHARS {
        return Err(ValidationError::new("name", "Name is too long"));
    }
    Ok(name)
}

pub fn validate_email(value: &Value) -> Result<String, ValidationError> {
    let email = sanitize(required_string(value, "email", "Email")?).to_lowercase();
    if email.chars().count() > EMAIL_MAX_CHARS || !EMAIL.is_match(&email) {
        return Err(ValidationError::new(
            "email",
            "Please enter a valid email address",
        ));
    }
    Ok(email)
}

/// Accepts digits plus common formatting (spaces, dashes, dots, parentheses,
/// a leading plus). Returns the sanitized input with its formatting intact.
pub fn validate_phone(value: &Value) -> Result<String, ValidationError> {
    let phone = sanitize(required_string(value, "phone", "Phone number")?);
    let stripped: String = phone
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')' | '+'))
        .collect();
    let digits = stripped.chars().count();
    if !stripped.chars().all(|c| c.is_ascii_digit())
        || !(PHONE_MIN_DIGITS..=PHONE_MAX_DIGITS).contains(&digits)
    {
        return Err(ValidationError::new(
            "phone",
            "Please enter a valid phone number",
        ));
    }
    Ok(phone)
}

pub fn validate_message(value: &Value) -> Result<String, ValidationError> {
    let message = sanitize(required_string(value, "message", "Message")?);
    let chars = message.chars().count();
    if chars < MESSAGE_MIN_CHARS {
        return Err(ValidationError::new(
            "message",
            "Message must be at least 10 characters",
        ));
    }
    if chars > MESSAGE_MAX_CHARS {
        return Err(ValidationError::new("message", "Message is too long"));
    }
    Ok(message)
}

/// Never fails: anything that is not a string becomes empty.
pub fn optional_string(value: &Value) -> String {
    value.as_str().map(sanitize).unwrap_or_default()
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

static NULL: Value = Value::Null;

fn field<'a>(body: &'a Map<String, Value>, key: &str) -> &'a Value {
    body.get(key).unwrap_or(&NULL)
}

fn object(body: &Value) -> Result<&Map<String, Value>, ValidationError> {
    body.as_object()
        .ok_or_else(|| ValidationError::new("body", "Invalid submission"))
}

fn optional_phone(body: &Map<String, Value>) -> Result<Option<String>, ValidationError> {
    if optional_string(field(body, "phone")).is_empty() {
        Ok(None)
    } else {
        validate_phone(field(body, "phone")).map(Some)
    }
}

fn token(body: &Map<String, Value>) -> Option<String> {
    field(body, "recaptchaToken")
        .as_str()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Validates a contact form body. Name, email and message are required; a
/// phone number is checked only when one was given.
pub fn validate_contact(body: &Value) -> Result<ContactPayload, ValidationError> {
    let body = object(body)?;

    Ok(ContactPayload {
        name: validate_name(field(body, "name"))?,
        email: validate_email(field(body, "email"))?,
        phone: optional_phone(body)?,
        organization: non_empty(optional_string(field(body, "organization"))),
        service: non_empty(optional_string(field(body, "service"))),
        message: validate_message(field(body, "message"))?,
        source: non_empty(optional_string(field(body, "source"))),
        recaptcha_token: token(body),
    })
}

const LEAD_TEXT_FIELDS: [&str; 5] = ["organization", "churchName", "message", "source", "phone"];

/// Validates a lead body and lifts it into a typed [`LeadPayload`]. Remaining
/// string fields are sanitized like the named ones.
pub fn validate_lead(body: &Value) -> Result<LeadPayload, ValidationError> {
    let fields = object(body)?;

    let lead_type = optional_string(field(fields, "type"));
    if lead_type.is_empty() {
        return Err(ValidationError::new("type", "Lead type is required"));
    }
    let name = validate_name(field(fields, "name"))?;
    let email = validate_email(field(fields, "email"))?;
    let phone = optional_phone(fields)?;
    let token = token(fields);

    let mut clean = Map::with_capacity(fields.len());
    for (key, value) in fields {
        let value = match value {
            Value::String(s) => Value::String(sanitize(s)),
            other => other.clone(),
        };
        clean.insert(key.clone(), value);
    }
    for key in LEAD_TEXT_FIELDS {
        match non_empty(optional_string(field(fields, key))) {
            Some(text) => clean.insert(key.to_string(), Value::String(text)),
            None => clean.remove(key),
        };
    }
    clean.insert("type".to_string(), Value::String(lead_type));
    clean.insert("name".to_string(), Value::String(name));
    clean.insert("email".to_string(), Value::String(email));
    if let Some(phone) = phone {
        clean.insert("phone".to_string(), Value::String(phone));
    }
    match token {
        Some(token) => clean.insert("recaptchaToken".to_string(), Value::String(token)),
        None => clean.remove("recaptchaToken"),
    };

    serde_json::from_value(Value::Object(clean))
        .map_err(|_| ValidationError::new("body", "Invalid submission"))
}
