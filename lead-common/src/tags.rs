use crate::payload::{ContactPayload, LeadPayload, LeadType};

pub const CONTACT_FORM_TAG: &str = "contact-form";

/// Lowercase, with whitespace runs collapsed into single hyphens.
pub fn slugify(value: &str) -> String {
    value
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

pub fn primary_tag(lead_type: &LeadType) -> String {
    match lead_type {
        LeadType::ExitIntent => "exit-intent".to_string(),
        LeadType::WhitePaperDownload => "white-paper-download".to_string(),
        LeadType::TripPlanner => "trip-planner".to_string(),
        LeadType::CookieConsent => "cookie-consent".to_string(),
        LeadType::Other(raw) => raw.replace('_', "-"),
    }
}

/// CRM tags for a lead: the primary tag for its type, then any type-specific
/// modifier (`wp-<service>` for white papers, `trip-<trip type>` for trip
/// planning requests).
pub fn lead_tags(lead: &LeadPayload) -> Vec<String> {
    let mut tags = vec![primary_tag(&lead.lead_type)];

    let modifier = match lead.lead_type {
        LeadType::WhitePaperDownload => lead.service_name().map(|s| ("wp", slugify(s))),
        LeadType::TripPlanner => lead.trip_type().map(|t| ("trip", slugify(t))),
        _ => None,
    };
    if let Some((prefix, slug)) = modifier {
        if !slug.is_empty() {
            tags.push(format!("{prefix}-{slug}"));
        }
    }

    tags
}

pub fn contact_tags(contact: &ContactPayload) -> Vec<String> {
    let mut tags = vec![CONTACT_FORM_TAG.to_string()];
    if let Some(service) = contact.service.as_deref() {
        let slug = slugify(service);
        if !slug.is_empty() {
            tags.push(format!("service-{slug}"));
        }
    }
    tags
}
