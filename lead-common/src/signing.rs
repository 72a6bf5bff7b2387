use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";
const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Error, Debug)]
pub enum SigningError {
    #[error("invalid webhook secret: {0}")]
    InvalidSecret(String),
}

/// Signs outbound webhook bodies with HMAC-SHA256.
///
/// The signed message is `"{timestamp}.{body}"` so a receiver can reject
/// replays of an old body with a fresh timestamp.
#[derive(Clone)]
pub struct WebhookSigner {
    mac: HmacSha256,
}

/// Header values for one signed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub signature: String,
    pub timestamp: String,
}

impl WebhookSigner {
    pub fn new(secret: &str) -> Result<Self, SigningError> {
        if secret.is_empty() {
            return Err(SigningError::InvalidSecret("secret is empty".to_string()));
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| SigningError::InvalidSecret(e.to_string()))?;
        Ok(Self { mac })
    }

    fn mac_for(&self, timestamp: i64, body: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body.as_bytes());
        mac
    }

    pub fn sign(&self, timestamp: i64, body: &str) -> SignedHeaders {
        let digest = self.mac_for(timestamp, body).finalize().into_bytes();
        SignedHeaders {
            signature: format!("{SIGNATURE_PREFIX}{}", hex::encode(digest)),
            timestamp: timestamp.to_string(),
        }
    }

    /// Constant-time check of a received signature header.
    pub fn verify(&self, timestamp: i64, body: &str, signature: &str) -> bool {
        let Some(encoded) = signature.strip_prefix(SIGNATURE_PREFIX) else {
            return false;
        };
        let Ok(expected) = hex::decode(encoded) else {
            return false;
        };
        self.mac_for(timestamp, body).verify_slice(&expected).is_ok()
    }
}
