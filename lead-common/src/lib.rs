pub mod payload;
pub mod signing;
pub mod tags;
pub mod validation;

pub use payload::{
    ConsentPreferences, ContactPayload, LeadDetails, LeadPayload, LeadType, TripDetails,
};
pub use signing::{SignedHeaders, SigningError, WebhookSigner};
pub use validation::ValidationError;
