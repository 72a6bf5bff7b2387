pub mod endpoints;
pub mod errors;

pub use errors::ApiError;
