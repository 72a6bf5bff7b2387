pub mod api;
pub mod client_ip;
pub mod config;
pub mod crm;
pub mod persistence;
pub mod pipeline;
pub mod recaptcha;
pub mod router;
pub mod server;
pub mod test_utils;
pub mod webhook;
