use envconfig::Envconfig;
use std::{fmt, net::SocketAddr, str::FromStr, time::Duration};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3300")]
    pub address: SocketAddr,

    #[envconfig(default = "production")]
    pub environment: Environment,

    #[envconfig(nested = true)]
    pub crm: CrmConfig,

    pub webhook_url: Option<NonEmptyString>,
    pub webhook_secret: Option<NonEmptyString>,

    pub database_url: Option<NonEmptyString>,

    #[envconfig(default = "10")]
    pub max_pg_connections: u32,

    #[envconfig(default = "false")]
    pub run_migrations: bool,

    pub redis_url: Option<NonEmptyString>,

    #[envconfig(default = "100")]
    pub redis_response_timeout_ms: EnvMsDuration,

    #[envconfig(default = "1000")]
    pub redis_connection_timeout_ms: EnvMsDuration,

    #[envconfig(default = "10000")]
    pub rate_limit_max_keys: usize,

    pub recaptcha_secret_key: Option<NonEmptyString>,

    #[envconfig(default = "https://www.google.com/recaptcha/api/siteverify")]
    pub recaptcha_verify_url: String,

    // Set when an edge proxy we control rewrites X-Forwarded-For.
    #[envconfig(default = "false")]
    pub trusted_proxy: bool,

    #[envconfig(default = "x-real-ip")]
    pub trusted_ip_header: String,

    // Used as the webhook pageUrl when a submission carries no referer.
    #[envconfig(default = "https://www.example.org")]
    pub site_url: String,

    #[envconfig(default = "false")]
    pub enable_metrics: bool,
}

#[derive(Envconfig, Clone)]
pub struct CrmConfig {
    pub ghl_api_key: Option<NonEmptyString>,
    pub ghl_location_id: Option<NonEmptyString>,

    #[envconfig(default = "https://services.leadconnectorhq.com")]
    pub ghl_api_base_url: String,

    #[envconfig(default = "2021-07-28")]
    pub ghl_api_version: String,
}

impl Config {
    pub fn default_for_test() -> Self {
        Config {
            address: SocketAddr::from_str("127.0.0.1:0").unwrap(),
            environment: Environment::Development,
            crm: CrmConfig {
                ghl_api_key: None,
                ghl_location_id: None,
                ghl_api_base_url: "http://localhost:8080".to_string(),
                ghl_api_version: "2021-07-28".to_string(),
            },
            webhook_url: None,
            webhook_secret: None,
            database_url: None,
            max_pg_connections: 2,
            run_migrations: false,
            redis_url: None,
            redis_response_timeout_ms: EnvMsDuration(Duration::from_millis(100)),
            redis_connection_timeout_ms: EnvMsDuration(Duration::from_millis(1000)),
            rate_limit_max_keys: 100,
            recaptcha_secret_key: None,
            recaptcha_verify_url: "http://localhost:8081/siteverify".to_string(),
            trusted_proxy: false,
            trusted_ip_header: "x-real-ip".to_string(),
            site_url: "https://www.example.org".to_string(),
            enable_metrics: false,
        }
    }
}

/// Deployment mode. Only development relaxes the bot check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvironmentError(String);

impl fmt::Display for ParseEnvironmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown environment {:?}", self.0)
    }
}

impl FromStr for Environment {
    type Err = ParseEnvironmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(ParseEnvironmentError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
