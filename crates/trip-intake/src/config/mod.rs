use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub intake: IntakeConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            intake: IntakeConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Knobs for the application intake and payment workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct IntakeConfig {
    /// Draft field whose value decides whether the add-on fee applies.
    pub add_on_field: String,
    /// Value of `add_on_field` that opts into the add-on.
    pub add_on_value: String,
    /// Surcharge in major currency units (dollars).
    pub add_on_fee: f64,
    /// Allows committing an application without a payment reference.
    pub allow_deferred_payment: bool,
    /// Seconds between reconciliation sweeps; zero disables the sweep.
    pub reconcile_interval_secs: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            add_on_field: "needs_rental_gear".to_string(),
            add_on_value: "yes".to_string(),
            add_on_fee: 150.0,
            allow_deferred_payment: false,
            reconcile_interval_secs: 0,
        }
    }
}

impl IntakeConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let add_on_field = env::var("INTAKE_ADD_ON_FIELD").unwrap_or(defaults.add_on_field);
        let add_on_value = env::var("INTAKE_ADD_ON_VALUE").unwrap_or(defaults.add_on_value);

        let add_on_fee = match env::var("INTAKE_ADD_ON_FEE") {
            Ok(raw) => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|fee| fee.is_finite() && *fee >= 0.0)
                .ok_or(ConfigError::InvalidAddOnFee(raw))?,
            Err(_) => defaults.add_on_fee,
        };

        let allow_deferred_payment = match env::var("INTAKE_ALLOW_DEFERRED_PAYMENT") {
            Ok(raw) => parse_flag(&raw).ok_or(ConfigError::InvalidFlag {
                name: "INTAKE_ALLOW_DEFERRED_PAYMENT",
                value: raw,
            })?,
            Err(_) => defaults.allow_deferred_payment,
        };

        let reconcile_interval_secs = match env::var("INTAKE_RECONCILE_INTERVAL_SECS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidReconcileInterval(raw))?,
            Err(_) => defaults.reconcile_interval_secs,
        };

        Ok(Self {
            add_on_field,
            add_on_value,
            add_on_fee,
            allow_deferred_payment,
            reconcile_interval_secs,
        })
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_secs > 0)
            .then(|| Duration::from_secs(self.reconcile_interval_secs))
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidAddOnFee(String),
    InvalidFlag { name: &'static str, value: String },
    InvalidReconcileInterval(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidAddOnFee(value) => write!(
                f,
                "INTAKE_ADD_ON_FEE must be a non-negative amount (found '{}')",
                value
            ),
            ConfigError::InvalidFlag { name, value } => {
                write!(f, "{} must be true or false (found '{}')", name, value)
            }
            ConfigError::InvalidReconcileInterval(value) => write!(
                f,
                "INTAKE_RECONCILE_INTERVAL_SECS must be a whole number of seconds (found '{}')",
                value
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidAddOnFee(_)
            | ConfigError::InvalidFlag { .. }
            | ConfigError::InvalidReconcileInterval(_) => None,
        }
    }
}
