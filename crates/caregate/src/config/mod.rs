use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

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
    pub verification: VerificationConfig,
    pub compliance: ComplianceConfig,
    pub notifications: NotificationConfig,
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

        let defaults = VerificationConfig::default();
        let verification = VerificationConfig {
            police_clearance_validity_days: read_number(
                "VERIFICATION_POLICE_CLEARANCE_VALIDITY_DAYS",
                defaults.police_clearance_validity_days,
            )?,
            interview_grace_minutes: read_number(
                "VERIFICATION_INTERVIEW_GRACE_MINUTES",
                defaults.interview_grace_minutes,
            )?,
            sweep_interval_secs: read_number(
                "VERIFICATION_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval_secs,
            )?,
            sweep_batch_size: read_number(
                "VERIFICATION_SWEEP_BATCH_SIZE",
                defaults.sweep_batch_size,
            )?,
        };

        let defaults = ComplianceConfig::default();
        let compliance = ComplianceConfig {
            tick_interval_secs: read_number(
                "COMPLIANCE_TICK_INTERVAL_SECS",
                defaults.tick_interval_secs,
            )?,
            unlock_grace_days: read_number(
                "COMPLIANCE_UNLOCK_GRACE_DAYS",
                defaults.unlock_grace_days,
            )?,
            tick_batch_size: read_number(
                "COMPLIANCE_TICK_BATCH_SIZE",
                defaults.tick_batch_size,
            )?,
        };

        let defaults = NotificationConfig::default();
        let notifications = NotificationConfig {
            max_attempts: read_number("NOTIFY_MAX_ATTEMPTS", defaults.max_attempts)?,
            base_backoff_secs: read_number("NOTIFY_BASE_BACKOFF_SECS", defaults.base_backoff_secs)?,
            max_backoff_secs: read_number("NOTIFY_MAX_BACKOFF_SECS", defaults.max_backoff_secs)?,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            verification,
            compliance,
            notifications,
        })
    }
}

fn read_number<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key }),
        Err(_) => Ok(default),
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

/// Stage expiry and sweep cadence for the verification pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationConfig {
    pub police_clearance_validity_days: u32,
    pub interview_grace_minutes: u32,
    pub sweep_interval_secs: u64,
    /// Cases fetched per page while a sweep walks the whole set.
    pub sweep_batch_size: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            police_clearance_validity_days: 365,
            interview_grace_minutes: 120,
            sweep_interval_secs: 900,
            sweep_batch_size: 500,
        }
    }
}

/// Billing ticker cadence and manual-unlock grace window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceConfig {
    pub tick_interval_secs: u64,
    pub unlock_grace_days: u32,
    /// Accounts fetched per page while a billing cycle walks the whole set.
    pub tick_batch_size: usize,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 3600,
            unlock_grace_days: 7,
            tick_batch_size: 1000,
        }
    }
}

/// Retry policy for notifications that failed on first delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationConfig {
    pub max_attempts: u32,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_secs: 30,
            max_backoff_secs: 3600,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key } => {
                write!(f, "{key} must be a non-negative integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "VERIFICATION_POLICE_CLEARANCE_VALIDITY_DAYS",
            "VERIFICATION_INTERVIEW_GRACE_MINUTES",
            "VERIFICATION_SWEEP_INTERVAL_SECS",
            "VERIFICATION_SWEEP_BATCH_SIZE",
            "COMPLIANCE_TICK_INTERVAL_SECS",
            "COMPLIANCE_UNLOCK_GRACE_DAYS",
            "COMPLIANCE_TICK_BATCH_SIZE",
            "NOTIFY_MAX_ATTEMPTS",
            "NOTIFY_BASE_BACKOFF_SECS",
            "NOTIFY_MAX_BACKOFF_SECS",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.verification, VerificationConfig::default());
        assert_eq!(config.compliance, ComplianceConfig::default());
        assert_eq!(config.notifications, NotificationConfig::default());
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn reads_engine_overrides() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("COMPLIANCE_UNLOCK_GRACE_DAYS", "3");
        env::set_var("VERIFICATION_POLICE_CLEARANCE_VALIDITY_DAYS", "180");
        env::set_var("NOTIFY_MAX_ATTEMPTS", "2");
        env::set_var("COMPLIANCE_TICK_BATCH_SIZE", "250");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.compliance.unlock_grace_days, 3);
        assert_eq!(config.compliance.tick_batch_size, 250);
        assert_eq!(config.verification.police_clearance_validity_days, 180);
        assert_eq!(config.notifications.max_attempts, 2);
        reset_env();
    }

    #[test]
    fn rejects_non_numeric_overrides() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("COMPLIANCE_TICK_INTERVAL_SECS", "hourly");
        match AppConfig::load() {
            Err(ConfigError::InvalidNumber { key }) => {
                assert_eq!(key, "COMPLIANCE_TICK_INTERVAL_SECS")
            }
            other => panic!("expected invalid number, got {other:?}"),
        }
        reset_env();
    }
}
