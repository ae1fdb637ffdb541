//! Process configuration loaded from the environment at startup.

use thiserror::Error;

use crate::domain::rewrite::RewriteConfig;

/// Environment parsing failures; the process refuses to start on any of them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required variable was not set.
    #[error("required environment variable {name} is not set")]
    Missing { name: &'static str },
    /// A variable was set to an unusable value.
    #[error("environment variable {name} is invalid: {message}")]
    Invalid { name: &'static str, message: String },
}

/// Everything both processes read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub relay_host: String,
    pub relay_port: u16,
    pub tracking_base_url: String,
    pub enable_open_tracking: bool,
    pub enable_click_tracking: bool,
    /// Shared secret for inbound relay notifications; consumed by the
    /// deployment's ingress, carried here so one config covers both processes.
    pub webhook_secret: Option<String>,
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary lookup (tests inject one).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_port = parse_port(&lookup, "API_PORT", 3001)?;
        let database_url = lookup("DATABASE_URL")
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::Missing {
                name: "DATABASE_URL",
            })?;
        let redis_url =
            lookup("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_owned());
        let relay_host = lookup("HARAKA_HOST").unwrap_or_else(|| "127.0.0.1".to_owned());
        let relay_port = parse_port(&lookup, "HARAKA_PORT", 2525)?;
        let tracking_base_url = lookup("TRACKING_BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{api_port}"));

        Ok(Self {
            api_port,
            database_url,
            redis_url,
            relay_host,
            relay_port,
            tracking_base_url,
            enable_open_tracking: parse_flag(&lookup, "ENABLE_OPEN_TRACKING", true)?,
            enable_click_tracking: parse_flag(&lookup, "ENABLE_CLICK_TRACKING", true)?,
            webhook_secret: lookup("WEBHOOK_SECRET").filter(|value| !value.is_empty()),
        })
    }

    /// Tracking rewriter settings derived from this configuration.
    pub fn rewrite_config(&self) -> RewriteConfig {
        RewriteConfig {
            base_url: self.tracking_base_url.trim_end_matches('/').to_owned(),
            open_tracking: self.enable_open_tracking,
            click_tracking: self.enable_click_tracking,
        }
    }
}

fn parse_port(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u16,
) -> Result<u16, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            name,
            message: format!("{raw} is not a port number"),
        }),
    }
}

fn parse_flag(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::Invalid {
                name,
                message: format!("{other} is not a boolean"),
            }),
        },
    }
}
