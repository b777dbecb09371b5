//! Portal Configuration

use thiserror::Error;

use crate::network::protocol::DEFAULT_MAX_MESSAGE_SIZE;

/// Service type advertised to nearby devices.
pub const DEFAULT_SERVICE_TYPE: &str = "courir";

/// Longest service type the discovery layer accepts.
pub const MAX_SERVICE_TYPE_LEN: usize = 15;

/// Network portal configuration.
#[derive(Clone, Debug)]
pub struct PortalConfig {
    /// Discovery service type. Peers only see hosts with the same type.
    pub service_type: String,
    /// Name other players see for this device.
    pub display_name: String,
    /// Let guests in without asking a connection listener.
    pub auto_accept_guests: bool,
    /// Largest encoded game change, in bytes.
    pub max_message_size: usize,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
            display_name: "player".to_string(),
            auto_accept_guests: true,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl PortalConfig {
    /// Defaults overridden by `COURIR_*` environment variables.
    ///
    /// The display name falls back to `HOSTNAME` when `COURIR_DISPLAY_NAME`
    /// is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|var| std::env::var(var).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_message_size: usize = match var("COURIR_MAX_MESSAGE_SIZE") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidNumber { var: "COURIR_MAX_MESSAGE_SIZE", value: raw })?,
            None => defaults.max_message_size,
        };

        let auto_accept_guests = match var("COURIR_AUTO_ACCEPT") {
            Some(raw) => parse_flag(&raw)
                .ok_or(ConfigError::InvalidFlag { var: "COURIR_AUTO_ACCEPT", value: raw })?,
            None => defaults.auto_accept_guests,
        };

        let config = Self {
            service_type: var("COURIR_SERVICE_TYPE").unwrap_or(defaults.service_type),
            display_name: var("COURIR_DISPLAY_NAME")
                .or_else(|| var("HOSTNAME"))
                .unwrap_or(defaults.display_name),
            auto_accept_guests,
            max_message_size,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check values the discovery layer would reject.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_service_type(&self.service_type)?;

        if self.display_name.trim().is_empty() {
            return Err(ConfigError::EmptyDisplayName);
        }

        if self.max_message_size == 0 {
            return Err(ConfigError::ZeroMessageSize);
        }

        Ok(())
    }
}

/// `true`/`false` or `1`/`0`, ignoring ASCII case.
fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// 1-15 characters of lowercase ASCII letters, digits and hyphens, with no
/// leading or trailing hyphen.
fn validate_service_type(service_type: &str) -> Result<(), ConfigError> {
    let valid_chars = service_type
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');

    if service_type.is_empty()
        || service_type.len() > MAX_SERVICE_TYPE_LEN
        || !valid_chars
        || service_type.starts_with('-')
        || service_type.ends_with('-')
    {
        return Err(ConfigError::InvalidServiceType(service_type.to_string()));
    }

    Ok(())
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Service type breaks the naming rules.
    #[error("Invalid service type: {0:?}")]
    InvalidServiceType(String),

    /// Display name is blank.
    #[error("Display name must not be empty")]
    EmptyDisplayName,

    /// Message size limit is zero.
    #[error("Maximum message size must be non-zero")]
    ZeroMessageSize,

    /// An environment variable did not parse as a boolean.
    #[error("{var} is not a boolean: {value:?}")]
    InvalidFlag {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },

    /// An environment variable did not parse as a number.
    #[error("{var} is not a number: {value:?}")]
    InvalidNumber {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}
