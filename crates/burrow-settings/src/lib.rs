//! TOML configuration for the burrow proxy.
//!
//! Configuration is read from one file, resolved in order:
//! 1. An explicit path given on the command line
//! 2. Project config: `./burrow.toml`
//! 3. Global config: `~/.config/burrow/burrow.toml`
//!
//! then overridden field by field from `BURROW_SOCKS_*` and
//! `BURROW_HTTP_*` environment variables. The merged result is validated
//! before anything binds a socket: a malformed file, an unparseable
//! override, or an invalid endpoint is fatal to startup, never tolerated.
//!
//! # Example
//!
//! ```no_run
//! use burrow_settings::ConfigLoader;
//!
//! let config = ConfigLoader::load(None).unwrap();
//! println!("{:?}", config.socks);
//! ```

mod loader;

pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Errors from settings operations. All of them are fatal to startup.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// TOML deserialization failed.
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// TOML serialization failed.
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// I/O error reading or writing a config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An environment override could not be parsed.
    #[error("Invalid value for {name}: {value:?}")]
    InvalidOverride { name: String, value: String },

    /// The merged configuration failed validation.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// One protocol endpoint: a bind address and optional credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSettings {
    /// Whether this endpoint listens at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bind host, an IP address or resolvable name.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port. Required when the endpoint's section is present;
    /// `0` is rejected by validation.
    #[serde(default)]
    pub port: u16,

    /// Optional auth username. Must be set together with `password`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Optional auth password. Must be set together with `username`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl EndpointSettings {
    fn with_port(port: u16) -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port,
            username: None,
            password: None,
        }
    }

    /// The configured credential pair, if both halves are present.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }

    /// Resolve `host:port` to a bindable socket address.
    ///
    /// # Errors
    /// Returns `SettingsError::Invalid` if the host does not parse or
    /// resolve to any address.
    pub fn bind_addr(&self) -> Result<SocketAddr, SettingsError> {
        use std::net::ToSocketAddrs;
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| SettingsError::Invalid(format!("cannot resolve host {:?}: {e}", self.host)))?
            .next()
            .ok_or_else(|| {
                SettingsError::Invalid(format!("host {:?} resolves to no address", self.host))
            })
    }

    fn validate(&self, section: &str) -> Result<(), SettingsError> {
        if !self.enabled {
            return Ok(());
        }
        if self.host.is_empty() {
            return Err(SettingsError::Invalid(format!(
                "[{section}] host must not be empty"
            )));
        }
        if self.port == 0 {
            return Err(SettingsError::Invalid(format!(
                "[{section}] port must be 1-65535"
            )));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(SettingsError::Invalid(format!(
                "[{section}] username and password must be set together"
            )));
        }
        Ok(())
    }

    fn apply_env(
        &mut self,
        prefix: &str,
        var: &impl Fn(&str) -> Option<String>,
    ) -> Result<(), SettingsError> {
        if let Some(value) = var(&format!("{prefix}_ENABLED")) {
            self.enabled = match value.as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(SettingsError::InvalidOverride {
                        name: format!("{prefix}_ENABLED"),
                        value,
                    })
                }
            };
        }
        if let Some(value) = var(&format!("{prefix}_HOST")) {
            self.host = value;
        }
        if let Some(value) = var(&format!("{prefix}_PORT")) {
            self.port = value
                .parse()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| SettingsError::InvalidOverride {
                    name: format!("{prefix}_PORT"),
                    value,
                })?;
        }
        if let Some(value) = var(&format!("{prefix}_USERNAME")) {
            self.username = Some(value);
        }
        if let Some(value) = var(&format!("{prefix}_PASSWORD")) {
            self.password = Some(value);
        }
        Ok(())
    }
}

/// Top-level burrow configuration, corresponding to `burrow.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurrowConfig {
    /// TOML `[socks]` section.
    #[serde(default = "BurrowConfig::default_socks")]
    pub socks: EndpointSettings,

    /// TOML `[http]` section.
    #[serde(default = "BurrowConfig::default_http")]
    pub http: EndpointSettings,
}

impl Default for BurrowConfig {
    fn default() -> Self {
        Self {
            socks: Self::default_socks(),
            http: Self::default_http(),
        }
    }
}

impl BurrowConfig {
    fn default_socks() -> EndpointSettings {
        EndpointSettings::with_port(1080)
    }

    fn default_http() -> EndpointSettings {
        EndpointSettings::with_port(8080)
    }

    /// Parse a `BurrowConfig` from a TOML string.
    ///
    /// # Errors
    /// Returns `SettingsError::ParseError` if the TOML is malformed or
    /// contains unrecognised keys for this schema.
    pub fn parse(toml: &str) -> Result<Self, SettingsError> {
        toml::from_str(toml).map_err(SettingsError::ParseError)
    }

    /// Load a `BurrowConfig` from a file on disk.
    ///
    /// # Errors
    /// Returns `SettingsError::Io` on read failure, or
    /// `SettingsError::ParseError` if the file content is not valid TOML.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Serialize this config to a TOML string.
    ///
    /// # Errors
    /// Returns `SettingsError::SerializeError` if serialization fails.
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        toml::to_string_pretty(self).map_err(SettingsError::SerializeError)
    }

    /// Apply `BURROW_SOCKS_*` and `BURROW_HTTP_*` overrides from `var`.
    ///
    /// Overrides win over file values field by field. An override that
    /// does not parse is an error, not a skipped value.
    pub fn apply_overrides(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), SettingsError> {
        self.socks.apply_env("BURROW_SOCKS", &var)?;
        self.http.apply_env("BURROW_HTTP", &var)?;
        Ok(())
    }

    /// Check every endpoint for a usable bind address and a complete
    /// credential pair.
    ///
    /// # Errors
    /// Returns `SettingsError::Invalid` naming the offending section.
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.socks.validate("socks")?;
        self.http.validate("http")?;
        Ok(())
    }
}
