//! Call configuration
//!
//! The ICE server list is fixed when a [`CallConfig`] is built and cannot be
//! changed afterwards; every peer connection a session creates uses the same
//! list.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Public STUN servers used when nothing else is configured
pub const DEFAULT_ICE_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// URL is not a STUN/TURN URL
    #[error("Invalid ICE server URL: {0}")]
    InvalidUrl(String),

    /// Config file could not be read
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One relay-discovery endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs (`stun:host:port`)
    pub urls: Vec<String>,
}

impl IceServer {
    /// Server with a single URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
        }
    }
}

/// Immutable call configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallConfig {
    ice_servers: Vec<IceServer>,
    #[serde(default = "default_event_capacity")]
    event_capacity: usize,
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_SERVERS
                .iter()
                .map(|url| IceServer::new(*url))
                .collect(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl CallConfig {
    /// Build a configuration from a list of ICE server URLs
    ///
    /// # Errors
    ///
    /// Returns error if any URL is not a `stun:`, `stuns:`, `turn:` or `turns:` URL
    pub fn new<S: AsRef<str>>(urls: impl IntoIterator<Item = S>) -> Result<Self, ConfigError> {
        let config = Self {
            ice_servers: urls
                .into_iter()
                .map(|url| IceServer::new(url.as_ref().trim()))
                .collect(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        };
        config.validate()?;
        Ok(config)
    }

    /// Configuration without any ICE servers (host candidates only)
    pub fn host_only() -> Self {
        Self {
            ice_servers: Vec::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Parse a JSON configuration
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or a URL is invalid
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "Loaded call config");
        Self::from_json_str(&raw)
    }

    /// Configured ICE servers
    pub fn ice_servers(&self) -> &[IceServer] {
        &self.ice_servers
    }

    /// All configured URLs, flattened
    pub fn ice_urls(&self) -> impl Iterator<Item = &str> {
        self.ice_servers
            .iter()
            .flat_map(|server| server.urls.iter().map(String::as_str))
    }

    /// Capacity of the call event channel
    pub fn event_capacity(&self) -> usize {
        self.event_capacity.max(1)
    }

    /// Check every URL
    ///
    /// # Errors
    ///
    /// Returns the first invalid URL
    pub fn validate(&self) -> Result<(), ConfigError> {
        for url in self.ice_urls() {
            let valid = url
                .split_once(':')
                .map(|(scheme, rest)| {
                    matches!(scheme, "stun" | "stuns" | "turn" | "turns") && !rest.is_empty()
                })
                .unwrap_or(false);
            if !valid {
                return Err(ConfigError::InvalidUrl(url.to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_uses_public_stun() {
        let config = CallConfig::default();
        let urls: Vec<&str> = config.ice_urls().collect();
        assert_eq!(urls, DEFAULT_ICE_SERVERS.to_vec());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_new_rejects_non_ice_urls() {
        assert!(CallConfig::new(["stun:example.org:3478"]).is_ok());
        assert!(matches!(
            CallConfig::new(["http://example.org"]),
            Err(ConfigError::InvalidUrl(_))
        ));
        assert!(matches!(
            CallConfig::new(["stun:"]),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_json_defaults_event_capacity() {
        let config = CallConfig::from_json_str(
            r#"{"ice_servers":[{"urls":["stun:a.example:3478","stun:b.example:3478"]}]}"#,
        )
        .unwrap();
        assert_eq!(config.ice_urls().count(), 2);
        assert_eq!(config.event_capacity(), 100);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"ice_servers":[{{"urls":["turn:relay.example:3478"]}}],"event_capacity":8}}"#
        )
        .unwrap();
        let config = CallConfig::from_file(file.path()).unwrap();
        assert_eq!(config.ice_urls().collect::<Vec<_>>(), vec!["turn:relay.example:3478"]);
        assert_eq!(config.event_capacity(), 8);
    }

    #[test]
    fn test_from_file_reports_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            CallConfig::from_file(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
