//! # Client Configuration
//!
//! Purpose: Describe where the session connects and how long it waits.
//! Every field has a default, so a JSON document only needs the keys it
//! wants to override.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;

use crate::error::ClientResult;

/// Seconds to wait for a connection to become established.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Seconds a queued command may wait for its reply.
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 600;

/// Credential re-sent with AUTH after every (re)connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Credential {
    /// `AUTH <password>`.
    Password(String),
    /// `AUTH <username> <password>` (ACL style).
    UserPassword(String, String),
}

impl Credential {
    /// Arguments following the AUTH command name.
    pub fn to_args(&self) -> Vec<Bytes> {
        match self {
            Credential::Password(password) => vec![Bytes::from(password.clone())],
            Credential::UserPassword(user, password) => {
                vec![Bytes::from(user.clone()), Bytes::from(password.clone())]
            }
        }
    }
}

/// Configuration for one client session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Connect-timeout watchdog in seconds.
    pub connect_timeout: u64,
    /// Wait-timeout for queued commands in seconds.
    pub wait_timeout: u64,
    /// Database selected after every connection; 0 means no SELECT is sent.
    pub db: u32,
    /// Optional credential sent with AUTH after every connection.
    pub auth: Option<Credential>,
    /// Disable Nagle on the TCP socket.
    pub nodelay: bool,
    /// Initial capacity of the per-connection read buffer.
    pub read_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            wait_timeout: DEFAULT_WAIT_TIMEOUT_SECS,
            db: 0,
            auth: None,
            nodelay: true,
            read_buffer: 8 * 1024,
        }
    }
}

impl ClientConfig {
    /// Default configuration pointing at `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        }
    }

    /// Parses a JSON document; missing keys keep their defaults.
    pub fn from_json_str(raw: &str) -> ClientResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> ClientResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn with_db(mut self, db: u32) -> Self {
        self.db = db;
        self
    }

    pub fn with_auth(mut self, credential: Credential) -> Self {
        self.auth = Some(credential);
        self
    }

    pub fn with_connect_timeout(mut self, seconds: u64) -> Self {
        self.connect_timeout = seconds;
        self
    }

    pub fn with_wait_timeout(mut self, seconds: u64) -> Self {
        self.wait_timeout = seconds;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;

    #[test]
    fn defaults_match_documented_values() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.wait_timeout(), Duration::from_secs(600));
        assert_eq!(config.db, 0);
        assert!(config.auth.is_none());
    }

    #[test]
    fn json_overrides_only_given_keys() {
        let config = ClientConfig::from_json_str(
            r#"{"addr": "10.0.0.1:6380", "db": 3, "auth": "secret", "wait_timeout": 1}"#,
        )
        .unwrap();
        assert_eq!(config.addr, "10.0.0.1:6380");
        assert_eq!(config.db, 3);
        assert_eq!(config.auth, Some(Credential::Password("secret".into())));
        assert_eq!(config.wait_timeout(), Duration::from_secs(1));
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn acl_credential_from_pair() {
        let config = ClientConfig::from_json_str(r#"{"auth": ["app", "pw"]}"#).unwrap();
        let credential = config.auth.unwrap();
        assert_eq!(credential, Credential::UserPassword("app".into(), "pw".into()));
        assert_eq!(
            credential.to_args(),
            vec![Bytes::from_static(b"app"), Bytes::from_static(b"pw")]
        );
    }

    #[test]
    fn invalid_json_is_config_error() {
        let err = ClientConfig::from_json_str("{\"db\": \"three\"}").unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
