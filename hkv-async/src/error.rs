//! # Client Errors
//!
//! Every failure a caller can observe, from connection setup to a single
//! command outliving its wait deadline.

use std::io;

use thiserror::Error;

/// Result type for the async client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the async client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport could not establish a connection.
    #[error("{0}")]
    ConnectFailure(String),
    /// No established connection before the connect deadline.
    #[error("{0}")]
    ConnectTimeout(String),
    /// Server answered with an error reply.
    #[error("server error: {0}")]
    Protocol(String),
    /// The reply stream broke; the session reconnects.
    #[error("fatal protocol error: {0}")]
    FatalProtocol(String),
    /// The command waited longer than the configured wait timeout.
    #[error("wait timeout ({0} seconds)")]
    WaitTimeout(u64),
    /// The command family is not supported by this client.
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),
    /// A raw command frame had no command name.
    #[error("empty command")]
    EmptyCommand,
    /// Reply shape did not match what the command wrapper expects.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// The session was closed before the command completed.
    #[error("client closed")]
    Closed,
    /// Configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Local IO failure, e.g. reading a configuration file.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Config(err.to_string())
    }
}
