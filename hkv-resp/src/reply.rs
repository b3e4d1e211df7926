//! Tagged reply values produced by the parser.

use bytes::Bytes;

/// One decoded RESP2 reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK` / `+PONG` style status replies.
    Status(Bytes),
    /// `-ERR ...` replies.
    Error(Bytes),
    /// `:123` replies.
    Integer(i64),
    /// `$...` bulk strings, `None` for the null bulk string.
    Bulk(Option<Bytes>),
    /// `*...` arrays, `None` for the null array.
    Array(Option<Vec<Reply>>),
    /// The stream itself is unusable (framing error, truncated reply).
    ///
    /// Never sent by a server; the transport synthesizes it so the failure is
    /// correlated with the command that was waiting and the connection is
    /// torn down.
    Fatal(Bytes),
}

impl Reply {
    /// Returns true for the two failure tags (`Error` and `Fatal`).
    pub fn is_failure(&self) -> bool {
        matches!(self, Reply::Error(_) | Reply::Fatal(_))
    }

    /// Returns true when the connection must be re-established.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Reply::Fatal(_))
    }

    /// Returns true for exactly `+OK`.
    pub fn is_ok_status(&self) -> bool {
        matches!(self, Reply::Status(text) if text.as_ref() == b"OK")
    }

    /// Builds a fatal reply from a message.
    pub fn fatal(message: impl Into<String>) -> Self {
        Reply::Fatal(Bytes::from(message.into()))
    }

    /// Error text for failure replies, lossily decoded.
    pub fn error_text(&self) -> Option<String> {
        match self {
            Reply::Error(text) | Reply::Fatal(text) => {
                Some(String::from_utf8_lossy(text).into_owned())
            }
            _ => None,
        }
    }
}
