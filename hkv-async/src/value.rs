//! # Reply Values
//!
//! Purpose: The caller-facing view of a successful reply, after affirmative
//! normalization and any result transformer.

use bytes::Bytes;
use hkv_resp::Reply;

use crate::error::{ClientError, ClientResult};

/// A successful reply delivered to a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Null bulk string or null array.
    Nil,
    /// A top-level `+OK` normalized to `true`.
    Bool(bool),
    /// Integer reply.
    Int(i64),
    /// Status reply other than a top-level `OK`.
    Status(String),
    /// Bulk string payload.
    Data(Bytes),
    /// Array reply.
    Array(Vec<Value>),
    /// Field-keyed pairs built by result transformers (HGETALL, HMGET).
    Map(Vec<(Bytes, Value)>),
    /// Error entry nested inside an array reply (e.g. EXEC results).
    Error(String),
}

impl Value {
    /// Converts a decoded reply without affirmative normalization.
    pub fn from_reply(reply: Reply) -> Value {
        match reply {
            Reply::Status(text) => Value::Status(String::from_utf8_lossy(&text).into_owned()),
            Reply::Error(text) | Reply::Fatal(text) => {
                Value::Error(String::from_utf8_lossy(&text).into_owned())
            }
            Reply::Integer(value) => Value::Int(value),
            Reply::Bulk(Some(data)) => Value::Data(data),
            Reply::Bulk(None) | Reply::Array(None) => Value::Nil,
            Reply::Array(Some(items)) => {
                Value::Array(items.into_iter().map(Value::from_reply).collect())
            }
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Borrowed payload for bulk and status values.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Data(data) => Some(data),
            Value::Status(text) => Some(text.as_bytes()),
            _ => None,
        }
    }

    /// Bulk payload; `None` for nil.
    pub fn into_bytes(self) -> ClientResult<Option<Bytes>> {
        match self {
            Value::Data(data) => Ok(Some(data)),
            Value::Status(text) => Ok(Some(Bytes::from(text))),
            Value::Nil => Ok(None),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Bulk payload decoded as UTF-8 (lossy); `None` for nil.
    pub fn into_string(self) -> ClientResult<Option<String>> {
        Ok(self
            .into_bytes()?
            .map(|data| String::from_utf8_lossy(&data).into_owned()))
    }

    pub fn into_int(self) -> ClientResult<i64> {
        match self {
            Value::Int(value) => Ok(value),
            Value::Data(data) => std::str::from_utf8(&data)
                .ok()
                .and_then(|text| text.parse().ok())
                .ok_or(ClientError::UnexpectedResponse),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// `OK` and `:1` are true; `:0` and nil are false.
    pub fn into_bool(self) -> ClientResult<bool> {
        match self {
            Value::Bool(value) => Ok(value),
            Value::Int(value) => Ok(value != 0),
            Value::Nil => Ok(false),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Array items; nil becomes an empty list.
    pub fn into_array(self) -> ClientResult<Vec<Value>> {
        match self {
            Value::Array(items) => Ok(items),
            Value::Nil => Ok(Vec::new()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub fn into_map(self) -> ClientResult<Vec<(Bytes, Value)>> {
        match self {
            Value::Map(pairs) => Ok(pairs),
            Value::Nil => Ok(Vec::new()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}
