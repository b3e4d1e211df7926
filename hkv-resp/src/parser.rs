//! Incremental reply parser.
//!
//! `RespParser::parse` is called every time new bytes land in the read
//! buffer. Complete elements are consumed from the buffer as soon as they
//! arrive; arrays still waiting for items and a bulk payload still in transit
//! are kept inside the parser. Each byte is therefore examined once, however
//! many reads a large reply is spread over.

use bytes::{Buf, BytesMut};
use thiserror::Error;

use crate::reply::Reply;

/// Upper bound for a single bulk string, matching the server-side default.
pub const DEFAULT_MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Deepest array nesting accepted before the stream is declared corrupt.
pub const MAX_NESTING: usize = 128;

/// Framing errors. Any of these means the stream can no longer be trusted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RespError {
    /// Malformed frame.
    #[error("protocol error: {0}")]
    Protocol(&'static str),
    /// A bulk string announced a length above the configured limit.
    #[error("bulk length {len} exceeds limit {limit}")]
    TooLarge { len: usize, limit: usize },
}

/// Result type for codec operations.
pub type RespResult<T> = Result<T, RespError>;

/// An array whose header has been read but whose items are still arriving.
#[derive(Debug, Clone)]
struct PendingArray {
    remaining: usize,
    items: Vec<Reply>,
}

/// Resumable RESP2 reply parser.
#[derive(Debug, Clone)]
pub struct RespParser {
    max_bulk_len: usize,
    arrays: Vec<PendingArray>,
    // Payload length of a bulk string whose header is already consumed.
    bulk: Option<usize>,
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RespParser {
    /// Creates a parser with the default bulk size limit.
    pub fn new() -> Self {
        Self::with_max_bulk_len(DEFAULT_MAX_BULK_LEN)
    }

    /// Creates a parser that rejects bulk strings longer than `limit`.
    pub fn with_max_bulk_len(limit: usize) -> Self {
        RespParser {
            max_bulk_len: limit,
            arrays: Vec::new(),
            bulk: None,
        }
    }

    /// True while part of a reply has been consumed but not yet returned.
    pub fn in_progress(&self) -> bool {
        !self.arrays.is_empty() || self.bulk.is_some()
    }

    /// Parses one reply from the head of `buf`.
    ///
    /// Returns `Ok(None)` when the buffer ran out mid-reply; whatever was
    /// complete has been consumed and the next call continues from there.
    /// After an error the partial state is discarded.
    pub fn parse(&mut self, buf: &mut BytesMut) -> RespResult<Option<Reply>> {
        let result = self.advance(buf);
        if result.is_err() {
            self.arrays.clear();
            self.bulk = None;
        }
        result
    }

    fn advance(&mut self, buf: &mut BytesMut) -> RespResult<Option<Reply>> {
        loop {
            let element = match self.bulk {
                Some(len) => match take_bulk(buf, len)? {
                    Some(element) => {
                        self.bulk = None;
                        element
                    }
                    None => return Ok(None),
                },
                None => match self.take_header(buf)? {
                    Some(element) => element,
                    None => return Ok(None),
                },
            };

            // `None` here means a header opened a bulk or array; keep reading.
            let mut value = match element {
                Some(value) => value,
                None => continue,
            };
            loop {
                let top = match self.arrays.last_mut() {
                    Some(top) => top,
                    None => return Ok(Some(value)),
                };
                top.items.push(value);
                top.remaining -= 1;
                if top.remaining > 0 {
                    break;
                }
                let done = match self.arrays.pop() {
                    Some(done) => done,
                    None => return Err(RespError::Protocol("array stack underflow")),
                };
                value = Reply::Array(Some(done.items));
            }
        }
    }

    /// Consumes one header line. Scalars come back complete; bulk and array
    /// headers update the pending state and yield `Some(None)`.
    fn take_header(&mut self, buf: &mut BytesMut) -> RespResult<Option<Option<Reply>>> {
        let line_len = match find_line(buf)? {
            Some(line_len) => line_len,
            None => return Ok(None),
        };
        let mut line = buf.split_to(line_len + 2).freeze();
        line.truncate(line_len);
        if line.is_empty() {
            return Err(RespError::Protocol("empty line"));
        }

        let body = line.slice(1..);
        let reply = match line[0] {
            b'+' => Reply::Status(body),
            b'-' => Reply::Error(body),
            b':' => Reply::Integer(parse_i64(&body)?),
            b'$' => {
                let len = parse_i64(&body)?;
                if len < 0 {
                    Reply::Bulk(None)
                } else {
                    let len = len as usize;
                    if len > self.max_bulk_len {
                        return Err(RespError::TooLarge {
                            len,
                            limit: self.max_bulk_len,
                        });
                    }
                    self.bulk = Some(len);
                    return Ok(Some(None));
                }
            }
            b'*' => {
                let len = parse_i64(&body)?;
                if len < 0 {
                    Reply::Array(None)
                } else if len == 0 {
                    Reply::Array(Some(Vec::new()))
                } else {
                    if self.arrays.len() >= MAX_NESTING {
                        return Err(RespError::Protocol("nesting too deep"));
                    }
                    let len = len as usize;
                    // Cap the pre-allocation; the length is untrusted until items arrive.
                    self.arrays.push(PendingArray {
                        remaining: len,
                        items: Vec::with_capacity(len.min(1024)),
                    });
                    return Ok(Some(None));
                }
            }
            _ => return Err(RespError::Protocol("unknown reply type")),
        };
        Ok(Some(Some(reply)))
    }
}

/// Length of the line at the head of `buf`, excluding CRLF.
fn find_line(buf: &[u8]) -> RespResult<Option<usize>> {
    match buf.iter().position(|&b| b == b'\n') {
        None => Ok(None),
        Some(idx) => {
            if idx == 0 || buf[idx - 1] != b'\r' {
                return Err(RespError::Protocol("line missing CR"));
            }
            Ok(Some(idx - 1))
        }
    }
}

fn take_bulk(buf: &mut BytesMut, len: usize) -> RespResult<Option<Option<Reply>>> {
    if buf.len() < len + 2 {
        return Ok(None);
    }
    if &buf[len..len + 2] != b"\r\n" {
        return Err(RespError::Protocol("bulk string missing CRLF"));
    }
    let data = buf.split_to(len).freeze();
    buf.advance(2);
    Ok(Some(Some(Reply::Bulk(Some(data)))))
}

fn parse_i64(data: &[u8]) -> RespResult<i64> {
    if data.is_empty() {
        return Err(RespError::Protocol("empty integer"));
    }
    let mut negative = false;
    let mut idx = 0;
    if data[0] == b'-' {
        negative = true;
        idx = 1;
    }
    if idx == data.len() {
        return Err(RespError::Protocol("empty integer"));
    }

    let mut value: i64 = 0;
    while idx < data.len() {
        let b = data[idx];
        if !b.is_ascii_digit() {
            return Err(RespError::Protocol("invalid integer"));
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
        idx += 1;
    }

    if negative {
        Ok(-value)
    } else {
        Ok(value)
    }
}
