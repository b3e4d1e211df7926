//! # HybridKV RESP2 Codec
//!
//! Purpose: Turn an ordered argument list into request bytes and turn a
//! byte stream into tagged replies for the async client.
//!
//! ## Design Principles
//! 1. **Resumable Parsing**: Complete elements are consumed as they arrive and
//!    open arrays live in the parser, so no byte is parsed twice.
//! 2. **Buffer Reuse**: Callers own the `BytesMut` buffers on both directions.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

mod encode;
mod parser;
mod reply;

pub use encode::{encode_command, encoded_len};
pub use parser::{RespError, RespParser, RespResult, DEFAULT_MAX_BULK_LEN, MAX_NESTING};
pub use reply::Reply;
