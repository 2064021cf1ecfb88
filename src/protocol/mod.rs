//! Client-server wire protocol.
//!
//! This module defines the binary protocol spoken between a state client
//! and a [`StateServer`], including frame formats, the codec for each
//! frame, and the server and client state machines.
//!
//! # Overview
//!
//! The protocol is strictly one-shot: a client opens a TCP connection,
//! sends a single fixed-size request frame, reads a single response, and
//! the connection closes. There is no keep-alive, pipelining, or
//! negotiation; the store behind the server is read-only from the
//! network's point of view.
//!
//! # Binary Format
//!
//! All multi-byte integers are **little-endian**, on every field, on every
//! platform.
//!
//! - Request frame, 256 bytes: 244-byte null-padded UTF-8 path, `i32`
//!   transfer type (-1 = unspecified), `i64` element count
//!   (-1 = unspecified, meaning the client has not pre-allocated).
//! - Plain response header, 16 bytes: `i32` success, `i32` transfer type,
//!   `i64` count.
//! - Metadata response header, 64 bytes: the plain header followed by six
//!   `i32` shape slots and six `i32` stride slots, unused slots `-1`.
//! - Codebook block: 256 raw bytes directly after the header, only for
//!   quantized transfer types.
//! - Payload, last: `count * element_size` bytes for arrays; for scalars
//!   8 bytes (INT64, FLOAT64), 1 byte (BOOL8) or `count` UTF-8 bytes (STR).
//! - Error response: a header with `success = 1`, transfer type `STR` and
//!   `count` = message length, followed by the UTF-8 message.
//!
//! # Framing
//!
//! A request is answered with the 64-byte metadata header iff its count is
//! unspecified and its transfer type is an array type or unspecified;
//! every other request is answered with the 16-byte header. The rule is a
//! function of the request alone and covers error responses too, so both
//! sides always agree on the header size before the first response byte
//! arrives.
mod client;
mod request;
mod response;
mod server;
mod thread;

use thiserror::Error;

use thread::ThreadPool;

pub use client::{ClientError, StateClient};
pub use request::Request;
pub use response::ResponseHeader;
pub use server::{ServerError, StateServer};

/// Fixed sizes and offsets of the wire format.
pub mod wire {
    /// Bytes reserved for the null-padded path field.
    pub const PATH_SIZE: usize = 244;
    /// Total size of a request frame.
    pub const REQUEST_SIZE: usize = 256;
    /// Size of the plain response header.
    pub const HEADER_SIZE: usize = 16;
    /// Size of the response header carrying array metadata.
    pub const META_HEADER_SIZE: usize = 64;
    /// Shape/stride slots reserved in the metadata header.
    pub const META_SLOTS: usize = 6;
    /// Slot value marking an unused shape/stride entry, and the wire value
    /// for an unspecified transfer type or count.
    pub const UNUSED: i32 = -1;

    pub(crate) const REQUEST_TYPE: usize = PATH_SIZE;
    pub(crate) const REQUEST_COUNT: usize = REQUEST_TYPE + 4;

    pub(crate) const HEADER_SUCCESS: usize = 0;
    pub(crate) const HEADER_TYPE: usize = 4;
    pub(crate) const HEADER_COUNT: usize = 8;
    pub(crate) const META_SHAPE: usize = HEADER_SIZE;
    pub(crate) const META_STRIDE: usize = META_SHAPE + META_SLOTS * 4;
}

/// Failures while encoding or decoding protocol frames.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("unknown transfer type tag {0}")]
    UnknownTag(i32),

    #[error("array dimension {0} does not fit a wire slot")]
    DimensionOverflow(usize),
}

pub(crate) fn read_i32(buf: &[u8], at: usize) -> i32 {
    i32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
}

pub(crate) fn read_i64(buf: &[u8], at: usize) -> i64 {
    i64::from_le_bytes(buf[at..at + 8].try_into().unwrap())
}

pub(crate) fn write_i32(buf: &mut [u8], at: usize, value: i32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_i64(buf: &mut [u8], at: usize, value: i64) {
    buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
}
