//! # Query Envelope Codec
//!
//! Wire format for envelopes exchanged over an ICQ channel.
//!
//! ```text
//! ┌───────┬─────────┬──────┬──────────────┬──────────────────┐
//! │ "ICQ" │ version │ kind │ body_len u32 │ body (bincode)   │
//! │ 3 B   │ 1 B     │ 1 B  │ 4 B, BE      │ body_len bytes   │
//! └───────┴─────────┴──────┴──────────────┴──────────────────┘
//! ```
//!
//! The body uses fixed-width big-endian integers and rejects trailing bytes,
//! so re-encoding a decoded envelope reproduces the input exactly.

use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};

use crate::domain::{ErrorAck, InterchainQueryError, QueryEnvelope, QueryRequest, QueryResult};

/// Envelope magic.
pub const ENVELOPE_MAGIC: [u8; 3] = *b"ICQ";

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Header length in bytes.
pub const HEADER_LEN: usize = 9;

/// Upper bound on a body, to refuse hostile length prefixes.
pub const MAX_BODY_LEN: u64 = 1024 * 1024;

/// Envelope kind tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EnvelopeKind {
    /// Query request.
    Request = 1,
    /// Proven result.
    Result = 2,
    /// Error acknowledgement.
    Error = 3,
}

impl EnvelopeKind {
    fn from_byte(byte: u8) -> Result<Self, InterchainQueryError> {
        match byte {
            1 => Ok(Self::Request),
            2 => Ok(Self::Result),
            3 => Ok(Self::Error),
            other => Err(malformed(format!("unknown kind {other}"))),
        }
    }
}

/// Parsed envelope header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Format version.
    pub version: u8,
    /// Envelope kind.
    pub kind: EnvelopeKind,
    /// Body length in bytes.
    pub body_len: u32,
}

fn malformed(reason: impl Into<String>) -> InterchainQueryError {
    InterchainQueryError::MalformedEnvelope(reason.into())
}

fn body_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_big_endian()
        .reject_trailing_bytes()
        .with_limit(MAX_BODY_LEN)
}

fn encode_body<T: Serialize>(kind: EnvelopeKind, body: &T) -> Result<Vec<u8>, InterchainQueryError> {
    let body = body_options()
        .serialize(body)
        .map_err(|e| malformed(format!("encode: {e}")))?;
    let body_len =
        u32::try_from(body.len()).map_err(|_| malformed("body exceeds u32 length"))?;

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&ENVELOPE_MAGIC);
    out.push(ENVELOPE_VERSION);
    out.push(kind as u8);
    out.extend_from_slice(&body_len.to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, InterchainQueryError> {
    body_options()
        .deserialize(body)
        .map_err(|e| malformed(format!("decode: {e}")))
}

/// Parse and validate the fixed header.
pub fn peek_header(bytes: &[u8]) -> Result<EnvelopeHeader, InterchainQueryError> {
    if bytes.len() < HEADER_LEN {
        return Err(malformed(format!(
            "truncated header: {} of {HEADER_LEN} bytes",
            bytes.len()
        )));
    }
    if bytes[..3] != ENVELOPE_MAGIC {
        return Err(malformed("bad magic"));
    }
    let version = bytes[3];
    if version != ENVELOPE_VERSION {
        return Err(malformed(format!(
            "unsupported version {version} (expected {ENVELOPE_VERSION})"
        )));
    }
    let kind = EnvelopeKind::from_byte(bytes[4])?;
    let body_len = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
    Ok(EnvelopeHeader {
        version,
        kind,
        body_len,
    })
}

/// Encode an envelope.
pub fn encode(envelope: &QueryEnvelope) -> Result<Vec<u8>, InterchainQueryError> {
    match envelope {
        QueryEnvelope::Request(request) => encode_body(EnvelopeKind::Request, request),
        QueryEnvelope::Result(result) => encode_body(EnvelopeKind::Result, result),
        QueryEnvelope::Error(ack) => encode_body(EnvelopeKind::Error, ack),
    }
}

/// Decode an envelope.
pub fn decode(bytes: &[u8]) -> Result<QueryEnvelope, InterchainQueryError> {
    let header = peek_header(bytes)?;
    let body = &bytes[HEADER_LEN..];
    let expected = header.body_len as usize;
    if body.len() < expected {
        return Err(malformed(format!(
            "truncated body: {} of {expected} bytes",
            body.len()
        )));
    }
    if body.len() > expected {
        return Err(malformed(format!(
            "{} trailing bytes after body",
            body.len() - expected
        )));
    }

    match header.kind {
        EnvelopeKind::Request => decode_body::<QueryRequest>(body).map(QueryEnvelope::Request),
        EnvelopeKind::Result => decode_body::<QueryResult>(body).map(QueryEnvelope::Result),
        EnvelopeKind::Error => decode_body::<ErrorAck>(body).map(QueryEnvelope::Error),
    }
}

/// Encode a request envelope.
pub fn encode_request(request: &QueryRequest) -> Result<Vec<u8>, InterchainQueryError> {
    encode_body(EnvelopeKind::Request, request)
}

/// Decode bytes that must hold a request envelope.
pub fn decode_request(bytes: &[u8]) -> Result<QueryRequest, InterchainQueryError> {
    match decode(bytes)? {
        QueryEnvelope::Request(request) => Ok(request),
        other => Err(malformed(format!(
            "expected request envelope for {}",
            other.query_id()
        ))),
    }
}
