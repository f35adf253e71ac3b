//! Binary envelope codec for events crossing a process boundary.
//!
//! In-process drivers receive events as plain Rust values.  A driver hosted in
//! another process needs them as bytes; this module frames one event per
//! envelope.
//!
//! Wire format:
//! ```text
//! [version:1][role:1][kind:1][reserved:1][payload_len:4][correlation:8][origin:16][payload:N]
//! ```
//! Total header size: 32 bytes.  All multi-byte integers are big-endian.  The
//! payload is the `bincode` encoding of the [`Request`] or [`Response`].
//!
//! The kind byte duplicates information inside the payload.  It lets a relay
//! route or drop an envelope without deserializing it; the decoder checks that
//! both agree.
//!
//! [`Request`]: crate::protocol::messages::Request
//! [`Response`]: crate::protocol::messages::Response

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::trace;
use uuid::Uuid;

use crate::protocol::messages::{
    Event, EventKind, EventRole, Tagged, HEADER_SIZE, PROTOCOL_VERSION,
};

/// Errors that can occur during envelope encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("unknown event kind: 0x{0:02X}")]
    UnknownEventKind(u8),

    #[error("unknown event role: 0x{0:02X}")]
    UnknownRole(u8),

    /// A request envelope was decoded as a response, or the reverse.
    #[error("expected a {expected:?} envelope, found {found:?}")]
    RoleMismatch {
        expected: EventRole,
        found: EventRole,
    },

    /// The header's kind byte disagrees with the decoded payload.
    #[error("header declares {declared:?} but payload is {decoded:?}")]
    KindMismatch {
        declared: EventKind,
        decoded: EventKind,
    },

    /// The payload could not be serialized or parsed.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("payload of {0} bytes does not fit the length field")]
    PayloadTooLarge(usize),

    /// The encoded payload length field does not match the actual data available.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes an [`Event`] into a byte vector including the 32-byte header.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if the payload cannot be
/// serialized and [`ProtocolError::PayloadTooLarge`] if it exceeds 4 GiB.
///
/// # Examples
///
/// ```rust
/// use dbshell_core::protocol::{decode_event, encode_event};
/// use dbshell_core::protocol::messages::{Event, Request, ExecuteRequest};
/// use uuid::Uuid;
///
/// let event = Event::new(Uuid::new_v4(), 3, Request::Execute(ExecuteRequest {
///     command: "INFO".to_string(),
/// }));
/// let bytes = encode_event(&event).unwrap();
/// let (decoded, consumed) = decode_event::<Request>(&bytes).unwrap();
/// assert_eq!(decoded, event);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_event<P: Tagged + Serialize>(event: &Event<P>) -> Result<Vec<u8>, ProtocolError> {
    let payload = bincode::serialize(&event.payload)
        .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))?;
    let payload_len =
        u32::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(P::ROLE as u8);
    buf.push(event.payload.kind() as u8);
    buf.push(0x00); // reserved
    buf.extend_from_slice(&payload_len.to_be_bytes());
    buf.extend_from_slice(&event.correlation.to_be_bytes());
    buf.extend_from_slice(event.origin.as_bytes());

    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decodes one [`Event`] from the beginning of `bytes`.
///
/// Returns the event and the number of bytes consumed, so a stream reader can
/// advance past it.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the header is invalid, names the other role,
/// or disagrees with the payload, or if the payload is truncated or malformed.
pub fn decode_event<P: Tagged + DeserializeOwned>(
    bytes: &[u8],
) -> Result<(Event<P>, usize), ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let role = EventRole::try_from(bytes[1]).map_err(|_| ProtocolError::UnknownRole(bytes[1]))?;
    if role != P::ROLE {
        return Err(ProtocolError::RoleMismatch {
            expected: P::ROLE,
            found: role,
        });
    }

    let declared =
        EventKind::try_from(bytes[2]).map_err(|_| ProtocolError::UnknownEventKind(bytes[2]))?;

    let payload_len = u32::from_be_bytes(read_array(&bytes[4..8])) as usize;
    let correlation = u64::from_be_bytes(read_array(&bytes[8..16]));
    let origin = Uuid::from_bytes(read_array(&bytes[16..32]));

    let available = bytes.len() - HEADER_SIZE;
    if available < payload_len {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared: payload_len,
            available,
        });
    }

    let payload_bytes = &bytes[HEADER_SIZE..HEADER_SIZE + payload_len];
    let payload: P = bincode::deserialize(payload_bytes)
        .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))?;

    let decoded = payload.kind();
    if decoded != declared {
        return Err(ProtocolError::KindMismatch { declared, decoded });
    }

    trace!(?declared, correlation, %origin, "decoded event envelope");
    Ok((Event::new(origin, correlation, payload), HEADER_SIZE + payload_len))
}

/// Copies a header field into a fixed-size array.
///
/// Callers slice exactly `N` bytes out of a buffer already checked to be at
/// least [`HEADER_SIZE`] long.
fn read_array<const N: usize>(field: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(field);
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
