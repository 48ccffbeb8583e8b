//! Encrypted message envelope — what the delivery server sees.
//!
//! The server is a DUMB QUEUE: it stores and routes
//!   - id / conv_id / from_device_id / to_device_id (routing only)
//!   - sent_at (ordering and history queries)
//!   - ciphertext (opaque bytes)
//!   - header (opaque structured blob: ratchet header + optional
//!     handshake on the first message of a conversation)
//!
//! The server CANNOT see message contents, and never parses the header
//! beyond checking that it is well-formed JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sm_crypto::ratchet::MessageHeader;
use sm_crypto::x3dh::HandshakeMessage;

/// The structured blob a client places in an envelope's `header` field.
///
/// Only clients interpret this; on the first message of a new
/// conversation it also carries the X3DH handshake so the responder can
/// bootstrap its session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    pub ratchet: MessageHeader,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake: Option<HandshakeMessage>,
}

/// One stored envelope as it appears on the wire: pushed one-per-frame
/// on the delivery stream and returned by the history query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeFrame {
    pub id: String,
    pub conv_id: String,
    pub from_device_id: String,
    pub to_device_id: String,
    /// base64url ciphertext.
    pub ciphertext: String,
    /// Verbatim opaque header blob, exactly as enqueued.
    pub header: serde_json::Value,
    /// Server receive timestamp (RFC3339, UTC).
    pub sent_at: DateTime<Utc>,
}
