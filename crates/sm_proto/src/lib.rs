//! sm_proto — wire types and serialisation for SecuMSG
//!
//! Everything on the wire is JSON. The server handles envelopes as
//! opaque blobs: it validates structure, never meaning.
//!
//! # Modules
//! - `envelope` — the envelope frame pushed on the delivery stream and
//!   the structured header blob clients attach to each ciphertext
//! - `api`      — request/response bodies for the send, history,
//!   conversations and key-directory endpoints

pub mod api;
pub mod envelope;

pub use envelope::{EnvelopeFrame, EnvelopeHeader};
