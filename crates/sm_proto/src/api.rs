//! API request/response types. These map directly to JSON bodies on the
//! wire; identifier fields stay strings here and are parsed (and
//! rejected with a 400-equivalent) at the server boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sm_crypto::x3dh::{OneTimePrekeyPublic, PrekeyBundle};

use crate::envelope::EnvelopeFrame;

// ── Delivery ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub conv_id: String,
    pub from_device_id: String,
    pub to_device_id: String,
    /// base64url ciphertext.
    pub ciphertext: String,
    /// Opaque structured header blob (must be non-empty, well-formed).
    pub header: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResponse {
    pub id: String,
    pub conv_id: String,
    pub to_device_id: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub messages: Vec<EnvelopeFrame>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<String>,
}

// ── Key directory ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishBundleRequest {
    pub user_id: String,
    pub device_id: String,
    pub bundle: PrekeyBundle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPrekeyInfo {
    /// base64url X25519 public key.
    pub public: String,
    /// base64url Ed25519 signature.
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

/// A fetched bundle carries AT MOST one one-time prekey; the directory
/// removes it from the pool before responding so it is never served twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchBundleResponse {
    pub device_id: String,
    /// base64url X25519 identity DH public key.
    pub identity_key: String,
    /// base64url Ed25519 verifying key.
    pub identity_signature_key: String,
    pub signed_prekey: SignedPrekeyInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub one_time_prekey: Option<OneTimePrekeyPublic>,
}

// ── Common ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_request_parses_from_client_json() {
        let json = r#"{
            "conv_id": "6f0a9a46-3c4f-4dbb-9c2e-0f12d2a4b111",
            "from_device_id": "b2b6a6de-24f2-41f8-a031-bb85e2b3c26d",
            "to_device_id": "0d4cf90c-75cc-4e38-9c54-55c52b4ec42e",
            "ciphertext": "qBBappJMrAy9Qd7Zidst",
            "header": {"ratchet": {"pn": 0, "n": 0}}
        }"#;
        let req: SendRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.to_device_id, "0d4cf90c-75cc-4e38-9c54-55c52b4ec42e");
        assert!(req.header.get("ratchet").is_some());
    }
}
