//! Database row models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sm_crypto::b64;
use sm_proto::envelope::EnvelopeFrame;

use crate::error::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EnvelopeRow {
    pub id: String,
    pub conv_id: String,
    pub from_device_id: String,
    pub to_device_id: String,
    pub ciphertext: Vec<u8>,
    /// Opaque header blob, stored verbatim as JSON text.
    pub header: String,
    pub sent_at: DateTime<Utc>,
    pub received_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl EnvelopeRow {
    /// Convert to the wire frame: ciphertext re-encoded base64url, the
    /// header blob passed through verbatim.
    pub fn into_frame(self) -> Result<EnvelopeFrame, StoreError> {
        let header: serde_json::Value = serde_json::from_str(&self.header)
            .map_err(|e| StoreError::Corrupt(format!("header blob for {}: {e}", self.id)))?;
        Ok(EnvelopeFrame {
            id: self.id,
            conv_id: self.conv_id,
            from_device_id: self.from_device_id,
            to_device_id: self.to_device_id,
            ciphertext: b64::encode(&self.ciphertext),
            header,
            sent_at: self.sent_at,
        })
    }
}
