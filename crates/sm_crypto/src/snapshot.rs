//! Stable snapshot codec for device and session state.
//!
//! Persistence and test fixtures both go through this module, so the
//! encoding is deliberately boring: JSON with every fixed-width byte
//! field as base64url, decoded with strict length checks. Skipped keys
//! serialise as an ordered list of `{key, message_key}` pairs — the key
//! is the 36-byte `remote_dh ∥ BE32(index)` tuple — so cache insertion
//! order survives the round trip.
//!
//! `import(export(x))` is byte-for-byte identity and the imported state
//! encrypts/decrypts exactly like the original.

use serde::{Deserialize, Serialize};

use crate::b64;
use crate::device::{Device, OneTimePrekey, SignedPrekey};
use crate::error::CryptoError;
use crate::ratchet::{ChainState, Role, SessionState, SkippedKey};

// ── Snapshot DTOs ────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct ChainSnapshot {
    key: String,
    index: u32,
}

#[derive(Serialize, Deserialize)]
struct SkippedSnapshot {
    key: String,
    message_key: String,
}

#[derive(Serialize, Deserialize)]
struct SessionSnapshot {
    root: String,
    send_chain: ChainSnapshot,
    recv_chain: ChainSnapshot,
    ratchet_private: String,
    ratchet_public: String,
    remote_ratchet: String,
    remote_identity: String,
    remote_signature: String,
    pn: u32,
    role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pending_prekey: Option<String>,
    skipped: Vec<SkippedSnapshot>,
}

#[derive(Serialize, Deserialize)]
struct OneTimeSnapshot {
    id: String,
    private: String,
    public: String,
}

#[derive(Serialize, Deserialize)]
struct DeviceSnapshot {
    signing_private: String,
    signing_public: String,
    dh_private: String,
    dh_public: String,
    signed_prekey_private: String,
    signed_prekey_public: String,
    signed_prekey_sig: String,
    one_time_prekeys: Vec<OneTimeSnapshot>,
}

fn decode_fixed<const N: usize>(name: &str, value: &str) -> Result<[u8; N], CryptoError> {
    let bytes = b64::decode(value)?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::Snapshot(format!("unexpected length for {name}")))
}

// ── Session ──────────────────────────────────────────────────────────────────

pub fn export_session(session: &SessionState) -> Result<String, CryptoError> {
    let snapshot = SessionSnapshot {
        root: b64::encode(&session.root_key),
        send_chain: ChainSnapshot {
            key: b64::encode(&session.send_chain.key),
            index: session.send_chain.index,
        },
        recv_chain: ChainSnapshot {
            key: b64::encode(&session.recv_chain.key),
            index: session.recv_chain.index,
        },
        ratchet_private: b64::encode(&session.ratchet_private),
        ratchet_public: b64::encode(&session.ratchet_public),
        remote_ratchet: b64::encode(&session.remote_ratchet),
        remote_identity: b64::encode(&session.remote_identity),
        remote_signature: b64::encode(&session.remote_signature),
        pn: session.pn,
        role: session.role,
        pending_prekey: session.pending_prekey.clone(),
        skipped: session
            .skipped
            .iter()
            .map(|e| SkippedSnapshot {
                key: b64::encode(&e.id),
                message_key: b64::encode(&e.message_key),
            })
            .collect(),
    };
    Ok(serde_json::to_string(&snapshot)?)
}

pub fn import_session(data: &str) -> Result<SessionState, CryptoError> {
    let snapshot: SessionSnapshot = serde_json::from_str(data)?;
    let mut skipped = std::collections::VecDeque::with_capacity(snapshot.skipped.len());
    for entry in &snapshot.skipped {
        skipped.push_back(SkippedKey {
            id: decode_fixed("skipped key", &entry.key)?,
            message_key: decode_fixed("skipped message_key", &entry.message_key)?,
        });
    }
    Ok(SessionState {
        root_key: decode_fixed("root", &snapshot.root)?,
        send_chain: ChainState {
            key: decode_fixed("send_chain.key", &snapshot.send_chain.key)?,
            index: snapshot.send_chain.index,
        },
        recv_chain: ChainState {
            key: decode_fixed("recv_chain.key", &snapshot.recv_chain.key)?,
            index: snapshot.recv_chain.index,
        },
        ratchet_private: decode_fixed("ratchet_private", &snapshot.ratchet_private)?,
        ratchet_public: decode_fixed("ratchet_public", &snapshot.ratchet_public)?,
        remote_ratchet: decode_fixed("remote_ratchet", &snapshot.remote_ratchet)?,
        remote_identity: decode_fixed("remote_identity", &snapshot.remote_identity)?,
        remote_signature: b64::decode(&snapshot.remote_signature)?,
        pn: snapshot.pn,
        role: snapshot.role,
        pending_prekey: snapshot.pending_prekey,
        skipped,
    })
}

// ── Device ───────────────────────────────────────────────────────────────────

pub fn export_device(device: &Device) -> Result<String, CryptoError> {
    let snapshot = DeviceSnapshot {
        signing_private: b64::encode(&device.signing_private),
        signing_public: b64::encode(&device.signing_public),
        dh_private: b64::encode(&device.dh_private),
        dh_public: b64::encode(&device.dh_public),
        signed_prekey_private: b64::encode(&device.signed_prekey.private),
        signed_prekey_public: b64::encode(&device.signed_prekey.public),
        signed_prekey_sig: b64::encode(&device.signed_prekey.signature),
        one_time_prekeys: device
            .one_time
            .iter()
            .map(|k| OneTimeSnapshot {
                id: k.id.clone(),
                private: b64::encode(&k.private),
                public: b64::encode(&k.public),
            })
            .collect(),
    };
    Ok(serde_json::to_string(&snapshot)?)
}

pub fn import_device(data: &str) -> Result<Device, CryptoError> {
    let snapshot: DeviceSnapshot = serde_json::from_str(data)?;
    let mut one_time = Vec::with_capacity(snapshot.one_time_prekeys.len());
    for entry in &snapshot.one_time_prekeys {
        one_time.push(OneTimePrekey {
            id: entry.id.clone(),
            public: decode_fixed("one_time_prekey.public", &entry.public)?,
            private: decode_fixed("one_time_prekey.private", &entry.private)?,
        });
    }
    Ok(Device {
        signing_private: decode_fixed("signing_private", &snapshot.signing_private)?,
        signing_public: decode_fixed("signing_public", &snapshot.signing_public)?,
        dh_private: decode_fixed("dh_private", &snapshot.dh_private)?,
        dh_public: decode_fixed("dh_public", &snapshot.dh_public)?,
        signed_prekey: SignedPrekey {
            public: decode_fixed("signed_prekey.public", &snapshot.signed_prekey_public)?,
            private: decode_fixed("signed_prekey.private", &snapshot.signed_prekey_private)?,
            signature: b64::decode(&snapshot.signed_prekey_sig)?,
        },
        one_time,
    })
}
