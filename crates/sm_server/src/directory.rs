//! In-memory key directory.
//!
//! Implements the contract the protocol engine expects from the
//! directory service: PUBLISH stores a device's bundle atomically,
//! FETCH returns it with at most one one-time prekey, removed from the
//! pool under the same lock so no key is ever served twice. A
//! production deployment replaces this with the real directory service;
//! the contract is identical.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use sm_crypto::b64;
use sm_crypto::x3dh::OneTimePrekeyPublic;
use sm_proto::api::{FetchBundleResponse, PublishBundleRequest, SignedPrekeyInfo};

struct DirectoryEntry {
    user_id: String,
    identity_key: String,
    identity_signature_key: String,
    signed_prekey: SignedPrekeyInfo,
    one_time: VecDeque<OneTimePrekeyPublic>,
}

/// Thread-safe directory handle, keyed by device id. Cheap to clone.
#[derive(Clone, Default)]
pub struct KeyDirectory {
    inner: Arc<RwLock<HashMap<String, DirectoryEntry>>>,
}

impl KeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or replace) the bundle for `(user_id, device_id)`.
    pub async fn publish(&self, req: PublishBundleRequest) -> DateTime<Utc> {
        let created_at = Utc::now();
        let entry = DirectoryEntry {
            user_id: req.user_id,
            identity_key: b64::encode(&req.bundle.identity_key),
            identity_signature_key: b64::encode(&req.bundle.identity_signature_key),
            signed_prekey: SignedPrekeyInfo {
                public: b64::encode(&req.bundle.signed_prekey),
                signature: b64::encode(&req.bundle.signed_prekey_sig),
                created_at,
            },
            one_time: req.bundle.one_time_prekeys.into_iter().collect(),
        };
        self.inner.write().await.insert(req.device_id, entry);
        created_at
    }

    /// Fetch a device's bundle, consuming one one-time prekey if any
    /// remain. Returns `None` for unknown devices.
    pub async fn fetch(&self, device_id: &str) -> Option<FetchBundleResponse> {
        let mut map = self.inner.write().await;
        let entry = map.get_mut(device_id)?;
        let one_time_prekey = entry.one_time.pop_front();
        Some(FetchBundleResponse {
            device_id: device_id.to_string(),
            identity_key: entry.identity_key.clone(),
            identity_signature_key: entry.identity_signature_key.clone(),
            signed_prekey: entry.signed_prekey.clone(),
            one_time_prekey,
        })
    }

    /// Remaining one-time prekeys for a device (monitoring hook).
    pub async fn one_time_remaining(&self, device_id: &str) -> Option<usize> {
        let map = self.inner.read().await;
        map.get(device_id).map(|e| e.one_time.len())
    }

    /// The user a device belongs to.
    pub async fn owner(&self, device_id: &str) -> Option<String> {
        let map = self.inner.read().await;
        map.get(device_id).map(|e| e.user_id.clone())
    }
}
