//! Per-device delivery coordinator.
//!
//! One long-lived WebSocket per recipient device. On connect the queue
//! is flushed immediately; afterwards every poll tick runs one
//! pending → push → mark cycle and emits a Ping control frame, so a
//! dead connection surfaces within roughly two poll intervals.
//!
//! Guarantees:
//!   - one store reader per device: the cycle runs inline in this task,
//!     never concurrently with itself;
//!   - at most `batch` envelopes are in flight per tick, and a blocked
//!     write stalls polling rather than buffering more;
//!   - `mark_delivered` for frames already pushed runs even when a
//!     write fails mid-batch, so a reconnect never replays them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Notify;
use tokio::time::{interval, timeout, MissedTickBehavior};

use sm_store::Store;

use crate::config::{STORE_DEADLINE, WRITE_DEADLINE};

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub poll_interval: Duration,
    pub batch: i64,
}

/// Tracks the active stream per device so the store has one reader per
/// recipient at a time. A reconnect replaces the previous registration
/// and tells its coordinator to stop.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    inner: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, device_id: &str) -> Arc<Notify> {
        let handle = Arc::new(Notify::new());
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = map.insert(device_id.to_string(), handle.clone()) {
            previous.notify_one();
        }
        handle
    }

    fn unregister(&self, device_id: &str, handle: &Arc<Notify>) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if map.get(device_id).is_some_and(|current| Arc::ptr_eq(current, handle)) {
            map.remove(device_id);
        }
    }
}

/// Drive one device's stream until the peer disconnects, a write fails,
/// or a newer stream takes over the device. Transient store errors are
/// retried on the next tick.
pub async fn run(
    socket: WebSocket,
    device_id: String,
    store: Store,
    registry: StreamRegistry,
    config: DeliveryConfig,
) {
    tracing::info!(device = %device_id, "delivery stream connected");
    let handle = registry.register(&device_id);
    let (mut sender, mut receiver) = socket.split();

    // Flush whatever queued up while the device was offline.
    if push_pending(&mut sender, &device_id, &store, config.batch).await.is_err() {
        tracing::info!(device = %device_id, "delivery stream closed during initial flush");
        registry.unregister(&device_id, &handle);
        return;
    }

    let mut ticker = interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Liveness probe; the client answers with a Pong we ignore.
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                if push_pending(&mut sender, &device_id, &store, config.batch).await.is_err() {
                    break;
                }
            }
            _ = handle.notified() => {
                tracing::info!(device = %device_id, "stream replaced by a newer connection");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            incoming = receiver.next() => {
                if !keep_open(&device_id, incoming) {
                    break;
                }
            }
        }
    }

    registry.unregister(&device_id, &handle);
    tracing::info!(device = %device_id, "delivery stream closed");
}

fn keep_open(
    device_id: &str,
    incoming: Option<Result<Message, axum::Error>>,
) -> bool {
    match incoming {
        Some(Ok(Message::Close(_))) | None => false,
        Some(Err(e)) => {
            tracing::debug!(device = %device_id, error = %e, "stream read error");
            false
        }
        // Pongs and any client chatter are ignored; data frames from the
        // client arrive masked per the frame protocol and are dropped.
        Some(Ok(_)) => true,
    }
}

/// One pending → push → mark cycle.
///
/// Returns `Err` only when the socket is no longer writable. The
/// delivery marking for frames pushed before the failure still runs, so
/// duplicates cannot be produced on reconnect.
async fn push_pending(
    sender: &mut SplitSink<WebSocket, Message>,
    device_id: &str,
    store: &Store,
    batch: i64,
) -> Result<(), ()> {
    let rows = match timeout(STORE_DEADLINE, store.pending(device_id, batch)).await {
        Ok(Ok(rows)) => rows,
        Ok(Err(e)) => {
            tracing::warn!(device = %device_id, error = %e, "pending query failed; retrying next tick");
            return Ok(());
        }
        Err(_) => {
            tracing::warn!(device = %device_id, "pending query timed out; retrying next tick");
            return Ok(());
        }
    };
    if rows.is_empty() {
        return Ok(());
    }

    let mut pushed = Vec::with_capacity(rows.len());
    let mut write_failed = false;
    for row in rows {
        let id = row.id.clone();
        let frame = match row.into_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(device = %device_id, error = %e, "skipping corrupt envelope row");
                continue;
            }
        };
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(device = %device_id, error = %e, "frame serialisation failed");
                continue;
            }
        };
        match timeout(WRITE_DEADLINE, sender.send(Message::Text(text.into()))).await {
            Ok(Ok(())) => pushed.push(id),
            Ok(Err(_)) | Err(_) => {
                write_failed = true;
                break;
            }
        }
    }

    // Must complete even when the socket died mid-push: these frames
    // reached the wire (or its buffers) and redelivery would duplicate.
    if !pushed.is_empty() {
        match timeout(STORE_DEADLINE, store.mark_delivered(&pushed)).await {
            Ok(Ok(())) => {
                tracing::debug!(device = %device_id, count = pushed.len(), "envelopes delivered");
            }
            Ok(Err(e)) => {
                tracing::warn!(device = %device_id, error = %e, "mark_delivered failed");
            }
            Err(_) => {
                tracing::warn!(device = %device_id, "mark_delivered timed out");
            }
        }
    }

    if write_failed {
        Err(())
    } else {
        Ok(())
    }
}
