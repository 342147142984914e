//! Per-device store for multi-part messages awaiting reassembly.
//!
//! Only the eviction side exists: no payload format in use is split across
//! messages, so nothing inserts parts during ingestion yet.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);
const INCOMPLETE_TTL_SECS: i64 = 60 * 60;
const COMPLETE_TTL_SECS: i64 = 5 * 60;

#[derive(Debug, Clone)]
pub struct PartialMessage {
    pub parts: HashMap<usize, Vec<u8>>,
    pub total_parts: usize,
    pub received_at: DateTime<Utc>,
    pub is_complete: bool,
}

impl PartialMessage {
    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let age = (now - self.received_at).num_seconds();
        if self.is_complete {
            age > COMPLETE_TTL_SECS
        } else {
            age > INCOMPLETE_TTL_SECS
        }
    }
}

/// Buffers keyed by device serial number. Only the sweeper holds a handle;
/// ingestion never inserts into it until multi-part reassembly exists.
#[derive(Clone, Default)]
pub struct MessageBuffers {
    inner: Arc<Mutex<HashMap<String, PartialMessage>>>,
}

impl MessageBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PartialMessage>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, serial: &str, message: PartialMessage) {
        self.lock().insert(serial.to_string(), message);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Evicts stale buffers and returns how many were removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut buffers = self.lock();
        let before = buffers.len();

        buffers.retain(|serial, message| {
            let stale = message.is_stale(now);
            if stale && !message.is_complete {
                log::info!("cleaning up stale message buffer for device {}", serial);
            }
            !stale
        });

        before - buffers.len()
    }
}

pub fn spawn_sweeper(buffers: MessageBuffers) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        // the first tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = buffers.sweep(Utc::now());
            log::debug!("buffer sweep evicted {} entries", evicted);
        }
    })
}
