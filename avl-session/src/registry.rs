//! Process-wide device registry
//!
//! Maps an IMEI to the device's record history. The map itself is only
//! locked to look up or insert an entry; every entry carries its own lock,
//! so connections of different devices never wait on each other.

use crate::session::DeviceSession;
use avl_codec::Codec8Decoder;
use avl_core::AvlRecord;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Handle to one registry entry
pub type SharedDevice = Arc<Mutex<DeviceEntry>>;

/// Registry data kept for one IMEI across connections
#[derive(Debug, Clone)]
pub struct DeviceEntry {
    imei: String,
    history: VecDeque<AvlRecord>,
    history_limit: Option<usize>,
    /// Number of handshakes accepted for this IMEI
    connections: u64,
    /// Connection that most recently attached
    active_generation: u64,
    connected: bool,
    last_seen: Option<DateTime<Utc>>,
}

impl DeviceEntry {
    fn new(imei: String, history_limit: Option<usize>) -> Self {
        Self {
            imei,
            history: VecDeque::new(),
            history_limit,
            connections: 0,
            active_generation: 0,
            connected: false,
            last_seen: None,
        }
    }

    pub fn imei(&self) -> &str {
        &self.imei
    }

    /// Append a record, dropping the oldest once the history limit is reached
    pub fn append(&mut self, record: AvlRecord) {
        if let Some(limit) = self.history_limit {
            if limit == 0 {
                return;
            }
            while self.history.len() >= limit {
                self.history.pop_front();
            }
        }
        self.history.push_back(record);
        self.last_seen = Some(Utc::now());
    }

    /// Records in arrival order
    pub fn history(&self) -> &VecDeque<AvlRecord> {
        &self.history
    }

    pub fn connections(&self) -> u64 {
        self.connections
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    /// Mark a new connection as the active one and return its generation
    pub(crate) fn attach(&mut self) -> u64 {
        self.connections += 1;
        self.active_generation = self.connections;
        self.connected = true;
        self.last_seen = Some(Utc::now());
        self.active_generation
    }

    /// Detach a connection; only the most recent one clears the connected flag
    pub(crate) fn detach(&mut self, generation: u64) -> bool {
        if self.active_generation == generation {
            self.connected = false;
            true
        } else {
            false
        }
    }
}

/// Device registry
#[derive(Debug)]
pub struct SessionRegistry {
    devices: RwLock<HashMap<String, SharedDevice>>,
    history_limit: Option<usize>,
}

impl SessionRegistry {
    /// Registry with unbounded history
    pub fn new() -> Self {
        Self::with_history_limit(None)
    }

    /// Registry keeping at most `limit` records per IMEI
    pub fn with_history_limit(limit: Option<usize>) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            history_limit: limit,
        }
    }

    /// Return the entry for `imei`, creating an empty one if absent
    ///
    /// The second value is `true` when the entry was created by this call.
    pub async fn get_or_create(&self, imei: &str) -> (SharedDevice, bool) {
        if let Some(device) = self.devices.read().await.get(imei) {
            return (Arc::clone(device), false);
        }

        let mut devices = self.devices.write().await;
        // Another connection may have inserted it between the two locks
        if let Some(device) = devices.get(imei) {
            return (Arc::clone(device), false);
        }
        let device = Arc::new(Mutex::new(DeviceEntry::new(
            imei.to_string(),
            self.history_limit,
        )));
        devices.insert(imei.to_string(), Arc::clone(&device));
        (device, true)
    }

    /// Open a connection session for `imei`
    ///
    /// An existing entry is reused, so history survives reconnects. When two
    /// connections claim the same IMEI, the later one becomes the active
    /// connection; both keep appending to the shared history.
    pub async fn open_session(&self, imei: &str, decoder: Codec8Decoder) -> DeviceSession {
        let (device, created) = self.get_or_create(imei).await;
        let (generation, last_seen) = {
            let mut entry = device.lock().await;
            let last_seen = entry.last_seen();
            (entry.attach(), last_seen)
        };
        match (created, last_seen) {
            (true, _) | (false, None) => log::info!("New device added: {}", imei),
            (false, Some(seen)) => log::info!(
                "Device {} reconnected (connection #{}, last seen {})",
                imei,
                generation,
                seen.format("%Y-%m-%d %H:%M:%S")
            ),
        }
        DeviceSession::new(imei.to_string(), device, generation, decoder)
    }

    pub async fn get(&self, imei: &str) -> Option<SharedDevice> {
        self.devices.read().await.get(imei).cloned()
    }

    /// Number of known IMEIs
    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    /// Number of IMEIs with a live connection
    pub async fn connected_count(&self) -> usize {
        let devices: Vec<SharedDevice> = self.devices.read().await.values().cloned().collect();
        let mut count = 0;
        for device in devices {
            if device.lock().await.is_connected() {
                count += 1;
            }
        }
        count
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
