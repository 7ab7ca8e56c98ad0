//! Programmable collaborator implementations
//!
//! Deterministic in-memory implementations of [`Clock`],
//! [`ConnectionMonitor`] and [`PeerManager`] for tests and local
//! experimentation. They emit the same signals as production backends, so
//! the engine cannot tell the difference.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use tracing::warn;

use crate::clock::{AlarmCallback, AlarmId, Clock};
use crate::connection::{
    ConnectionDetails, ConnectionId, ConnectionMonitor, ConnectionsChanged,
};
use crate::error::{SchedulerError, SchedulerResult};
use crate::peer::PeerManager;
use crate::signal::{HandlerId, Signal};

struct DummyAlarm {
    id: u64,
    when: DateTime<Utc>,
    callback: AlarmCallback,
}

/// Clock with a programmable current time and zone
///
/// [`set_now`](DummyClock::set_now) fires every alarm whose trigger is at
/// or before the new time, earliest first, re-reading the alarm list after
/// each callback so callbacks may add or remove alarms.
pub struct DummyClock {
    now: Mutex<DateTime<Tz>>,
    alarms: Mutex<Vec<DummyAlarm>>,
    next_id: AtomicU64,
    offset_changed: Signal<()>,
}

impl DummyClock {
    /// Create a clock frozen at `now`
    pub fn new(now: DateTime<Tz>) -> Self {
        Self {
            now: Mutex::new(now),
            alarms: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            offset_changed: Signal::new(),
        }
    }

    /// Jump the clock to `now`, firing due alarms in trigger order
    pub fn set_now(&self, now: DateTime<Tz>) {
        *self.now.lock() = now.clone();
        let limit = now.with_timezone(&Utc);
        loop {
            let due = {
                let mut alarms = self.alarms.lock();
                let earliest = alarms
                    .iter()
                    .enumerate()
                    .filter(|(_, alarm)| alarm.when <= limit)
                    .min_by_key(|(_, alarm)| alarm.when)
                    .map(|(index, _)| index);
                earliest.map(|index| alarms.remove(index))
            };
            match due {
                Some(alarm) => (alarm.callback)(),
                None => break,
            }
        }
    }

    /// Advance the clock by `delta`
    pub fn advance(&self, delta: chrono::Duration) {
        let next = self.now.lock().clone() + delta;
        self.set_now(next);
    }

    /// Re-zone the clock, notifying offset-change subscribers
    pub fn set_timezone(&self, tz: Tz) {
        {
            let mut now = self.now.lock();
            *now = now.with_timezone(&tz);
        }
        self.offset_changed.emit(&());
    }

    /// Trigger instant of the earliest pending alarm
    pub fn next_alarm(&self) -> Option<DateTime<Utc>> {
        self.alarms.lock().iter().map(|alarm| alarm.when).min()
    }

    /// Number of pending alarms
    pub fn pending_alarms(&self) -> usize {
        self.alarms.lock().len()
    }
}

impl Clock for DummyClock {
    fn now(&self) -> DateTime<Tz> {
        self.now.lock().clone()
    }

    fn timezone(&self) -> Tz {
        self.now.lock().timezone()
    }

    fn add_alarm(&self, when: DateTime<Utc>, callback: AlarmCallback) -> AlarmId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.alarms.lock().push(DummyAlarm { id, when, callback });
        AlarmId(id)
    }

    fn remove_alarm(&self, id: AlarmId) {
        let mut alarms = self.alarms.lock();
        let before = alarms.len();
        alarms.retain(|alarm| alarm.id != id.0);
        if alarms.len() == before {
            warn!(alarm = id.0, "removing alarm that already fired");
        }
    }

    fn connect_offset_changed(&self, handler: Box<dyn Fn() + Send + Sync>) -> HandlerId {
        self.offset_changed.connect(move |_| handler())
    }

    fn disconnect_offset_changed(&self, id: HandlerId) {
        self.offset_changed.disconnect(id);
    }
}

/// Connection monitor backed by an in-memory map
pub struct DummyConnectionMonitor {
    connections: Mutex<BTreeMap<ConnectionId, ConnectionDetails>>,
    connections_changed: Signal<ConnectionsChanged>,
    details_changed: Signal<ConnectionId>,
}

impl DummyConnectionMonitor {
    /// Create a monitor with no connections
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(BTreeMap::new()),
            connections_changed: Signal::new(),
            details_changed: Signal::new(),
        }
    }

    /// Add a connection and announce it
    pub fn add_connection(&self, id: impl Into<String>, details: ConnectionDetails) {
        let id = ConnectionId::new(id);
        self.connections.lock().insert(id.clone(), details);
        self.connections_changed.emit(&ConnectionsChanged {
            added: vec![id],
            removed: Vec::new(),
        });
    }

    /// Remove a connection and announce it
    pub fn remove_connection(&self, id: impl Into<String>) {
        let id = ConnectionId::new(id);
        let removed = self.connections.lock().remove(&id).is_some();
        if removed {
            self.connections_changed.emit(&ConnectionsChanged {
                added: Vec::new(),
                removed: vec![id],
            });
        }
    }

    /// Replace a connection's details and announce the change
    pub fn update_details(&self, id: impl Into<String>, details: ConnectionDetails) {
        let id = ConnectionId::new(id);
        self.connections.lock().insert(id.clone(), details);
        self.details_changed.emit(&id);
    }

    /// Number of connected signal handlers, across both signals
    pub fn handler_count(&self) -> usize {
        self.connections_changed.handler_count() + self.details_changed.handler_count()
    }
}

impl Default for DummyConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMonitor for DummyConnectionMonitor {
    fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.lock().keys().cloned().collect()
    }

    fn connection_details(&self, id: &ConnectionId) -> Option<ConnectionDetails> {
        self.connections.lock().get(id).cloned()
    }

    fn connect_connections_changed(
        &self,
        handler: Box<dyn Fn(&ConnectionsChanged) + Send + Sync>,
    ) -> HandlerId {
        self.connections_changed.connect(move |change| handler(change))
    }

    fn disconnect_connections_changed(&self, id: HandlerId) {
        self.connections_changed.disconnect(id);
    }

    fn connect_connection_details_changed(
        &self,
        handler: Box<dyn Fn(&ConnectionId) + Send + Sync>,
    ) -> HandlerId {
        self.details_changed.connect(move |id| handler(id))
    }

    fn disconnect_connection_details_changed(&self, id: HandlerId) {
        self.details_changed.disconnect(id);
    }
}

/// Peer manager backed by a programmable credential map
pub struct DummyPeerManager {
    credentials: Mutex<HashMap<String, String>>,
    peer_vanished: Signal<String>,
}

impl DummyPeerManager {
    /// Create a manager that knows no peers
    pub fn new() -> Self {
        Self {
            credentials: Mutex::new(HashMap::new()),
            peer_vanished: Signal::new(),
        }
    }

    /// Pre-load the credential for a peer
    pub fn set_credentials(&self, peer_id: impl Into<String>, credentials: impl Into<String>) {
        self.credentials
            .lock()
            .insert(peer_id.into(), credentials.into());
    }

    /// Forget a peer and announce its disappearance
    pub fn vanish_peer(&self, peer_id: &str) {
        self.credentials.lock().remove(peer_id);
        self.peer_vanished.emit(&peer_id.to_string());
    }
}

impl Default for DummyPeerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerManager for DummyPeerManager {
    async fn ensure_peer_credentials(&self, peer_id: &str) -> SchedulerResult<String> {
        self.credentials
            .lock()
            .get(peer_id)
            .cloned()
            .ok_or_else(|| SchedulerError::identifying_peer(peer_id, "unknown peer"))
    }

    fn peer_credentials(&self, peer_id: &str) -> Option<String> {
        self.credentials.lock().get(peer_id).cloned()
    }

    fn connect_peer_vanished(&self, handler: Box<dyn Fn(&str) + Send + Sync>) -> HandlerId {
        self.peer_vanished.connect(move |peer| handler(peer))
    }

    fn disconnect_peer_vanished(&self, id: HandlerId) {
        self.peer_vanished.disconnect(id);
    }
}
