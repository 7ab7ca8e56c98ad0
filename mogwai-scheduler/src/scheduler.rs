//! Scheduler engine
//!
//! The [`Scheduler`] owns the set of pending entries and decides, on every
//! relevant change, which of them may proceed. A reschedule snapshots the
//! active connections, drops entries whose connections are unsafe,
//! ranks the rest (peer priority, then per-entry priority, then id) and
//! admits the top slice up to the active cap. Tariff transitions arm a
//! wall-clock alarm so the next reschedule happens exactly when policy
//! changes.
//!
//! The engine assumes single-threaded cooperative dispatch: collaborator
//! signals, alarm callbacks and public calls all run on one event loop,
//! and `reschedule` asserts it is never re-entered.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::clock::{AlarmId, Clock};
use crate::connection::{ConnectionDetails, ConnectionMonitor};
use crate::entry::{EntryId, ScheduleEntry};
use crate::error::{SchedulerError, SchedulerResult};
use crate::peer::PeerManager;
use crate::signal::{HandlerId, Signal};

/// Default cap on the total number of entries
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

/// Default cap on simultaneously active entries
pub const DEFAULT_MAX_ACTIVE_ENTRIES: usize = 1;

/// Construction-time scheduler settings
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Cap on the total number of entries
    pub max_entries: usize,
    /// Cap on simultaneously active entries
    pub max_active_entries: usize,
    /// Peer credentials ranked above all others (the OS updater and the
    /// app installer by default)
    pub privileged_peer_credentials: Vec<String>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_active_entries: DEFAULT_MAX_ACTIVE_ENTRIES,
            privileged_peer_credentials: vec![
                "/usr/libexec/eos-updater".to_string(),
                "/usr/bin/gnome-software".to_string(),
            ],
        }
    }
}

/// Delta payload of the entries-changed signal; never contains no-ops
#[derive(Debug, Clone, Default)]
pub struct EntriesChanged {
    /// Entries that were added
    pub added: Vec<ScheduleEntry>,
    /// Entries that were removed
    pub removed: Vec<ScheduleEntry>,
}

/// Delta payload of the active-entries-changed signal
#[derive(Debug, Clone, Default)]
pub struct ActiveEntriesChanged {
    /// Entries that became active
    pub added: Vec<ScheduleEntry>,
    /// Entries that are no longer active
    pub removed: Vec<ScheduleEntry>,
}

/// Cached per-entry decision from the last reschedule
#[derive(Debug, Clone, Copy, Default)]
struct EntryData {
    is_active: bool,
}

#[derive(Debug, Default)]
struct Subscriptions {
    connections_changed: Option<HandlerId>,
    details_changed: Option<HandlerId>,
    peer_vanished: Option<HandlerId>,
    offset_changed: Option<HandlerId>,
}

struct SchedulerState {
    entries: HashMap<EntryId, ScheduleEntry>,
    entries_data: HashMap<EntryId, EntryData>,
    cached_allow_downloads: bool,
    pending_alarm: Option<AlarmId>,
    subscriptions: Subscriptions,
}

struct SchedulerInner {
    clock: Arc<dyn Clock>,
    connections: Arc<dyn ConnectionMonitor>,
    peers: Arc<dyn PeerManager>,
    options: SchedulerOptions,
    state: Mutex<SchedulerState>,
    entries_changed: Signal<EntriesChanged>,
    active_entries_changed: Signal<ActiveEntriesChanged>,
    allow_downloads_changed: Signal<bool>,
    in_reschedule: AtomicBool,
    closed: AtomicBool,
}

#[derive(Default)]
struct RescheduleOutcome {
    allow_changed: Option<bool>,
    activated: Vec<ScheduleEntry>,
    deactivated: Vec<ScheduleEntry>,
}

/// Handle to the scheduler engine; cheap to clone
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler, subscribe it to its collaborators and run the
    /// initial reschedule. The returned instance is fully ready.
    pub async fn new(
        clock: Arc<dyn Clock>,
        connections: Arc<dyn ConnectionMonitor>,
        peers: Arc<dyn PeerManager>,
        options: SchedulerOptions,
    ) -> SchedulerResult<Self> {
        if options.max_entries == 0 {
            return Err(SchedulerError::InvalidParameters(
                "max_entries must be at least 1".to_string(),
            ));
        }
        if options.max_active_entries == 0 {
            return Err(SchedulerError::InvalidParameters(
                "max_active_entries must be at least 1".to_string(),
            ));
        }

        let inner = Arc::new(SchedulerInner {
            clock: Arc::clone(&clock),
            connections: Arc::clone(&connections),
            peers: Arc::clone(&peers),
            options,
            state: Mutex::new(SchedulerState {
                entries: HashMap::new(),
                entries_data: HashMap::new(),
                cached_allow_downloads: true,
                pending_alarm: None,
                subscriptions: Subscriptions::default(),
            }),
            entries_changed: Signal::new(),
            active_entries_changed: Signal::new(),
            allow_downloads_changed: Signal::new(),
            in_reschedule: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        let connections_changed =
            connections.connect_connections_changed(Box::new(move |change| {
                if let Some(scheduler) = Scheduler::try_from_weak(&weak) {
                    debug!(
                        added = change.added.len(),
                        removed = change.removed.len(),
                        "connections changed"
                    );
                    scheduler.reschedule();
                }
            }));

        let weak = Arc::downgrade(&inner);
        let details_changed =
            connections.connect_connection_details_changed(Box::new(move |id| {
                if let Some(scheduler) = Scheduler::try_from_weak(&weak) {
                    debug!(connection = %id, "connection details changed");
                    scheduler.reschedule();
                }
            }));

        let weak = Arc::downgrade(&inner);
        let peer_vanished = peers.connect_peer_vanished(Box::new(move |peer| {
            if let Some(scheduler) = Scheduler::try_from_weak(&weak) {
                debug!(peer = %peer, "peer vanished; retracting its entries");
                scheduler.remove_entries_for_owner(peer);
            }
        }));

        let weak = Arc::downgrade(&inner);
        let offset_changed = clock.connect_offset_changed(Box::new(move || {
            if let Some(scheduler) = Scheduler::try_from_weak(&weak) {
                debug!("local time offset changed");
                scheduler.reschedule();
            }
        }));

        inner.state.lock().subscriptions = Subscriptions {
            connections_changed: Some(connections_changed),
            details_changed: Some(details_changed),
            peer_vanished: Some(peer_vanished),
            offset_changed: Some(offset_changed),
        };

        let scheduler = Scheduler { inner };
        scheduler.reschedule();
        Ok(scheduler)
    }

    fn try_from_weak(weak: &Weak<SchedulerInner>) -> Option<Scheduler> {
        let inner = weak.upgrade()?;
        if inner.closed.load(Ordering::SeqCst) {
            return None;
        }
        Some(Scheduler { inner })
    }

    /// Tear down: unsubscribe from all collaborators and cancel any armed
    /// alarm. Idempotent; the scheduler is inert afterwards.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.inner.state.lock();
        if let Some(alarm) = state.pending_alarm.take() {
            self.inner.clock.remove_alarm(alarm);
        }
        let subscriptions = std::mem::take(&mut state.subscriptions);
        drop(state);

        if let Some(id) = subscriptions.connections_changed {
            self.inner.connections.disconnect_connections_changed(id);
        }
        if let Some(id) = subscriptions.details_changed {
            self.inner
                .connections
                .disconnect_connection_details_changed(id);
        }
        if let Some(id) = subscriptions.peer_vanished {
            self.inner.peers.disconnect_peer_vanished(id);
        }
        if let Some(id) = subscriptions.offset_changed {
            self.inner.clock.disconnect_offset_changed(id);
        }
    }

    /// Atomically add and remove entries.
    ///
    /// Removals of absent ids and additions of already-present ids are
    /// silent. If the final entry count would exceed the cap, the whole
    /// batch is rejected with [`SchedulerError::Full`] and nothing
    /// changes. Otherwise emits entries-changed with the effective delta,
    /// retracts any removed active entries, and reschedules.
    pub fn update_entries(
        &self,
        added: Vec<ScheduleEntry>,
        removed: &[EntryId],
    ) -> SchedulerResult<()> {
        let (added_entries, removed_entries, evicted) = {
            let mut state = self.inner.state.lock();

            let mut to_remove: Vec<EntryId> = Vec::new();
            for id in removed {
                if state.entries.contains_key(id) && !to_remove.contains(id) {
                    to_remove.push(id.clone());
                }
            }
            let mut to_add: Vec<ScheduleEntry> = Vec::new();
            for entry in added {
                let still_present =
                    state.entries.contains_key(&entry.id) && !to_remove.contains(&entry.id);
                let duplicate = to_add.iter().any(|queued| queued.id == entry.id);
                if !still_present && !duplicate {
                    to_add.push(entry);
                }
            }

            let final_count = state.entries.len() - to_remove.len() + to_add.len();
            if final_count > self.inner.options.max_entries {
                return Err(SchedulerError::Full {
                    max: self.inner.options.max_entries,
                });
            }

            let mut removed_entries = Vec::new();
            let mut evicted = Vec::new();
            for id in &to_remove {
                if let Some(entry) = state.entries.remove(id) {
                    if let Some(data) = state.entries_data.remove(id) {
                        if data.is_active {
                            evicted.push(entry.clone());
                        }
                    }
                    removed_entries.push(entry);
                }
            }
            for entry in &to_add {
                state.entries.insert(entry.id.clone(), entry.clone());
                state
                    .entries_data
                    .insert(entry.id.clone(), EntryData::default());
            }
            debug_assert_eq!(state.entries.len(), state.entries_data.len());

            (to_add, removed_entries, evicted)
        };

        if !added_entries.is_empty() || !removed_entries.is_empty() {
            debug!(
                added = added_entries.len(),
                removed = removed_entries.len(),
                "entries changed"
            );
            self.inner.entries_changed.emit(&EntriesChanged {
                added: added_entries,
                removed: removed_entries,
            });
        }
        if !evicted.is_empty() {
            self.inner
                .active_entries_changed
                .emit(&ActiveEntriesChanged {
                    added: Vec::new(),
                    removed: evicted,
                });
        }

        self.reschedule();
        Ok(())
    }

    /// Retract every entry owned by `owner`
    pub fn remove_entries_for_owner(&self, owner: &str) {
        let ids: Vec<EntryId> = {
            let state = self.inner.state.lock();
            state
                .entries
                .values()
                .filter(|entry| entry.owner == owner)
                .map(|entry| entry.id.clone())
                .collect()
        };
        if ids.is_empty() {
            return;
        }
        if let Err(err) = self.update_entries(Vec::new(), &ids) {
            warn!(owner, error = %err, "failed to retract entries for owner");
        }
    }

    /// Look up one entry by id
    pub fn get_entry(&self, id: &EntryId) -> Option<ScheduleEntry> {
        self.inner.state.lock().entries.get(id).cloned()
    }

    /// Snapshot of all entries, in unspecified order
    pub fn get_entries(&self) -> Vec<ScheduleEntry> {
        self.inner.state.lock().entries.values().cloned().collect()
    }

    /// Whether the entry is currently permitted to proceed
    pub fn is_entry_active(&self, id: &EntryId) -> bool {
        self.inner
            .state
            .lock()
            .entries_data
            .get(id)
            .map(|data| data.is_active)
            .unwrap_or(false)
    }

    /// Number of registered entries
    pub fn entry_count(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Number of currently active entries
    pub fn active_entry_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .entries_data
            .values()
            .filter(|data| data.is_active)
            .count()
    }

    /// Cached conjunction of `allow_downloads` over all connections
    pub fn allow_downloads(&self) -> bool {
        self.inner.state.lock().cached_allow_downloads
    }

    /// Subscribe to the entry-set delta signal
    pub fn connect_entries_changed(
        &self,
        handler: impl Fn(&EntriesChanged) + Send + Sync + 'static,
    ) -> HandlerId {
        self.inner.entries_changed.connect(handler)
    }

    /// Unsubscribe an entries-changed handler
    pub fn disconnect_entries_changed(&self, id: HandlerId) {
        self.inner.entries_changed.disconnect(id);
    }

    /// Subscribe to the active-set delta signal
    pub fn connect_active_entries_changed(
        &self,
        handler: impl Fn(&ActiveEntriesChanged) + Send + Sync + 'static,
    ) -> HandlerId {
        self.inner.active_entries_changed.connect(handler)
    }

    /// Unsubscribe an active-entries-changed handler
    pub fn disconnect_active_entries_changed(&self, id: HandlerId) {
        self.inner.active_entries_changed.disconnect(id);
    }

    /// Subscribe to changes of the cached `allow_downloads` value
    pub fn connect_allow_downloads_changed(
        &self,
        handler: impl Fn(&bool) + Send + Sync + 'static,
    ) -> HandlerId {
        self.inner.allow_downloads_changed.connect(handler)
    }

    /// Unsubscribe an allow-downloads handler
    pub fn disconnect_allow_downloads_changed(&self, id: HandlerId) {
        self.inner.allow_downloads_changed.disconnect(id);
    }

    /// Recompute the active set.
    ///
    /// Driven by collaborator signals and the armed alarm, but safe to
    /// invoke directly; a reschedule that changes nothing emits nothing.
    pub fn reschedule(&self) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        let re_entered = self.inner.in_reschedule.swap(true, Ordering::SeqCst);
        assert!(!re_entered, "reschedule re-entered");

        let outcome = self.reschedule_locked();
        self.inner.in_reschedule.store(false, Ordering::SeqCst);

        if let Some(allow) = outcome.allow_changed {
            self.inner.allow_downloads_changed.emit(&allow);
        }
        // Drain before fill: observers see actives leave before new ones
        // arrive.
        if !outcome.deactivated.is_empty() {
            self.inner
                .active_entries_changed
                .emit(&ActiveEntriesChanged {
                    added: Vec::new(),
                    removed: outcome.deactivated,
                });
        }
        if !outcome.activated.is_empty() {
            self.inner
                .active_entries_changed
                .emit(&ActiveEntriesChanged {
                    added: outcome.activated,
                    removed: Vec::new(),
                });
        }
    }

    fn reschedule_locked(&self) -> RescheduleOutcome {
        let inner = &self.inner;
        let mut outcome = RescheduleOutcome::default();
        let mut state = inner.state.lock();

        // A fresh alarm is armed below if a tariff transition is pending.
        if let Some(alarm) = state.pending_alarm.take() {
            inner.clock.remove_alarm(alarm);
        }

        // One connection snapshot per reschedule.
        let connection_ids = inner.connections.connection_ids();
        let mut details = Vec::with_capacity(connection_ids.len());
        for id in &connection_ids {
            match inner.connections.connection_details(id) {
                Some(connection_details) => details.push(connection_details),
                None => {
                    warn!(connection = %id, "connection details unavailable; assuming defaults");
                    details.push(ConnectionDetails::default());
                }
            }
        }

        let allow_downloads = details.iter().all(|d| d.allow_downloads);
        if allow_downloads != state.cached_allow_downloads {
            state.cached_allow_downloads = allow_downloads;
            outcome.allow_changed = Some(allow_downloads);
        }

        if state.entries.is_empty() {
            return outcome;
        }

        let now = inner.clock.now().with_timezone(&Utc);
        let mut next_reschedule: Option<DateTime<Utc>> = None;

        let mut all_connections_safe = true;
        for connection_details in &details {
            if !connection_details.safe_for_downloads(now) {
                all_connections_safe = false;
            }
            if let Some(tariff) = &connection_details.tariff {
                if let Some(transition) = tariff.next_transition(now) {
                    next_reschedule = Some(match next_reschedule {
                        Some(current) => current.min(transition),
                        None => transition,
                    });
                }
            }
        }

        // Conservative multipath policy: a client may be handed any active
        // connection, so an entry is admissible only when every connection
        // is safe.
        let active_ids: HashSet<EntryId> = if all_connections_safe {
            self.select_active(&state)
        } else {
            HashSet::new()
        };

        let SchedulerState {
            entries,
            entries_data,
            ..
        } = &mut *state;
        for (id, data) in entries_data.iter_mut() {
            let should_be_active = active_ids.contains(id);
            if data.is_active == should_be_active {
                continue;
            }
            data.is_active = should_be_active;
            if let Some(entry) = entries.get(id) {
                if should_be_active {
                    outcome.activated.push(entry.clone());
                } else {
                    outcome.deactivated.push(entry.clone());
                }
            }
        }
        outcome.activated.sort_by(|a, b| a.id.cmp(&b.id));
        outcome.deactivated.sort_by(|a, b| a.id.cmp(&b.id));

        if let Some(when) = next_reschedule {
            let weak = Arc::downgrade(inner);
            let alarm = inner.clock.add_alarm(
                when,
                Box::new(move || {
                    if let Some(scheduler) = Scheduler::try_from_weak(&weak) {
                        scheduler.inner.state.lock().pending_alarm = None;
                        scheduler.reschedule();
                    }
                }),
            );
            state.pending_alarm = Some(alarm);
            debug!(at = %when, "armed reschedule alarm");
        }

        outcome
    }

    /// Rank all entries and pick the top slice.
    fn select_active(&self, state: &SchedulerState) -> HashSet<EntryId> {
        let inner = &self.inner;

        let mut peer_priorities: HashMap<String, u64> = HashMap::new();
        for entry in state.entries.values() {
            if !peer_priorities.contains_key(&entry.owner) {
                let priority =
                    peer_priority(&inner.options, inner.peers.as_ref(), &entry.owner);
                peer_priorities.insert(entry.owner.clone(), priority);
            }
        }

        let mut ranked: Vec<&ScheduleEntry> = state.entries.values().collect();
        ranked.sort_by(|a, b| {
            let a_peer = peer_priorities.get(&a.owner).copied().unwrap_or(u64::MIN);
            let b_peer = peer_priorities.get(&b.owner).copied().unwrap_or(u64::MIN);
            b_peer
                .cmp(&a_peer)
                .then_with(|| b.priority.cmp(&a.priority))
                .then_with(|| a.id.cmp(&b.id))
        });

        ranked
            .into_iter()
            .take(inner.options.max_active_entries)
            .map(|entry| entry.id.clone())
            .collect()
    }
}

/// Rank a peer: privileged credentials beat everything, an unresolved
/// credential loses to everything, and the rest hash deterministically
/// into the open interval between the extremes.
fn peer_priority(options: &SchedulerOptions, peers: &dyn PeerManager, owner: &str) -> u64 {
    let credentials = match peers.peer_credentials(owner) {
        Some(credentials) => credentials,
        None => return u64::MIN,
    };
    if options
        .privileged_peer_credentials
        .iter()
        .any(|privileged| *privileged == credentials)
    {
        return u64::MAX;
    }
    let digest = Sha256::digest(credentials.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix).clamp(u64::MIN + 1, u64::MAX - 1)
}
