//! Wall-clock abstraction with named one-shot alarms
//!
//! The scheduler never reads the host clock directly; it goes through the
//! [`Clock`] trait so tests can drive time programmatically (see
//! [`DummyClock`](crate::testing::DummyClock)). Alarms are one-shot: the
//! callback is dropped after firing or removal. An alarm whose trigger is
//! already past fires on the next dispatch tick rather than synchronously,
//! so callers never re-enter themselves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use tracing::warn;

use crate::signal::{HandlerId, Signal};

/// Identifier for a pending alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmId(pub(crate) u64);

/// One-shot alarm callback
pub type AlarmCallback = Box<dyn FnOnce() + Send + 'static>;

/// Time source and alarm registry
pub trait Clock: Send + Sync {
    /// The current instant, expressed in the clock's local time zone
    fn now(&self) -> DateTime<Tz>;

    /// The clock's local time zone
    fn timezone(&self) -> Tz;

    /// Register a one-shot alarm. If `when` is already past, the callback
    /// fires on the next dispatch tick, never synchronously.
    fn add_alarm(&self, when: DateTime<Utc>, callback: AlarmCallback) -> AlarmId;

    /// Drop a pending alarm. Safe before the callback has fired; removing
    /// an already-fired alarm logs a warning.
    fn remove_alarm(&self, id: AlarmId);

    /// Subscribe to local-time offset changes (time zone or DST rule
    /// updates on the host)
    fn connect_offset_changed(&self, handler: Box<dyn Fn() + Send + Sync>) -> HandlerId;

    /// Unsubscribe an offset-change handler
    fn disconnect_offset_changed(&self, id: HandlerId);
}

/// Host-backed clock driving alarms off the tokio timer
pub struct SystemClock {
    tz: Mutex<Tz>,
    alarms: Arc<Mutex<HashMap<u64, tokio::task::JoinHandle<()>>>>,
    next_id: AtomicU64,
    offset_changed: Signal<()>,
}

impl SystemClock {
    /// Create a clock in the zone named by the `TZ` environment variable,
    /// falling back to UTC
    pub fn new() -> Self {
        let tz = std::env::var("TZ")
            .ok()
            .and_then(|name| name.parse::<Tz>().ok())
            .unwrap_or(Tz::UTC);
        Self::with_timezone(tz)
    }

    /// Create a clock pinned to a specific zone
    pub fn with_timezone(tz: Tz) -> Self {
        Self {
            tz: Mutex::new(tz),
            alarms: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            offset_changed: Signal::new(),
        }
    }

    /// Change the local zone, notifying offset-change subscribers
    pub fn set_timezone(&self, tz: Tz) {
        *self.tz.lock() = tz;
        self.offset_changed.emit(&());
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&*self.tz.lock())
    }

    fn timezone(&self) -> Tz {
        *self.tz.lock()
    }

    fn add_alarm(&self, when: DateTime<Utc>, callback: AlarmCallback) -> AlarmId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let delay = (when - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);

        let alarms = Arc::clone(&self.alarms);
        let handle = tokio::spawn(async move {
            // A zero delay still suspends once, keeping firing off the
            // registering call stack.
            tokio::time::sleep(delay).await;
            alarms.lock().remove(&id);
            callback();
        });
        self.alarms.lock().insert(id, handle);
        AlarmId(id)
    }

    fn remove_alarm(&self, id: AlarmId) {
        match self.alarms.lock().remove(&id.0) {
            Some(handle) => handle.abort(),
            None => warn!(alarm = id.0, "removing alarm that already fired"),
        }
    }

    fn connect_offset_changed(&self, handler: Box<dyn Fn() + Send + Sync>) -> HandlerId {
        self.offset_changed.connect(move |_| handler())
    }

    fn disconnect_offset_changed(&self, id: HandlerId) {
        self.offset_changed.disconnect(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_system_clock_alarm_fires() {
        let clock = SystemClock::with_timezone(Tz::UTC);
        let (tx, rx) = tokio::sync::oneshot::channel();
        clock.add_alarm(
            Utc::now() - chrono::Duration::seconds(1),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        tokio::time::timeout(std::time::Duration::from_secs(1), rx)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_system_clock_alarm_removal() {
        let clock = SystemClock::with_timezone(Tz::UTC);
        let fired = Arc::new(Mutex::new(false));
        let fired_clone = Arc::clone(&fired);
        let id = clock.add_alarm(
            Utc::now() + chrono::Duration::seconds(30),
            Box::new(move || *fired_clone.lock() = true),
        );
        clock.remove_alarm(id);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!*fired.lock());
    }

    #[test]
    fn test_offset_change_notifies() {
        let clock = SystemClock::with_timezone(Tz::UTC);
        let seen = Arc::new(Mutex::new(0));
        let seen_clone = Arc::clone(&seen);
        clock.connect_offset_changed(Box::new(move || *seen_clone.lock() += 1));
        clock.set_timezone("Europe/London".parse().unwrap());
        assert_eq!(*seen.lock(), 1);
        assert_eq!(clock.timezone(), "Europe/London".parse().unwrap());
    }
}
