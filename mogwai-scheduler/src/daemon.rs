//! Daemon service shell
//!
//! [`ScheduleService`] wraps a [`Scheduler`] with the activatable-process
//! behavior of the daemon: clients may place holds to keep the process
//! alive, and once no entries are pending, no holds are outstanding and
//! the inactivity timeout has elapsed, [`run`](ScheduleService::run)
//! returns so the process can exit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::scheduler::Scheduler;
use crate::signal::HandlerId;

/// Activatable wrapper around the scheduler engine
pub struct ScheduleService {
    scheduler: Scheduler,
    holds: AtomicUsize,
    activity: Arc<Notify>,
    inactivity_timeout: Duration,
    entries_handler: Mutex<Option<HandlerId>>,
}

impl ScheduleService {
    /// Wrap a scheduler. A zero `inactivity_timeout` disables the timeout
    /// entirely; [`run`](ScheduleService::run) then never returns on its
    /// own.
    pub fn new(scheduler: Scheduler, inactivity_timeout: Duration) -> Arc<Self> {
        let activity = Arc::new(Notify::new());
        let notify = Arc::clone(&activity);
        let handler = scheduler.connect_entries_changed(move |_| notify.notify_waiters());

        Arc::new(Self {
            scheduler,
            holds: AtomicUsize::new(0),
            activity,
            inactivity_timeout,
            entries_handler: Mutex::new(Some(handler)),
        })
    }

    /// The wrapped scheduler
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Keep the daemon alive until a matching [`release`](ScheduleService::release)
    pub fn hold(&self) {
        let holds = self.holds.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(holds, "hold placed");
        self.activity.notify_waiters();
    }

    /// Drop one hold
    pub fn release(&self) {
        let released = self
            .holds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |holds| {
                holds.checked_sub(1)
            });
        match released {
            Ok(holds) => debug!(holds = holds - 1, "hold released"),
            Err(_) => warn!("release without matching hold"),
        }
        self.activity.notify_waiters();
    }

    /// Number of outstanding holds
    pub fn hold_count(&self) -> usize {
        self.holds.load(Ordering::SeqCst)
    }

    fn is_idle(&self) -> bool {
        self.hold_count() == 0 && self.scheduler.entry_count() == 0
    }

    /// Block until the service has been idle for the inactivity timeout
    pub async fn run(&self) {
        if self.inactivity_timeout.is_zero() {
            info!("inactivity timeout disabled; running until terminated");
            std::future::pending::<()>().await;
        }

        loop {
            if !self.is_idle() {
                self.activity.notified().await;
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.inactivity_timeout) => {
                    if self.is_idle() {
                        info!(
                            timeout_secs = self.inactivity_timeout.as_secs(),
                            "idle past the inactivity timeout; exiting"
                        );
                        return;
                    }
                }
                _ = self.activity.notified() => {}
            }
        }
    }

    /// Tear down: stop watching the scheduler and close it
    pub fn close(&self) {
        if let Some(handler) = self.entries_handler.lock().take() {
            self.scheduler.disconnect_entries_changed(handler);
        }
        self.scheduler.close();
    }
}
