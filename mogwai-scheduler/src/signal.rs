//! Observer lists for notifying fields
//!
//! A [`Signal`] is a small synchronous observer list. Emission snapshots
//! the handler list first, so a handler may connect or disconnect other
//! handlers without deadlocking; handlers must not synchronously call back
//! into the emitting component's mutating operations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Identifier for a connected signal handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Synchronous observer list carrying payloads of type `T`
pub struct Signal<T> {
    handlers: Mutex<Vec<(HandlerId, Handler<T>)>>,
    next_id: AtomicU64,
}

impl<T> Signal<T> {
    /// Create an empty signal
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Connect a handler; the returned id disconnects it
    pub fn connect(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().push((id, Arc::new(handler)));
        id
    }

    /// Disconnect a handler; returns false if the id was not connected
    pub fn disconnect(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Invoke every connected handler with `payload`
    pub fn emit(&self, payload: &T) {
        let snapshot: Vec<Handler<T>> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in snapshot {
            handler(payload);
        }
    }

    /// Number of connected handlers
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}
