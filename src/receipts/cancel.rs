use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::tracking::types::MessageCoordinate;

#[derive(Default)]
struct Flag {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable cancellation flag observed at retry boundaries.
#[derive(Clone, Default)]
pub struct Cancellation {
    inner: Arc<Flag>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel is not missed.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Units of work currently running, keyed by the user's upload message.
#[derive(Clone, Default)]
pub struct InFlight {
    units: Arc<Mutex<HashMap<MessageCoordinate, Cancellation>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit. The returned guard unregisters it when dropped.
    pub fn register(&self, source: MessageCoordinate) -> InFlightGuard {
        let cancel = Cancellation::new();
        self.lock().insert(source, cancel.clone());
        InFlightGuard {
            registry: self.clone(),
            source,
            cancel,
        }
    }

    /// Cancel the unit started by `source`. Returns false if none is running.
    pub fn cancel(&self, source: &MessageCoordinate) -> bool {
        match self.lock().get(source) {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<MessageCoordinate, Cancellation>> {
        self.units.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct InFlightGuard {
    registry: InFlight,
    source: MessageCoordinate,
    cancel: Cancellation,
}

impl InFlightGuard {
    pub fn cancellation(&self) -> &Cancellation {
        &self.cancel
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.source);
    }
}
