//! Publish/subscribe for active-settings changes.
//!
//! The registry is owned by the [`crate::Database`]. Subscribing returns a
//! [`SettingsSubscription`]; dropping it unregisters the listener.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use crate::models::Settings;

type Listener = Arc<dyn Fn(&Settings) + Send + Sync>;

#[derive(Default)]
struct Inner {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
}

/// Process-wide list of "active settings changed" listeners.
#[derive(Clone, Default)]
pub struct SettingsObservers {
    inner: Arc<Mutex<Inner>>,
}

impl SettingsObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> SettingsSubscription
    where
        F: Fn(&Settings) + Send + Sync + 'static,
    {
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let id = inner.next_id;
        inner.listeners.push((id, Arc::new(listener)));
        SettingsSubscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener with `settings`. A panicking listener is logged
    /// and skipped; the rest still run.
    pub fn notify(&self, settings: &Settings) {
        // Snapshot so listeners may (un)subscribe without deadlocking.
        let listeners: Vec<Listener> = lock(&self.inner)
            .listeners
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        debug!(listeners = listeners.len(), settings_id = %settings.id, "active settings changed");
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(settings))).is_err() {
                warn!(settings_id = %settings.id, "settings listener panicked");
            }
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> std::sync::MutexGuard<'_, Inner> {
    // A poisoned registry is still a valid list of listeners.
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

/// Handle for a registered listener.
#[must_use = "dropping the subscription unregisters the listener"]
pub struct SettingsSubscription {
    id: u64,
    registry: Weak<Mutex<Inner>>,
}

impl SettingsSubscription {
    pub fn unsubscribe(self) {}
}

impl Drop for SettingsSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            lock(&inner).listeners.retain(|(id, _)| *id != self.id);
        }
    }
}
