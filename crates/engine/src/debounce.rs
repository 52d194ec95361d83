//! Duplicate-tap suppression
//!
//! Readers often report one physical tap several times. Each
//! `(subscriber, session, channel)` gets a slot holding the last successful
//! outcome; a repeat inside the window gets that outcome back instead of
//! toggling again.
//!
//! A caller keeps its slot locked for the whole resolution, so identical taps
//! arriving together queue up and the later ones see the first one's result.
//! Different keys never wait on each other. State is per process.

use attendance_common::db::models::CheckInMethod;
use attendance_common::metrics;
use chrono::{DateTime, Duration, FixedOffset};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Prune stale slots once the map grows past this
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DebounceKey {
    pub subscriber_id: Uuid,
    pub session_id: Uuid,
    pub channel: CheckInMethod,
}

struct Remembered<T> {
    at: DateTime<FixedOffset>,
    value: T,
}

type Slot<T> = Arc<AsyncMutex<Option<Remembered<T>>>>;

pub struct Debouncer<T> {
    window: Duration,
    slots: Arc<Mutex<HashMap<DebounceKey, Slot<T>>>>,
}

impl<T> Clone for Debouncer<T> {
    fn clone(&self) -> Self {
        Self {
            window: self.window,
            slots: self.slots.clone(),
        }
    }
}

/// Exclusive access to one key's slot
pub struct DebounceGuard<T> {
    slot: OwnedMutexGuard<Option<Remembered<T>>>,
    window: Duration,
}

impl<T: Clone> DebounceGuard<T> {
    /// Previous outcome if it is still inside the window
    pub fn recall(&self, now: DateTime<FixedOffset>) -> Option<T> {
        (*self.slot).as_ref().and_then(|last| {
            let age = now - last.at;
            (age >= Duration::zero() && age < self.window).then(|| last.value.clone())
        })
    }

    pub fn remember(&mut self, now: DateTime<FixedOffset>, value: T) {
        *self.slot = Some(Remembered { at: now, value });
    }
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Lock the slot for `key`, waiting for any resolution in flight on it
    pub async fn slot(&self, key: DebounceKey, now: DateTime<FixedOffset>) -> DebounceGuard<T> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            if slots.len() > PRUNE_THRESHOLD {
                Self::prune_locked(&mut slots, now, self.window);
            }
            slots.entry(key).or_default().clone()
        };
        DebounceGuard {
            slot: slot.lock_owned().await,
            window: self.window,
        }
    }

    /// Drop slots that are idle and outside the window; returns the count left
    pub fn prune(&self, now: DateTime<FixedOffset>) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Self::prune_locked(&mut slots, now, self.window);
        slots.len()
    }

    fn prune_locked(
        slots: &mut HashMap<DebounceKey, Slot<T>>,
        now: DateTime<FixedOffset>,
        window: Duration,
    ) {
        slots.retain(|_, slot| {
            // held or awaited by a resolver
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(last) => (*last).as_ref().is_some_and(|r| now - r.at < window),
                Err(_) => true,
            }
        });
        metrics::record_debounce_entries(slots.len());
    }
}
