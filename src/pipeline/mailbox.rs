use std::sync::{Mutex, MutexGuard};

/// Values that carry the capture sequence number of the frame they came from.
pub trait Sequenced {
    fn seq(&self) -> u64;
}

/// Single-slot hand-off between the inference worker and the frame loop.
///
/// `put` replaces whatever is in the slot, `take` empties it; both happen
/// under one lock so a reader only ever sees a complete value. Results from
/// frames that are not newer than the last one taken are discarded.
#[derive(Debug)]
pub struct Mailbox<T> {
    inner: Mutex<Slot<T>>,
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    last_taken: Option<u64>,
}

impl<T: Sequenced> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Slot {
                value: None,
                last_taken: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        // A panicked writer cannot leave a half-written Option behind.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores `value`, returning whatever it displaced. A value older than
    /// the one currently held or already consumed is rejected and returned.
    pub fn put(&self, value: T) -> Option<T> {
        let mut slot = self.lock();
        let seq = value.seq();
        if slot.last_taken.is_some_and(|taken| seq <= taken) {
            return Some(value);
        }
        if slot.value.as_ref().is_some_and(|held| seq < held.seq()) {
            return Some(value);
        }
        slot.value.replace(value)
    }

    /// Removes and returns the newest value, if it is newer than the last
    /// value taken.
    pub fn take(&self) -> Option<T> {
        let mut slot = self.lock();
        let value = slot.value.take()?;
        if slot.last_taken.is_some_and(|taken| value.seq() <= taken) {
            return None;
        }
        slot.last_taken = Some(value.seq());
        Some(value)
    }

    pub fn last_taken(&self) -> Option<u64> {
        self.lock().last_taken
    }
}

impl<T: Sequenced> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
