//! Single-slot frame handoff
//!
//! The capture side must never wait on scoring, and scoring only cares about the
//! freshest frame. A [`FrameSlot`] holds at most one item: writing replaces whatever is
//! there, reading takes it or returns `None`. Neither side blocks beyond the slot lock.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct Shared<T> {
    slot: Mutex<Option<T>>,
    overwritten: AtomicU64,
}

/// Overwrite-oldest handoff holding at most one frame
pub struct FrameSlot<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for FrameSlot<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for FrameSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FrameSlot<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(None),
                overwritten: AtomicU64::new(0),
            }),
        }
    }

    /// Store `frame`, returning the unconsumed frame it displaced, if any
    pub fn replace(&self, frame: T) -> Option<T> {
        let displaced = self.shared.slot.lock().replace(frame);
        if displaced.is_some() {
            self.shared.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        displaced
    }

    /// Take the pending frame, leaving the slot empty
    pub fn take(&self) -> Option<T> {
        self.shared.slot.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.slot.lock().is_none()
    }

    /// Number of frames dropped because a newer one replaced them before they were taken
    pub fn overwritten(&self) -> u64 {
        self.shared.overwritten.load(Ordering::Relaxed)
    }
}
