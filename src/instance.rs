// src/instance.rs

//! One-live-instance discipline for process-wide sessions.
//!
//! A slot is a shared flag. Acquiring it flips the flag, dropping the guard
//! clears it again. The device session and the input session each own a
//! process-wide slot; test backends hand out private slots so that tests
//! running in parallel do not trip over each other.

use log::trace;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type SessionSlot = Arc<AtomicBool>;

/// Slot shared by every device session backed by real hardware.
pub static DEVICE_SESSION_SLOT: Lazy<SessionSlot> = Lazy::new(new_slot);

/// Slot shared by every input session reading real input devices.
pub static INPUT_SESSION_SLOT: Lazy<SessionSlot> = Lazy::new(new_slot);

pub fn new_slot() -> SessionSlot {
    Arc::new(AtomicBool::new(false))
}

/// Proof that the holder owns a slot. Released on drop.
#[derive(Debug)]
pub struct InstanceGuard {
    slot: SessionSlot,
}

impl InstanceGuard {
    /// Claims `slot`, or returns `None` if another guard already holds it.
    pub fn acquire(slot: &SessionSlot) -> Option<Self> {
        slot.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| {
                trace!("InstanceGuard: slot {:p} claimed", Arc::as_ptr(slot));
                Self { slot: slot.clone() }
            })
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.slot.store(false, Ordering::Release);
        trace!("InstanceGuard: slot {:p} released", Arc::as_ptr(&self.slot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_first_guard_is_alive() {
        let slot = new_slot();
        let first = InstanceGuard::acquire(&slot);
        assert!(first.is_some());
        assert!(InstanceGuard::acquire(&slot).is_none());
    }

    #[test]
    fn dropping_the_guard_frees_the_slot() {
        let slot = new_slot();
        drop(InstanceGuard::acquire(&slot).unwrap());
        assert!(!slot.load(Ordering::Acquire));
        assert!(InstanceGuard::acquire(&slot).is_some());
    }

    #[test]
    fn independent_slots_do_not_interfere() {
        let a = new_slot();
        let b = new_slot();
        let _ga = InstanceGuard::acquire(&a).unwrap();
        assert!(InstanceGuard::acquire(&b).is_some());
    }
}
