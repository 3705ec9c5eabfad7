// src/input/mod.rs

//! Input collaborator for the presentation loop.
//!
//! The loop only sees [`InputSource::poll`], called once per frame before
//! drawing. Key and pointer events read during that call are handed to an
//! [`InputHandler`] synchronously; the handler decides whether to quit.

pub mod evdev;

pub use evdev::EvdevInput;

use bitflags::bitflags;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("neither keyboard nor mouse input was requested")]
    NoDevicesRequested,

    #[error("an input session is already open in this process")]
    AlreadyOpen,

    #[error("failed to open mouse device {}: {source}", path.display())]
    MouseUnavailable { path: PathBuf, source: io::Error },

    #[error("no keyboard matching {hint:?} among {searched} event devices")]
    KeyboardNotFound { hint: String, searched: usize },

    #[error("failed to read input device {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
}

/// Non-blocking source of the per-frame quit decision.
pub trait InputSource {
    /// Drains pending events and reports whether quitting was requested.
    fn poll(&mut self) -> Result<bool, InputError>;
}

/// Receives the events read during a poll.
pub trait InputHandler {
    /// Called after a poll changed the key-state table. Returns true to quit.
    fn on_keys(&mut self, keys: &KeyState) -> bool;

    fn on_pointer(&mut self, _motion: PointerMotion) {}
}

impl<F> InputHandler for F
where
    F: FnMut(&KeyState) -> bool,
{
    fn on_keys(&mut self, keys: &KeyState) -> bool {
        self(keys)
    }
}

/// Linux input key code (`linux/input-event-codes.h`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyCode(pub u16);

impl KeyCode {
    pub const ESC: KeyCode = KeyCode(1);
    pub const Q: KeyCode = KeyCode(16);
    pub const ENTER: KeyCode = KeyCode(28);
    pub const SPACE: KeyCode = KeyCode(57);
    pub const UP: KeyCode = KeyCode(103);
    pub const LEFT: KeyCode = KeyCode(105);
    pub const RIGHT: KeyCode = KeyCode(106);
    pub const DOWN: KeyCode = KeyCode(108);
}

pub const EV_KEY: u16 = 0x01;
pub const KEY_CNT: usize = 0x300;

/// Pressed state of every key code.
#[derive(Debug, Clone)]
pub struct KeyState {
    pressed: Vec<bool>,
}

impl Default for KeyState {
    fn default() -> Self {
        Self {
            pressed: vec![false; KEY_CNT],
        }
    }
}

impl KeyState {
    pub fn is_pressed(&self, key: KeyCode) -> bool {
        self.pressed.get(key.0 as usize).copied().unwrap_or(false)
    }

    pub fn any_pressed(&self, keys: &[KeyCode]) -> bool {
        keys.iter().any(|&k| self.is_pressed(k))
    }

    /// Applies one evdev record. Returns true if it was a key event in range.
    ///
    /// A value of 0 is a release; 1 (press) and 2 (autorepeat) hold the key.
    pub fn apply(&mut self, kind: u16, code: u16, value: i32) -> bool {
        if kind != EV_KEY {
            return false;
        }
        match self.pressed.get_mut(code as usize) {
            Some(slot) => {
                *slot = value != 0;
                true
            }
            None => false,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MouseButtons: u8 {
        const LEFT = 1 << 0;
        const RIGHT = 1 << 1;
        const MIDDLE = 1 << 2;
    }
}

/// One PS/2 mouse packet: buttons held and relative motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerMotion {
    pub buttons: MouseButtons,
    pub dx: i32,
    /// Positive is up, as the device reports it.
    pub dy: i32,
}

impl PointerMotion {
    pub const PACKET_LEN: usize = 3;

    pub fn from_packet(packet: [u8; 3]) -> Self {
        Self {
            buttons: MouseButtons::from_bits_truncate(packet[0]),
            dx: i32::from(packet[1] as i8),
            dy: i32::from(packet[2] as i8),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_events_update_the_table() {
        let mut keys = KeyState::default();
        assert!(keys.apply(EV_KEY, KeyCode::ESC.0, 1));
        assert!(keys.is_pressed(KeyCode::ESC));
        assert!(keys.apply(EV_KEY, KeyCode::ESC.0, 2));
        assert!(keys.is_pressed(KeyCode::ESC));
        assert!(keys.apply(EV_KEY, KeyCode::ESC.0, 0));
        assert!(!keys.is_pressed(KeyCode::ESC));
    }

    #[test]
    fn non_key_and_out_of_range_events_are_ignored() {
        let mut keys = KeyState::default();
        assert!(!keys.apply(0x02, 0, 5)); // EV_REL
        assert!(!keys.apply(EV_KEY, KEY_CNT as u16, 1));
        assert!(!keys.is_pressed(KeyCode(KEY_CNT as u16)));
        assert!(!keys.any_pressed(&[KeyCode::ESC, KeyCode::Q]));
    }

    #[test]
    fn mouse_packets_decode_signed_deltas() {
        let motion = PointerMotion::from_packet([0b0000_1001, 5, 0xFB]);
        assert_eq!(motion.buttons, MouseButtons::LEFT);
        assert_eq!(motion.dx, 5);
        assert_eq!(motion.dy, -5);

        let motion = PointerMotion::from_packet([0b0000_1110, 0x80, 0x7F]);
        assert_eq!(motion.buttons, MouseButtons::RIGHT | MouseButtons::MIDDLE);
        assert_eq!(motion.dx, -128);
        assert_eq!(motion.dy, 127);
    }

    #[test]
    fn closures_are_handlers() {
        let mut handler = |keys: &KeyState| keys.is_pressed(KeyCode::Q);
        let mut keys = KeyState::default();
        assert!(!handler.on_keys(&keys));
        keys.apply(EV_KEY, KeyCode::Q.0, 1);
        assert!(handler.on_keys(&keys));
    }
}
