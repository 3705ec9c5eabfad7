// src/input/evdev.rs

//! Keyboard and mouse input straight from the kernel input devices.
//!
//! The keyboard is the first `/dev/input/event*` node whose name contains
//! the configured hint. The mouse is the PS/2-compatible multiplexer, which
//! merges every pointer device into 3-byte packets. Both are opened
//! non-blocking, so a poll returns as soon as nothing is left to read.

use super::{InputError, InputHandler, InputSource, KeyState, PointerMotion};
use crate::config::InputConfig;
use crate::instance::{InstanceGuard, SessionSlot, INPUT_SESSION_SLOT};

use libc::STDIN_FILENO;
use log::{debug, info, trace, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::mem;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use termios::{tcsetattr, Termios, ECHO, ICANON, TCSANOW, VMIN, VTIME};

pub const INPUT_DIR: &str = "/dev/input";

const READ_CHUNK: usize = 512;
const NAME_LEN: usize = 256;

nix::ioctl_read_buf!(eviocgname, b'E', 0x06, u8);

/// An open input node with the bytes of any partial record read so far.
#[derive(Debug)]
struct InputDevice {
    path: PathBuf,
    file: File,
    pending: Vec<u8>,
}

impl InputDevice {
    fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            pending: Vec::new(),
        })
    }

    /// Reads everything available and returns the complete records.
    fn read_records(&mut self, record_len: usize) -> Result<Vec<Vec<u8>>, InputError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.file.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(InputError::Read {
                        path: self.path.clone(),
                        source,
                    })
                }
            }
        }
        let complete = self.pending.len() / record_len * record_len;
        let records = self.pending[..complete]
            .chunks_exact(record_len)
            .map(<[u8]>::to_vec)
            .collect();
        self.pending.drain(..complete);
        Ok(records)
    }
}

/// Stdin with echo and line buffering turned off, restored on drop.
#[derive(Debug)]
pub struct RawTerminal {
    original: Termios,
}

impl RawTerminal {
    /// `None` when stdin is not a terminal or its attributes cannot be set.
    pub fn enter() -> Option<Self> {
        let original = match Termios::from_fd(STDIN_FILENO) {
            Ok(t) => t,
            Err(e) => {
                debug!("RawTerminal: stdin is not a terminal ({}), leaving it alone", e);
                return None;
            }
        };
        let mut raw = original;
        raw.c_lflag &= !(ECHO | ICANON);
        raw.c_cc[VMIN] = 0;
        raw.c_cc[VTIME] = 0;
        if let Err(e) = tcsetattr(STDIN_FILENO, TCSANOW, &raw) {
            warn!("RawTerminal: failed to disable echo: {}", e);
            return None;
        }
        debug!("RawTerminal: echo and canonical input off");
        Some(Self { original })
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        if let Err(e) = tcsetattr(STDIN_FILENO, TCSANOW, &self.original) {
            warn!("RawTerminal: failed to restore terminal attributes: {}", e);
        } else {
            debug!("RawTerminal: terminal attributes restored");
        }
    }
}

/// Name the kernel reports for an evdev node.
fn device_name(file: &File) -> Option<String> {
    let mut buf = [0u8; NAME_LEN];
    let len = unsafe { eviocgname(file.as_raw_fd(), &mut buf) }.ok()?;
    let len = (len.max(0) as usize).min(NAME_LEN);
    let name = &buf[..len];
    let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    Some(String::from_utf8_lossy(&name[..end]).into_owned())
}

/// `event*` nodes in `dir`, in numeric order.
fn event_nodes(dir: &Path) -> Vec<PathBuf> {
    let mut nodes: Vec<(u32, PathBuf)> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let index = name.to_str()?.strip_prefix("event")?.parse().ok()?;
                Some((index, entry.path()))
            })
            .collect(),
        Err(e) => {
            warn!("EvdevInput: cannot list {}: {}", dir.display(), e);
            Vec::new()
        }
    };
    nodes.sort();
    nodes.into_iter().map(|(_, path)| path).collect()
}

fn find_keyboard(dir: &Path, hint: &str) -> Result<InputDevice, InputError> {
    let hint = hint.to_lowercase();
    let nodes = event_nodes(dir);
    for path in &nodes {
        let device = match InputDevice::open(path) {
            Ok(device) => device,
            Err(e) => {
                trace!("EvdevInput: skipping {}: {}", path.display(), e);
                continue;
            }
        };
        match device_name(&device.file) {
            Some(name) if name.to_lowercase().contains(&hint) => {
                info!("EvdevInput: keyboard {:?} at {}", name, path.display());
                return Ok(device);
            }
            Some(name) => trace!("EvdevInput: {} is {:?}", path.display(), name),
            None => trace!("EvdevInput: {} has no evdev name", path.display()),
        }
    }
    Err(InputError::KeyboardNotFound {
        hint,
        searched: nodes.len(),
    })
}

/// Decodes `(type, code, value)` from a raw `struct input_event`.
fn decode_event(record: &[u8]) -> (u16, u16, i32) {
    debug_assert_eq!(record.len(), mem::size_of::<libc::input_event>());
    // SAFETY: the record is exactly one input_event; read_unaligned copes
    // with the byte buffer's alignment.
    let event: libc::input_event =
        unsafe { std::ptr::read_unaligned(record.as_ptr() as *const libc::input_event) };
    (event.type_, event.code, event.value)
}

/// The process's input session: keyboard and/or mouse, plus a handler.
#[derive(Debug)]
pub struct EvdevInput<H> {
    handler: H,
    keyboard: Option<InputDevice>,
    mouse: Option<InputDevice>,
    keys: KeyState,
    terminal: Option<RawTerminal>,
    _guard: InstanceGuard,
}

impl<H: InputHandler> EvdevInput<H> {
    pub fn open(handler: H, config: &InputConfig) -> Result<Self, InputError> {
        Self::open_in(handler, config, &INPUT_SESSION_SLOT, Path::new(INPUT_DIR))
    }

    /// Opens the requested devices, searching `input_dir` for the keyboard
    /// and holding `slot` until the session is dropped.
    pub fn open_in(
        handler: H,
        config: &InputConfig,
        slot: &SessionSlot,
        input_dir: &Path,
    ) -> Result<Self, InputError> {
        if !config.keyboard && !config.mouse {
            return Err(InputError::NoDevicesRequested);
        }
        let guard = InstanceGuard::acquire(slot).ok_or(InputError::AlreadyOpen)?;

        let mouse = if config.mouse {
            let device = InputDevice::open(&config.mouse_device).map_err(|source| {
                InputError::MouseUnavailable {
                    path: config.mouse_device.clone(),
                    source,
                }
            })?;
            info!("EvdevInput: mouse at {}", config.mouse_device.display());
            Some(device)
        } else {
            None
        };

        let keyboard = if config.keyboard {
            Some(find_keyboard(input_dir, &config.keyboard_name_hint)?)
        } else {
            None
        };

        let terminal = if keyboard.is_some() && config.raw_terminal {
            RawTerminal::enter()
        } else {
            None
        };

        Ok(Self {
            handler,
            keyboard,
            mouse,
            keys: KeyState::default(),
            terminal,
            _guard: guard,
        })
    }

    pub fn keys(&self) -> &KeyState {
        &self.keys
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn has_raw_terminal(&self) -> bool {
        self.terminal.is_some()
    }
}

impl<H: InputHandler> InputSource for EvdevInput<H> {
    fn poll(&mut self) -> Result<bool, InputError> {
        let mut quit = false;

        if let Some(keyboard) = self.keyboard.as_mut() {
            let records = keyboard.read_records(mem::size_of::<libc::input_event>())?;
            let mut changed = false;
            for record in &records {
                let (kind, code, value) = decode_event(record);
                changed |= self.keys.apply(kind, code, value);
            }
            if changed {
                quit |= self.handler.on_keys(&self.keys);
            }
        }

        if let Some(mouse) = self.mouse.as_mut() {
            for record in mouse.read_records(PointerMotion::PACKET_LEN)? {
                let motion = PointerMotion::from_packet([record[0], record[1], record[2]]);
                trace!("EvdevInput: pointer {:?}", motion);
                self.handler.on_pointer(motion);
            }
        }

        Ok(quit)
    }
}
