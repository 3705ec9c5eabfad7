// src/platform/mod.rs
//
// Backend seams for the presentation pipeline.

//! Backend traits: mode-setting, buffer allocation and rendering context.
//!
//! The session and its presentation loop only talk to these traits. The
//! real implementation lives in [`kms`]; tests drive the same loop through a
//! recording mock.
//!
//! ## Acquisition order
//! 1. [`Backend::open_mode_setting`] opens the controller device and picks an output.
//! 2. [`Backend::create_allocator`] builds the off-screen drawable sized to the mode.
//! 3. [`Backend::create_renderer`] wraps the drawable in a current rendering context.
//!
//! Teardown is the exact reverse, and each value releases its own native
//! resources on drop.

pub mod kms;
#[cfg(test)]
pub(crate) mod mock;

use crate::error::Result;
use crate::instance::SessionSlot;

use drm::buffer::DrmFourcc;
use std::fmt;
use std::path::PathBuf;

/// A display timing mode, reduced to what the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    /// Vertical refresh in Hz, 0 when the driver does not say.
    pub refresh_hz: u32,
    pub name: String,
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}Hz", self.width, self.height, self.refresh_hz)
    }
}

/// The output chosen by the mode-setting manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
    pub device_path: PathBuf,
    pub connector_id: u32,
    pub encoder_id: u32,
    pub crtc_id: u32,
    pub mode: DisplayMode,
}

/// Controller-side framebuffer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub u32);

impl fmt::Display for FramebufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fb#{}", self.0)
    }
}

/// What the controller needs to know to scan a buffer out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: DrmFourcc,
    /// Kernel buffer-object handle.
    pub handle: u32,
    /// Bytes per row.
    pub stride: u32,
}

/// Display-controller side of the pipeline.
pub trait ModeSetting {
    fn output(&self) -> &OutputInfo;

    /// Registers `buffer` with the controller.
    fn add_framebuffer(&mut self, buffer: &BufferDescriptor) -> Result<FramebufferId>;

    fn remove_framebuffer(&mut self, fb: FramebufferId) -> Result<()>;

    /// Blocking mode-set that makes `fb` the active scanout buffer.
    fn set_crtc(&mut self, fb: FramebufferId) -> Result<()>;

    /// Queues a flip to `fb` at the next vertical blank. Completion is
    /// reported through [`ModeSetting::wait_for_flip`].
    fn page_flip(&mut self, fb: FramebufferId) -> Result<()>;

    /// Blocks until the kernel reports a completed page flip.
    fn wait_for_flip(&mut self) -> Result<()>;

    /// Reapplies the controller configuration saved when the device was opened.
    fn restore_original(&mut self) -> Result<()>;
}

/// A buffer handed out by the allocator.
pub trait ScanoutBuffer {
    fn descriptor(&self) -> BufferDescriptor;
}

/// Off-screen drawable and the pool of buffers behind it.
pub trait BufferAllocator {
    type Buffer: ScanoutBuffer;

    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Takes the most recently swapped buffer out of the pool.
    ///
    /// `None` when the rendering side has not completed a buffer.
    fn lock_front_buffer(&mut self) -> Option<Self::Buffer>;

    /// Gives a buffer back to the pool.
    fn release_buffer(&mut self, buffer: Self::Buffer);
}

/// Hardware rendering context, current on the calling thread.
pub trait RenderingContext {
    /// Blocks until every issued rendering command has completed.
    fn finish(&self) -> Result<()>;

    /// Publishes the back buffer to the allocator.
    fn swap_buffers(&mut self) -> Result<()>;
}

/// Factory for the three subsystems, in acquisition order.
pub trait Backend {
    type ModeSetting: ModeSetting;
    type Allocator: BufferAllocator;
    type Renderer: RenderingContext;

    /// Slot guarding the one live session allowed for this backend.
    fn session_slot(&self) -> SessionSlot;

    fn open_mode_setting(&mut self) -> Result<Self::ModeSetting>;

    fn create_allocator(
        &mut self,
        mode_setting: &Self::ModeSetting,
        mode: &DisplayMode,
    ) -> Result<Self::Allocator>;

    fn create_renderer(&mut self, allocator: &Self::Allocator) -> Result<Self::Renderer>;
}
