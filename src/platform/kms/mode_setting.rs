// src/platform/kms/mode_setting.rs

//! Mode-setting manager over the DRM control API.
//!
//! Opens the first display-controller device that can be opened, takes the
//! first connected output and its first advertised mode, and resolves the
//! encoder and controller that drive it. The controller configuration found
//! at startup is kept so that it can be logged and, if asked, reapplied.

use crate::error::{RendererError, Result};
use crate::platform::{BufferDescriptor, DisplayMode, FramebufferId, ModeSetting, OutputInfo};

use drm::buffer::{self, DrmFourcc, DrmModifier, PlanarBuffer};
use drm::control::{
    connector, crtc, framebuffer, Device as ControlDevice, Event, FbCmd2Flags, Mode,
    PageFlipFlags, RawResourceHandle,
};
use log::{debug, info, trace, warn};
use std::fs::{File, OpenOptions};
use std::io;
use std::num::NonZeroU32;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Display-controller devices, tried in order.
pub const DEVICE_CANDIDATES: [&str; 2] = ["/dev/dri/card0", "/dev/dri/card1"];

/// An open display-controller node.
struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl drm::Device for Card {}
impl ControlDevice for Card {}

fn raw_id<H: Into<RawResourceHandle>>(handle: H) -> u32 {
    handle.into().get()
}

fn invalid_input(message: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message)
}

fn fb_handle(fb: FramebufferId) -> io::Result<framebuffer::Handle> {
    NonZeroU32::new(fb.0)
        .map(framebuffer::Handle::from)
        .ok_or_else(|| invalid_input("framebuffer id 0"))
}

/// A single-plane buffer as the controller sees it.
#[derive(Debug, Clone, Copy)]
struct ScanoutPlane {
    descriptor: BufferDescriptor,
    handle: buffer::Handle,
}

impl ScanoutPlane {
    fn new(descriptor: &BufferDescriptor) -> io::Result<Self> {
        let handle = NonZeroU32::new(descriptor.handle)
            .map(buffer::Handle::from)
            .ok_or_else(|| invalid_input("buffer object handle 0"))?;
        Ok(Self {
            descriptor: *descriptor,
            handle,
        })
    }
}

impl PlanarBuffer for ScanoutPlane {
    fn size(&self) -> (u32, u32) {
        (self.descriptor.width, self.descriptor.height)
    }

    fn format(&self) -> DrmFourcc {
        self.descriptor.format
    }

    fn modifier(&self) -> Option<DrmModifier> {
        None
    }

    fn pitches(&self) -> [u32; 4] {
        [self.descriptor.stride, 0, 0, 0]
    }

    fn handles(&self) -> [Option<buffer::Handle>; 4] {
        [Some(self.handle), None, None, None]
    }

    fn offsets(&self) -> [u32; 4] {
        [0; 4]
    }
}

/// Opens the first candidate that can be opened read-write.
pub fn open_first_available<P: AsRef<Path>>(candidates: &[P]) -> Result<(PathBuf, File)> {
    let mut tried = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let path = candidate.as_ref();
        match OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)
        {
            Ok(file) => {
                info!("Selected card: {}", path.display());
                return Ok((path.to_path_buf(), file));
            }
            Err(e) => {
                debug!("DrmModeSetting: cannot open {}: {}", path.display(), e);
                tried.push(format!("{}: {}", path.display(), e));
            }
        }
    }
    Err(RendererError::NoDeviceFound { tried })
}

/// Controller for an encoder: the active one, or else the first one the
/// encoder may drive.
pub fn pick_crtc<T: Copy>(active: Option<T>, possible: &[T]) -> Option<T> {
    active.or_else(|| possible.first().copied())
}

pub fn display_mode_from(mode: &Mode) -> DisplayMode {
    let (width, height) = mode.size();
    DisplayMode {
        width: u32::from(width),
        height: u32::from(height),
        refresh_hz: mode.vrefresh(),
        name: mode.name().to_string_lossy().into_owned(),
    }
}

pub struct DrmModeSetting {
    card: Card,
    output: OutputInfo,
    connector: connector::Handle,
    crtc: crtc::Handle,
    mode: Mode,
    saved_crtc: Option<crtc::Info>,
}

impl DrmModeSetting {
    pub fn open() -> Result<Self> {
        Self::open_candidates(&DEVICE_CANDIDATES)
    }

    pub fn open_candidates<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        let (device_path, device) = open_first_available(candidates)?;
        let card = Card(device);

        let resources = card
            .resource_handles()
            .map_err(RendererError::ResourceQueryFailed)?;
        debug!(
            "DrmModeSetting: {} connectors, {} controllers, {} encoders",
            resources.connectors().len(),
            resources.crtcs().len(),
            resources.encoders().len()
        );

        let connector = resources
            .connectors()
            .iter()
            .filter_map(|&handle| card.get_connector(handle, true).ok())
            .find(|info| info.state() == connector::State::Connected)
            .ok_or(RendererError::NoConnectedOutput)?;
        let connector_id = raw_id(connector.handle());

        let mode = *connector
            .modes()
            .first()
            .ok_or(RendererError::NoModes { connector_id })?;
        let display_mode = display_mode_from(&mode);
        info!("Selected resolution: {} ({})", display_mode, display_mode.name);

        let encoder = connector
            .current_encoder()
            .and_then(|handle| match card.get_encoder(handle) {
                Ok(info) => Some(info),
                Err(e) => {
                    debug!("DrmModeSetting: encoder {:?} unreadable: {}", handle, e);
                    None
                }
            })
            .ok_or(RendererError::EncoderUnavailable { connector_id })?;
        let encoder_id = raw_id(encoder.handle());

        let possible = resources.filter_crtcs(encoder.possible_crtcs());
        let crtc = pick_crtc(encoder.crtc(), &possible)
            .ok_or(RendererError::CrtcUnavailable { encoder_id })?;

        let saved_crtc = match card.get_crtc(crtc) {
            Ok(saved) => {
                debug!(
                    "DrmModeSetting: controller {} was showing {:?} at {:?} (mode valid: {})",
                    raw_id(crtc),
                    saved.framebuffer(),
                    saved.position(),
                    saved.mode().is_some()
                );
                Some(saved)
            }
            Err(e) => {
                warn!(
                    "DrmModeSetting: could not read controller {} configuration: {}",
                    raw_id(crtc),
                    e
                );
                None
            }
        };

        let output = OutputInfo {
            device_path,
            connector_id,
            encoder_id,
            crtc_id: raw_id(crtc),
            mode: display_mode,
        };
        info!(
            "DrmModeSetting: connector {} -> encoder {} -> controller {}",
            output.connector_id, output.encoder_id, output.crtc_id
        );

        Ok(Self {
            card,
            output,
            connector: connector.handle(),
            crtc,
            mode,
            saved_crtc,
        })
    }

    /// A second descriptor for the device, for the buffer allocator.
    pub fn try_clone_device(&self) -> io::Result<File> {
        self.card.0.try_clone()
    }
}

impl ModeSetting for DrmModeSetting {
    fn output(&self) -> &OutputInfo {
        &self.output
    }

    fn add_framebuffer(&mut self, buffer: &BufferDescriptor) -> Result<FramebufferId> {
        let plane = ScanoutPlane::new(buffer).map_err(RendererError::FramebufferCreateFailed)?;
        let fb = self
            .card
            .add_planar_framebuffer(&plane, FbCmd2Flags::empty())
            .map_err(RendererError::FramebufferCreateFailed)?;
        trace!(
            "DrmModeSetting: registered bo handle {} (stride {}) as fb {}",
            buffer.handle,
            buffer.stride,
            raw_id(fb)
        );
        Ok(FramebufferId(raw_id(fb)))
    }

    fn remove_framebuffer(&mut self, fb: FramebufferId) -> Result<()> {
        fb_handle(fb)
            .and_then(|handle| self.card.destroy_framebuffer(handle))
            .map_err(|source| RendererError::FramebufferRemoveFailed { fb: fb.0, source })?;
        trace!("DrmModeSetting: removed {}", fb);
        Ok(())
    }

    fn set_crtc(&mut self, fb: FramebufferId) -> Result<()> {
        fb_handle(fb)
            .and_then(|handle| {
                self.card.set_crtc(
                    self.crtc,
                    Some(handle),
                    (0, 0),
                    &[self.connector],
                    Some(self.mode),
                )
            })
            .map_err(|source| RendererError::InitialModeSetFailed {
                crtc_id: self.output.crtc_id,
                source,
            })?;
        info!(
            "DrmModeSetting: controller {} now scanning out {} at {}",
            self.output.crtc_id, fb, self.output.mode
        );
        Ok(())
    }

    fn page_flip(&mut self, fb: FramebufferId) -> Result<()> {
        fb_handle(fb)
            .and_then(|handle| {
                self.card
                    .page_flip(self.crtc, handle, PageFlipFlags::EVENT, None)
            })
            .map_err(|source| RendererError::PageFlipFailed { fb: fb.0, source })?;
        trace!("DrmModeSetting: flip to {} queued", fb);
        Ok(())
    }

    fn wait_for_flip(&mut self) -> Result<()> {
        loop {
            let events = match self.card.receive_events() {
                Ok(events) => events,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(RendererError::FlipWaitFailed(e)),
            };
            let mut flipped = false;
            for event in events {
                match event {
                    Event::PageFlip(flip) => {
                        trace!(
                            "DrmModeSetting: flip complete on controller {} (seq {})",
                            raw_id(flip.crtc),
                            flip.frame
                        );
                        flipped = true;
                    }
                    Event::Vblank(vblank) => {
                        trace!("DrmModeSetting: ignoring vblank {}", vblank.frame)
                    }
                    _ => trace!("DrmModeSetting: ignoring unknown event"),
                }
            }
            if flipped {
                return Ok(());
            }
        }
    }

    fn restore_original(&mut self) -> Result<()> {
        let Some(saved) = self.saved_crtc.as_ref() else {
            debug!("DrmModeSetting: no saved controller configuration to restore");
            return Ok(());
        };
        let (Some(mode), Some(fb)) = (saved.mode(), saved.framebuffer()) else {
            debug!(
                "DrmModeSetting: controller {} had no active mode at startup, nothing to restore",
                self.output.crtc_id
            );
            return Ok(());
        };
        self.card
            .set_crtc(
                saved.handle(),
                Some(fb),
                saved.position(),
                &[self.connector],
                Some(mode),
            )
            .map_err(RendererError::RestoreFailed)?;
        info!(
            "DrmModeSetting: restored controller {} to fb {}",
            self.output.crtc_id,
            raw_id(fb)
        );
        Ok(())
    }
}

impl Drop for DrmModeSetting {
    fn drop(&mut self) {
        info!(
            "DrmModeSetting: closing {}",
            self.output.device_path.display()
        );
    }
}
