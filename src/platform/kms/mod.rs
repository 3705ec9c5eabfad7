// src/platform/kms/mod.rs

//! Direct-to-display backend: the DRM control API for mode-setting, GBM for
//! buffers, EGL and GLES2 for rendering.

pub mod allocator;
pub mod egl;
pub mod mode_setting;

pub use allocator::{GbmAllocator, GbmBuffer};
pub use egl::{EglContext, EglDriver, EglInstance};
pub use mode_setting::{DrmModeSetting, DEVICE_CANDIDATES};

use crate::error::{RendererError, Result};
use crate::instance::{SessionSlot, DEVICE_SESSION_SLOT};
use crate::platform::{Backend, DisplayMode};

use std::rc::Rc;

/// Opens libEGL the first time a rendering context is needed.
#[derive(Default)]
pub struct KmsBackend {
    egl: Option<Rc<EglInstance>>,
}

impl KmsBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn egl(&mut self) -> Result<Rc<EglInstance>> {
        if let Some(egl) = &self.egl {
            return Ok(egl.clone());
        }
        let egl = Rc::new(egl::load_egl()?);
        self.egl = Some(egl.clone());
        Ok(egl)
    }
}

impl Backend for KmsBackend {
    type ModeSetting = DrmModeSetting;
    type Allocator = GbmAllocator;
    type Renderer = EglContext;

    fn session_slot(&self) -> SessionSlot {
        DEVICE_SESSION_SLOT.clone()
    }

    fn open_mode_setting(&mut self) -> Result<DrmModeSetting> {
        DrmModeSetting::open()
    }

    fn create_allocator(
        &mut self,
        mode_setting: &DrmModeSetting,
        mode: &DisplayMode,
    ) -> Result<GbmAllocator> {
        let device = mode_setting
            .try_clone_device()
            .map_err(RendererError::AllocatorInitFailed)?;
        GbmAllocator::create(device, mode.width, mode.height)
    }

    fn create_renderer(&mut self, allocator: &GbmAllocator) -> Result<EglContext> {
        EglContext::create(self.egl()?, allocator)
    }
}
