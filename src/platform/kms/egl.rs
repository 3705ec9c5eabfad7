// src/platform/kms/egl.rs

//! EGL display, context and window surface on top of a GBM allocator, with
//! GLES2 entry points loaded through EGL.

use super::allocator::GbmAllocator;
use crate::error::{RendererError, Result};
use crate::platform::RenderingContext;

use drm::buffer::DrmFourcc;
use glow::HasContext;
use khronos_egl as egl;
use log::{debug, info, warn};
use std::ffi::c_void;
use std::ptr;
use std::rc::Rc;

/// libEGL, opened at runtime.
pub type EglInstance = egl::DynamicInstance<egl::EGL1_4>;

const MAX_CONFIGS: usize = 64;

/// RGBA8, 24-bit depth, 8-bit stencil, 4x multisampling, window-capable, ES2.
#[rustfmt::skip]
const CONFIG_ATTRIBS: [egl::Int; 21] = [
    egl::RED_SIZE, 8,
    egl::GREEN_SIZE, 8,
    egl::BLUE_SIZE, 8,
    egl::ALPHA_SIZE, 8,
    egl::DEPTH_SIZE, 24,
    egl::STENCIL_SIZE, 8,
    egl::SAMPLE_BUFFERS, 1,
    egl::SAMPLES, 4,
    egl::SURFACE_TYPE, egl::WINDOW_BIT,
    egl::RENDERABLE_TYPE, egl::OPENGL_ES2_BIT,
    egl::NONE,
];

const CONTEXT_ATTRIBS: [egl::Int; 3] = [egl::CONTEXT_CLIENT_VERSION, 2, egl::NONE];

pub fn load_egl() -> Result<EglInstance> {
    // SAFETY: libEGL has no initialisation side effects on load.
    let instance = unsafe { EglInstance::load_required() }.map_err(|e| {
        RendererError::LibraryUnavailable {
            library: "libEGL".to_string(),
            reason: e.to_string(),
        }
    })?;
    debug!("EglContext: loaded libEGL");
    Ok(instance)
}

fn code(error: Option<egl::Error>) -> egl::Int {
    error.map_or(egl::SUCCESS, |e| e.native())
}

/// The EGL calls a rendering context is built from.
pub trait EglDriver {
    /// # Safety
    ///
    /// `native` must be a live native display handle.
    unsafe fn display_for(&self, native: *mut c_void) -> Option<egl::Display>;

    fn bind_gles(&self) -> Result<(), egl::Error>;

    fn init_display(&self, display: egl::Display) -> Result<(egl::Int, egl::Int), egl::Error>;

    fn string(&self, display: egl::Display, name: egl::Int) -> Option<String>;

    fn matching_configs(
        &self,
        display: egl::Display,
        attribs: &[egl::Int],
        configs: &mut Vec<egl::Config>,
    ) -> Result<(), egl::Error>;

    fn config_attrib(
        &self,
        display: egl::Display,
        config: egl::Config,
        attribute: egl::Int,
    ) -> Result<egl::Int, egl::Error>;

    fn new_context(
        &self,
        display: egl::Display,
        config: egl::Config,
        attribs: &[egl::Int],
    ) -> Result<egl::Context, egl::Error>;

    /// # Safety
    ///
    /// `window` must be a live native window created on `display`'s device.
    unsafe fn new_window_surface(
        &self,
        display: egl::Display,
        config: egl::Config,
        window: *mut c_void,
    ) -> Result<egl::Surface, egl::Error>;

    /// Makes `binding` current for both drawing and reading, or releases
    /// the current binding when `None`.
    fn bind_current(
        &self,
        display: egl::Display,
        binding: Option<(egl::Surface, egl::Context)>,
    ) -> Result<(), egl::Error>;

    fn swap(&self, display: egl::Display, surface: egl::Surface) -> Result<(), egl::Error>;

    fn drop_surface(&self, display: egl::Display, surface: egl::Surface) -> Result<(), egl::Error>;

    fn drop_context(&self, display: egl::Display, context: egl::Context) -> Result<(), egl::Error>;

    fn terminate_display(&self, display: egl::Display) -> Result<(), egl::Error>;

    fn last_error(&self) -> Option<egl::Error>;

    /// Address of a client API function, null when unknown.
    fn proc_address(&self, name: &str) -> *const c_void;
}

impl EglDriver for EglInstance {
    unsafe fn display_for(&self, native: *mut c_void) -> Option<egl::Display> {
        self.get_display(native)
    }

    fn bind_gles(&self) -> Result<(), egl::Error> {
        self.bind_api(egl::OPENGL_ES_API)
    }

    fn init_display(&self, display: egl::Display) -> Result<(egl::Int, egl::Int), egl::Error> {
        self.initialize(display)
    }

    fn string(&self, display: egl::Display, name: egl::Int) -> Option<String> {
        self.query_string(Some(display), name)
            .ok()
            .map(|s| s.to_string_lossy().into_owned())
    }

    fn matching_configs(
        &self,
        display: egl::Display,
        attribs: &[egl::Int],
        configs: &mut Vec<egl::Config>,
    ) -> Result<(), egl::Error> {
        self.choose_config(display, attribs, configs)
    }

    fn config_attrib(
        &self,
        display: egl::Display,
        config: egl::Config,
        attribute: egl::Int,
    ) -> Result<egl::Int, egl::Error> {
        self.get_config_attrib(display, config, attribute)
    }

    fn new_context(
        &self,
        display: egl::Display,
        config: egl::Config,
        attribs: &[egl::Int],
    ) -> Result<egl::Context, egl::Error> {
        self.create_context(display, config, None, attribs)
    }

    unsafe fn new_window_surface(
        &self,
        display: egl::Display,
        config: egl::Config,
        window: *mut c_void,
    ) -> Result<egl::Surface, egl::Error> {
        self.create_window_surface(display, config, window, None)
    }

    fn bind_current(
        &self,
        display: egl::Display,
        binding: Option<(egl::Surface, egl::Context)>,
    ) -> Result<(), egl::Error> {
        let surface = binding.map(|(surface, _)| surface);
        let context = binding.map(|(_, context)| context);
        self.make_current(display, surface, surface, context)
    }

    fn swap(&self, display: egl::Display, surface: egl::Surface) -> Result<(), egl::Error> {
        self.swap_buffers(display, surface)
    }

    fn drop_surface(&self, display: egl::Display, surface: egl::Surface) -> Result<(), egl::Error> {
        self.destroy_surface(display, surface)
    }

    fn drop_context(&self, display: egl::Display, context: egl::Context) -> Result<(), egl::Error> {
        self.destroy_context(display, context)
    }

    fn terminate_display(&self, display: egl::Display) -> Result<(), egl::Error> {
        self.terminate(display)
    }

    fn last_error(&self) -> Option<egl::Error> {
        self.get_error()
    }

    fn proc_address(&self, name: &str) -> *const c_void {
        self.get_proc_address(name)
            .map_or(ptr::null(), |f| f as *const c_void)
    }
}

/// Display, context and surface, acquired in that order.
///
/// Each handle is recorded as soon as it exists, so a failure part-way
/// through is undone by the same `Drop` that handles normal teardown.
pub(crate) struct EglState {
    driver: Rc<dyn EglDriver>,
    display: egl::Display,
    initialized: bool,
    context: Option<egl::Context>,
    surface: Option<egl::Surface>,
    current: bool,
}

impl EglState {
    /// # Safety
    ///
    /// `native_display` must be a live GBM device and `native_window` a
    /// surface created on it. Both must outlive the returned state.
    pub(crate) unsafe fn create(
        driver: Rc<dyn EglDriver>,
        native_display: *mut c_void,
        native_window: *mut c_void,
    ) -> Result<Self> {
        let display = driver
            .display_for(native_display)
            .ok_or_else(|| RendererError::DisplayUnavailable(code(driver.last_error())))?;
        let mut state = Self {
            driver: driver.clone(),
            display,
            initialized: false,
            context: None,
            surface: None,
            current: false,
        };

        driver
            .bind_gles()
            .map_err(|e| RendererError::ApiBindFailed(e.native()))?;

        let (major, minor) = driver
            .init_display(display)
            .map_err(|e| RendererError::DisplayInitFailed(e.native()))?;
        state.initialized = true;
        info!(
            "EglContext: EGL {}.{} ({}, {})",
            major,
            minor,
            driver.string(display, egl::VENDOR).unwrap_or_default(),
            driver.string(display, egl::VERSION).unwrap_or_default()
        );

        let config = state.choose_config()?;

        let context = driver
            .new_context(display, config, &CONTEXT_ATTRIBS)
            .map_err(|e| RendererError::ContextCreateFailed(e.native()))?;
        state.context = Some(context);

        let surface = driver
            .new_window_surface(display, config, native_window)
            .map_err(|e| RendererError::SurfaceWrapFailed(e.native()))?;
        state.surface = Some(surface);

        driver
            .bind_current(display, Some((surface, context)))
            .map_err(|e| RendererError::MakeCurrentFailed(e.native()))?;
        state.current = true;

        Ok(state)
    }

    fn choose_config(&self) -> Result<egl::Config> {
        let mut configs = Vec::with_capacity(MAX_CONFIGS);
        self.driver
            .matching_configs(self.display, &CONFIG_ATTRIBS, &mut configs)
            .map_err(|e| RendererError::NoMatchingConfig(e.native()))?;
        let Some(&first) = configs.first() else {
            return Err(RendererError::NoMatchingConfig(code(
                self.driver.last_error(),
            )));
        };
        debug!("EglContext: {} matching configs", configs.len());

        // The surface is XRGB8888, so a config with that native visual avoids
        // a format mismatch at surface creation.
        let preferred = configs.iter().copied().find(|&config| {
            self.driver
                .config_attrib(self.display, config, egl::NATIVE_VISUAL_ID)
                .is_ok_and(|visual| visual as u32 == DrmFourcc::Xrgb8888 as u32)
        });
        Ok(preferred.unwrap_or_else(|| {
            warn!("EglContext: no config with an XRGB8888 native visual, using the first match");
            first
        }))
    }

    fn swap(&self) -> Result<()> {
        let surface = self
            .surface
            .ok_or(RendererError::SwapFailed(egl::BAD_SURFACE))?;
        self.driver
            .swap(self.display, surface)
            .map_err(|e| RendererError::SwapFailed(e.native()))
    }
}

impl Drop for EglState {
    fn drop(&mut self) {
        let driver = &self.driver;
        if self.current {
            if let Err(e) = driver.bind_current(self.display, None) {
                warn!("EglContext: releasing the current context: {}", e);
            }
        }
        if let Some(surface) = self.surface.take() {
            if let Err(e) = driver.drop_surface(self.display, surface) {
                warn!("EglContext: destroying the surface: {}", e);
            }
        }
        if let Some(context) = self.context.take() {
            if let Err(e) = driver.drop_context(self.display, context) {
                warn!("EglContext: destroying the context: {}", e);
            }
        }
        if self.initialized {
            if let Err(e) = driver.terminate_display(self.display) {
                warn!("EglContext: terminating the display: {}", e);
            }
        }
        debug!("EglContext: released");
    }
}

/// A current OpenGL ES 2 context drawing into the allocator's surface.
pub struct EglContext {
    gl: glow::Context,
    state: EglState,
}

impl EglContext {
    /// Must be dropped before `allocator`.
    pub fn create(egl: Rc<EglInstance>, allocator: &GbmAllocator) -> Result<Self> {
        // SAFETY: both handles belong to `allocator`, which the session drops
        // after the renderer.
        let state =
            unsafe { EglState::create(egl, allocator.raw_device(), allocator.raw_surface())? };
        // SAFETY: the context is current on this thread.
        let gl = unsafe {
            glow::Context::from_loader_function(|name| state.driver.proc_address(name))
        };
        unsafe {
            info!(
                "EglContext: GL vendor {:?}, renderer {:?}, version {:?}",
                gl.get_parameter_string(glow::VENDOR),
                gl.get_parameter_string(glow::RENDERER),
                gl.get_parameter_string(glow::VERSION)
            );
        }
        Ok(Self { gl, state })
    }

    /// GLES entry points for drawing into the current surface.
    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }
}

impl RenderingContext for EglContext {
    fn finish(&self) -> Result<()> {
        unsafe { self.gl.finish() };
        Ok(())
    }

    fn swap_buffers(&mut self) -> Result<()> {
        self.state.swap()
    }
}
