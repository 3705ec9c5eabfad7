// src/error.rs

//! Typed failure kinds for the presentation pipeline.
//!
//! Every error here is unrecoverable at this layer. Acquisition errors roll back
//! whatever was acquired before they are returned; protocol errors stop the
//! presentation loop and leave the session waiting for teardown. The owning
//! application decides whether to exit or to build a fresh session.

use std::io;
use thiserror::Error;

use crate::input::InputError;
use crate::session::PresentState;

pub type Result<T, E = RendererError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("a device session is already live in this process")]
    SessionAlreadyExists,

    #[error("could not load {library}: {reason}")]
    LibraryUnavailable { library: String, reason: String },

    // --- Mode-setting ---
    #[error("no display controller device could be opened (tried {tried:?})")]
    NoDeviceFound { tried: Vec<String> },

    #[error("failed to query mode-setting resources: {0}")]
    ResourceQueryFailed(io::Error),

    #[error("no connected output found")]
    NoConnectedOutput,

    #[error("connected output {connector_id} advertises no modes")]
    NoModes { connector_id: u32 },

    #[error("connected output {connector_id} has no usable encoder")]
    EncoderUnavailable { connector_id: u32 },

    #[error("encoder {encoder_id} has no usable controller")]
    CrtcUnavailable { encoder_id: u32 },

    // --- Buffer allocation ---
    #[error("failed to create buffer allocator: {0}")]
    AllocatorInitFailed(io::Error),

    #[error("failed to create {width}x{height} drawable surface: {source}")]
    SurfaceCreateFailed {
        width: u32,
        height: u32,
        source: io::Error,
    },

    // --- Rendering context ---
    #[error("no rendering display connection for the allocator (egl error 0x{0:x})")]
    DisplayUnavailable(i32),

    #[error("failed to bind rendering API (egl error 0x{0:x})")]
    ApiBindFailed(i32),

    #[error("failed to initialize rendering display (egl error 0x{0:x})")]
    DisplayInitFailed(i32),

    #[error("no rendering configuration matches the required attributes (egl error 0x{0:x})")]
    NoMatchingConfig(i32),

    #[error("failed to create rendering context (egl error 0x{0:x})")]
    ContextCreateFailed(i32),

    #[error("failed to wrap drawable surface for rendering (egl error 0x{0:x})")]
    SurfaceWrapFailed(i32),

    #[error("failed to make rendering context current (egl error 0x{0:x})")]
    MakeCurrentFailed(i32),

    // --- Presentation protocol ---
    #[error("initial frame handoff failed: {0}")]
    InitialFlipFailed(Box<RendererError>),

    #[error("initial mode-set on controller {crtc_id} failed: {source}")]
    InitialModeSetFailed { crtc_id: u32, source: io::Error },

    #[error("buffer swap failed (egl error 0x{0:x})")]
    SwapFailed(i32),

    #[error("allocator has no completed buffer ready")]
    BufferAcquireFailed,

    #[error("failed to register framebuffer: {0}")]
    FramebufferCreateFailed(io::Error),

    #[error("failed to unregister framebuffer {fb}: {source}")]
    FramebufferRemoveFailed { fb: u32, source: io::Error },

    #[error("failed waiting for page flip completion: {0}")]
    FlipWaitFailed(io::Error),

    #[error("page flip to framebuffer {fb} failed: {source}")]
    PageFlipFailed { fb: u32, source: io::Error },

    #[error("failed to restore saved controller configuration: {0}")]
    RestoreFailed(io::Error),

    #[error("frame ownership violation: {0}")]
    FrameProtocol(&'static str),

    #[error("session is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: PresentState,
        actual: PresentState,
    },

    #[error("application callback failed: {0:#}")]
    Application(anyhow::Error),

    #[error(transparent)]
    Input(#[from] InputError),
}

impl RendererError {
    /// True for errors raised while acquiring devices, libraries or contexts.
    pub fn is_acquisition(&self) -> bool {
        matches!(
            self,
            RendererError::LibraryUnavailable { .. }
                | RendererError::NoDeviceFound { .. }
                | RendererError::ResourceQueryFailed(_)
                | RendererError::AllocatorInitFailed(_)
                | RendererError::SurfaceCreateFailed { .. }
                | RendererError::DisplayUnavailable(_)
                | RendererError::ApiBindFailed(_)
                | RendererError::DisplayInitFailed(_)
                | RendererError::ContextCreateFailed(_)
                | RendererError::SurfaceWrapFailed(_)
                | RendererError::MakeCurrentFailed(_)
        )
    }

    /// True for errors raised while configuring or flipping the controller.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            RendererError::InitialFlipFailed(_)
                | RendererError::InitialModeSetFailed { .. }
                | RendererError::SwapFailed(_)
                | RendererError::BufferAcquireFailed
                | RendererError::FramebufferCreateFailed(_)
                | RendererError::FramebufferRemoveFailed { .. }
                | RendererError::FlipWaitFailed(_)
                | RendererError::PageFlipFailed { .. }
                | RendererError::FrameProtocol(_)
        )
    }

    /// True when a required output or configuration simply is not there.
    pub fn is_configuration_absent(&self) -> bool {
        matches!(
            self,
            RendererError::NoConnectedOutput
                | RendererError::NoModes { .. }
                | RendererError::EncoderUnavailable { .. }
                | RendererError::CrtcUnavailable { .. }
                | RendererError::NoMatchingConfig(_)
        )
    }
}
