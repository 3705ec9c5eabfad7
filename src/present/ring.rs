// src/present/ring.rs

//! Bookkeeping for the (at most two) buffers a session holds.
//!
//! A buffer enters the ring once it has been registered with the controller
//! and leaves it only after the caller has unregistered it. The ring never
//! touches native handles itself; it only decides which frame is due for
//! retirement and refuses transitions that would break the one-displayed,
//! one-staged shape. A superseded frame waits in a retiring slot until it is
//! unregistered, so a failed unregister never loses track of it.

use crate::error::{RendererError, Result};
use crate::platform::FramebufferId;

/// Most frames alive at once: the one scanned out and the one replacing it.
pub const MAX_LIVE_FRAMES: usize = 2;

/// Which party currently owns a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOwner {
    /// Rendered and registered, not yet handed to the controller.
    Rendering,
    /// Scanned out, or queued for scanout.
    Controller,
    /// Back in the allocator's pool.
    Free,
}

#[derive(Debug)]
pub struct PresentableFrame<B> {
    buffer: B,
    framebuffer: FramebufferId,
    owner: FrameOwner,
}

impl<B> PresentableFrame<B> {
    pub fn framebuffer(&self) -> FramebufferId {
        self.framebuffer
    }

    pub fn owner(&self) -> FrameOwner {
        self.owner
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    /// Marks the frame free and hands the buffer back for release.
    ///
    /// Call only after the framebuffer has been unregistered.
    pub fn into_released(mut self) -> B {
        self.owner = FrameOwner::Free;
        self.buffer
    }
}

#[derive(Debug)]
pub struct FrameRing<B> {
    displayed: Option<PresentableFrame<B>>,
    staged: Option<PresentableFrame<B>>,
    /// Superseded by a flip, still registered.
    retiring: Option<PresentableFrame<B>>,
}

impl<B> Default for FrameRing<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> FrameRing<B> {
    pub fn new() -> Self {
        Self {
            displayed: None,
            staged: None,
            retiring: None,
        }
    }

    pub fn live_frames(&self) -> usize {
        self.displayed.is_some() as usize
            + self.staged.is_some() as usize
            + self.retiring.is_some() as usize
    }

    pub fn displayed(&self) -> Option<&PresentableFrame<B>> {
        self.displayed.as_ref()
    }

    pub fn staged(&self) -> Option<&PresentableFrame<B>> {
        self.staged.as_ref()
    }

    pub fn retiring(&self) -> Option<&PresentableFrame<B>> {
        self.retiring.as_ref()
    }

    /// Fails unless a new frame may be staged right now.
    pub fn ensure_can_stage(&self) -> Result<()> {
        if self.staged.is_some() {
            return Err(RendererError::FrameProtocol(
                "a frame is already staged for presentation",
            ));
        }
        if self.retiring.is_some() {
            return Err(RendererError::FrameProtocol(
                "a superseded frame is still registered",
            ));
        }
        if self.live_frames() >= MAX_LIVE_FRAMES {
            return Err(RendererError::FrameProtocol("frame ring is full"));
        }
        Ok(())
    }

    /// Adds a freshly registered buffer as the staged frame.
    pub fn stage(&mut self, buffer: B, framebuffer: FramebufferId) -> Result<()> {
        self.ensure_can_stage()?;
        self.staged = Some(PresentableFrame {
            buffer,
            framebuffer,
            owner: FrameOwner::Rendering,
        });
        Ok(())
    }

    /// Hands the staged frame to the controller through a blocking mode-set.
    ///
    /// Only valid while nothing is displayed.
    pub fn commit_initial(&mut self) -> Result<()> {
        if self.displayed.is_some() {
            return Err(RendererError::FrameProtocol(
                "initial commit while a frame is already displayed",
            ));
        }
        let mut frame = self
            .staged
            .take()
            .ok_or(RendererError::FrameProtocol("initial commit with nothing staged"))?;
        frame.owner = FrameOwner::Controller;
        self.displayed = Some(frame);
        Ok(())
    }

    /// Hands the staged frame to the controller after a page flip was queued.
    ///
    /// The superseded frame moves to the retiring slot. The caller must
    /// unregister it and collect it with [`FrameRing::take_retiring`] before
    /// staging anything else.
    pub fn commit_flip(&mut self) -> Result<()> {
        if self.retiring.is_some() {
            return Err(RendererError::FrameProtocol(
                "page flip while a superseded frame is still registered",
            ));
        }
        let mut frame = self
            .staged
            .take()
            .ok_or(RendererError::FrameProtocol("page flip with nothing staged"))?;
        frame.owner = FrameOwner::Controller;
        self.retiring = self.displayed.replace(frame);
        Ok(())
    }

    /// Removes the superseded frame once its framebuffer is unregistered.
    pub fn take_retiring(&mut self) -> Option<PresentableFrame<B>> {
        self.retiring.take()
    }

    /// Removes the staged frame after a failed handoff.
    pub fn discard_staged(&mut self) -> Option<PresentableFrame<B>> {
        self.staged.take()
    }

    /// Removes the displayed frame at teardown, once no flip is pending.
    pub fn take_displayed(&mut self) -> Option<PresentableFrame<B>> {
        self.displayed.take()
    }
}
