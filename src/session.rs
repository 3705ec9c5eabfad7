// src/session.rs

//! The device session and its presentation loop.
//!
//! A [`Session`] owns the mode-setting manager, the buffer allocator and the
//! rendering context for one output, and drives the per-frame cycle:
//!
//! ```text
//! poll input -> draw -> finish -> swap -> lock buffer -> register fb
//!            -> wait previous flip -> queue flip -> retire previous frame
//! ```
//!
//! The page-flip wait is the only pacing primitive, so the loop runs at the
//! display's refresh rate and never has more than one flip queued. Every
//! failure stops the loop; a stopped session can only be torn down.

use crate::config::Config;
use crate::error::{RendererError, Result};
use crate::input::InputSource;
use crate::instance::InstanceGuard;
use crate::platform::{
    Backend, BufferAllocator, FramebufferId, ModeSetting, OutputInfo, RenderingContext,
    ScanoutBuffer,
};
use crate::present::{FrameRateCounter, FrameRing, PresentableFrame};

use log::{debug, info, trace, warn};
use std::time::{Duration, Instant};


/// Where the presentation loop is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentState {
    /// Devices acquired, nothing shown yet.
    Uninitialized,
    /// First frame handed to the controller through a mode-set.
    Configured,
    /// Steady-state flipping.
    Presenting,
    /// Terminal. The session must be torn down.
    Stopped,
}

/// Per-call context handed to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    /// Zero-based frame number. Setup sees frame 0.
    pub frame: u64,
}

/// Application callbacks, invoked with the rendering context current.
pub trait Application<R> {
    /// Runs once, before the first frame is handed to the controller.
    fn setup(&mut self, frame: &FrameInfo, ctx: &mut R) -> anyhow::Result<()>;

    /// Issues the rendering commands for one frame. Nothing is cleared or
    /// reset between calls.
    fn draw(&mut self, frame: &FrameInfo, ctx: &mut R) -> anyhow::Result<()>;

    /// Runs during teardown if `setup` was called, even if it failed.
    fn teardown(&mut self, _ctx: &mut R) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Reapply the controller configuration saved at open time on teardown.
    pub restore_crtc_on_teardown: bool,
    pub report_fps: bool,
    pub fps_interval: Duration,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            restore_crtc_on_teardown: config.display.restore_crtc_on_teardown,
            report_fps: config.performance.report_fps,
            fps_interval: config.performance.fps_interval(),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

type BufferOf<B> = <<B as Backend>::Allocator as BufferAllocator>::Buffer;
type TakeFrame<B> = fn(&mut FrameRing<BufferOf<B>>) -> Option<PresentableFrame<BufferOf<B>>>;

/// The three acquired subsystems plus frame bookkeeping.
///
/// Field order is the teardown order: rendering context, allocator,
/// mode-setting.
struct Pipeline<B: Backend> {
    renderer: B::Renderer,
    allocator: B::Allocator,
    mode_setting: B::ModeSetting,
    ring: FrameRing<BufferOf<B>>,
    flip_pending: bool,
}

impl<B: Backend> Pipeline<B> {
    /// Acquires mode-setting, allocator and renderer in that order. A failure
    /// drops whatever was already acquired, newest first.
    fn open(backend: &mut B) -> Result<Self> {
        let mode_setting = backend.open_mode_setting()?;
        let mode = mode_setting.output().mode.clone();
        let allocator = backend.create_allocator(&mode_setting, &mode)?;
        let renderer = backend.create_renderer(&allocator)?;
        Ok(Self {
            renderer,
            allocator,
            mode_setting,
            ring: FrameRing::new(),
            flip_pending: false,
        })
    }

    /// Registers `buffer`, giving it back to the pool if that fails.
    fn register(&mut self, buffer: BufferOf<B>) -> Result<(BufferOf<B>, FramebufferId)> {
        match self.mode_setting.add_framebuffer(&buffer.descriptor()) {
            Ok(fb) => Ok((buffer, fb)),
            Err(e) => {
                self.allocator.release_buffer(buffer);
                Err(e)
            }
        }
    }

    /// Unregisters `fb`, then takes its frame out of the ring with `take`
    /// and gives the buffer back to the allocator.
    ///
    /// If unregistering fails the frame stays in the ring and its buffer is
    /// not released, since the controller may still reference it. Teardown
    /// retries it.
    fn retire(&mut self, fb: Option<FramebufferId>, take: TakeFrame<B>) -> Result<()> {
        let Some(fb) = fb else {
            return Ok(());
        };
        self.mode_setting.remove_framebuffer(fb)?;
        if let Some(frame) = take(&mut self.ring) {
            self.allocator.release_buffer(frame.into_released());
        }
        trace!("Session: retired {}", fb);
        Ok(())
    }

    /// Drops the staged frame after a failed handoff.
    fn abandon_staged(&mut self) {
        let fb = self.ring.staged().map(PresentableFrame::framebuffer);
        if let Err(e) = self.retire(fb, FrameRing::discard_staged) {
            warn!("Session: could not retire abandoned frame: {}", e);
        }
    }

    fn retire_superseded(&mut self) -> Result<()> {
        let fb = self.ring.retiring().map(PresentableFrame::framebuffer);
        self.retire(fb, FrameRing::take_retiring)
    }

    /// First frame: swap, lock, register and commit through a blocking
    /// mode-set. No flip event results, so nothing is pending afterwards.
    fn initial_handoff(&mut self) -> Result<()> {
        self.ring.ensure_can_stage()?;
        self.renderer.swap_buffers()?;
        let front = self
            .allocator
            .lock_front_buffer()
            .ok_or(RendererError::BufferAcquireFailed)?;
        let (front, fb) = self.register(front)?;
        self.ring.stage(front, fb)?;
        if let Err(e) = self.mode_setting.set_crtc(fb) {
            self.abandon_staged();
            return Err(e);
        }
        self.ring.commit_initial()
    }

    /// One steady-state frame after the draw callback has run.
    fn present_frame(&mut self) -> Result<()> {
        self.ring.ensure_can_stage()?;
        self.renderer.finish()?;
        self.renderer.swap_buffers()?;

        let candidate = self
            .allocator
            .lock_front_buffer()
            .ok_or(RendererError::BufferAcquireFailed)?;
        let (candidate, fb) = self.register(candidate)?;
        self.ring.stage(candidate, fb)?;

        if self.flip_pending {
            if let Err(e) = self.mode_setting.wait_for_flip() {
                self.abandon_staged();
                return Err(e);
            }
            self.flip_pending = false;
        }

        if let Err(e) = self.mode_setting.page_flip(fb) {
            self.abandon_staged();
            return Err(e);
        }
        self.flip_pending = true;

        self.ring.commit_flip()?;
        self.retire_superseded()
    }

    /// Waits out a pending flip, optionally restores the saved controller
    /// configuration and retires every live frame. Keeps going past
    /// failures and returns the first one.
    fn quiesce(&mut self, restore: bool) -> Result<()> {
        let mut first_error: Option<RendererError> = None;
        let mut note = |e: RendererError, what: &str| {
            warn!("Session: {} failed during teardown: {}", what, e);
            first_error.get_or_insert(e);
        };

        if self.flip_pending {
            self.flip_pending = false;
            if let Err(e) = self.mode_setting.wait_for_flip() {
                note(e, "waiting for the pending flip");
            }
        }
        if restore {
            if let Err(e) = self.mode_setting.restore_original() {
                note(e, "restoring the controller");
            }
        }
        let staged = self.ring.staged().map(PresentableFrame::framebuffer);
        if let Err(e) = self.retire(staged, FrameRing::discard_staged) {
            note(e, "retiring the staged frame");
        }
        if let Err(e) = self.retire_superseded() {
            note(e, "retiring the superseded frame");
        }
        let displayed = self.ring.displayed().map(PresentableFrame::framebuffer);
        if let Err(e) = self.retire(displayed, FrameRing::take_displayed) {
            note(e, "retiring the displayed frame");
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// A live output with its presentation loop.
///
/// Only one session per backend slot exists at a time; the slot is held from
/// [`Session::initialize`] until [`Session::teardown`].
pub struct Session<B, A, I>
where
    B: Backend,
    A: Application<B::Renderer>,
    I: InputSource,
{
    pipeline: Option<Pipeline<B>>,
    app: A,
    input: I,
    options: SessionOptions,
    output: OutputInfo,
    state: PresentState,
    setup_ran: bool,
    frames_presented: u64,
    fps: Option<FrameRateCounter>,
    guard: Option<InstanceGuard>,
}

impl<B, A, I> Session<B, A, I>
where
    B: Backend,
    A: Application<B::Renderer>,
    I: InputSource,
{
    /// Acquires the output, the allocator and the rendering context.
    ///
    /// Fails with [`RendererError::SessionAlreadyExists`] without touching
    /// any device if another session holds the backend's slot.
    pub fn initialize(mut backend: B, app: A, input: I, options: SessionOptions) -> Result<Self> {
        let slot = backend.session_slot();
        let guard = InstanceGuard::acquire(&slot).ok_or(RendererError::SessionAlreadyExists)?;

        let pipeline = Pipeline::open(&mut backend)?;
        let output = pipeline.mode_setting.output().clone();
        info!(
            "Session: initialized on {} ({}, controller {})",
            output.device_path.display(),
            output.mode,
            output.crtc_id
        );

        let fps = options
            .report_fps
            .then(|| FrameRateCounter::new(options.fps_interval));
        Ok(Self {
            pipeline: Some(pipeline),
            app,
            input,
            options,
            output,
            state: PresentState::Uninitialized,
            setup_ran: false,
            frames_presented: 0,
            fps,
            guard: Some(guard),
        })
    }

    /// Runs setup and the initial handoff, then presents frames until the
    /// input source asks to quit or a step fails.
    ///
    /// Callable once. The session is [`PresentState::Stopped`] afterwards
    /// whatever the outcome.
    pub fn run_loop(&mut self) -> Result<()> {
        if self.state != PresentState::Uninitialized || self.pipeline.is_none() {
            return Err(RendererError::InvalidState {
                expected: PresentState::Uninitialized,
                actual: self.state,
            });
        }
        let result = self.present_until_quit();
        if let Err(e) = &result {
            warn!("Session: presentation stopped: {}", e);
        }
        self.state = PresentState::Stopped;
        info!("Session: stopped after {} frames", self.frames_presented);
        result
    }

    fn present_until_quit(&mut self) -> Result<()> {
        let (width, height) = (self.width(), self.height());
        let pipeline = match self.pipeline.as_mut() {
            Some(pipeline) => pipeline,
            None => {
                return Err(RendererError::InvalidState {
                    expected: PresentState::Uninitialized,
                    actual: self.state,
                })
            }
        };

        let setup_frame = FrameInfo {
            width,
            height,
            frame: 0,
        };
        self.setup_ran = true;
        self.app
            .setup(&setup_frame, &mut pipeline.renderer)
            .map_err(RendererError::Application)?;

        pipeline.initial_handoff().map_err(|e| match e {
            e @ RendererError::InitialModeSetFailed { .. } => e,
            other => RendererError::InitialFlipFailed(Box::new(other)),
        })?;
        self.state = PresentState::Configured;
        debug!("Session: first frame on screen");

        let mut frame = 0u64;
        loop {
            if self.input.poll()? {
                info!("Session: quit requested before frame {}", frame);
                return Ok(());
            }
            self.state = PresentState::Presenting;

            let info = FrameInfo {
                width,
                height,
                frame,
            };
            self.app
                .draw(&info, &mut pipeline.renderer)
                .map_err(RendererError::Application)?;
            pipeline.present_frame()?;
            self.frames_presented += 1;
            frame += 1;
            trace!("Session: frame {} queued", info.frame);

            if let Some(fps) = self.fps.as_mut().and_then(|c| c.tick(Instant::now())) {
                info!("Session: {:.1} fps", fps);
            }
        }
    }

    /// Releases everything in reverse acquisition order. Safe to call more
    /// than once; later calls do nothing.
    pub fn teardown(&mut self) -> Result<()> {
        let Some(mut pipeline) = self.pipeline.take() else {
            return Ok(());
        };
        self.state = PresentState::Stopped;

        let result = pipeline.quiesce(self.options.restore_crtc_on_teardown);
        if self.setup_ran {
            self.app.teardown(&mut pipeline.renderer);
        }
        let Pipeline {
            renderer,
            allocator,
            mode_setting,
            ..
        } = pipeline;
        drop(renderer);
        drop(allocator);
        drop(mode_setting);

        self.guard = None;
        info!("Session: torn down");
        result
    }

    pub fn width(&self) -> u32 {
        self.output.mode.width
    }

    pub fn height(&self) -> u32 {
        self.output.mode.height
    }

    pub fn output(&self) -> &OutputInfo {
        &self.output
    }

    pub fn state(&self) -> PresentState {
        self.state
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    /// Frames currently registered with the controller.
    pub fn live_frames(&self) -> usize {
        self.pipeline.as_ref().map_or(0, |p| p.ring.live_frames())
    }
}

impl<B, A, I> Drop for Session<B, A, I>
where
    B: Backend,
    A: Application<B::Renderer>,
    I: InputSource,
{
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!("Session: teardown on drop: {}", e);
        }
    }
}
