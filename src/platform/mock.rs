// src/platform/mock.rs

//! Recording backend for driving the session without hardware.
//!
//! Every subsystem shares one [`MockState`]: a journal of calls in the order
//! they happened, a finite pool of buffers, the set of registered
//! framebuffers and a list of protocol violations. Failures can be injected
//! at any step and any call count.

use crate::error::{RendererError, Result};
use crate::input::{InputError, InputSource};
use crate::instance::{new_slot, SessionSlot};
use crate::platform::{
    Backend, BufferAllocator, BufferDescriptor, DisplayMode, FramebufferId, ModeSetting,
    OutputInfo, RenderingContext, ScanoutBuffer,
};

use drm::buffer::DrmFourcc;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::path::PathBuf;
use std::rc::Rc;

pub const DEFAULT_POOL_SIZE: usize = 3;
const FIRST_FB_ID: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    OpenModeSetting,
    CloseModeSetting,
    CreateAllocator { width: u32, height: u32 },
    DestroyAllocator,
    CreateRenderer,
    DestroyRenderer,
    Poll { quit: bool },
    Draw { frame: u64, buffer: usize },
    Finish,
    Swap { buffer: Option<usize> },
    Lock { buffer: Option<usize> },
    Release { buffer: usize },
    AddFramebuffer { buffer: usize, fb: u32 },
    RemoveFramebuffer { fb: u32 },
    SetCrtc { fb: u32 },
    PageFlip { fb: u32 },
    WaitForFlip,
    RestoreCrtc,
}

/// Step at which a failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockStep {
    OpenModeSetting,
    CreateAllocator,
    CreateRenderer,
    Swap,
    AddFramebuffer,
    RemoveFramebuffer,
    SetCrtc,
    PageFlip,
    WaitForFlip,
    Restore,
    Poll,
}

impl MockStep {
    fn error(self, fb: u32) -> RendererError {
        let os = |code| io::Error::from_raw_os_error(code);
        match self {
            MockStep::OpenModeSetting => RendererError::NoConnectedOutput,
            MockStep::CreateAllocator => RendererError::AllocatorInitFailed(os(libc::ENOMEM)),
            // Zero configs matched: eglChooseConfig succeeds with count 0.
            MockStep::CreateRenderer => RendererError::NoMatchingConfig(0x3000),
            MockStep::Swap => RendererError::SwapFailed(0x300D),
            MockStep::AddFramebuffer => RendererError::FramebufferCreateFailed(os(libc::EINVAL)),
            MockStep::RemoveFramebuffer => RendererError::FramebufferRemoveFailed {
                fb,
                source: os(libc::ENOENT),
            },
            MockStep::SetCrtc => RendererError::InitialModeSetFailed {
                crtc_id: MockBackend::CRTC_ID,
                source: os(libc::EACCES),
            },
            MockStep::PageFlip => RendererError::PageFlipFailed {
                fb,
                source: os(libc::EBUSY),
            },
            MockStep::WaitForFlip => RendererError::FlipWaitFailed(os(libc::EIO)),
            MockStep::Restore => RendererError::RestoreFailed(os(libc::EINVAL)),
            MockStep::Poll => RendererError::Input(poll_error()),
        }
    }
}

fn poll_error() -> InputError {
    InputError::Read {
        path: PathBuf::from("/dev/input/mock"),
        source: io::Error::from_raw_os_error(libc::ENODEV),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    /// Current back buffer of the rendering surface.
    Rendering,
    /// Swapped, waiting to be locked.
    Queued,
    Locked,
}

#[derive(Debug)]
pub struct MockState {
    pub journal: Vec<MockCall>,
    pub violations: Vec<String>,
    failures: Vec<(MockStep, usize)>,
    calls: HashMap<MockStep, usize>,
    slots: Vec<SlotState>,
    back: Option<usize>,
    queued: VecDeque<usize>,
    framebuffers: BTreeMap<u32, usize>,
    next_fb: u32,
    scanout: Option<u32>,
    pending_flip: Option<u32>,
    input_script: VecDeque<bool>,
}

impl MockState {
    fn new(pool_size: usize) -> Self {
        Self {
            journal: Vec::new(),
            violations: Vec::new(),
            failures: Vec::new(),
            calls: HashMap::new(),
            slots: vec![SlotState::Free; pool_size],
            back: None,
            queued: VecDeque::new(),
            framebuffers: BTreeMap::new(),
            next_fb: FIRST_FB_ID,
            scanout: None,
            pending_flip: None,
            input_script: VecDeque::new(),
        }
    }

    /// Counts a call to `step` and reports whether it was scripted to fail.
    fn should_fail(&mut self, step: MockStep) -> bool {
        let count = self.calls.entry(step).or_insert(0);
        *count += 1;
        let nth = *count;
        self.failures.iter().any(|&(s, n)| s == step && n == nth)
    }

    fn registered_buffer(&self, buffer: usize) -> Option<u32> {
        self.framebuffers
            .iter()
            .find(|(_, &b)| b == buffer)
            .map(|(&fb, _)| fb)
    }

    /// Picks a back buffer for the rendering surface if it has none.
    fn ensure_back(&mut self) -> Option<usize> {
        if self.back.is_none() {
            let free = self.slots.iter().position(|s| *s == SlotState::Free)?;
            self.slots[free] = SlotState::Rendering;
            self.back = Some(free);
        }
        self.back
    }
}

pub type SharedState = Rc<RefCell<MockState>>;

/// Backend whose subsystems record into a shared [`MockState`].
#[derive(Debug, Clone)]
pub struct MockBackend {
    state: SharedState,
    slot: SessionSlot,
    width: u32,
    height: u32,
}

impl MockBackend {
    pub const CONNECTOR_ID: u32 = 31;
    pub const ENCODER_ID: u32 = 32;
    pub const CRTC_ID: u32 = 41;

    pub fn new(width: u32, height: u32) -> Self {
        Self::with_pool(width, height, DEFAULT_POOL_SIZE)
    }

    pub fn with_pool(width: u32, height: u32, pool_size: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState::new(pool_size))),
            slot: new_slot(),
            width,
            height,
        }
    }

    /// Makes the `nth` call (1-based) to `step` fail.
    pub fn fail_on(&self, step: MockStep, nth: usize) -> &Self {
        self.state.borrow_mut().failures.push((step, nth));
        self
    }

    /// Input source answering each poll from `script`, then `false` forever.
    pub fn input(&self, script: &[bool]) -> ScriptedInput {
        self.state.borrow_mut().input_script = script.iter().copied().collect();
        ScriptedInput {
            state: self.state.clone(),
        }
    }

    pub fn journal(&self) -> Vec<MockCall> {
        self.state.borrow().journal.clone()
    }

    pub fn count(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.state.borrow().journal.iter().filter(|c| pred(c)).count()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }

    /// Framebuffer the controller is showing, as far as completed flips go.
    pub fn scanout(&self) -> Option<u32> {
        self.state.borrow().scanout
    }

    pub fn registered_framebuffers(&self) -> usize {
        self.state.borrow().framebuffers.len()
    }

    /// Buffers not sitting free in the pool.
    pub fn buffers_out_of_pool(&self) -> usize {
        self.state
            .borrow()
            .slots
            .iter()
            .filter(|s| **s == SlotState::Locked || **s == SlotState::Queued)
            .count()
    }

    pub fn position(&self, call: &MockCall) -> Option<usize> {
        self.state.borrow().journal.iter().position(|c| c == call)
    }
}

impl Backend for MockBackend {
    type ModeSetting = MockModeSetting;
    type Allocator = MockAllocator;
    type Renderer = MockRenderer;

    fn session_slot(&self) -> SessionSlot {
        self.slot.clone()
    }

    fn open_mode_setting(&mut self) -> Result<MockModeSetting> {
        let mut st = self.state.borrow_mut();
        if st.should_fail(MockStep::OpenModeSetting) {
            return Err(MockStep::OpenModeSetting.error(0));
        }
        st.journal.push(MockCall::OpenModeSetting);
        Ok(MockModeSetting {
            state: self.state.clone(),
            output: OutputInfo {
                device_path: PathBuf::from("/dev/dri/card0"),
                connector_id: Self::CONNECTOR_ID,
                encoder_id: Self::ENCODER_ID,
                crtc_id: Self::CRTC_ID,
                mode: DisplayMode {
                    width: self.width,
                    height: self.height,
                    refresh_hz: 60,
                    name: format!("{}x{}", self.width, self.height),
                },
            },
        })
    }

    fn create_allocator(
        &mut self,
        _mode_setting: &MockModeSetting,
        mode: &DisplayMode,
    ) -> Result<MockAllocator> {
        let mut st = self.state.borrow_mut();
        if st.should_fail(MockStep::CreateAllocator) {
            return Err(MockStep::CreateAllocator.error(0));
        }
        st.journal.push(MockCall::CreateAllocator {
            width: mode.width,
            height: mode.height,
        });
        Ok(MockAllocator {
            state: self.state.clone(),
            width: mode.width,
            height: mode.height,
        })
    }

    fn create_renderer(&mut self, _allocator: &MockAllocator) -> Result<MockRenderer> {
        let mut st = self.state.borrow_mut();
        if st.should_fail(MockStep::CreateRenderer) {
            return Err(MockStep::CreateRenderer.error(0));
        }
        st.journal.push(MockCall::CreateRenderer);
        Ok(MockRenderer {
            state: self.state.clone(),
        })
    }
}

#[derive(Debug)]
pub struct MockModeSetting {
    state: SharedState,
    output: OutputInfo,
}

impl ModeSetting for MockModeSetting {
    fn output(&self) -> &OutputInfo {
        &self.output
    }

    fn add_framebuffer(&mut self, buffer: &BufferDescriptor) -> Result<FramebufferId> {
        let mut st = self.state.borrow_mut();
        if st.should_fail(MockStep::AddFramebuffer) {
            return Err(MockStep::AddFramebuffer.error(0));
        }
        let index = buffer.handle as usize;
        if st.slots.get(index) != Some(&SlotState::Locked) {
            st.violations
                .push(format!("registered buffer {} that is not locked", index));
        }
        let fb = st.next_fb;
        st.next_fb += 1;
        st.framebuffers.insert(fb, index);
        st.journal.push(MockCall::AddFramebuffer { buffer: index, fb });
        Ok(FramebufferId(fb))
    }

    fn remove_framebuffer(&mut self, fb: FramebufferId) -> Result<()> {
        let mut st = self.state.borrow_mut();
        if st.should_fail(MockStep::RemoveFramebuffer) {
            return Err(MockStep::RemoveFramebuffer.error(fb.0));
        }
        if st.framebuffers.remove(&fb.0).is_none() {
            st.violations.push(format!("removed unknown {}", fb));
            return Err(MockStep::RemoveFramebuffer.error(fb.0));
        }
        if st.pending_flip == Some(fb.0) {
            st.violations
                .push(format!("removed {} while a flip to it is pending", fb));
        }
        if st.scanout == Some(fb.0) {
            st.scanout = None;
        }
        st.journal.push(MockCall::RemoveFramebuffer { fb: fb.0 });
        Ok(())
    }

    fn set_crtc(&mut self, fb: FramebufferId) -> Result<()> {
        let mut st = self.state.borrow_mut();
        if st.should_fail(MockStep::SetCrtc) {
            return Err(MockStep::SetCrtc.error(fb.0));
        }
        if !st.framebuffers.contains_key(&fb.0) {
            st.violations.push(format!("mode-set to unknown {}", fb));
        }
        st.scanout = Some(fb.0);
        st.journal.push(MockCall::SetCrtc { fb: fb.0 });
        Ok(())
    }

    fn page_flip(&mut self, fb: FramebufferId) -> Result<()> {
        let mut st = self.state.borrow_mut();
        if st.should_fail(MockStep::PageFlip) {
            return Err(MockStep::PageFlip.error(fb.0));
        }
        if st.pending_flip.is_some() {
            st.violations
                .push(format!("flip to {} queued while another is pending", fb));
            return Err(MockStep::PageFlip.error(fb.0));
        }
        if !st.framebuffers.contains_key(&fb.0) {
            st.violations.push(format!("flip to unknown {}", fb));
            return Err(MockStep::PageFlip.error(fb.0));
        }
        st.pending_flip = Some(fb.0);
        st.journal.push(MockCall::PageFlip { fb: fb.0 });
        Ok(())
    }

    fn wait_for_flip(&mut self) -> Result<()> {
        let mut st = self.state.borrow_mut();
        if st.should_fail(MockStep::WaitForFlip) {
            return Err(MockStep::WaitForFlip.error(0));
        }
        match st.pending_flip.take() {
            Some(fb) => st.scanout = Some(fb),
            None => {
                st.violations
                    .push("waited for a flip that was never requested".to_string());
                return Err(RendererError::FlipWaitFailed(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "no flip pending",
                )));
            }
        }
        st.journal.push(MockCall::WaitForFlip);
        Ok(())
    }

    fn restore_original(&mut self) -> Result<()> {
        let mut st = self.state.borrow_mut();
        if st.should_fail(MockStep::Restore) {
            return Err(MockStep::Restore.error(0));
        }
        st.scanout = None;
        st.journal.push(MockCall::RestoreCrtc);
        Ok(())
    }
}

impl Drop for MockModeSetting {
    fn drop(&mut self) {
        self.state.borrow_mut().journal.push(MockCall::CloseModeSetting);
    }
}

/// A pool slot locked out of the mock allocator. Deliberately not `Clone`.
#[derive(Debug, PartialEq, Eq)]
pub struct MockBuffer {
    index: usize,
    descriptor: BufferDescriptor,
}

impl ScanoutBuffer for MockBuffer {
    fn descriptor(&self) -> BufferDescriptor {
        self.descriptor
    }
}

#[derive(Debug)]
pub struct MockAllocator {
    state: SharedState,
    width: u32,
    height: u32,
}

impl BufferAllocator for MockAllocator {
    type Buffer = MockBuffer;

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn lock_front_buffer(&mut self) -> Option<MockBuffer> {
        let mut st = self.state.borrow_mut();
        let index = st.queued.pop_front();
        st.journal.push(MockCall::Lock { buffer: index });
        let index = index?;
        st.slots[index] = SlotState::Locked;
        Some(MockBuffer {
            index,
            descriptor: BufferDescriptor {
                width: self.width,
                height: self.height,
                format: DrmFourcc::Xrgb8888,
                handle: index as u32,
                stride: self.width * 4,
            },
        })
    }

    fn release_buffer(&mut self, buffer: MockBuffer) {
        let mut st = self.state.borrow_mut();
        if let Some(fb) = st.registered_buffer(buffer.index) {
            st.violations.push(format!(
                "released buffer {} while still registered as fb#{}",
                buffer.index, fb
            ));
        }
        if st.slots[buffer.index] != SlotState::Locked {
            st.violations
                .push(format!("released buffer {} that was not locked", buffer.index));
        }
        st.slots[buffer.index] = SlotState::Free;
        st.journal.push(MockCall::Release {
            buffer: buffer.index,
        });
    }
}

impl Drop for MockAllocator {
    fn drop(&mut self) {
        self.state.borrow_mut().journal.push(MockCall::DestroyAllocator);
    }
}

#[derive(Debug)]
pub struct MockRenderer {
    state: SharedState,
}

impl MockRenderer {
    /// Stands in for the draw calls an application issues.
    pub fn draw(&mut self, frame: u64) {
        let mut st = self.state.borrow_mut();
        let Some(buffer) = st.ensure_back() else {
            st.violations
                .push(format!("frame {} drawn with no free buffer", frame));
            return;
        };
        if let Some(fb) = st.registered_buffer(buffer) {
            st.violations.push(format!(
                "frame {} drawn into buffer {} held by the controller as fb#{}",
                frame, buffer, fb
            ));
        }
        st.journal.push(MockCall::Draw { frame, buffer });
    }
}

impl RenderingContext for MockRenderer {
    fn finish(&self) -> Result<()> {
        self.state.borrow_mut().journal.push(MockCall::Finish);
        Ok(())
    }

    fn swap_buffers(&mut self) -> Result<()> {
        let mut st = self.state.borrow_mut();
        if st.should_fail(MockStep::Swap) {
            return Err(MockStep::Swap.error(0));
        }
        let buffer = st.ensure_back();
        if let Some(index) = buffer {
            st.slots[index] = SlotState::Queued;
            st.queued.push_back(index);
            st.back = None;
        }
        st.journal.push(MockCall::Swap { buffer });
        Ok(())
    }
}

impl Drop for MockRenderer {
    fn drop(&mut self) {
        self.state.borrow_mut().journal.push(MockCall::DestroyRenderer);
    }
}

/// Input source that replays a scripted list of quit answers.
#[derive(Debug)]
pub struct ScriptedInput {
    state: SharedState,
}

impl InputSource for ScriptedInput {
    fn poll(&mut self) -> std::result::Result<bool, InputError> {
        let mut st = self.state.borrow_mut();
        if st.should_fail(MockStep::Poll) {
            return Err(poll_error());
        }
        let quit = st.input_script.pop_front().unwrap_or(false);
        st.journal.push(MockCall::Poll { quit });
        Ok(quit)
    }
}
