// src/present/mod.rs

//! Per-frame presentation state: the frame ring and frame-rate accounting.

pub mod fps;
pub mod ring;

pub use fps::FrameRateCounter;
pub use ring::{FrameOwner, FrameRing, PresentableFrame, MAX_LIVE_FRAMES};
