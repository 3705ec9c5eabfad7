// src/lib.rs

//! Direct-to-display presentation for Linux kiosks.
//!
//! `scanout` brings up a connected output through kernel mode-setting,
//! renders into GBM buffers with OpenGL ES, and presents each finished frame
//! with a vsync'd page flip. No window system or compositor is involved.
//!
//! ```no_run
//! use scanout::config::CONFIG;
//! use scanout::input::{EvdevInput, KeyCode, KeyState};
//! use scanout::platform::kms::{EglContext, KmsBackend};
//! use scanout::session::{Application, FrameInfo, Session, SessionOptions};
//!
//! struct Blank;
//!
//! impl Application<EglContext> for Blank {
//!     fn setup(&mut self, _: &FrameInfo, _: &mut EglContext) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//!     fn draw(&mut self, _: &FrameInfo, _: &mut EglContext) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> anyhow::Result<()> {
//! let input = EvdevInput::open(|k: &KeyState| k.is_pressed(KeyCode::ESC), &CONFIG.input)?;
//! let options = SessionOptions::from_config(&CONFIG);
//! let mut session = Session::initialize(KmsBackend::new(), Blank, input, options)?;
//! session.run_loop()?;
//! session.teardown()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod input;
pub mod instance;
pub mod logging;
pub mod platform;
pub mod present;
pub mod session;

pub use error::{RendererError, Result};
pub use session::{Application, FrameInfo, PresentState, Session, SessionOptions};
