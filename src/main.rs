// src/main.rs

//! Kiosk demo: clears the output to a slowly cycling color until Escape or Q
//! is pressed.

use scanout::config::CONFIG;
use scanout::input::{EvdevInput, KeyCode, KeyState};
use scanout::logging::init_logging;
use scanout::platform::kms::{EglContext, KmsBackend};
use scanout::session::{Application, FrameInfo, Session, SessionOptions};

use anyhow::Context;
use glow::HasContext;
use log::{error, info};

/// Frames for one full trip around the color wheel.
const CYCLE_FRAMES: u64 = 600;

struct ColorCycle;

impl ColorCycle {
    /// Fully saturated hue at `t` in [0, 1).
    fn color(t: f32) -> (f32, f32, f32) {
        let h = t * 6.0;
        let x = 1.0 - (h % 2.0 - 1.0).abs();
        match h as u32 {
            0 => (1.0, x, 0.0),
            1 => (x, 1.0, 0.0),
            2 => (0.0, 1.0, x),
            3 => (0.0, x, 1.0),
            4 => (x, 0.0, 1.0),
            _ => (1.0, 0.0, x),
        }
    }
}

impl Application<EglContext> for ColorCycle {
    fn setup(&mut self, frame: &FrameInfo, ctx: &mut EglContext) -> anyhow::Result<()> {
        unsafe {
            ctx.gl()
                .viewport(0, 0, frame.width as i32, frame.height as i32)
        };
        info!("ColorCycle: viewport {}x{}", frame.width, frame.height);
        Ok(())
    }

    fn draw(&mut self, frame: &FrameInfo, ctx: &mut EglContext) -> anyhow::Result<()> {
        let t = (frame.frame % CYCLE_FRAMES) as f32 / CYCLE_FRAMES as f32;
        let (r, g, b) = Self::color(t);
        let gl = ctx.gl();
        unsafe {
            gl.clear_color(r * 0.6, g * 0.6, b * 0.6, 1.0);
            gl.clear(glow::COLOR_BUFFER_BIT);
        }
        Ok(())
    }

    fn teardown(&mut self, _ctx: &mut EglContext) {
        info!("ColorCycle: done");
    }
}

fn quit_requested(keys: &KeyState) -> bool {
    keys.any_pressed(&[KeyCode::ESC, KeyCode::Q])
}

fn main() -> anyhow::Result<()> {
    init_logging(&CONFIG.logging);
    info!("Starting scanout...");

    let input =
        EvdevInput::open(quit_requested, &CONFIG.input).context("Failed to open input devices")?;
    let options = SessionOptions::from_config(&CONFIG);
    let mut session = Session::initialize(KmsBackend::new(), ColorCycle, input, options)
        .context("Failed to initialize the display session")?;
    info!(
        "Output {}x{} on {}",
        session.width(),
        session.height(),
        session.output().device_path.display()
    );

    let run = session.run_loop();
    if let Err(e) = &run {
        error!("Presentation loop failed: {}", e);
    }
    session
        .teardown()
        .context("Failed to tear down the display session")?;
    run.context("Presentation loop failed")?;

    info!("scanout exited cleanly.");
    Ok(())
}
