//! Closed-loop guiding demo against the simulated camera and mount.
//!
//! Loops, auto-selects a guide star, calibrates, then guides against a
//! configurable sky drift, optionally dithering along the way. Writes a
//! guide-error plot when requested.

use clap::Parser;
use lodestar::camera::{capture, GuideCamera};
use lodestar::{ExposureOutcome, Guider, GuiderConfig, GuiderState};
use lodestar_harness::{
    plot_guide_session, GuideSessionRecorder, SharedSky, SimulatedMount, SimulatorCamera,
    SimulatorCameraConfig,
};
use log::{info, warn};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Closed-loop autoguiding demo")]
struct Args {
    /// Number of frames to process
    #[arg(long, default_value = "400")]
    frames: u64,

    /// Sky drift in px/frame along X
    #[arg(long, default_value = "0.05")]
    drift_x: f64,

    /// Sky drift in px/frame along Y
    #[arg(long, default_value = "0.02")]
    drift_y: f64,

    /// Camera angle of the mount RA axis, degrees
    #[arg(long, default_value = "30.0")]
    mount_angle: f64,

    /// Dither by this many pixels halfway through (0 disables)
    #[arg(long, default_value = "3.0")]
    dither: f64,

    /// Noise amplitude in ADU
    #[arg(long, default_value = "10.0")]
    noise: f64,

    /// RNG seed for the synthetic sky
    #[arg(long, default_value = "12345")]
    seed: u64,

    /// Write a guide-error SVG plot here
    #[arg(long)]
    plot: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let sky = SharedSky::new((args.drift_x, args.drift_y));
    let camera_config = SimulatorCameraConfig {
        noise: args.noise,
        seed: args.seed,
        ..Default::default()
    };
    let mut camera = SimulatorCamera::new(camera_config, sky.clone());
    let mount = SimulatedMount::new(sky, args.mount_angle.to_radians());

    let mut guider = Guider::new(
        Box::new(mount),
        camera.info(),
        GuiderConfig::default(),
    );

    let recorder = GuideSessionRecorder::new();
    guider.register_listener(recorder.listener());

    info!("starting loop: {} frames", args.frames);
    guider.start_looping().expect("fresh guider accepts looping");

    let mut guiding_started = false;
    let mut dithered = false;
    for i in 0..args.frames {
        let frame = match capture(&mut camera, Duration::from_millis(1)) {
            ExposureOutcome::Frame(frame) => frame,
            other => {
                warn!("capture produced {other:?}");
                guider.handle_capture_failure();
                continue;
            }
        };
        guider.update_guide(&frame, false);

        // Once a star is selected, start the calibration + guiding sequence.
        if !guiding_started && guider.state() == GuiderState::Selected {
            match guider.start_guiding() {
                Ok(()) => {
                    guiding_started = true;
                    info!("calibration started on frame {i}");
                }
                Err(e) => warn!("start_guiding: {e}"),
            }
        }

        if args.dither > 0.0 && !dithered && i == args.frames / 2 {
            if guider.state() == GuiderState::Guiding {
                match guider.dither(args.dither, -args.dither) {
                    Ok(()) => {
                        dithered = true;
                        info!("dithered by ({:.1}, {:.1}) px", args.dither, -args.dither);
                    }
                    Err(e) => warn!("dither: {e}"),
                }
            }
        }
    }

    let state = guider.state();
    let rms = recorder.rms_error(100);
    println!("final state: {state:?}");
    println!("guide steps recorded: {}", recorder.len());
    println!("RMS error over last 100 steps: {rms:.3} px");
    println!(
        "current error: {:.3} px (smoothed {:.3} px)",
        guider.current_error(false),
        guider.current_error_smoothed(false)
    );

    if let Some(path) = args.plot {
        match plot_guide_session(&recorder.steps(), &path) {
            Ok(()) => println!("plot written to {}", path.display()),
            Err(e) => warn!("plot failed: {e}"),
        }
    }
}
