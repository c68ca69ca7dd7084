//! Synthetic star-field guide camera.
//!
//! Renders Gaussian stars over a noisy background. Star positions follow a
//! shared sky state: a configurable drift plus the accumulated image shifts
//! produced by the simulated mount, closing the guiding loop.

use lodestar::camera::{CameraError, ExposureNotifier, GuideCamera};
use lodestar::GuideFrame;
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct SkyInner {
    drift_rate: (f64, f64),
    drift: (f64, f64),
    /// Accumulated star-image shift commanded by the mount.
    mount_shift: (f64, f64),
}

/// Sky state shared between the camera and the mount.
#[derive(Debug, Clone, Default)]
pub struct SharedSky {
    inner: Arc<Mutex<SkyInner>>,
}

impl SharedSky {
    pub fn new(drift_rate: (f64, f64)) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SkyInner {
                drift_rate,
                ..Default::default()
            })),
        }
    }

    pub fn set_drift_rate(&self, rate: (f64, f64)) {
        self.inner.lock().unwrap().drift_rate = rate;
    }

    /// Advance the sky by one frame and return the total star offset.
    fn advance(&self) -> (f64, f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.drift.0 += inner.drift_rate.0;
        inner.drift.1 += inner.drift_rate.1;
        (
            inner.drift.0 + inner.mount_shift.0,
            inner.drift.1 + inner.mount_shift.1,
        )
    }

    /// Current total star offset without advancing.
    pub fn offset(&self) -> (f64, f64) {
        let inner = self.inner.lock().unwrap();
        (
            inner.drift.0 + inner.mount_shift.0,
            inner.drift.1 + inner.mount_shift.1,
        )
    }

    /// Shift the star images, as a mount pulse would.
    pub fn add_mount_shift(&self, dx: f64, dy: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.mount_shift.0 += dx;
        inner.mount_shift.1 += dy;
    }
}

#[derive(Debug, Clone)]
pub struct SimulatorCameraConfig {
    pub width: usize,
    pub height: usize,
    /// Base star positions and amplitudes, `(x, y, amplitude)`.
    pub stars: Vec<(f64, f64, f64)>,
    pub background: f64,
    /// Uniform noise amplitude (+/- ADU).
    pub noise: f64,
    pub exposure: Duration,
    pub pixel_scale: f64,
    pub seed: u64,
}

impl Default for SimulatorCameraConfig {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            stars: vec![
                (64.0, 64.0, 30000.0),
                (150.0, 70.0, 20000.0),
                (80.0, 160.0, 15000.0),
            ],
            background: 100.0,
            noise: 10.0,
            exposure: Duration::from_millis(1),
            pixel_scale: 1.0,
            seed: 12345,
        }
    }
}

pub struct SimulatorCamera {
    config: SimulatorCameraConfig,
    sky: SharedSky,
    rng: ChaCha8Rng,
    frames: u64,
    aborted: bool,
}

impl SimulatorCamera {
    pub fn new(config: SimulatorCameraConfig, sky: SharedSky) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            config,
            sky,
            rng,
            frames: 0,
            aborted: false,
        }
    }

    fn render(&mut self, offset: (f64, f64)) -> Array2<u16> {
        let config = &self.config;
        let mut data = Array2::<f64>::from_elem((config.height, config.width), config.background);

        for &(bx, by, amplitude) in &config.stars {
            let cx = bx + offset.0;
            let cy = by + offset.1;
            let sigma = 3.0 / 2.355;
            let sigma2 = sigma * sigma;
            let radius = 8i64;
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let x = cx.round() as i64 + dx;
                    let y = cy.round() as i64 + dy;
                    if x < 0 || y < 0 || x >= config.width as i64 || y >= config.height as i64 {
                        continue;
                    }
                    let fx = x as f64 - cx;
                    let fy = y as f64 - cy;
                    let r2 = fx * fx + fy * fy;
                    data[[y as usize, x as usize]] += amplitude * (-r2 / (2.0 * sigma2)).exp();
                }
            }
        }

        if config.noise > 0.0 {
            let noise = config.noise;
            for pixel in data.iter_mut() {
                *pixel += self.rng.random_range(-noise..noise);
            }
        }

        data.mapv(|v| v.round().clamp(0.0, 65535.0) as u16)
    }
}

impl GuideCamera for SimulatorCamera {
    fn dimensions(&self) -> (usize, usize) {
        (self.config.width, self.config.height)
    }

    fn pixel_scale(&self) -> f64 {
        self.config.pixel_scale
    }

    fn exposure(&self) -> Duration {
        self.config.exposure
    }

    fn auto_exposure(&self) -> bool {
        false
    }

    fn saturation_adu(&self) -> u16 {
        65535
    }

    fn begin_exposure(
        &mut self,
        duration: Duration,
        notifier: ExposureNotifier,
    ) -> Result<(), CameraError> {
        if self.aborted {
            self.aborted = false;
            notifier.aborted();
            return Ok(());
        }
        let offset = self.sky.advance();
        let data = self.render(offset);
        self.frames += 1;
        // Completion is delivered on the caller's thread; a hardware camera
        // would notify from its device event thread instead.
        notifier.frame(GuideFrame::new(data, self.frames, duration));
        Ok(())
    }

    fn abort_exposure(&mut self) {
        self.aborted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestar::camera::capture;
    use lodestar::{ExposureOutcome, FindMode, Star};

    #[test]
    fn test_camera_produces_findable_stars() {
        let sky = SharedSky::new((0.0, 0.0));
        let mut camera = SimulatorCamera::new(SimulatorCameraConfig::default(), sky);

        let outcome = capture(&mut camera, Duration::from_millis(1));
        let frame = match outcome {
            ExposureOutcome::Frame(frame) => frame,
            other => panic!("expected frame, got {other:?}"),
        };
        assert_eq!(frame.number(), 1);

        let star = Star::find(&frame, 15, 64.0, 64.0, FindMode::Centroid, 1.5, 65535);
        assert!(star.found());
        assert!(star.position.distance(&lodestar::Point::new(64.0, 64.0)) < 0.3);
    }

    #[test]
    fn test_drift_moves_stars() {
        let sky = SharedSky::new((0.5, 0.0));
        let mut camera = SimulatorCamera::new(SimulatorCameraConfig::default(), sky);

        for _ in 0..4 {
            let _ = capture(&mut camera, Duration::from_millis(1));
        }
        let frame = match capture(&mut camera, Duration::from_millis(1)) {
            ExposureOutcome::Frame(frame) => frame,
            other => panic!("expected frame, got {other:?}"),
        };
        // Five frames at 0.5 px/frame
        let star = Star::find(&frame, 15, 66.0, 64.0, FindMode::Centroid, 1.5, 65535);
        assert!(star.found());
        assert!((star.position.x() - 66.5).abs() < 0.3);
    }

    #[test]
    fn test_abort_delivers_aborted_outcome() {
        let sky = SharedSky::new((0.0, 0.0));
        let mut camera = SimulatorCamera::new(SimulatorCameraConfig::default(), sky);
        camera.abort_exposure();
        assert!(matches!(
            capture(&mut camera, Duration::from_millis(1)),
            ExposureOutcome::Aborted
        ));
    }
}
