//! Guide-session recording and plotting.

use lodestar::{GuideEvent, GuideStepInfo};
use plotters::prelude::*;
use std::error::Error;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Collects `GuideStep` telemetry from the listener fan-out.
#[derive(Debug, Clone, Default)]
pub struct GuideSessionRecorder {
    steps: Arc<Mutex<Vec<GuideStepInfo>>>,
}

impl GuideSessionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener callback to register with the guider.
    pub fn listener(&self) -> impl FnMut(&GuideEvent) + Send + 'static {
        let steps = self.steps.clone();
        move |event| {
            if let GuideEvent::GuideStep(info) = event {
                steps.lock().unwrap().push(info.clone());
            }
        }
    }

    pub fn steps(&self) -> Vec<GuideStepInfo> {
        self.steps.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.steps.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// RMS of the camera-frame offset magnitude over the last `tail` steps.
    pub fn rms_error(&self, tail: usize) -> f64 {
        let steps = self.steps.lock().unwrap();
        if steps.is_empty() {
            return 0.0;
        }
        let start = steps.len().saturating_sub(tail);
        let window = &steps[start..];
        let sum: f64 = window
            .iter()
            .map(|s| s.camera_dx * s.camera_dx + s.camera_dy * s.camera_dy)
            .sum();
        (sum / window.len() as f64).sqrt()
    }
}

/// Render per-frame guide offsets and corrections to an SVG file.
pub fn plot_guide_session(steps: &[GuideStepInfo], path: &Path) -> Result<(), Box<dyn Error>> {
    if steps.is_empty() {
        return Err("no guide steps to plot".into());
    }

    let first = steps.first().unwrap().frame as f64;
    let last = steps.last().unwrap().frame as f64;
    let extent = steps
        .iter()
        .flat_map(|s| [s.camera_dx.abs(), s.camera_dy.abs()])
        .fold(1.0f64, f64::max)
        * 1.2;

    let root = SVGBackend::new(path, (900, 500)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Guide error", ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(first..last.max(first + 1.0), -extent..extent)?;

    chart
        .configure_mesh()
        .x_desc("Frame")
        .y_desc("Offset (px)")
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            steps.iter().map(|s| (s.frame as f64, s.camera_dx)),
            &BLUE,
        ))?
        .label("dx")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], BLUE));

    chart
        .draw_series(LineSeries::new(
            steps.iter().map(|s| (s.frame as f64, s.camera_dy)),
            &RED,
        ))?
        .label("dy")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], RED));

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(frame: u64, dx: f64, dy: f64) -> GuideStepInfo {
        GuideStepInfo {
            frame,
            camera_dx: dx,
            camera_dy: dy,
            mount_dx: dx,
            mount_dy: dy,
            ra_correction: 0.0,
            dec_correction: 0.0,
            mass: 1000.0,
            snr: 20.0,
            hfd: 3.0,
            stars_used: 1,
            avg_distance: dx.hypot(dy),
        }
    }

    #[test]
    fn test_recorder_collects_guide_steps() {
        let recorder = GuideSessionRecorder::new();
        let mut listener = recorder.listener();
        listener(&GuideEvent::GuideStep(step(1, 0.5, -0.2)));
        listener(&GuideEvent::GuidingStopped);
        listener(&GuideEvent::GuideStep(step(2, 0.3, 0.1)));
        assert_eq!(recorder.len(), 2);
    }

    #[test]
    fn test_rms_error() {
        let recorder = GuideSessionRecorder::new();
        let mut listener = recorder.listener();
        listener(&GuideEvent::GuideStep(step(1, 3.0, 4.0)));
        assert!((recorder.rms_error(10) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_plot_writes_svg() {
        let steps: Vec<_> = (0..20).map(|i| step(i, 0.1 * i as f64, -0.05)).collect();
        let dir = std::env::temp_dir();
        let path = dir.join("lodestar_plot_test.svg");
        plot_guide_session(&steps, &path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("<svg"));
        let _ = std::fs::remove_file(&path);
    }
}
