//! Multi-star offset refinement.
//!
//! Secondary stars are tracked alongside the primary and their displacements
//! averaged in, weighted by relative SNR, to beat down centroid noise. The
//! refined offset is only used when it is smaller than the primary-only
//! estimate, so secondary stars can never make the error estimate worse.

use crate::config::GuiderConfig;
use crate::frame::GuideFrame;
use crate::point::Point;
use crate::star::{FindMode, FindResult, Star};
use crate::stats::DescriptiveStats;

/// Consecutive zero-displacement frames before a secondary is dropped.
const ZERO_LIMIT: u32 = 5;

/// Consecutive not-found frames before a secondary is dropped.
const LOST_LIMIT: u32 = 3;

/// Consecutive misses before a secondary's reference is re-anchored.
const MISS_LIMIT: u32 = 10;

/// Sigma multiple of primary displacement that counts as a miss.
const MISS_SIGMA: f64 = 2.5;

/// Sigma multiple under which the stabilizing state exits.
const STABILIZING_EXIT_SIGMA: f64 = 2.0;

/// Displacement samples required before the sigma gate is trusted.
const MIN_SIGMA_SAMPLES: usize = 10;

/// Detection threshold for guide-star frame scans, in sigma above the frame
/// background.
const ACQUIRE_SIGMA: f64 = 5.0;

/// Scan a frame for local maxima above the detection threshold, brightest
/// first. `margin` pixels at each edge are skipped. Shared by secondary-star
/// acquisition and the guider's auto-selection.
pub(crate) fn scan_candidates(frame: &GuideFrame, margin: usize) -> Vec<(u16, usize, usize)> {
    // The 3x3 neighborhood needs at least a one-pixel rim.
    let margin = margin.max(1);
    let (mean, sigma) = frame.global_stats();
    let threshold = mean + ACQUIRE_SIGMA * sigma.max(1.0);
    let img = frame.view();
    let width = frame.width();
    let height = frame.height();

    let mut candidates: Vec<(u16, usize, usize)> = Vec::new();
    for y in margin..height.saturating_sub(margin) {
        for x in margin..width.saturating_sub(margin) {
            let v = img[[y, x]];
            if (v as f64) < threshold {
                continue;
            }
            let mut is_max = true;
            'neighbors: for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nv = img[[(y as i64 + dy) as usize, (x as i64 + dx) as usize]];
                    if nv > v {
                        is_max = false;
                        break 'neighbors;
                    }
                }
            }
            if is_max {
                candidates.push((v, x, y));
            }
        }
    }
    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    candidates
}

/// A tracked secondary star with its temporal bookkeeping.
#[derive(Debug, Clone)]
pub struct GuideStar {
    pub star: Star,
    /// Anchor position the displacement is measured from.
    pub reference: Point,
    pub miss_count: u32,
    pub zero_count: u32,
    pub lost_count: u32,
}

impl GuideStar {
    fn new(star: Star) -> Self {
        Self {
            star,
            reference: star.position,
            miss_count: 0,
            zero_count: 0,
            lost_count: 0,
        }
    }
}

/// Secondary-star set and the stabilizing-state machinery.
#[derive(Debug, Default)]
pub(crate) struct MultiStar {
    secondaries: Vec<GuideStar>,
    displacement_stats: DescriptiveStats,
    stabilizing: bool,
    lock_moved: bool,
}

impl MultiStar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn secondary_count(&self) -> usize {
        self.secondaries.len()
    }

    pub fn secondaries(&self) -> &[GuideStar] {
        &self.secondaries
    }

    pub fn clear(&mut self) {
        self.secondaries.clear();
        self.reset_stats();
    }

    pub fn reset_stats(&mut self) {
        self.displacement_stats.clear();
        self.stabilizing = false;
    }

    /// Record that the lock position moved (dither, shift, explicit set).
    /// Secondary references are re-anchored once the primary settles.
    pub fn note_lock_moved(&mut self) {
        self.lock_moved = true;
    }

    /// Scan the frame and promote the brightest distinct detections near the
    /// primary's quality to the secondary list.
    pub fn acquire(
        &mut self,
        frame: &GuideFrame,
        primary: &Star,
        config: &GuiderConfig,
        saturation: u16,
    ) {
        self.clear();
        if config.max_secondary_stars == 0 {
            return;
        }

        let candidates = scan_candidates(frame, 1 + config.search_region);
        let exclusion = (2 * config.search_region) as f64;
        for (_, x, y) in candidates {
            if self.secondaries.len() >= config.max_secondary_stars {
                break;
            }
            let pos = Point::new(x as f64, y as f64);
            if pos.distance(&primary.position) < exclusion {
                continue;
            }
            if self
                .secondaries
                .iter()
                .any(|gs| pos.distance(&gs.star.position) < exclusion)
            {
                continue;
            }
            let star = Star::find(
                frame,
                config.search_region,
                pos.x(),
                pos.y(),
                FindMode::Centroid,
                config.min_hfd,
                saturation,
            );
            if star.result == FindResult::Ok {
                self.secondaries.push(GuideStar::new(star));
            }
        }

        log::info!(
            "multi-star: acquired {} secondary stars",
            self.secondaries.len()
        );
    }

    /// Refine the primary-only offset using the secondary stars.
    ///
    /// Returns the offset to use and the number of stars that contributed.
    pub fn refine(
        &mut self,
        frame: &GuideFrame,
        primary: &Star,
        offset: Point,
        config: &GuiderConfig,
        saturation: u16,
    ) -> (Point, usize) {
        let displacement = offset.norm();
        self.displacement_stats.add_value(displacement);
        if self.displacement_stats.count() < MIN_SIGMA_SAMPLES {
            return (offset, 1);
        }
        let sigma = self.displacement_stats.sigma();
        if sigma <= 0.0 {
            return (offset, 1);
        }

        if !self.stabilizing && displacement > config.stability_sigma * sigma {
            log::debug!(
                "multi-star: displacement {displacement:.2} > {:.2}, stabilizing",
                config.stability_sigma * sigma
            );
            self.stabilizing = true;
        }

        if self.stabilizing {
            if displacement >= STABILIZING_EXIT_SIGMA * sigma {
                return (offset, 1);
            }
            self.stabilizing = false;
            if self.lock_moved {
                self.lock_moved = false;
                self.reanchor(frame, config, saturation);
                return (offset, 1);
            }
        }

        let primary_snr = primary.snr.max(f64::MIN_POSITIVE);
        let mut sum_x = offset.x();
        let mut sum_y = offset.y();
        let mut sum_weight = 1.0;
        let mut stars_used = 1usize;

        self.secondaries.retain_mut(|gs| {
            let found = Star::find(
                frame,
                config.search_region,
                gs.star.position.x(),
                gs.star.position.y(),
                FindMode::Centroid,
                config.min_hfd,
                saturation,
            );
            if !found.found() {
                gs.lost_count += 1;
                return gs.lost_count < LOST_LIMIT;
            }
            gs.lost_count = 0;
            gs.star = found;

            let dx = found.position.x() - gs.reference.x();
            let dy = found.position.y() - gs.reference.y();
            if dx == 0.0 || dy == 0.0 {
                gs.zero_count += 1;
                return gs.zero_count < ZERO_LIMIT;
            }
            if gs.zero_count > 0 {
                gs.zero_count -= 1;
            }

            if dx.hypot(dy) > MISS_SIGMA * sigma {
                gs.miss_count += 1;
                if gs.miss_count > MISS_LIMIT {
                    // Tolerate drift rather than discard the star.
                    gs.reference = found.position;
                    gs.miss_count = 0;
                }
                return true;
            }
            gs.miss_count = 0;

            let weight = found.snr / primary_snr;
            sum_x += weight * dx;
            sum_y += weight * dy;
            sum_weight += weight;
            stars_used += 1;
            true
        });

        let averaged = Point::new(sum_x / sum_weight, sum_y / sum_weight);
        if averaged.norm() < offset.norm() {
            (averaged, stars_used)
        } else {
            (offset, stars_used)
        }
    }

    // Reset every secondary's reference to its current location.
    fn reanchor(&mut self, frame: &GuideFrame, config: &GuiderConfig, saturation: u16) {
        for gs in &mut self.secondaries {
            let found = Star::find(
                frame,
                config.search_region,
                gs.star.position.x(),
                gs.star.position.y(),
                FindMode::Centroid,
                config.min_hfd,
                saturation,
            );
            if found.found() {
                gs.star = found;
                gs.reference = found.position;
            }
        }
        log::debug!("multi-star: re-anchored {} references", self.secondaries.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::synth_frame;

    fn primary_at(frame: &GuideFrame, x: f64, y: f64) -> Star {
        let star = Star::find(frame, 15, x, y, FindMode::Centroid, 1.0, 65535);
        assert!(star.found(), "primary not found: {:?}", star.result);
        star
    }

    const STARS: [(f64, f64, f64); 3] = [
        (64.0, 64.0, 30000.0),
        (150.0, 70.0, 20000.0),
        (80.0, 160.0, 15000.0),
    ];

    #[test]
    fn test_acquire_excludes_primary() {
        let frame = synth_frame(256, 256, &STARS);
        let primary = primary_at(&frame, 64.0, 64.0);

        let mut multi = MultiStar::new();
        multi.acquire(&frame, &primary, &GuiderConfig::default(), 65535);
        assert_eq!(multi.secondary_count(), 2);
        for gs in multi.secondaries() {
            assert!(gs.star.position.distance(&primary.position) > 30.0);
            assert!(gs.reference.is_valid());
        }
    }

    /// Feed varying primary offsets against a static frame: every secondary
    /// shows exactly zero displacement and is eventually dropped.
    #[test]
    fn test_static_secondaries_zero_out() {
        let frame = synth_frame(256, 256, &STARS);
        let primary = primary_at(&frame, 64.0, 64.0);
        let config = GuiderConfig::default();

        let mut multi = MultiStar::new();
        multi.acquire(&frame, &primary, &config, 65535);
        assert_eq!(multi.secondary_count(), 2);

        // Alternate offsets so the displacement sigma is non-degenerate.
        let offsets = [0.5, 1.5];
        for i in 0..MIN_SIGMA_SAMPLES + ZERO_LIMIT as usize + 2 {
            let offset = Point::new(offsets[i % 2], 0.0);
            multi.refine(&frame, &primary, offset, &config, 65535);
        }
        assert_eq!(multi.secondary_count(), 0);
    }

    #[test]
    fn test_lost_secondary_dropped() {
        let frame = synth_frame(256, 256, &STARS);
        let primary = primary_at(&frame, 64.0, 64.0);
        let config = GuiderConfig::default();

        let mut multi = MultiStar::new();
        multi.acquire(&frame, &primary, &config, 65535);
        let before = multi.secondary_count();
        assert!(before > 0);

        // The secondaries vanish from subsequent frames.
        let empty = synth_frame(256, 256, &STARS[..1]);
        for i in 0..MIN_SIGMA_SAMPLES + LOST_LIMIT as usize + 1 {
            let offset = Point::new(if i % 2 == 0 { 0.5 } else { 1.5 }, 0.0);
            multi.refine(&empty, &primary, offset, &config, 65535);
        }
        assert_eq!(multi.secondary_count(), 0);
    }

    #[test]
    fn test_refined_offset_never_larger() {
        let frame = synth_frame(256, 256, &STARS);
        let primary = primary_at(&frame, 64.0, 64.0);
        let config = GuiderConfig::default();

        let mut multi = MultiStar::new();
        multi.acquire(&frame, &primary, &config, 65535);

        // Shift the whole field slightly; secondaries move with the primary.
        let shifted: Vec<_> = STARS.iter().map(|&(x, y, a)| (x + 0.4, y + 0.3, a)).collect();
        let moved = synth_frame(256, 256, &shifted);

        for i in 0..MIN_SIGMA_SAMPLES + 4 {
            // Spread the offsets so the sigma gate stays open and the
            // averaging path actually runs.
            let offset = Point::new(0.3 + 0.3 * (i % 4) as f64, 0.3);
            let (refined, _) = multi.refine(&moved, &primary, offset, &config, 65535);
            assert!(refined.norm() <= offset.norm() + 1e-9);
        }
    }
}
