//! Guiding orchestrator and state machine.
//!
//! The `Guider` owns the lock position, the primary and secondary stars, the
//! statistical gates, and the per-axis correction filters, and drives all of
//! them once per incoming frame. All mutation happens on one processing
//! context; administrative commands are expected to be serialized against
//! the frame path by the embedding application (see `capture`).

use crate::algorithm::GuideAlgorithm;
use crate::camera::CameraInfo;
use crate::config::{GuiderConfig, LockShiftRate};
use crate::distance_checker::DistanceChecker;
use crate::event::{GuideEvent, GuideStepInfo, ListenerId, Listeners};
use crate::frame::GuideFrame;
use crate::mass_checker::MassChecker;
use crate::mount::{CalibrationUpdate, GuideMount, GuiderOffset, MoveMode};
use crate::multistar::{scan_candidates, MultiStar};
use crate::point::Point;
use crate::star::{FindMode, FindResult, Star};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Error value reported when no star has been seen recently.
const STALE_ERROR_SENTINEL: f64 = 100.0;

/// Age after which error estimates are considered stale.
const STALE_AFTER: Duration = Duration::from_secs(20);

/// EMA weight for the fast distance estimate.
const AVG_FAST_WEIGHT: f64 = 0.3;

/// EMA weight for the smoothed distance estimate.
const AVG_SMOOTHED_WEIGHT: f64 = 0.045;

/// Residual per-axis distance that ends dither recentering.
const RECENTER_DONE: f64 = 0.5;

/// Guider lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuiderState {
    Uninitialized,
    Selecting,
    Selected,
    Calibrating,
    Calibrated,
    Guiding,
    Stop,
}

/// Precondition violations at the public API boundary. Runtime detection
/// uncertainty is never reported this way.
#[derive(Debug, Error)]
pub enum GuiderError {
    #[error("coordinates ({x:.1}, {y:.1}) outside the selectable region")]
    InvalidCoordinates { x: f64, y: f64 },
    #[error("operation not permitted while {0:?}")]
    InvalidState(GuiderState),
    #[error("no guide star selected")]
    NoStarSelected,
    #[error("no frame captured yet")]
    NoFrame,
    #[error("no star found at the requested position ({0:?})")]
    StarNotFound(FindResult),
    #[error("mount is not connected")]
    MountNotConnected,
    #[error("mount refused to start calibration")]
    CalibrationRejected,
}

#[derive(Debug)]
struct LockShift {
    enabled: bool,
    rate: LockShiftRate,
    /// Shift rate in camera px/sec, derived once axis angles are known.
    camera_rate: Option<Point>,
    base: Point,
    started: Option<Instant>,
}

impl LockShift {
    fn new() -> Self {
        Self {
            enabled: false,
            rate: LockShiftRate::default(),
            camera_rate: None,
            base: Point::invalid(),
            started: None,
        }
    }

    // Restart the drift from a new base point. Accrued shift is already
    // folded into `base`, so the clock must restart with it.
    fn rebase(&mut self, base: Point) {
        self.base = base;
        self.started = Some(Instant::now());
    }
}

#[derive(Debug)]
struct SettleState {
    started: Instant,
}

pub struct Guider {
    state: GuiderState,
    config: GuiderConfig,
    mount: Box<dyn GuideMount>,
    camera_info: CameraInfo,
    listeners: Listeners,
    latest_frame: Option<GuideFrame>,
    primary: Star,
    lock: Point,
    lock_shift: LockShift,
    mass_checker: MassChecker,
    distance_checker: DistanceChecker,
    ra_algorithm: GuideAlgorithm,
    dec_algorithm: GuideAlgorithm,
    multi_star: MultiStar,
    paused: bool,
    recenter_pending: bool,
    settle: Option<SettleState>,
    avg_distance: Option<f64>,
    avg_distance_long: Option<f64>,
    avg_distance_ra: Option<f64>,
    avg_distance_ra_long: Option<f64>,
    last_star_seen: Option<Instant>,
    stars_used: usize,
    last_stars_used: usize,
}

impl Guider {
    pub fn new(mount: Box<dyn GuideMount>, camera_info: CameraInfo, config: GuiderConfig) -> Self {
        let mass_window = Duration::from_secs_f64(config.mass_time_window_secs);
        let distance_checker =
            DistanceChecker::new(config.distance_check, config.distance_max_violations);
        Self {
            state: GuiderState::Uninitialized,
            mount,
            camera_info,
            listeners: Listeners::default(),
            latest_frame: None,
            primary: Star::not_found(Point::invalid(), FindResult::Error),
            lock: Point::invalid(),
            lock_shift: LockShift::new(),
            mass_checker: MassChecker::with_window(mass_window),
            distance_checker,
            ra_algorithm: GuideAlgorithm::default(),
            dec_algorithm: GuideAlgorithm::default(),
            multi_star: MultiStar::new(),
            paused: false,
            recenter_pending: false,
            settle: None,
            avg_distance: None,
            avg_distance_long: None,
            avg_distance_ra: None,
            avg_distance_ra_long: None,
            last_star_seen: None,
            stars_used: 0,
            last_stars_used: 0,
            config,
        }
    }

    /// Replace the per-axis correction filters. The instances are swapped
    /// wholesale, never mutated field-by-field.
    pub fn set_algorithms(&mut self, ra: GuideAlgorithm, dec: GuideAlgorithm) {
        self.ra_algorithm = ra;
        self.dec_algorithm = dec;
    }

    pub fn register_listener(
        &mut self,
        callback: impl FnMut(&GuideEvent) + Send + 'static,
    ) -> ListenerId {
        self.listeners.register(callback)
    }

    pub fn unregister_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    pub fn state(&self) -> GuiderState {
        self.state
    }

    pub fn lock_position(&self) -> Point {
        self.lock
    }

    pub fn primary_star(&self) -> &Star {
        &self.primary
    }

    pub fn secondary_count(&self) -> usize {
        self.multi_star.secondary_count()
    }

    /// Stars that contributed to the most recent offset estimate.
    pub fn stars_used(&self) -> usize {
        self.stars_used
    }

    pub fn last_stars_used(&self) -> usize {
        self.last_stars_used
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Record the camera exposure regime for mass-history comparability.
    pub fn set_camera_exposure(&mut self, exposure: Duration, auto: bool) {
        self.mass_checker.set_exposure(exposure, auto);
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Begin a guiding attempt. Always re-enters calibration gating; reusing
    /// a saved calibration is the mount's decision, not the state machine's.
    pub fn start_guiding(&mut self) -> Result<(), GuiderError> {
        if matches!(
            self.state,
            GuiderState::Calibrating | GuiderState::Calibrated | GuiderState::Guiding
        ) {
            return Err(GuiderError::InvalidState(self.state));
        }
        if !self.mount.is_connected() {
            return Err(GuiderError::MountNotConnected);
        }
        if !self.primary.position.is_valid() {
            return Err(GuiderError::NoStarSelected);
        }
        if !self.mount.begin_calibration(self.primary.position) {
            return Err(GuiderError::CalibrationRejected);
        }
        self.set_state(GuiderState::Calibrating);
        self.emit(GuideEvent::CalibrationStarted);
        Ok(())
    }

    pub fn stop_guiding(&mut self) {
        if self.state == GuiderState::Stop {
            return;
        }
        if matches!(
            self.state,
            GuiderState::Calibrating | GuiderState::Calibrated
        ) {
            self.emit(GuideEvent::CalibrationFailed {
                reason: "calibration interrupted".to_string(),
            });
        }
        if self.state == GuiderState::Guiding {
            self.mount.notify_guiding_stopped();
        }
        if !self.mount.is_busy() {
            self.emit(GuideEvent::GuidingStopped);
        }
        self.recenter_pending = false;
        self.settle = None;
        self.set_state(GuiderState::Stop);
    }

    pub fn start_looping(&mut self) -> Result<(), GuiderError> {
        match self.state {
            GuiderState::Uninitialized
            | GuiderState::Stop
            | GuiderState::Selecting
            | GuiderState::Selected => {
                let next = if self.primary.position.is_valid() {
                    GuiderState::Selected
                } else {
                    GuiderState::Selecting
                };
                self.set_state(next);
                Ok(())
            }
            other => Err(GuiderError::InvalidState(other)),
        }
    }

    pub fn stop_looping(&mut self) {
        if matches!(self.state, GuiderState::Selecting | GuiderState::Selected) {
            self.set_state(GuiderState::Stop);
        }
    }

    /// Select the guide star nearest `(x, y)` on the latest frame.
    pub fn select_guide_star(&mut self, x: f64, y: f64) -> Result<Star, GuiderError> {
        if matches!(
            self.state,
            GuiderState::Calibrating | GuiderState::Calibrated | GuiderState::Guiding
        ) {
            return Err(GuiderError::InvalidState(self.state));
        }
        let star = {
            let frame = self.latest_frame.as_ref().ok_or(GuiderError::NoFrame)?;
            let margin = self.config.search_region as f64;
            let max_x = frame.width() as f64 - margin;
            let max_y = frame.height() as f64 - margin;
            if x < margin || x > max_x || y < margin || y > max_y {
                return Err(GuiderError::InvalidCoordinates { x, y });
            }
            Star::find(
                frame,
                self.config.search_region,
                x,
                y,
                FindMode::Centroid,
                self.config.min_hfd,
                self.camera_info.saturation_adu,
            )
        };
        if !star.found() {
            return Err(GuiderError::StarNotFound(star.result));
        }
        self.primary = star;
        self.mass_checker.reset();
        self.distance_checker.reset();
        self.multi_star.clear();
        self.lock = star.position;
        self.lock_shift.rebase(star.position);
        self.emit(GuideEvent::LockPositionChanged {
            position: star.position,
        });
        self.emit(GuideEvent::StarSelected {
            position: star.position,
        });
        self.set_state(GuiderState::Selected);
        Ok(star)
    }

    pub fn deselect_guide_star(&mut self) {
        if matches!(
            self.state,
            GuiderState::Calibrating | GuiderState::Calibrated | GuiderState::Guiding
        ) {
            log::warn!("deselect ignored while {:?}", self.state);
            return;
        }
        self.primary.position.invalidate();
        self.multi_star.clear();
        if self.state == GuiderState::Selected {
            self.set_state(GuiderState::Selecting);
        }
    }

    /// Move the lock position. Returns false for an invalid or out-of-bounds
    /// point.
    pub fn set_lock_position(&mut self, position: Point) -> bool {
        if !self.is_valid_lock_position(&position) {
            return false;
        }
        self.lock = position;
        self.lock_shift.rebase(position);
        self.multi_star.note_lock_moved();
        self.emit(GuideEvent::LockPositionChanged { position });
        true
    }

    /// Whether `position` keeps a full search region plus one pixel inside
    /// the frame. Boundary values at exactly `1 + search_region` are valid.
    pub fn is_valid_lock_position(&self, position: &Point) -> bool {
        if !position.is_valid() {
            return false;
        }
        let margin = (1 + self.config.search_region) as f64;
        let max_x = self.camera_info.width as f64 - 1.0 - margin;
        let max_y = self.camera_info.height as f64 - 1.0 - margin;
        position.x() >= margin
            && position.x() <= max_x
            && position.y() >= margin
            && position.y() <= max_y
    }

    pub fn enable_lock_position_shift(&mut self, enabled: bool) {
        self.lock_shift.enabled = enabled;
        if enabled {
            self.lock_shift.rebase(self.lock);
            self.refresh_lock_shift_rate();
            log::info!(
                "lock shift enabled at ({:.2}, {:.2}) arcsec/hr",
                self.lock_shift.rate.ra_arcsec_per_hour,
                self.lock_shift.rate.dec_arcsec_per_hour
            );
        }
    }

    pub fn set_lock_shift_rate(&mut self, rate: LockShiftRate) {
        self.lock_shift.rate = rate;
        self.lock_shift.rebase(self.lock);
        self.refresh_lock_shift_rate();
    }

    /// Displace the lock position and arm the fast-recenter path.
    pub fn dither(&mut self, dx: f64, dy: f64) -> Result<(), GuiderError> {
        if self.state != GuiderState::Guiding {
            return Err(GuiderError::InvalidState(self.state));
        }
        let target = self.lock + Point::new(dx, dy);
        if !self.is_valid_lock_position(&target) {
            return Err(GuiderError::InvalidCoordinates {
                x: target.x(),
                y: target.y(),
            });
        }
        self.lock = target;
        self.lock_shift.rebase(target);
        self.recenter_pending = true;
        self.settle = Some(SettleState {
            started: Instant::now(),
        });
        self.ra_algorithm.reset();
        self.dec_algorithm.reset();
        self.multi_star.note_lock_moved();
        self.mount.notify_guiding_dithered(dx, dy, false);
        self.emit(GuideEvent::LockPositionChanged { position: target });
        self.emit(GuideEvent::GuidingDithered { dx, dy });
        Ok(())
    }

    /// While paused the guider keeps measuring and reporting but issues no
    /// corrective motion.
    pub fn set_paused(&mut self, paused: bool) {
        if paused == self.paused {
            return;
        }
        self.paused = paused;
        if paused {
            log::info!("guiding paused");
            self.mount.notify_guiding_paused();
        } else {
            log::info!("guiding resumed");
            self.mount.notify_guiding_resumed();
        }
    }

    /// Return to `Uninitialized`. A full reset also forgets the primary star
    /// and all secondary bookkeeping.
    pub fn reset(&mut self, full: bool) {
        log::info!("guider reset (full={full})");
        self.set_state(GuiderState::Uninitialized);
        self.recenter_pending = false;
        self.settle = None;
        self.ra_algorithm.reset();
        self.dec_algorithm.reset();
        self.reset_distance_stats();
        if full {
            self.primary.position.invalidate();
            self.multi_star.clear();
            self.mass_checker.reset();
            self.distance_checker.reset();
        }
    }

    /// Fast distance estimate, or 100.0 when no star has been seen for 20 s.
    pub fn current_error(&self, ra_only: bool) -> f64 {
        self.error_value(if ra_only {
            self.avg_distance_ra
        } else {
            self.avg_distance
        })
    }

    /// Smoothed distance estimate, same staleness sentinel.
    pub fn current_error_smoothed(&self, ra_only: bool) -> f64 {
        self.error_value(if ra_only {
            self.avg_distance_ra_long
        } else {
            self.avg_distance_long
        })
    }

    // ------------------------------------------------------------------
    // Frame processing
    // ------------------------------------------------------------------

    /// Process one incoming frame. `stopping` requests a transition to
    /// `Stop` regardless of detection.
    pub fn update_guide(&mut self, frame: &GuideFrame, stopping: bool) {
        if stopping {
            self.stop_guiding();
            return;
        }
        self.latest_frame = Some(frame.clone());
        self.update_lock_shift();

        let star = self.locate_primary(frame);
        if star.found() {
            self.primary = star;
            self.last_star_seen = Some(Instant::now());
            self.handle_star_found(frame, star);
        } else {
            self.handle_star_lost(frame.number(), star.result);
        }
    }

    /// A capture that produced no frame (abort, device failure, timeout) is
    /// a normal detection failure, not a fault.
    pub fn handle_capture_failure(&mut self) {
        self.distance_checker.activate();
        let frame_number = self
            .latest_frame
            .as_ref()
            .map(|f| f.number())
            .unwrap_or(0);
        self.handle_star_lost(frame_number, FindResult::Error);
    }

    // Find (or auto-select) the primary star and run the statistical gates.
    fn locate_primary(&mut self, frame: &GuideFrame) -> Star {
        let base = if self.primary.position.is_valid() {
            self.primary.position
        } else if self.lock.is_valid() {
            self.lock
        } else {
            match self.auto_find(frame) {
                Some(position) => position,
                None => {
                    self.distance_checker.activate();
                    return Star::not_found(Point::invalid(), FindResult::LowMass);
                }
            }
        };

        let mut star = Star::find(
            frame,
            self.config.search_region,
            base.x(),
            base.y(),
            FindMode::Centroid,
            self.config.min_hfd,
            self.camera_info.saturation_adu,
        );
        if !star.found() {
            self.distance_checker.activate();
            return star;
        }

        if self.config.mass_change_check {
            if let Some(check) = self
                .mass_checker
                .check_mass(star.mass, self.config.mass_change_threshold)
            {
                if check.reject {
                    log::warn!(
                        "mass change: {:.0} outside [{:.0}, {:.0}] (spike {:.0})",
                        star.mass,
                        check.low_limit,
                        check.high_limit,
                        check.spike_limit
                    );
                    star.result = FindResult::MassChange;
                    return star;
                }
            }
            self.mass_checker.add(star.mass);
        }

        if self.state == GuiderState::Guiding && self.lock.is_valid() {
            let distance = star.position.distance(&self.lock);
            let ra_only = self.mount.guiding_ra_only();
            if !self
                .distance_checker
                .check_distance(distance, ra_only, self.config.distance_tolerance)
            {
                log::warn!("implausible jump of {distance:.2} px rejected");
                star.result = FindResult::Error;
                return star;
            }
        }

        star
    }

    // Brightest plausible candidate for auto-selection while looping.
    fn auto_find(&self, frame: &GuideFrame) -> Option<Point> {
        let candidates = scan_candidates(frame, 1 + self.config.search_region);
        candidates
            .first()
            .map(|&(_, x, y)| Point::new(x as f64, y as f64))
    }

    fn handle_star_found(&mut self, frame: &GuideFrame, star: Star) {
        match self.state {
            GuiderState::Uninitialized => {
                self.emit(GuideEvent::Looping {
                    frame: frame.number(),
                    star: Some(star),
                });
            }
            GuiderState::Selecting => {
                self.emit(GuideEvent::Looping {
                    frame: frame.number(),
                    star: Some(star),
                });
                self.lock = star.position;
                self.lock_shift.rebase(star.position);
                self.emit(GuideEvent::LockPositionChanged {
                    position: star.position,
                });
                self.emit(GuideEvent::StarSelected {
                    position: star.position,
                });
                self.set_state(GuiderState::Selected);
            }
            GuiderState::Selected => {
                // Tracking without motion until guiding starts.
            }
            GuiderState::Calibrating => self.update_calibration(frame, star),
            GuiderState::Calibrated => self.begin_guiding(frame, star),
            GuiderState::Guiding => self.guide_step(frame, star),
            GuiderState::Stop => {}
        }
    }

    fn handle_star_lost(&mut self, frame_number: u64, result: FindResult) {
        match self.state {
            GuiderState::Uninitialized | GuiderState::Selecting => {
                self.emit(GuideEvent::Looping {
                    frame: frame_number,
                    star: None,
                });
            }
            GuiderState::Selected => {
                if !self.config.ignore_lost_star_looping {
                    self.set_state(GuiderState::Uninitialized);
                }
                self.emit(GuideEvent::StarLost { result });
            }
            GuiderState::Calibrating | GuiderState::Calibrated => {
                self.emit(GuideEvent::StarLost { result });
            }
            GuiderState::Guiding => {
                self.emit(GuideEvent::StarLost { result });
                // Dead reckoning: keep the guide cadence with a zero move.
                if !self.paused && self.mount.guiding_enabled() {
                    self.mount
                        .move_offset(Point::new(0.0, 0.0), MoveMode::DeadReckon);
                }
            }
            GuiderState::Stop => {}
        }
    }

    fn update_calibration(&mut self, frame: &GuideFrame, star: Star) {
        if self.paused {
            return;
        }
        match self.mount.update_calibration_state(star.position) {
            CalibrationUpdate::Step(info) => {
                self.emit(GuideEvent::CalibrationStep(info));
            }
            CalibrationUpdate::Failed(reason) => {
                log::warn!("calibration failed: {reason}");
                self.set_state(GuiderState::Uninitialized);
                self.emit(GuideEvent::CalibrationFailed { reason });
            }
            CalibrationUpdate::Complete(calibration) => {
                log::info!(
                    "calibration complete: RA axis at {:.1} deg",
                    calibration.x_angle.to_degrees()
                );
                self.set_state(GuiderState::Calibrated);
                self.emit(GuideEvent::CalibrationCompleted { calibration });
                self.refresh_lock_shift_rate();
                self.begin_guiding(frame, star);
            }
        }
    }

    fn begin_guiding(&mut self, frame: &GuideFrame, star: Star) {
        if !self.lock.is_valid() {
            self.lock = star.position;
            self.lock_shift.rebase(star.position);
            self.emit(GuideEvent::LockPositionChanged {
                position: star.position,
            });
        }
        self.ra_algorithm.reset();
        self.dec_algorithm.reset();
        self.reset_distance_stats();
        if self.config.multi_star {
            self.multi_star
                .acquire(frame, &star, &self.config, self.camera_info.saturation_adu);
        }
        self.set_state(GuiderState::Guiding);
        self.mount.notify_guiding_started();
    }

    fn guide_step(&mut self, frame: &GuideFrame, star: Star) {
        if !self.lock.is_valid() {
            self.emit(GuideEvent::LockPositionLost);
            self.set_state(GuiderState::Selected);
            return;
        }
        let raw_offset = star.position - self.lock;

        if self.recenter_pending {
            self.fast_recenter(raw_offset);
            return;
        }

        let (camera_offset, stars_used) = if self.config.multi_star
            && self.multi_star.secondary_count() > 0
            && self.mount.guiding_enabled()
            && self.settle.is_none()
        {
            self.multi_star.refine(
                frame,
                &star,
                raw_offset,
                &self.config,
                self.camera_info.saturation_adu,
            )
        } else {
            (raw_offset, 1)
        };
        self.last_stars_used = self.stars_used;
        self.stars_used = stars_used;

        let mount_offset = self.mount.camera_to_mount(camera_offset);
        let offset = GuiderOffset {
            camera: camera_offset,
            mount: mount_offset,
        };
        self.update_error_estimates(&offset);
        self.update_settle(camera_offset.norm());

        let ra_input = mount_offset.x();
        let dec_input = if self.mount.guiding_ra_only() {
            0.0
        } else {
            mount_offset.y()
        };
        let (ra_correction, dec_correction) = if self.paused {
            (0.0, 0.0)
        } else {
            (
                self.ra_algorithm.compute(ra_input),
                self.dec_algorithm.compute(dec_input),
            )
        };

        if !self.paused && self.mount.guiding_enabled() {
            let correction = Point::new(ra_correction, dec_correction);
            if !self.mount.move_offset(correction, MoveMode::GuideStep) {
                log::warn!("mount rejected guide correction");
            }
        }

        self.emit(GuideEvent::GuideStep(GuideStepInfo {
            frame: frame.number(),
            camera_dx: camera_offset.x(),
            camera_dy: camera_offset.y(),
            mount_dx: mount_offset.x(),
            mount_dy: mount_offset.y(),
            ra_correction,
            dec_correction,
            mass: star.mass,
            snr: star.snr,
            hfd: star.hfd,
            stars_used,
            avg_distance: self.avg_distance.unwrap_or(0.0),
        }));
    }

    // Bounded direct moves toward the lock position, bypassing the filters.
    fn fast_recenter(&mut self, offset: Point) {
        if offset.x().abs() < RECENTER_DONE && offset.y().abs() < RECENTER_DONE {
            log::info!("dither recenter complete");
            self.recenter_pending = false;
            self.reset_distance_stats();
            return;
        }
        let step = self.config.fast_recenter_max_step;
        let camera_move = Point::new(
            offset.x().clamp(-step, step),
            offset.y().clamp(-step, step),
        );
        let mount_move = self.mount.camera_to_mount(camera_move);
        if !self.paused && self.mount.guiding_enabled() {
            self.mount.move_offset(mount_move, MoveMode::Direct);
            self.mount.notify_direct_move(mount_move.norm());
        }
    }

    fn update_settle(&mut self, distance: f64) {
        let Some(started) = self.settle.as_ref().map(|s| s.started) else {
            return;
        };
        if distance <= self.config.settle_tolerance {
            log::info!("dither settled at {distance:.2} px");
            self.mount.notify_dither_settle_done(true);
            self.settle = None;
        } else if started.elapsed().as_secs_f64() > self.config.settle_timeout_secs {
            log::warn!("dither settle timed out at {distance:.2} px");
            self.mount.notify_dither_settle_done(false);
            self.settle = None;
        }
    }

    fn update_lock_shift(&mut self) {
        if self.state != GuiderState::Guiding || !self.lock_shift.enabled {
            return;
        }
        if self.lock_shift.camera_rate.is_none() {
            self.refresh_lock_shift_rate();
        }
        let (Some(rate), Some(started)) = (self.lock_shift.camera_rate, self.lock_shift.started)
        else {
            return;
        };
        let elapsed = started.elapsed().as_secs_f64();
        let shifted = self.lock_shift.base + rate * elapsed;
        if self.is_valid_lock_position(&shifted) {
            self.lock = shifted;
            self.multi_star.note_lock_moved();
        } else {
            log::warn!("lock shift reached the frame limit; disabling");
            self.lock_shift.enabled = false;
            self.emit(GuideEvent::LockShiftLimitReached);
        }
    }

    // Convert the mount-space shift rate (arcsec/hr) to camera px/sec.
    // Needs axis angles, so it is refreshed whenever calibration completes.
    fn refresh_lock_shift_rate(&mut self) {
        let Some(calibration) = self.mount.calibration() else {
            self.lock_shift.camera_rate = None;
            return;
        };
        let scale = self.camera_info.pixel_scale;
        if scale <= 0.0 {
            self.lock_shift.camera_rate = None;
            return;
        }
        let ra = self.lock_shift.rate.ra_arcsec_per_hour / scale / 3600.0;
        let dec = self.lock_shift.rate.dec_arcsec_per_hour / scale / 3600.0;
        self.lock_shift.camera_rate = Some(calibration.mount_to_camera(Point::new(ra, dec)));
    }

    fn update_error_estimates(&mut self, offset: &GuiderOffset) {
        let distance = offset.camera.norm();
        let ra_distance = offset.mount.x().abs();
        ema(&mut self.avg_distance, AVG_FAST_WEIGHT, distance);
        ema(&mut self.avg_distance_long, AVG_SMOOTHED_WEIGHT, distance);
        ema(&mut self.avg_distance_ra, AVG_FAST_WEIGHT, ra_distance);
        ema(
            &mut self.avg_distance_ra_long,
            AVG_SMOOTHED_WEIGHT,
            ra_distance,
        );
    }

    fn reset_distance_stats(&mut self) {
        self.avg_distance = None;
        self.avg_distance_long = None;
        self.avg_distance_ra = None;
        self.avg_distance_ra_long = None;
        self.multi_star.reset_stats();
    }

    fn error_value(&self, average: Option<f64>) -> f64 {
        match (average, self.last_star_seen) {
            (Some(value), Some(seen)) if seen.elapsed() < STALE_AFTER => value,
            _ => STALE_ERROR_SENTINEL,
        }
    }

    fn set_state(&mut self, next: GuiderState) {
        if next != self.state {
            log::info!("guider state {:?} -> {next:?}", self.state);
            self.state = next;
        }
    }

    fn emit(&mut self, event: GuideEvent) {
        self.listeners.emit(&event);
    }
}

fn ema(slot: &mut Option<f64>, weight: f64, value: f64) {
    *slot = Some(match *slot {
        Some(current) => current + weight * (value - current),
        None => value,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{Calibration, Parity};
    use crate::mount::{CalibrationStepInfo, GuideDirection};
    use crate::test_util::synth_frame;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct MountLog {
        moves: Vec<(Point, MoveMode)>,
        dithered: u32,
        settle_done: Vec<bool>,
        started: u32,
        stopped: u32,
    }

    struct MockMount {
        connected: bool,
        calibrated: bool,
        steps_needed: u32,
        steps_done: u32,
        calibration: Option<Calibration>,
        ra_only: bool,
        busy: bool,
        log: Arc<Mutex<MountLog>>,
    }

    impl MockMount {
        fn new(steps_needed: u32) -> (Self, Arc<Mutex<MountLog>>) {
            let log = Arc::new(Mutex::new(MountLog::default()));
            (
                Self {
                    connected: true,
                    calibrated: false,
                    steps_needed,
                    steps_done: 0,
                    calibration: None,
                    ra_only: false,
                    busy: false,
                    log: log.clone(),
                },
                log,
            )
        }
    }

    impl GuideMount for MockMount {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn is_calibrated(&self) -> bool {
            self.calibrated
        }

        fn guiding_enabled(&self) -> bool {
            true
        }

        fn guiding_ra_only(&self) -> bool {
            self.ra_only
        }

        fn is_busy(&self) -> bool {
            self.busy
        }

        fn ra_parity(&self) -> Parity {
            Parity::Even
        }

        fn dec_parity(&self) -> Parity {
            Parity::Even
        }

        fn declination(&self) -> f64 {
            0.0
        }

        fn begin_calibration(&mut self, _start: Point) -> bool {
            self.steps_done = 0;
            self.calibrated = false;
            true
        }

        fn update_calibration_state(&mut self, star: Point) -> CalibrationUpdate {
            if self.steps_done < self.steps_needed {
                self.steps_done += 1;
                CalibrationUpdate::Step(CalibrationStepInfo {
                    direction: GuideDirection::West,
                    step: self.steps_done,
                    dx: 0.0,
                    dy: 0.0,
                    position: star,
                    distance: 0.0,
                })
            } else {
                self.calibrated = true;
                let calibration = Calibration::new(0.0, 0.0, Parity::Even, Parity::Even);
                self.calibration = Some(calibration);
                CalibrationUpdate::Complete(calibration)
            }
        }

        fn calibration(&self) -> Option<Calibration> {
            self.calibration
        }

        fn camera_to_mount(&self, camera: Point) -> Point {
            match self.calibration {
                Some(cal) => cal.camera_to_mount(camera),
                None => camera,
            }
        }

        fn move_offset(&mut self, correction: Point, mode: MoveMode) -> bool {
            self.log.lock().unwrap().moves.push((correction, mode));
            true
        }

        fn notify_guiding_started(&mut self) {
            self.log.lock().unwrap().started += 1;
        }

        fn notify_guiding_stopped(&mut self) {
            self.log.lock().unwrap().stopped += 1;
        }

        fn notify_guiding_dithered(&mut self, _dx: f64, _dy: f64, _mount_coords: bool) {
            self.log.lock().unwrap().dithered += 1;
        }

        fn notify_dither_settle_done(&mut self, success: bool) {
            self.log.lock().unwrap().settle_done.push(success);
        }
    }

    const STAR: (f64, f64, f64) = (64.0, 64.0, 30000.0);

    fn info() -> CameraInfo {
        CameraInfo {
            width: 256,
            height: 256,
            pixel_scale: 1.0,
            saturation_adu: 65535,
        }
    }

    fn config() -> GuiderConfig {
        GuiderConfig {
            multi_star: false,
            ..Default::default()
        }
    }

    fn events(guider: &mut Guider) -> Arc<Mutex<Vec<GuideEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        guider.register_listener(move |event| {
            seen_clone.lock().unwrap().push(event.clone());
        });
        seen
    }

    fn count_star_lost(events: &[GuideEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, GuideEvent::StarLost { .. }))
            .count()
    }

    #[test]
    fn test_selecting_to_selected_sets_lock() {
        let (mount, _log) = MockMount::new(2);
        let mut guider = Guider::new(Box::new(mount), info(), config());
        let seen = events(&mut guider);

        guider.start_looping().unwrap();
        assert_eq!(guider.state(), GuiderState::Selecting);

        let frame = synth_frame(256, 256, &[STAR]);
        guider.update_guide(&frame, false);

        assert_eq!(guider.state(), GuiderState::Selected);
        let lock = guider.lock_position();
        assert!(lock.is_valid());
        assert!(lock.distance(&Point::new(64.0, 64.0)) < 0.5);

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.iter()
                .filter(|e| matches!(e, GuideEvent::StarSelected { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn test_star_lost_while_selected() {
        let (mount, _log) = MockMount::new(2);
        let mut guider = Guider::new(Box::new(mount), info(), config());
        let seen = events(&mut guider);

        guider.start_looping().unwrap();
        guider.update_guide(&synth_frame(256, 256, &[STAR]), false);
        assert_eq!(guider.state(), GuiderState::Selected);

        // Empty frame: star lost, back to Uninitialized, one StarLost.
        guider.update_guide(&synth_frame(256, 256, &[]), false);
        assert_eq!(guider.state(), GuiderState::Uninitialized);
        assert_eq!(count_star_lost(&seen.lock().unwrap()), 1);

        // Another empty frame only loops; no second StarLost.
        guider.update_guide(&synth_frame(256, 256, &[]), false);
        assert_eq!(count_star_lost(&seen.lock().unwrap()), 1);
    }

    #[test]
    fn test_lock_position_validity_boundaries() {
        let (mount, _log) = MockMount::new(0);
        let guider = Guider::new(Box::new(mount), info(), config());
        // margin = 1 + 15 = 16 on a 256 px frame
        assert!(guider.is_valid_lock_position(&Point::new(16.0, 128.0)));
        assert!(guider.is_valid_lock_position(&Point::new(239.0, 128.0)));
        assert!(!guider.is_valid_lock_position(&Point::new(15.9, 128.0)));
        assert!(!guider.is_valid_lock_position(&Point::new(239.1, 128.0)));
        assert!(!guider.is_valid_lock_position(&Point::new(128.0, 15.0)));
        assert!(!guider.is_valid_lock_position(&Point::invalid()));
    }

    #[test]
    fn test_reset_idempotent() {
        let (mount, _log) = MockMount::new(0);
        let mut guider = Guider::new(Box::new(mount), info(), config());
        guider.start_looping().unwrap();
        guider.update_guide(&synth_frame(256, 256, &[STAR]), false);
        let valid_before = guider.primary_star().position.is_valid();

        guider.reset(false);
        assert_eq!(guider.state(), GuiderState::Uninitialized);
        assert_eq!(guider.primary_star().position.is_valid(), valid_before);

        guider.reset(false);
        assert_eq!(guider.state(), GuiderState::Uninitialized);
        assert_eq!(guider.primary_star().position.is_valid(), valid_before);
    }

    #[test]
    fn test_full_reset_forgets_star() {
        let (mount, _log) = MockMount::new(0);
        let mut guider = Guider::new(Box::new(mount), info(), config());
        guider.start_looping().unwrap();
        guider.update_guide(&synth_frame(256, 256, &[STAR]), false);
        assert!(guider.primary_star().position.is_valid());

        guider.reset(true);
        assert!(!guider.primary_star().position.is_valid());
    }

    #[test]
    fn test_current_error_sentinel_without_star() {
        let (mount, _log) = MockMount::new(0);
        let guider = Guider::new(Box::new(mount), info(), config());
        assert_eq!(guider.current_error(false), 100.0);
        assert_eq!(guider.current_error_smoothed(true), 100.0);
    }

    #[test]
    fn test_select_guide_star_bounds() {
        let (mount, _log) = MockMount::new(0);
        let mut guider = Guider::new(Box::new(mount), info(), config());

        // No frame yet.
        assert!(matches!(
            guider.select_guide_star(64.0, 64.0),
            Err(GuiderError::NoFrame)
        ));

        guider.start_looping().unwrap();
        guider.update_guide(&synth_frame(256, 256, &[STAR]), false);

        assert!(matches!(
            guider.select_guide_star(5.0, 64.0),
            Err(GuiderError::InvalidCoordinates { .. })
        ));
        assert!(matches!(
            guider.select_guide_star(64.0, 250.0),
            Err(GuiderError::InvalidCoordinates { .. })
        ));

        let star = guider.select_guide_star(64.0, 64.0).unwrap();
        assert!(star.found());
        assert_eq!(guider.state(), GuiderState::Selected);
    }

    #[test]
    fn test_calibration_to_guiding() {
        let (mount, log) = MockMount::new(2);
        let mut guider = Guider::new(Box::new(mount), info(), config());
        let seen = events(&mut guider);

        let frame = synth_frame(256, 256, &[STAR]);
        guider.start_looping().unwrap();
        guider.update_guide(&frame, false);
        guider.start_guiding().unwrap();
        assert_eq!(guider.state(), GuiderState::Calibrating);

        // Two step frames, then completion promotes straight to Guiding.
        guider.update_guide(&frame, false);
        guider.update_guide(&frame, false);
        assert_eq!(guider.state(), GuiderState::Calibrating);
        guider.update_guide(&frame, false);
        assert_eq!(guider.state(), GuiderState::Guiding);

        assert_eq!(log.lock().unwrap().started, 1);
        let seen = seen.lock().unwrap();
        assert!(seen
            .iter()
            .any(|e| matches!(e, GuideEvent::CalibrationCompleted { .. })));
        assert_eq!(
            seen.iter()
                .filter(|e| matches!(e, GuideEvent::CalibrationStep(_)))
                .count(),
            2
        );
    }

    #[test]
    fn test_guiding_emits_corrections() {
        let (mount, log) = MockMount::new(0);
        let mut guider = Guider::new(Box::new(mount), info(), config());

        let frame = synth_frame(256, 256, &[STAR]);
        guider.start_looping().unwrap();
        guider.update_guide(&frame, false);
        guider.start_guiding().unwrap();
        guider.update_guide(&frame, false);
        assert_eq!(guider.state(), GuiderState::Guiding);

        // Star drifts +1 px in X: expect a guide-step move with positive RA.
        let drifted = synth_frame(256, 256, &[(65.0, 64.0, 30000.0)]);
        guider.update_guide(&drifted, false);

        let log = log.lock().unwrap();
        let (correction, mode) = *log
            .moves
            .iter()
            .rev()
            .find(|(_, mode)| *mode == MoveMode::GuideStep)
            .expect("no guide step recorded");
        assert_eq!(mode, MoveMode::GuideStep);
        assert!(
            correction.x() > 0.3 && correction.x() < 1.0,
            "unexpected RA correction {:.3}",
            correction.x()
        );
    }

    #[test]
    fn test_dead_reckoning_on_lost_star() {
        let (mount, log) = MockMount::new(0);
        let mut guider = Guider::new(Box::new(mount), info(), config());

        let frame = synth_frame(256, 256, &[STAR]);
        guider.start_looping().unwrap();
        guider.update_guide(&frame, false);
        guider.start_guiding().unwrap();
        guider.update_guide(&frame, false);

        guider.update_guide(&synth_frame(256, 256, &[]), false);
        assert_eq!(guider.state(), GuiderState::Guiding);

        let log = log.lock().unwrap();
        let (correction, mode) = *log.moves.last().unwrap();
        assert_eq!(mode, MoveMode::DeadReckon);
        assert_eq!(correction.x(), 0.0);
        assert_eq!(correction.y(), 0.0);
    }

    #[test]
    fn test_dither_arms_recenter() {
        let (mount, log) = MockMount::new(0);
        let mut guider = Guider::new(Box::new(mount), info(), config());

        let frame = synth_frame(256, 256, &[STAR]);
        guider.start_looping().unwrap();
        guider.update_guide(&frame, false);
        guider.start_guiding().unwrap();
        guider.update_guide(&frame, false);

        assert!(matches!(
            guider.dither(3.0, 0.0),
            Ok(())
        ));
        assert_eq!(log.lock().unwrap().dithered, 1);

        // Star is 3 px from the new lock: the next frame issues a bounded
        // direct move, not a filtered guide step.
        guider.update_guide(&frame, false);
        let log = log.lock().unwrap();
        let (_, mode) = *log.moves.last().unwrap();
        assert_eq!(mode, MoveMode::Direct);
    }

    #[test]
    fn test_dither_rejected_outside_guiding() {
        let (mount, _log) = MockMount::new(0);
        let mut guider = Guider::new(Box::new(mount), info(), config());
        assert!(matches!(
            guider.dither(1.0, 1.0),
            Err(GuiderError::InvalidState(_))
        ));
    }

    #[test]
    fn test_stopping_frame_stops() {
        let (mount, _log) = MockMount::new(0);
        let mut guider = Guider::new(Box::new(mount), info(), config());
        let seen = events(&mut guider);

        guider.start_looping().unwrap();
        guider.update_guide(&synth_frame(256, 256, &[STAR]), true);
        assert_eq!(guider.state(), GuiderState::Stop);
        assert!(seen
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, GuideEvent::GuidingStopped)));
    }

    #[test]
    fn test_paused_guider_does_not_move() {
        let (mount, log) = MockMount::new(0);
        let mut guider = Guider::new(Box::new(mount), info(), config());

        let frame = synth_frame(256, 256, &[STAR]);
        guider.start_looping().unwrap();
        guider.update_guide(&frame, false);
        guider.start_guiding().unwrap();
        guider.update_guide(&frame, false);

        guider.set_paused(true);
        let moves_before = log.lock().unwrap().moves.len();
        let drifted = synth_frame(256, 256, &[(66.0, 64.0, 30000.0)]);
        guider.update_guide(&drifted, false);
        assert_eq!(log.lock().unwrap().moves.len(), moves_before);
    }

    #[test]
    fn test_start_guiding_preconditions() {
        let (mount, _log) = MockMount::new(0);
        let mut guider = Guider::new(Box::new(mount), info(), config());
        assert!(matches!(
            guider.start_guiding(),
            Err(GuiderError::NoStarSelected)
        ));
    }

    #[test]
    fn test_set_lock_position_bounds() {
        let (mount, _log) = MockMount::new(0);
        let mut guider = Guider::new(Box::new(mount), info(), config());
        assert!(!guider.set_lock_position(Point::invalid()));
        assert!(!guider.set_lock_position(Point::new(2.0, 2.0)));
        assert!(guider.set_lock_position(Point::new(100.0, 100.0)));
        assert_eq!(guider.lock_position().x(), 100.0);
    }
}
