//! Runtime measurement of the latitude error a GPU makes when evaluating the inverse Gudermannian.
//!
//! Once every few frames a 1×1 probe is drawn for the current center latitude, the result is read
//! back asynchronously and the difference to the exact value becomes a correction that is eased
//! into the spherical projection matrix.

use std::f32::consts as f32c;
use std::f64::consts::{FRAC_PI_2, PI, TAU};
use tracing::{debug, trace, warn};

use crate::config::ErrorMeasurementConfig;
use crate::ease::{ease_cubic_in_out, lerp};
use crate::geo::mercator_y_from_lat;

/// Result of polling the readback fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FencePoll {
    Pending,
    /// Readback finished with the probe pixel
    Ready([u8; 4]),
    /// The platform reported a failed wait
    WaitFailed,
}

/// The GPU side of the measurement: draw the probe and read it back without blocking.
pub trait GpuProbe {
    /// Draw the probe for `mercator_y` into a 1×1 RGBA8 target and start an asynchronous readback.
    /// `expected_latitude` is the exact latitude in radians the probe compares against.
    fn issue(&mut self, mercator_y: f64, expected_latitude: f64);

    /// Check whether the readback finished. Must not block.
    fn poll(&mut self) -> FencePoll;
}

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementState {
    Idle,
    /// Probe drawn at `issued_frame`, waiting before the first readback attempt
    Measuring { issued_frame: u64 },
    /// Polling the fence every frame
    AwaitingSync,
}

/// Decode the probe pixel: `b0/256 + b1/65536 + b2/16777216`, negative when `b3 < 127`.
pub fn decode_error(bytes: [u8; 4]) -> f64 {
    let magnitude = f64::from(bytes[0]) / 256.0
        + f64::from(bytes[1]) / 65_536.0
        + f64::from(bytes[2]) / 16_777_216.0;
    if bytes[3] < 127 {
        -magnitude
    } else {
        magnitude
    }
}

/// Inverse of [`decode_error`] for magnitudes below 1.
pub fn encode_error(value: f64) -> [u8; 4] {
    let scaled = (value.abs() * 16_777_216.0).round().min(16_777_215.0) as u32;
    [
        (scaled >> 16) as u8,
        (scaled >> 8) as u8,
        scaled as u8,
        if value < 0.0 { 0 } else { 255 },
    ]
}

/// Exact latitude in radians for a Mercator y.
#[inline(always)]
pub fn expected_latitude(mercator_y: f64) -> f64 {
    2.0 * (PI - mercator_y * TAU).exp().atan() - FRAC_PI_2
}

/// Correction in radians, eased from its previous value to `-measurement`.
#[derive(Debug, Clone, PartialEq)]
pub struct LatitudeErrorCorrection {
    measurement: f64,
    previous: f64,
    last_change: f64,
    duration: f64,
    grace: f64,
}

impl LatitudeErrorCorrection {
    pub fn new(duration: f64, grace: f64) -> Self {
        Self {
            measurement: 0.0,
            previous: 0.0,
            last_change: -1000.0,
            duration,
            grace,
        }
    }

    /// Start easing towards a new measurement. Repeating the same value changes nothing.
    pub fn set_measurement(&mut self, measurement: f64, now: f64) {
        if measurement == self.measurement {
            return;
        }
        self.previous = self.value(now);
        self.measurement = measurement;
        self.last_change = now;
    }

    pub fn measurement(&self) -> f64 {
        self.measurement
    }

    pub fn value(&self, now: f64) -> f64 {
        let mix = if self.duration > 0.0 {
            ((now - self.last_change) / self.duration).clamp(0.0, 1.0)
        } else {
            1.0
        };
        lerp(self.previous, -self.measurement, ease_cubic_in_out(mix))
    }

    pub fn is_animating(&self, now: f64) -> bool {
        now - self.last_change < self.duration + self.grace
    }
}

/// Frame-driven state machine with at most one readback in flight.
#[derive(Debug, Clone)]
pub struct ErrorMeasurementLoop {
    config: ErrorMeasurementConfig,
    state: MeasurementState,
    last_readback_frame: i64,
    correction: LatitudeErrorCorrection,
    warned: bool,
}

impl ErrorMeasurementLoop {
    pub fn new(config: ErrorMeasurementConfig) -> Self {
        let correction = LatitudeErrorCorrection::new(config.error_transition_seconds, config.dirty_grace_seconds);
        Self {
            config,
            state: MeasurementState::Idle,
            last_readback_frame: -1000,
            correction,
            warned: false,
        }
    }

    pub fn state(&self) -> MeasurementState {
        self.state
    }

    /// Current correction in radians.
    pub fn correction(&self, now: f64) -> f64 {
        self.correction.value(now)
    }

    /// Last raw measurement in radians.
    pub fn measurement(&self) -> f64 {
        self.correction.measurement()
    }

    /// True while the correction is easing or a readback is outstanding.
    pub fn is_dirty(&self, now: f64) -> bool {
        self.correction.is_animating(now) || self.state != MeasurementState::Idle
    }

    /// Advance one frame. `center_lat` is the latitude in degrees the probe measures at.
    pub fn advance(&mut self, probe: &mut dyn GpuProbe, frame: u64, center_lat: f64, now: f64) {
        let frame_i = i64::try_from(frame).unwrap_or(i64::MAX);
        match self.state {
            MeasurementState::Idle => {
                if frame_i >= self.last_readback_frame + self.config.measure_wait_frames as i64 {
                    let mercator_y = mercator_y_from_lat(center_lat);
                    probe.issue(mercator_y, expected_latitude(mercator_y));
                    self.state = MeasurementState::Measuring { issued_frame: frame };
                    trace!(frame, mercator_y, "issued latitude probe");
                }
            }
            MeasurementState::Measuring { issued_frame } => {
                if frame >= issued_frame + self.config.readback_wait_frames {
                    self.state = MeasurementState::AwaitingSync;
                    trace!(frame, "awaiting probe readback");
                    self.poll(probe, frame_i, now);
                }
            }
            MeasurementState::AwaitingSync => self.poll(probe, frame_i, now),
        }
    }

    fn poll(&mut self, probe: &mut dyn GpuProbe, frame: i64, now: f64) {
        match probe.poll() {
            FencePoll::Pending => {}
            FencePoll::Ready(bytes) => {
                let measurement = decode_error(bytes);
                if measurement != self.correction.measurement() {
                    debug!(measurement, "accepted latitude error measurement");
                }
                self.correction.set_measurement(measurement, now);
                self.last_readback_frame = frame;
                self.state = MeasurementState::Idle;
            }
            FencePoll::WaitFailed => {
                if !self.warned {
                    warn!("latitude probe readback failed, skipping this measurement");
                    self.warned = true;
                }
                self.last_readback_frame = frame;
                self.state = MeasurementState::Idle;
            }
        }
    }

    /// Drop any in-flight readback. The next `advance` starts a fresh cycle.
    pub fn abandon(&mut self) {
        if self.state != MeasurementState::Idle {
            trace!("abandoned latitude probe");
        }
        self.state = MeasurementState::Idle;
    }
}

/// CPU stand-in for the GPU probe. Evaluates the inverse Gudermannian in single precision and
/// reports its fence ready after `latency_polls` pending polls.
#[derive(Debug, Clone)]
pub struct SoftwareProbe {
    latency_polls: u32,
    pending: Option<(u32, [u8; 4])>,
}

impl SoftwareProbe {
    pub fn new(latency_polls: u32) -> Self {
        Self {
            latency_polls,
            pending: None,
        }
    }
}

impl Default for SoftwareProbe {
    fn default() -> Self {
        Self::new(1)
    }
}

impl GpuProbe for SoftwareProbe {
    fn issue(&mut self, mercator_y: f64, expected_latitude: f64) {
        let y = mercator_y as f32;
        let measured = 2.0 * (f32c::PI - y * f32c::TAU).exp().atan() - f32c::FRAC_PI_2;
        self.pending = Some((self.latency_polls, encode_error(f64::from(measured) - expected_latitude)));
    }

    fn poll(&mut self) -> FencePoll {
        match self.pending.take() {
            None => FencePoll::Pending,
            Some((0, bytes)) => FencePoll::Ready(bytes),
            Some((remaining, bytes)) => {
                self.pending = Some((remaining - 1, bytes));
                FencePoll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::collections::VecDeque;

    /// Probe whose fence answers come from a script.
    #[derive(Default)]
    struct ScriptedProbe {
        issued: Vec<f64>,
        answers: VecDeque<FencePoll>,
        polls: usize,
    }

    impl GpuProbe for ScriptedProbe {
        fn issue(&mut self, mercator_y: f64, _expected_latitude: f64) {
            self.issued.push(mercator_y);
        }

        fn poll(&mut self) -> FencePoll {
            self.polls += 1;
            self.answers.pop_front().unwrap_or(FencePoll::Pending)
        }
    }

    fn new_loop() -> ErrorMeasurementLoop {
        ErrorMeasurementLoop::new(ErrorMeasurementConfig::default())
    }

    #[test]
    fn test_decode() {
        assert_abs_diff_eq!(decode_error([128, 0, 0, 200]), 0.5);
        assert_abs_diff_eq!(decode_error([128, 0, 0, 0]), -0.5);
        assert_abs_diff_eq!(decode_error([0, 0, 1, 127]), 1.0 / 16_777_216.0);
        assert_abs_diff_eq!(decode_error([0, 128, 0, 126]), -1.0 / 512.0);
    }

    #[test]
    fn test_encode_inverts_decode() {
        for value in [0.5, -0.5, 0.001_234, -3.0e-7, 0.0] {
            assert_abs_diff_eq!(decode_error(encode_error(value)), value, epsilon = 1.0 / 16_777_216.0);
        }
    }

    #[test]
    fn test_expected_latitude_matches_mercator() {
        let y = mercator_y_from_lat(35.0);
        assert_abs_diff_eq!(expected_latitude(y).to_degrees(), 35.0, epsilon = 1e-9);
    }

    #[test]
    fn test_cycle() {
        let mut lp = new_loop();
        let mut probe = ScriptedProbe::default();
        probe.answers = VecDeque::from([FencePoll::Pending, FencePoll::Ready([0, 1, 0, 255])]);

        lp.advance(&mut probe, 0, 0.0, 0.0);
        assert_eq!(lp.state(), MeasurementState::Measuring { issued_frame: 0 });
        assert_eq!(probe.issued.len(), 1);
        assert_abs_diff_eq!(probe.issued[0], 0.5, epsilon = 1e-12);

        for frame in 1..4 {
            lp.advance(&mut probe, frame, 0.0, 0.0);
            assert_eq!(probe.polls, 0);
        }
        lp.advance(&mut probe, 4, 0.0, 0.0);
        assert_eq!(lp.state(), MeasurementState::AwaitingSync);
        assert_eq!(probe.polls, 1);
        assert!(lp.is_dirty(0.0));

        lp.advance(&mut probe, 5, 0.0, 1.0);
        assert_eq!(lp.state(), MeasurementState::Idle);
        assert_abs_diff_eq!(lp.measurement(), 1.0 / 65_536.0);

        // Next probe only after the measure wait
        lp.advance(&mut probe, 10, 0.0, 1.0);
        assert_eq!(probe.issued.len(), 1);
        lp.advance(&mut probe, 11, 0.0, 1.0);
        assert_eq!(probe.issued.len(), 2);
    }

    #[test]
    fn test_correction_eases_to_negated_measurement() {
        let mut lp = new_loop();
        let mut probe = ScriptedProbe::default();
        probe.answers = VecDeque::from([FencePoll::Ready([128, 0, 0, 255])]);
        lp.advance(&mut probe, 0, 0.0, 0.0);
        lp.advance(&mut probe, 4, 0.0, 2.0);

        assert_abs_diff_eq!(lp.correction(2.0), 0.0);
        assert_abs_diff_eq!(lp.correction(2.25), -0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(lp.correction(2.5), -0.5);
        assert!(lp.is_dirty(2.6));
        assert!(!lp.is_dirty(2.75));
    }

    #[test]
    fn test_wait_failure_resets() {
        let mut lp = new_loop();
        let mut probe = ScriptedProbe::default();
        probe.answers = VecDeque::from([FencePoll::WaitFailed, FencePoll::WaitFailed]);
        lp.advance(&mut probe, 0, 10.0, 0.0);
        lp.advance(&mut probe, 4, 10.0, 0.0);
        assert_eq!(lp.state(), MeasurementState::Idle);
        assert_abs_diff_eq!(lp.measurement(), 0.0);

        lp.advance(&mut probe, 10, 10.0, 0.0);
        lp.advance(&mut probe, 14, 10.0, 0.0);
        assert_eq!(lp.state(), MeasurementState::Idle);
        assert!(lp.warned);
        assert_eq!(probe.issued.len(), 2);
    }

    #[test]
    fn test_abandon() {
        let mut lp = new_loop();
        let mut probe = ScriptedProbe::default();
        lp.advance(&mut probe, 0, 0.0, 0.0);
        lp.abandon();
        assert_eq!(lp.state(), MeasurementState::Idle);
        assert!(!lp.is_dirty(0.0));
    }

    #[test]
    fn test_software_probe_round_trip() {
        let mut lp = new_loop();
        let mut probe = SoftwareProbe::new(2);
        for frame in 0..20 {
            lp.advance(&mut probe, frame, 60.0, frame as f64 / 60.0);
        }
        // Single precision is off by far less than a hundredth of a degree
        assert!(lp.measurement().abs() < 1e-4);
        assert_eq!(lp.state(), MeasurementState::Idle);
    }
}
