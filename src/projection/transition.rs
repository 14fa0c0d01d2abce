use crate::config::TransitionConfig;
use crate::ease::smoothstep;

/// A linear 0..1 ramp towards `on` (1) or off (0).
#[derive(Debug, Clone, Copy, PartialEq)]
struct Ramp {
    on: bool,
    start: f64,
}

impl Ramp {
    fn settled(on: bool) -> Self {
        Self { on, start: -1000.0 }
    }

    #[inline(always)]
    fn value(&self, now: f64, duration: f64) -> f64 {
        let progress = if duration > 0.0 {
            ((now - self.start) / duration).clamp(0.0, 1.0)
        } else {
            1.0
        };
        if self.on {
            progress
        } else {
            1.0 - progress
        }
    }

    /// Change the target. The start is back-dated so the value carries on from where it is.
    fn retarget(&mut self, on: bool, now: f64, duration: f64) {
        if on == self.on {
            return;
        }
        let current = self.value(now, duration);
        self.on = on;
        self.start = if on {
            now - current * duration
        } else {
            now - (1.0 - current) * duration
        };
    }

    fn snap(&mut self, now: f64, duration: f64) {
        self.start = now - duration;
    }

    fn is_running(&self, now: f64, duration: f64) -> bool {
        now - self.start < duration
    }
}

/// Blend state between flat and spherical rendering.
///
/// Two ramps run independently: the globe enable ramp and the zoom cutover bound, which falls to 0
/// at high zoom. `globeness = smoothstep(min(globe, zoom_bound))`.
#[derive(Debug, Clone)]
pub struct TransitionController {
    config: TransitionConfig,
    globe: Ramp,
    zoom_bound: Ramp,
    skip_next_animation: bool,
    globeness: f64,
}

impl TransitionController {
    pub fn new(config: TransitionConfig, enabled: bool) -> Self {
        Self {
            config,
            globe: Ramp::settled(enabled),
            zoom_bound: Ramp::settled(true),
            skip_next_animation: true,
            globeness: if enabled { 1.0 } else { 0.0 },
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.globe.on
    }

    pub fn set_enabled(&mut self, enabled: bool, now: f64) {
        self.globe.retarget(enabled, now, self.config.globe_transition_seconds);
    }

    /// Make the next `update` jump straight to the target state.
    pub fn skip_next_animation(&mut self) {
        self.skip_next_animation = true;
    }

    /// Advance to `now` (seconds) for a camera at `zoom`. Returns the new globeness.
    pub fn update(&mut self, zoom: f64, now: f64) -> f64 {
        let globe_duration = self.config.globe_transition_seconds;
        let zoom_duration = self.config.zoom_transition_seconds;

        self.zoom_bound
            .retarget(zoom < self.config.max_globe_zoom, now, zoom_duration);

        if self.skip_next_animation {
            self.globe.snap(now, globe_duration);
            self.zoom_bound.snap(now, zoom_duration);
            self.skip_next_animation = false;
        }

        let raw = self
            .globe
            .value(now, globe_duration)
            .min(self.zoom_bound.value(now, zoom_duration));
        self.globeness = smoothstep(raw);
        self.globeness
    }

    /// Blend factor computed by the last `update`: 0 flat, 1 spherical.
    pub fn globeness(&self) -> f64 {
        self.globeness
    }

    /// Whether either ramp is still moving at `now`.
    pub fn is_animating(&self, now: f64) -> bool {
        self.globe.is_running(now, self.config.globe_transition_seconds)
            || self.zoom_bound.is_running(now, self.config.zoom_transition_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn controller(enabled: bool) -> TransitionController {
        TransitionController::new(TransitionConfig::default(), enabled)
    }

    #[test]
    fn test_enable_ramps_over_half_second() {
        let mut tc = controller(false);
        assert_abs_diff_eq!(tc.update(3.0, 0.0), 0.0);

        tc.set_enabled(true, 1.0);
        assert_abs_diff_eq!(tc.update(3.0, 1.0), 0.0);
        assert!(tc.is_animating(1.0));

        let mut prev = 0.0;
        for step in 1..=50 {
            let value = tc.update(3.0, 1.0 + f64::from(step) * 0.01);
            assert!(value >= prev);
            prev = value;
        }
        assert_abs_diff_eq!(prev, 1.0);
        assert_abs_diff_eq!(tc.update(3.0, 1.25), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(tc.update(3.0, 1.5), 1.0);
        assert!(!tc.is_animating(1.5));
    }

    #[test]
    fn test_high_zoom_forces_flat() {
        let mut tc = controller(true);
        assert_abs_diff_eq!(tc.update(3.0, 0.0), 1.0);

        assert_abs_diff_eq!(tc.update(12.5, 10.0), 1.0);
        assert!(tc.update(12.5, 10.25) < 1.0);
        assert_abs_diff_eq!(tc.update(12.5, 10.5), 0.0);
        assert!(tc.is_enabled());

        // Back under the threshold the globe returns
        tc.update(11.0, 20.0);
        assert_abs_diff_eq!(tc.update(11.0, 20.5), 1.0);
    }

    #[test]
    fn test_first_update_snaps() {
        let mut tc = controller(false);
        tc.set_enabled(true, 0.0);
        assert_abs_diff_eq!(tc.update(2.0, 0.0), 1.0);

        let mut zoomed = controller(true);
        assert_abs_diff_eq!(zoomed.update(14.0, 0.0), 0.0);
    }

    #[test]
    fn test_flip_mid_ramp_is_continuous() {
        let mut tc = controller(false);
        tc.update(0.0, 0.0);
        tc.set_enabled(true, 1.0);
        let before = tc.update(0.0, 1.2);
        tc.set_enabled(false, 1.2);
        let after = tc.update(0.0, 1.2);
        assert_abs_diff_eq!(before, after, epsilon = 1e-12);
        assert!(tc.update(0.0, 1.3) < after);
        assert_abs_diff_eq!(tc.update(0.0, 1.4), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_skip_again() {
        let mut tc = controller(true);
        tc.update(0.0, 0.0);
        tc.set_enabled(false, 5.0);
        tc.skip_next_animation();
        assert_abs_diff_eq!(tc.update(0.0, 5.0), 0.0);
    }
}
