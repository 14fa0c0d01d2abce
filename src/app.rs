use std::time::Instant;
use tracing::info;

use globe_tiles::projection::{MeasurementState, SoftwareProbe, SphericalProjection};
use globe_tiles::{Projection, ProjectionConfig, Transform};

use crate::map::{MapLayers, MapRenderer};

/// Zoom step for keys and the scroll wheel.
const ZOOM_STEP: f64 = 0.5;
const PITCH_STEP: f64 = 5.0;
const BEARING_STEP: f64 = 10.0;

/// Terminal cell to Braille dot, skipping the one-cell border.
fn cell_to_dot(col: u16, row: u16) -> (f64, f64) {
    (f64::from(col.saturating_sub(1)) * 2.0, f64::from(row.saturating_sub(1)) * 4.0)
}

/// Canvas size in dots for a terminal of `width`×`height` cells (border and status bar removed).
fn canvas_dots(width: usize, height: usize) -> (f64, f64) {
    let inner_width = width.saturating_sub(2);
    let inner_height = height.saturating_sub(3);
    ((inner_width * 2).max(1) as f64, (inner_height * 4).max(1) as f64)
}

pub struct App {
    pub transform: Transform,
    pub projection: Projection,
    pub map_renderer: MapRenderer,
    config: ProjectionConfig,
    probe: SoftwareProbe,
    clock: Instant,
    pub frame: u64,
    pub should_quit: bool,
    /// Last mouse position for drag tracking
    pub last_mouse: Option<(u16, u16)>,
    pub mouse_pos: Option<(u16, u16)>,
}

impl App {
    pub fn new(width: usize, height: usize, projection: &str, config: ProjectionConfig) -> Self {
        let (w, h) = canvas_dots(width, height);
        Self {
            transform: Transform::world(w, h),
            projection: Projection::from_name(projection, &config),
            map_renderer: MapRenderer::new(config.granularity),
            config,
            probe: SoftwareProbe::default(),
            clock: Instant::now(),
            frame: 0,
            should_quit: false,
            last_mouse: None,
            mouse_pos: None,
        }
    }

    /// Seconds since start.
    pub fn now(&self) -> f64 {
        self.clock.elapsed().as_secs_f64()
    }

    pub fn resize(&mut self, width: usize, height: usize) {
        let (w, h) = canvas_dots(width, height);
        self.transform.resize(w, h);
    }

    /// Per-frame upkeep: projection update, then one step of the latitude error loop.
    pub fn tick(&mut self) {
        let now = self.now();
        self.projection.update(&self.transform, now);
        self.projection.advance_frame(&mut self.probe, self.frame, now);
        self.frame = self.frame.wrapping_add(1);
    }

    /// Rasterise the map for a canvas of `width`×`height` characters.
    pub fn draw_map(&mut self, width: u16, height: u16) -> MapLayers {
        self.transform
            .resize(f64::from(width.max(1)) * 2.0, f64::from(height.max(1)) * 4.0);
        let now = self.now();
        self.projection.update(&self.transform, now);
        self.map_renderer.render(
            usize::from(width),
            usize::from(height),
            &mut self.projection,
            &self.transform,
        )
    }

    /// Return to the starting view. Loaded geometry is kept.
    pub fn reset(&mut self) {
        let (w, h) = (self.transform.width, self.transform.height);
        self.transform = Transform::world(w, h);
        if let Some(globe) = self.projection.as_spherical_mut() {
            globe.skip_next_animation();
        }
    }

    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.transform.pan_pixels(dx, dy);
    }

    pub fn zoom_in(&mut self) {
        self.transform.zoom_by(ZOOM_STEP);
    }

    pub fn zoom_out(&mut self) {
        self.transform.zoom_by(-ZOOM_STEP);
    }

    /// Zoom keeping the location under the cursor in place. On the globe it zooms on the center.
    pub fn zoom_at(&mut self, col: u16, row: u16, zoom_in: bool) {
        let delta = if zoom_in { ZOOM_STEP } else { -ZOOM_STEP };
        if self.projection.use_globe_rendering() {
            self.transform.zoom_by(delta);
        } else {
            let (px, py) = cell_to_dot(col, row);
            self.transform.zoom_at(px, py, delta);
        }
    }

    pub fn pitch_by(&mut self, degrees: f64) {
        self.transform.set_pitch(self.transform.pitch + degrees);
    }

    pub fn rotate_by(&mut self, degrees: f64) {
        self.transform.set_bearing(self.transform.bearing + degrees);
    }

    pub fn pitch_up(&mut self) {
        self.pitch_by(PITCH_STEP);
    }

    pub fn pitch_down(&mut self) {
        self.pitch_by(-PITCH_STEP);
    }

    pub fn rotate_left(&mut self) {
        self.rotate_by(-BEARING_STEP);
    }

    pub fn rotate_right(&mut self) {
        self.rotate_by(BEARING_STEP);
    }

    /// Animate between flat and globe. From the flat projection a globe is created first.
    pub fn toggle_globe(&mut self) {
        let now = self.now();
        match self.projection.as_spherical_mut() {
            Some(globe) => {
                let enabled = !globe.is_globe_enabled();
                globe.set_globe_enabled(enabled, now);
                info!(enabled, "globe toggled");
            }
            None => {
                self.projection.release();
                let mut globe = SphericalProjection::new(self.config.clone());
                globe.set_globe_enabled(false, now);
                globe.update(&self.transform, now);
                globe.set_globe_enabled(true, now);
                self.projection = Projection::Spherical(Box::new(globe));
                info!("switched to globe projection");
            }
        }
    }

    pub fn handle_drag(&mut self, col: u16, row: u16) {
        if let Some((last_col, last_row)) = self.last_mouse {
            let dx = (f64::from(last_col) - f64::from(col)) * 2.0;
            let dy = (f64::from(last_row) - f64::from(row)) * 4.0;
            self.pan(dx, dy);
        }
        self.last_mouse = Some((col, row));
    }

    pub fn end_drag(&mut self) {
        self.last_mouse = None;
    }

    pub fn set_mouse_pos(&mut self, col: u16, row: u16) {
        self.mouse_pos = Some((col, row));
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }

    pub fn projection_label(&self) -> &'static str {
        if self.projection.use_globe_rendering() {
            SphericalProjection::NAME
        } else {
            "mercator"
        }
    }

    pub fn center_coords(&self) -> String {
        let (lng, lat) = (self.transform.center_lng, self.transform.center_lat);
        format!(
            "{:.1}°{}, {:.1}°{}",
            lat.abs(),
            if lat >= 0.0 { "N" } else { "S" },
            lng.abs(),
            if lng >= 0.0 { "E" } else { "W" }
        )
    }

    /// Latitude correction in micro-degrees and the loop state, for the status bar.
    pub fn error_loop_status(&self) -> Option<(f64, &'static str)> {
        let globe = self.projection.as_spherical()?;
        let state = match globe.error_measurement_state() {
            MeasurementState::Idle => "idle",
            MeasurementState::Measuring { .. } => "measuring",
            MeasurementState::AwaitingSync => "sync",
        };
        Some((globe.latitude_error_correction().to_degrees() * 1e6, state))
    }

    pub fn cached_meshes(&self) -> usize {
        self.projection
            .as_spherical()
            .map_or(1, SphericalProjection::cached_mesh_count)
    }
}
