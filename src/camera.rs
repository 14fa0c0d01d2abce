use glam::{DMat4, DVec3, DVec4};
use std::f64::consts::{FRAC_PI_2, PI};

use crate::geo::{
    lat_from_mercator_y, lng_from_mercator_x, mercator_x_from_lng, mercator_y_from_lat, wrap,
    MAX_VALID_LATITUDE,
};
use crate::tile::{CanonicalTileId, EXTENT};

/// Pixel size of one tile at zoom 0.
pub const TILE_SIZE: f64 = 512.0;

/// Default vertical field of view in degrees (`2·atan(0.75)`).
pub const DEFAULT_FOV: f64 = 36.869_897_645_844_02;

pub const MIN_ZOOM: f64 = 0.0;
pub const MAX_ZOOM: f64 = 22.0;
pub const MAX_PITCH: f64 = 60.0;

/// Camera state handed to the projections once per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Center longitude in degrees (-180 to 180)
    pub center_lng: f64,
    /// Center latitude in degrees, clamped to the Mercator range
    pub center_lat: f64,
    pub zoom: f64,
    /// Camera tilt away from nadir in degrees
    pub pitch: f64,
    /// Compass direction of the top of the viewport in degrees
    pub bearing: f64,
    /// Vertical field of view in degrees
    pub fov: f64,
    /// Viewport width in pixels
    pub width: f64,
    /// Viewport height in pixels
    pub height: f64,
}

impl Transform {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            center_lng: 0.0,
            center_lat: 0.0,
            zoom: 0.0,
            pitch: 0.0,
            bearing: 0.0,
            fov: DEFAULT_FOV,
            width,
            height,
        }
    }

    /// A whole-world starting view.
    pub fn world(width: f64, height: f64) -> Self {
        let mut transform = Self::new(width, height);
        transform.center_lat = 20.0;
        transform
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        self.width = width;
        self.height = height;
    }

    #[inline(always)]
    pub fn scale(&self) -> f64 {
        self.zoom.exp2()
    }

    #[inline(always)]
    pub fn world_size(&self) -> f64 {
        TILE_SIZE * self.scale()
    }

    #[inline(always)]
    pub fn fov_radians(&self) -> f64 {
        self.fov.to_radians()
    }

    #[inline(always)]
    pub fn pitch_radians(&self) -> f64 {
        self.pitch.to_radians()
    }

    #[inline(always)]
    pub fn bearing_radians(&self) -> f64 {
        self.bearing.to_radians()
    }

    pub fn camera_to_center_distance(&self) -> f64 {
        0.5 / (self.fov_radians() / 2.0).tan() * self.height
    }

    /// Integer zoom used for tile selection.
    pub fn tile_zoom(&self) -> u8 {
        self.zoom.floor().clamp(0.0, 24.0) as u8
    }

    /// Set the center, wrapping longitude and clamping latitude.
    pub fn set_center(&mut self, lng: f64, lat: f64) {
        self.center_lng = wrap(lng, -180.0, 180.0);
        self.center_lat = lat.clamp(-MAX_VALID_LATITUDE, MAX_VALID_LATITUDE);
    }

    pub fn set_zoom(&mut self, zoom: f64) {
        self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
    }

    pub fn set_pitch(&mut self, pitch: f64) {
        self.pitch = pitch.clamp(0.0, MAX_PITCH);
    }

    pub fn set_bearing(&mut self, bearing: f64) {
        self.bearing = wrap(bearing, -180.0, 180.0);
    }

    pub fn zoom_by(&mut self, delta: f64) {
        self.set_zoom(self.zoom + delta);
    }

    /// Move the center by a screen-space pixel delta.
    pub fn pan_pixels(&mut self, dx: f64, dy: f64) {
        let (sin_b, cos_b) = self.bearing_radians().sin_cos();
        let world_dx = dx * cos_b - dy * sin_b;
        let world_dy = dx * sin_b + dy * cos_b;
        let ws = self.world_size();
        let x = mercator_x_from_lng(self.center_lng) + world_dx / ws;
        let y = (mercator_y_from_lat(self.center_lat) + world_dy / ws).clamp(0.0, 1.0);
        self.set_center(lng_from_mercator_x(x), lat_from_mercator_y(y));
    }

    /// Zoom by `delta` while keeping the location under screen point (px, py) fixed.
    pub fn zoom_at(&mut self, px: f64, py: f64, delta: f64) {
        let Some((lng, lat)) = self.unproject_flat(px, py) else {
            self.zoom_by(delta);
            return;
        };

        self.zoom_by(delta);

        if let Some((new_px, new_py)) = self.project_flat(lng, lat) {
            self.pan_pixels(new_px - px, new_py - py);
        }
    }

    fn center_point(&self) -> DVec3 {
        let ws = self.world_size();
        DVec3::new(
            mercator_x_from_lng(self.center_lng) * ws,
            mercator_y_from_lat(self.center_lat) * ws,
            0.0,
        )
    }

    fn far_z(&self) -> f64 {
        let camera_to_center = self.camera_to_center_distance();
        let pitch = self.pitch_radians();
        let fov_above_center = self.fov_radians() / 2.0;
        let ground_angle = FRAC_PI_2 + pitch;
        let top_half_surface_distance = fov_above_center.sin() * camera_to_center
            / (PI - ground_angle - fov_above_center)
                .clamp(0.01, PI - 0.01)
                .sin();
        let furthest = (FRAC_PI_2 - pitch).cos() * top_half_surface_distance + camera_to_center;
        furthest * 1.01
    }

    /// Flat (Web Mercator) view-projection matrix over world-pixel coordinates.
    pub fn mercator_matrix(&self) -> DMat4 {
        let aspect = self.width / self.height.max(1.0);
        let near = (self.height / 50.0).max(0.01);
        DMat4::perspective_rh_gl(self.fov_radians(), aspect, near, self.far_z())
            * DMat4::from_scale(DVec3::new(1.0, -1.0, 1.0))
            * DMat4::from_translation(DVec3::new(0.0, 0.0, -self.camera_to_center_distance()))
            * DMat4::from_rotation_x(self.pitch_radians())
            * DMat4::from_rotation_z(-self.bearing_radians())
            * DMat4::from_translation(-self.center_point())
    }

    /// Matrix taking tile-local extent coordinates of `tile` to clip space.
    pub fn tile_pos_matrix(&self, tile: CanonicalTileId) -> DMat4 {
        let scale = self.world_size() / f64::from(tile.dim());
        let unit = scale / f64::from(EXTENT);
        self.mercator_matrix()
            * DMat4::from_translation(DVec3::new(
                f64::from(tile.x) * scale,
                f64::from(tile.y) * scale,
                0.0,
            ))
            * DMat4::from_scale(DVec3::new(unit, unit, 1.0))
    }

    /// Location to screen pixels on the flat map. `None` behind the camera.
    pub fn project_flat(&self, lng: f64, lat: f64) -> Option<(f64, f64)> {
        let ws = self.world_size();
        let p = self.mercator_matrix()
            * DVec4::new(mercator_x_from_lng(lng) * ws, mercator_y_from_lat(lat) * ws, 0.0, 1.0);
        if p.w <= 0.0 {
            return None;
        }
        Some(self.clip_to_screen(p))
    }

    /// Screen pixels to the location on the flat map's ground plane.
    pub fn unproject_flat(&self, px: f64, py: f64) -> Option<(f64, f64)> {
        let inverse = self.mercator_matrix().inverse();
        let ndc_x = px / self.width * 2.0 - 1.0;
        let ndc_y = 1.0 - py / self.height * 2.0;
        let near = inverse * DVec4::new(ndc_x, ndc_y, -1.0, 1.0);
        let far = inverse * DVec4::new(ndc_x, ndc_y, 1.0, 1.0);
        let near = near.truncate() / near.w;
        let far = far.truncate() / far.w;
        let dz = far.z - near.z;
        if dz.abs() < f64::EPSILON {
            return None;
        }
        let t = -near.z / dz;
        let ground = near + (far - near) * t;
        let ws = self.world_size();
        let y = (ground.y / ws).clamp(0.0, 1.0);
        Some((lng_from_mercator_x(ground.x / ws), lat_from_mercator_y(y)))
    }

    /// Clip-space position to screen pixels (y down).
    #[inline(always)]
    pub fn clip_to_screen(&self, clip: DVec4) -> (f64, f64) {
        (
            (clip.x / clip.w * 0.5 + 0.5) * self.width,
            (-clip.y / clip.w * 0.5 + 0.5) * self.height,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_project_center() {
        let tr = Transform::new(100.0, 100.0);
        let (x, y) = tr.project_flat(0.0, 0.0).unwrap();
        assert_abs_diff_eq!(x, 50.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y, 50.0, epsilon = 1e-6);
    }

    #[test]
    fn test_camera_distance() {
        let tr = Transform::new(640.0, 480.0);
        assert_abs_diff_eq!(tr.camera_to_center_distance(), 720.0, epsilon = 1e-6);
    }

    #[test]
    fn test_unproject_round_trip() {
        let mut tr = Transform::new(800.0, 600.0);
        tr.set_zoom(3.0);
        tr.set_center(10.0, 45.0);
        tr.set_pitch(30.0);
        tr.set_bearing(20.0);
        let (px, py) = tr.project_flat(12.0, 46.0).unwrap();
        let (lng, lat) = tr.unproject_flat(px, py).unwrap();
        assert_abs_diff_eq!(lng, 12.0, epsilon = 1e-6);
        assert_abs_diff_eq!(lat, 46.0, epsilon = 1e-6);
    }

    #[test]
    fn test_pan() {
        let mut tr = Transform::new(100.0, 100.0);
        tr.pan_pixels(10.0, 0.0);
        assert!(tr.center_lng > 0.0);
        tr.pan_pixels(0.0, 10.0);
        assert!(tr.center_lat < 0.0);
    }

    #[test]
    fn test_zoom_at_keeps_point() {
        let mut tr = Transform::new(400.0, 300.0);
        tr.set_zoom(2.0);
        let before = tr.unproject_flat(300.0, 100.0).unwrap();
        tr.zoom_at(300.0, 100.0, 1.0);
        let after = tr.unproject_flat(300.0, 100.0).unwrap();
        assert_abs_diff_eq!(before.0, after.0, epsilon = 1e-6);
        assert_abs_diff_eq!(before.1, after.1, epsilon = 1e-6);
    }

    #[test]
    fn test_tile_pos_matrix_maps_tile_corner() {
        let tr = Transform::new(512.0, 512.0);
        let tile = CanonicalTileId::new(0, 0, 0);
        let center = tr.tile_pos_matrix(tile) * DVec4::new(4096.0, 4096.0, 0.0, 1.0);
        let (x, y) = tr.clip_to_screen(center);
        assert_abs_diff_eq!(x, 256.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y, 256.0, epsilon = 1e-6);
    }

    #[test]
    fn test_center_clamping() {
        let mut tr = Transform::new(10.0, 10.0);
        tr.set_center(200.0, 89.0);
        assert_abs_diff_eq!(tr.center_lng, -160.0);
        assert_abs_diff_eq!(tr.center_lat, MAX_VALID_LATITUDE);
    }
}
