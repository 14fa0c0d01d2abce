use glam::{DMat4, DVec2, DVec3, DVec4};
use std::sync::Arc;

use crate::camera::Transform;
use crate::config::ProjectionConfig;
use crate::error::MeshError;
use crate::geo::{globe_radius_pixels, lng_lat_to_unit_vector, project_tile_coordinates_to_sphere, unit_vector_to_angular};
use crate::mesh::{IndexWidth, MeshCache, SubdivisionGranularitySetting, TileMesh, TileMeshOptions, TileMeshUsage};
use crate::projection::clipping::ClippingPlane;
use crate::projection::error_measurement::{ErrorMeasurementLoop, GpuProbe, MeasurementState};
use crate::projection::flat::tile_mercator_coords;
use crate::projection::transition::TransitionController;
use crate::projection::{PointProjection, ProjectionData};
use crate::tile::CanonicalTileId;

/// Near plane of the globe perspective, in pixels.
const GLOBE_NEAR_Z: f64 = 0.5;

/// Closest non-negative hit of a ray with the unit sphere at the origin. `dir` must be normalized.
///
/// Uses the cancellation-free quadratic from Ray Tracing Gems, chapter 7.
pub fn ray_sphere_intersection(origin: DVec3, dir: DVec3) -> Option<f64> {
    let od = origin.dot(dir);
    let inner = origin - dir * od;
    let discriminant = 1.0 - inner.dot(inner);
    if discriminant < 0.0 {
        return None;
    }
    let c = origin.length_squared() - 1.0;
    let q = -od + if od < 0.0 { 1.0 } else { -1.0 } * discriminant.sqrt();
    if q == 0.0 {
        return (c == 0.0).then_some(0.0);
    }
    let (t0, t1) = (c / q, q);
    let (near, far) = (t0.min(t1), t0.max(t1));
    if near >= 0.0 {
        Some(near)
    } else if far >= 0.0 {
        Some(far)
    } else {
        None
    }
}

/// Globe matrices for a camera. `latitude_correction` is subtracted from the center latitude.
fn globe_matrix(transform: &Transform, radius: f64, latitude_correction: f64) -> DMat4 {
    globe_projection(transform, radius) * globe_view(transform, radius, latitude_correction)
}

fn globe_projection(transform: &Transform, radius: f64) -> DMat4 {
    let aspect = transform.width / transform.height.max(1.0);
    let far = transform.camera_to_center_distance() + 2.0 * radius;
    DMat4::perspective_rh_gl(transform.fov_radians(), aspect, GLOBE_NEAR_Z, far)
}

fn globe_view(transform: &Transform, radius: f64, latitude_correction: f64) -> DMat4 {
    DMat4::from_translation(DVec3::new(0.0, 0.0, -transform.camera_to_center_distance()))
        * DMat4::from_rotation_x(-transform.pitch_radians())
        * DMat4::from_rotation_z(transform.bearing_radians())
        * DMat4::from_translation(DVec3::new(0.0, 0.0, -radius))
        * DMat4::from_rotation_x(transform.center_lat.to_radians() - latitude_correction)
        * DMat4::from_rotation_y(-transform.center_lng.to_radians())
        * DMat4::from_scale(DVec3::splat(radius))
}

/// Vertical-perspective globe.
#[derive(Debug)]
pub struct SphericalProjection {
    config: ProjectionConfig,
    transition: TransitionController,
    error_loop: ErrorMeasurementLoop,
    meshes: MeshCache,
    transform: Transform,
    radius: f64,
    correction: f64,
    matrix: DMat4,
    matrix_uncorrected: DMat4,
    inverse_uncorrected: DMat4,
    camera_position: DVec3,
    plane: ClippingPlane,
}

impl SphericalProjection {
    pub const NAME: &'static str = "globe";

    pub fn new(config: ProjectionConfig) -> Self {
        let transition = TransitionController::new(config.transition.clone(), true);
        let error_loop = ErrorMeasurementLoop::new(config.error_measurement.clone());
        let mut projection = Self {
            config,
            transition,
            error_loop,
            meshes: MeshCache::new(),
            transform: Transform::new(1.0, 1.0),
            radius: 1.0,
            correction: 0.0,
            matrix: DMat4::IDENTITY,
            matrix_uncorrected: DMat4::IDENTITY,
            inverse_uncorrected: DMat4::IDENTITY,
            camera_position: DVec3::Z,
            plane: ClippingPlane::NONE,
        };
        projection.recompute();
        projection
    }

    pub fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    /// Camera change: advance the transition to `now` (seconds) and rebuild matrices and plane.
    pub fn update(&mut self, transform: &Transform, now: f64) {
        self.transition.update(transform.zoom, now);
        self.transform = transform.clone();
        self.correction = self.error_loop.correction(now);
        self.recompute();
    }

    fn recompute(&mut self) {
        let transform = &self.transform;
        self.radius = globe_radius_pixels(transform.world_size(), transform.center_lat);
        self.matrix = globe_matrix(transform, self.radius, self.correction);
        self.matrix_uncorrected = globe_matrix(transform, self.radius, 0.0);
        self.inverse_uncorrected = self.matrix_uncorrected.inverse();
        self.camera_position = globe_view(transform, self.radius, 0.0)
            .inverse()
            .transform_point3(DVec3::ZERO);
        self.plane = ClippingPlane::from_camera(transform, self.radius, self.config.clipping_plane_scale);
    }

    /// Run one frame of the latitude error measurement at the current center.
    pub fn advance_error_measurement(&mut self, probe: &mut dyn GpuProbe, frame: u64, now: f64) {
        self.error_loop
            .advance(probe, frame, self.transform.center_lat, now);
    }

    pub fn error_measurement_state(&self) -> MeasurementState {
        self.error_loop.state()
    }

    /// Correction in radians baked into the GPU-facing matrix.
    pub fn latitude_error_correction(&self) -> f64 {
        self.correction
    }

    pub fn set_globe_enabled(&mut self, enabled: bool, now: f64) {
        self.transition.set_enabled(enabled, now);
    }

    pub fn is_globe_enabled(&self) -> bool {
        self.transition.is_enabled()
    }

    pub fn skip_next_animation(&mut self) {
        self.transition.skip_next_animation();
    }

    pub fn globeness(&self) -> f64 {
        self.transition.globeness()
    }

    pub fn use_globe_rendering(&self) -> bool {
        self.globeness() > 0.0
    }

    /// Whether frames must keep coming: a transition or the error correction is in flight.
    pub fn is_rendering_dirty(&self, now: f64) -> bool {
        self.transition.is_animating(now) || self.error_loop.is_dirty(now)
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn camera_position(&self) -> DVec3 {
        self.camera_position
    }

    pub fn clipping_plane(&self) -> &ClippingPlane {
        &self.plane
    }

    /// Error-corrected matrix from unit-sphere space to clip space.
    pub fn globe_matrix(&self) -> DMat4 {
        self.matrix
    }

    /// Exact matrix used for CPU-side queries.
    pub fn globe_matrix_uncorrected(&self) -> DMat4 {
        self.matrix_uncorrected
    }

    pub fn subdivision_granularity(&self) -> SubdivisionGranularitySetting {
        self.config.granularity
    }

    pub fn projection_data(&self, tile: CanonicalTileId, tile_pos_matrix: DMat4, use_corrected: bool) -> ProjectionData {
        let main = if use_corrected {
            self.matrix
        } else {
            self.matrix_uncorrected
        };
        ProjectionData {
            main_matrix: main.as_mat4(),
            fallback_matrix: tile_pos_matrix.as_mat4(),
            tile_mercator_coords: tile_mercator_coords(tile),
            clipping_plane: self.plane.to_array(),
            projection_transition: self.globeness() as f32,
        }
    }

    /// Data for layers that bring their own geometry in whole-world Mercator coordinates.
    pub fn projection_data_for_custom_layer(&self, mercator_matrix: DMat4) -> ProjectionData {
        ProjectionData {
            main_matrix: self.matrix.as_mat4(),
            fallback_matrix: mercator_matrix.as_mat4(),
            tile_mercator_coords: [0.0, 0.0, 1.0, 1.0],
            clipping_plane: self.plane.to_array(),
            projection_transition: self.globeness() as f32,
        }
    }

    pub fn is_occluded(&self, x: f64, y: f64, tile: CanonicalTileId) -> bool {
        !self.plane.is_visible(project_tile_coordinates_to_sphere(x, y, tile))
    }

    /// Tile-local point to clip space with the exact matrix.
    pub fn project(&self, x: f64, y: f64, tile: CanonicalTileId) -> PointProjection {
        let sphere = project_tile_coordinates_to_sphere(x, y, tile);
        let clip = self.matrix_uncorrected * sphere.extend(1.0);
        PointProjection {
            point: DVec2::new(clip.x / clip.w, clip.y / clip.w),
            signed_distance_from_camera: clip.w,
            is_occluded: !self.plane.is_visible(sphere),
        }
    }

    pub fn is_location_occluded(&self, lng: f64, lat: f64) -> bool {
        !self.plane.is_visible(lng_lat_to_unit_vector(lng, lat))
    }

    /// Location to screen pixels (y down).
    pub fn location_to_screen_point(&self, lng: f64, lat: f64) -> DVec2 {
        let clip = self.matrix_uncorrected * lng_lat_to_unit_vector(lng, lat).extend(1.0);
        DVec2::new(
            (clip.x / clip.w * 0.5 + 0.5) * self.transform.width,
            (-clip.y / clip.w * 0.5 + 0.5) * self.transform.height,
        )
    }

    /// Normalized unit-sphere space direction of the camera ray through a pixel.
    pub fn ray_direction_from_pixel(&self, p: DVec2) -> DVec3 {
        let ndc_x = p.x / self.transform.width * 2.0 - 1.0;
        let ndc_y = 1.0 - p.y / self.transform.height * 2.0;
        let far = self.inverse_uncorrected * DVec4::new(ndc_x, ndc_y, 1.0, 1.0);
        let far = far.truncate() / far.w;
        (far - self.camera_position).normalize()
    }

    pub fn is_point_on_surface(&self, p: DVec2) -> bool {
        ray_sphere_intersection(self.camera_position, self.ray_direction_from_pixel(p)).is_some()
    }

    /// Location under a pixel as `(lng, lat)` degrees. Pixels beside the globe map to the horizon.
    pub fn unproject_screen_point(&self, p: DVec2) -> (f64, f64) {
        let origin = self.camera_position;
        let dir = self.ray_direction_from_pixel(p);
        if let Some(t) = ray_sphere_intersection(origin, dir) {
            return unit_vector_to_angular(origin + dir * t);
        }

        let on_plane = match self.plane.intersect_ray(origin, dir) {
            Some(t) if t > 0.0 => origin + dir * t,
            _ => self.plane.project_point(origin + dir * 2.0),
        };
        unit_vector_to_angular(on_plane.normalize())
    }

    /// Visible from the camera and inside the viewport.
    pub fn is_surface_point_on_screen(&self, v: DVec3) -> bool {
        if !self.plane.is_visible(v) {
            return false;
        }
        let clip = self.matrix_uncorrected * v.extend(1.0);
        if clip.w <= 0.0 {
            return false;
        }
        let ndc = clip.truncate() / clip.w;
        ndc.abs().cmplt(DVec3::ONE).all()
    }

    /// Factor by which features grow relative to the flat map at the center latitude.
    pub fn pixel_scale(&self) -> f64 {
        1.0 / self.transform.center_lat.to_radians().cos()
    }

    pub fn circle_radius_correction(&self) -> f64 {
        self.transform.center_lat.to_radians().cos()
    }

    /// Cached mesh for `tile`. Past the globe cutover every tile uses the plain quad.
    pub fn tile_mesh(
        &mut self,
        tile: CanonicalTileId,
        has_border: bool,
        allow_poles: bool,
        usage: TileMeshUsage,
    ) -> Result<Arc<TileMesh>, MeshError> {
        let options = if self.use_globe_rendering() {
            self.config
                .granularity
                .tile_mesh_options(tile, has_border, allow_poles, usage)
        } else {
            TileMeshOptions {
                generate_borders: has_border,
                ..TileMeshOptions::plain(1)
            }
        };
        let width = if self.config.force_16bit_indices {
            IndexWidth::U16
        } else {
            IndexWidth::Auto
        };
        self.meshes.get_or_build(options, width)
    }

    pub fn cached_mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Teardown: drop cached meshes and any in-flight readback.
    pub fn release(&mut self) {
        self.meshes.clear();
        self.error_loop.abandon();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::error_measurement::FencePoll;
    use approx::assert_abs_diff_eq;

    fn globe(transform: &Transform) -> SphericalProjection {
        let mut projection = SphericalProjection::new(ProjectionConfig::default());
        projection.update(transform, 0.0);
        projection
    }

    fn view() -> Transform {
        let mut transform = Transform::new(800.0, 600.0);
        transform.set_zoom(1.5);
        transform.set_center(20.0, 35.0);
        transform.set_pitch(30.0);
        transform.set_bearing(-25.0);
        transform
    }

    #[test]
    fn test_default_camera_position() {
        let transform = Transform::new(640.0, 480.0);
        let projection = globe(&transform);
        let expected = 1.0 + transform.camera_to_center_distance() / projection.radius();
        let camera = projection.camera_position();
        assert_abs_diff_eq!(camera.x, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(camera.y, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(camera.z, expected, epsilon = 1e-9);
    }

    #[test]
    fn test_plane_matches_camera() {
        let projection = globe(&view());
        let camera = projection.camera_position();
        let plane = projection.clipping_plane();
        assert_abs_diff_eq!(plane.normal.normalize().dot(camera.normalize()), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(-plane.distance / 0.25, 1.0 / camera.length(), epsilon = 1e-9);
    }

    #[test]
    fn test_center_projects_to_screen_center() {
        let mut transform = Transform::new(800.0, 600.0);
        transform.set_zoom(2.0);
        transform.set_center(-40.0, 25.0);
        transform.set_bearing(40.0);
        let projection = globe(&transform);
        let p = projection.location_to_screen_point(-40.0, 25.0);
        assert_abs_diff_eq!(p.x, 400.0, epsilon = 1e-6);
        assert_abs_diff_eq!(p.y, 300.0, epsilon = 1e-6);
    }

    #[test]
    fn test_north_is_up() {
        let projection = globe(&Transform::new(800.0, 600.0));
        let north = projection.location_to_screen_point(0.0, 10.0);
        let east = projection.location_to_screen_point(10.0, 0.0);
        assert!(north.y < 300.0);
        assert_abs_diff_eq!(north.x, 400.0, epsilon = 1e-6);
        assert!(east.x > 400.0);
    }

    #[test]
    fn test_bearing_matches_flat_map() {
        let mut transform = Transform::new(800.0, 600.0);
        transform.set_zoom(3.0);
        transform.set_bearing(90.0);
        let projection = globe(&transform);
        let east = projection.location_to_screen_point(5.0, 0.0);
        let (_, flat_east_y) = transform.project_flat(5.0, 0.0).unwrap();
        assert!(east.y < 300.0);
        assert!(flat_east_y < 300.0);
    }

    #[test]
    fn test_unproject_round_trip() {
        let projection = globe(&view());
        let p = projection.location_to_screen_point(22.0, 37.0);
        let (lng, lat) = projection.unproject_screen_point(p);
        assert_abs_diff_eq!(lng, 22.0, epsilon = 1e-6);
        assert_abs_diff_eq!(lat, 37.0, epsilon = 1e-6);
        assert!(projection.is_point_on_surface(p));
    }

    #[test]
    fn test_unproject_off_globe_lands_on_horizon() {
        let projection = globe(&Transform::new(800.0, 600.0));
        let corner = DVec2::new(0.0, 0.0);
        assert!(!projection.is_point_on_surface(corner));
        let (lng, lat) = projection.unproject_screen_point(corner);
        let v = lng_lat_to_unit_vector(lng, lat);
        let distance = projection.clipping_plane().signed_distance(v);
        assert!(distance.abs() < 0.25, "{distance}");
        assert!(lng < 0.0 && lat > 0.0);
    }

    #[test]
    fn test_ray_sphere() {
        let t = ray_sphere_intersection(DVec3::new(0.0, 0.0, 5.0), DVec3::NEG_Z).unwrap();
        assert_abs_diff_eq!(t, 4.0);
        let inside = ray_sphere_intersection(DVec3::ZERO, DVec3::X).unwrap();
        assert_abs_diff_eq!(inside, 1.0);
        assert!(ray_sphere_intersection(DVec3::new(0.0, 2.0, 5.0), DVec3::NEG_Z).is_none());
        assert!(ray_sphere_intersection(DVec3::new(0.0, 0.0, 5.0), DVec3::Z).is_none());
    }

    #[test]
    fn test_project_and_occlusion() {
        let projection = globe(&Transform::new(640.0, 480.0));
        let root = CanonicalTileId::new(0, 0, 0);
        let center = projection.project(4096.0, 4096.0, root);
        assert_abs_diff_eq!(center.point.x, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(center.point.y, 0.0, epsilon = 1e-9);
        assert!(center.signed_distance_from_camera > 0.0);
        assert!(!center.is_occluded);

        // Antimeridian sits on the far side
        assert!(projection.is_occluded(0.0, 4096.0, root));
        assert!(projection.project(0.0, 4096.0, root).is_occluded);
        assert!(projection.is_location_occluded(180.0, 0.0));
        assert!(!projection.is_location_occluded(10.0, 10.0));
    }

    #[test]
    fn test_surface_point_on_screen() {
        let projection = globe(&Transform::new(640.0, 480.0));
        assert!(projection.is_surface_point_on_screen(lng_lat_to_unit_vector(0.0, 0.0)));
        assert!(!projection.is_surface_point_on_screen(lng_lat_to_unit_vector(180.0, 0.0)));
    }

    #[test]
    fn test_scale_factors() {
        let mut transform = Transform::new(100.0, 100.0);
        transform.set_center(0.0, 60.0);
        let projection = globe(&transform);
        assert_abs_diff_eq!(projection.pixel_scale(), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(projection.circle_radius_correction(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_projection_data() {
        let transform = view();
        let projection = globe(&transform);
        let tile = CanonicalTileId::new(2, 1, 1);
        let tile_matrix = transform.tile_pos_matrix(tile);
        let data = projection.projection_data(tile, tile_matrix, true);
        assert_eq!(data.fallback_matrix, tile_matrix.as_mat4());
        assert_eq!(data.clipping_plane, projection.clipping_plane().to_array());
        assert_eq!(data.projection_transition, 1.0);
        assert_eq!(data.tile_mercator_coords, [0.25, 0.25, 1.0 / 32768.0, 1.0 / 32768.0]);

        let custom = projection.projection_data_for_custom_layer(transform.mercator_matrix());
        assert_eq!(custom.tile_mercator_coords, [0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_correction_enters_matrix() {
        struct Fixed;
        impl GpuProbe for Fixed {
            fn issue(&mut self, _mercator_y: f64, _expected_latitude: f64) {}
            fn poll(&mut self) -> FencePoll {
                FencePoll::Ready([0, 16, 0, 255])
            }
        }

        let transform = view();
        let mut projection = globe(&transform);
        for frame in 0..5 {
            projection.advance_error_measurement(&mut Fixed, frame, 0.0);
        }
        assert!(projection.is_rendering_dirty(0.1));
        projection.update(&transform, 1.0);
        assert_abs_diff_eq!(projection.latitude_error_correction(), -16.0 / 65_536.0, epsilon = 1e-15);
        assert_ne!(projection.globe_matrix(), projection.globe_matrix_uncorrected());

        let exact = projection.projection_data(CanonicalTileId::new(0, 0, 0), DMat4::IDENTITY, false);
        assert_eq!(exact.main_matrix, projection.globe_matrix_uncorrected().as_mat4());
    }

    #[test]
    fn test_meshes_follow_globeness() {
        let mut projection = globe(&Transform::new(640.0, 480.0));
        let root = CanonicalTileId::new(0, 0, 0);
        let mesh = projection
            .tile_mesh(root, false, true, TileMeshUsage::Raster)
            .unwrap();
        assert_eq!(mesh.vertices.len(), 129 * 131);

        let mut zoomed = Transform::new(640.0, 480.0);
        zoomed.set_zoom(14.0);
        projection.skip_next_animation();
        projection.update(&zoomed, 5.0);
        assert!(!projection.use_globe_rendering());
        let quad = projection
            .tile_mesh(root, false, true, TileMeshUsage::Raster)
            .unwrap();
        assert_eq!(quad.vertices.len(), 4);
        assert_eq!(projection.cached_mesh_count(), 2);

        projection.release();
        assert_eq!(projection.cached_mesh_count(), 0);
    }

    #[test]
    fn test_force_16bit_fails_for_fine_meshes() {
        let config = ProjectionConfig {
            force_16bit_indices: true,
            granularity: SubdivisionGranularitySetting {
                tile: crate::mesh::GranularityExpression::new(512, 512),
                ..SubdivisionGranularitySetting::globe()
            },
            ..ProjectionConfig::default()
        };
        let mut projection = SphericalProjection::new(config);
        projection.update(&Transform::new(100.0, 100.0), 0.0);
        assert!(matches!(
            projection.tile_mesh(CanonicalTileId::new(3, 2, 2), false, false, TileMeshUsage::Raster),
            Err(MeshError::GranularityTooLarge { .. })
        ));
    }
}
