use glam::{DMat3, DVec3};

use crate::camera::Transform;

/// Half-space in unit-sphere space. Points with `dot(p, normal) + distance >= 0` face the camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClippingPlane {
    pub normal: DVec3,
    pub distance: f64,
}

impl ClippingPlane {
    /// A plane that culls nothing.
    pub const NONE: ClippingPlane = ClippingPlane {
        normal: DVec3::ZERO,
        distance: 0.0,
    };

    /// Plane through the horizon circle seen from the camera of `transform`, for a globe of
    /// `radius` pixels, scaled by `scale`.
    pub fn from_camera(transform: &Transform, radius: f64, scale: f64) -> Self {
        let pitch = transform.pitch_radians();

        // Right triangles camera/center/tangent point, in sphere radii.
        let cam_to_surface_center = transform.camera_to_center_distance() / radius;
        let cam_offset = pitch.sin() * cam_to_surface_center;
        let along_axis = pitch.cos() * cam_to_surface_center + 1.0;
        let cam_to_sphere_center = cam_offset.hypot(along_axis);
        let tangent_distance = 1.0 / cam_to_sphere_center;

        let local = DVec3::new(0.0, -cam_offset, along_axis).normalize();
        let rotation = DMat3::from_rotation_y(transform.center_lng.to_radians())
            * DMat3::from_rotation_x(-transform.center_lat.to_radians())
            * DMat3::from_rotation_z(-transform.bearing_radians());

        Self {
            normal: rotation * local * scale,
            distance: -tangent_distance * scale,
        }
    }

    #[inline(always)]
    pub fn signed_distance(&self, p: DVec3) -> f64 {
        p.dot(self.normal) + self.distance
    }

    #[inline(always)]
    pub fn is_visible(&self, p: DVec3) -> bool {
        self.signed_distance(p) >= 0.0
    }

    /// Ray parameter where `origin + dir·t` meets the plane. `None` for rays parallel to it.
    pub fn intersect_ray(&self, origin: DVec3, dir: DVec3) -> Option<f64> {
        let denom = self.normal.dot(dir);
        if denom.abs() < f64::EPSILON {
            return None;
        }
        Some(-self.signed_distance(origin) / denom)
    }

    /// Move `p` along the normal onto the plane.
    pub fn project_point(&self, p: DVec3) -> DVec3 {
        let len_sq = self.normal.length_squared();
        if len_sq == 0.0 {
            return p;
        }
        p - self.normal * (self.signed_distance(p) / len_sq)
    }

    /// `(nx, ny, nz, d)` for the GPU.
    pub fn to_array(&self) -> [f32; 4] {
        [
            self.normal.x as f32,
            self.normal.y as f32,
            self.normal.z as f32,
            self.distance as f32,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{globe_radius_pixels, lng_lat_to_unit_vector};
    use approx::assert_abs_diff_eq;

    fn plane_for(transform: &Transform) -> ClippingPlane {
        let radius = globe_radius_pixels(transform.world_size(), transform.center_lat);
        ClippingPlane::from_camera(transform, radius, 0.25)
    }

    #[test]
    fn test_default_camera_halves() {
        let transform = Transform::new(640.0, 480.0);
        let plane = plane_for(&transform);
        assert!(plane.is_visible(lng_lat_to_unit_vector(0.0, 0.0)));
        assert!(plane.is_visible(lng_lat_to_unit_vector(40.0, 0.0)));
        assert!(!plane.is_visible(lng_lat_to_unit_vector(0.0, 90.0)));
        assert!(!plane.is_visible(lng_lat_to_unit_vector(90.0, 0.0)));
        assert!(!plane.is_visible(lng_lat_to_unit_vector(180.0, 0.0)));
    }

    #[test]
    fn test_normal_magnitude() {
        for (zoom, lng, lat, bearing) in [(0.0, 0.0, 0.0, 0.0), (3.5, 120.0, -40.0, 30.0), (8.0, -70.0, 60.0, -150.0)] {
            let mut transform = Transform::new(800.0, 600.0);
            transform.set_zoom(zoom);
            transform.set_center(lng, lat);
            transform.set_bearing(bearing);
            let plane = plane_for(&transform);
            assert_abs_diff_eq!(plane.normal.length(), 0.25, epsilon = 1e-12);
            assert!(plane.is_visible(lng_lat_to_unit_vector(transform.center_lng, transform.center_lat)));
        }
    }

    #[test]
    fn test_faces_center_when_not_pitched() {
        let mut transform = Transform::new(512.0, 512.0);
        transform.set_center(45.0, 30.0);
        let plane = plane_for(&transform);
        let towards = lng_lat_to_unit_vector(45.0, 30.0);
        assert_abs_diff_eq!(plane.normal.normalize().dot(towards), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_ray_intersection() {
        let plane = ClippingPlane {
            normal: DVec3::Z,
            distance: -0.5,
        };
        let t = plane.intersect_ray(DVec3::new(0.0, 0.0, 3.0), DVec3::NEG_Z).unwrap();
        assert_abs_diff_eq!(t, 2.5);
        assert!(plane.intersect_ray(DVec3::ZERO, DVec3::X).is_none());
        let p = plane.project_point(DVec3::new(1.0, 2.0, 4.0));
        assert_abs_diff_eq!(p.z, 0.5);
        assert_eq!(ClippingPlane::NONE.to_array(), [0.0; 4]);
    }
}
