//! Conversions between Mercator tile space, angular (lon/lat) space and the unit sphere.
//!
//! The unit sphere uses +Y as the polar axis and +Z towards (0°, 0°).

use glam::DVec3;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI, TAU};

use crate::tile::{CanonicalTileId, EXTENT, NORTH_POLE_Y, SOUTH_POLE_Y};

/// Highest latitude representable in Web Mercator.
pub const MAX_VALID_LATITUDE: f64 = 85.051129;

/// Wrap `value` into the half-open range `(min, max]`.
#[inline(always)]
pub fn wrap(value: f64, min: f64, max: f64) -> f64 {
    let d = max - min;
    let w = ((value - min) % d + d) % d + min;
    if w == min {
        max
    } else {
        w
    }
}

/// Mercator-normalized coordinates (0..1, y down) to angular coordinates in radians.
/// Longitude lands in [-π, π).
#[inline(always)]
pub fn mercator_to_angular(x: f64, y: f64) -> (f64, f64) {
    let lon = (x * TAU).rem_euclid(TAU) - PI;
    let lat = 2.0 * (PI - y * TAU).exp().atan() - FRAC_PI_2;
    (lon, lat)
}

/// Angular coordinates in radians to a unit vector.
#[inline(always)]
pub fn angular_to_unit_vector(lon: f64, lat: f64) -> DVec3 {
    let len = lat.cos();
    DVec3::new(lon.sin() * len, lat.sin(), lon.cos() * len)
}

/// Angular coordinates in degrees to a unit vector.
#[inline(always)]
pub fn lng_lat_to_unit_vector(lng: f64, lat: f64) -> DVec3 {
    angular_to_unit_vector(lng.to_radians(), lat.to_radians())
}

/// Unit vector back to `(longitude, latitude)` in degrees.
/// Points on the polar axis report longitude 0.
pub fn unit_vector_to_angular(v: DVec3) -> (f64, f64) {
    let len_xz = (v.x * v.x + v.z * v.z).sqrt();
    let lat = v.y.atan2(len_xz).to_degrees();
    if len_xz > 1e-6 {
        let lng = v.x.atan2(v.z).to_degrees();
        (wrap(lng, -180.0, 180.0), lat)
    } else {
        (0.0, lat)
    }
}

#[inline(always)]
pub fn mercator_x_from_lng(lng: f64) -> f64 {
    (180.0 + lng) / 360.0
}

#[inline(always)]
pub fn mercator_y_from_lat(lat: f64) -> f64 {
    (180.0 - (180.0 / PI) * (FRAC_PI_4 + lat * PI / 360.0).tan().ln()) / 360.0
}

#[inline(always)]
pub fn lng_from_mercator_x(x: f64) -> f64 {
    x * 360.0 - 180.0
}

#[inline(always)]
pub fn lat_from_mercator_y(y: f64) -> f64 {
    let y2 = 180.0 - y * 360.0;
    360.0 / PI * (y2 * PI / 180.0).exp().atan() - 90.0
}

/// Tile-local extent coordinates to Mercator 0..1.
#[inline(always)]
pub fn tile_to_mercator(x: f64, y: f64, tile: CanonicalTileId) -> (f64, f64) {
    let scale = 1.0 / f64::from(tile.dim());
    let extent = f64::from(EXTENT);
    (
        (x / extent + f64::from(tile.x)) * scale,
        (y / extent + f64::from(tile.y)) * scale,
    )
}

/// Tile-local point straight onto the unit sphere. Pole sentinel rows map to the exact poles.
#[inline(always)]
pub fn project_tile_coordinates_to_sphere(x: f64, y: f64, tile: CanonicalTileId) -> DVec3 {
    if y <= f64::from(NORTH_POLE_Y) {
        return DVec3::Y;
    }
    if y >= f64::from(SOUTH_POLE_Y) {
        return DVec3::NEG_Y;
    }
    let (mx, my) = tile_to_mercator(x, y, tile);
    let (lon, lat) = mercator_to_angular(mx, my);
    angular_to_unit_vector(lon, lat)
}

/// Sphere radius in pixels so that feature size at `latitude` matches the flat map.
#[inline(always)]
pub fn globe_radius_pixels(world_size: f64, latitude: f64) -> f64 {
    world_size / TAU / latitude.to_radians().cos()
}

pub fn globe_circumference_pixels(world_size: f64, latitude: f64) -> f64 {
    TAU * globe_radius_pixels(world_size, latitude)
}

/// Great-circle distance between two `(lng, lat)` locations in globe pixels.
pub fn globe_distance_pixels(world_size: f64, center_lat: f64, a: (f64, f64), b: (f64, f64)) -> f64 {
    let va = lng_lat_to_unit_vector(a.0, a.1);
    let vb = lng_lat_to_unit_vector(b.0, b.1);
    let radians = va.dot(vb).clamp(-1.0, 1.0).acos();
    radians / TAU * globe_circumference_pixels(world_size, center_lat)
}

/// Zoom delta that keeps the globe radius constant when the center moves from `old_lat` to `new_lat`.
pub fn zoom_adjustment(old_lat: f64, new_lat: f64) -> f64 {
    let old_scale = old_lat.to_radians().cos();
    let new_scale = new_lat.to_radians().cos();
    (new_scale / old_scale).log2()
}

pub fn degrees_per_pixel(world_size: f64, lat: f64) -> f64 {
    360.0 / globe_circumference_pixels(world_size, lat)
}
