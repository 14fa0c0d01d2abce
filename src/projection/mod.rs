//! Map projections: flat Web Mercator and the vertical-perspective globe.

mod clipping;
pub mod error_measurement;
mod flat;
mod spherical;
mod transition;

use glam::{DMat4, DVec2, Mat4};
use std::sync::Arc;
use tracing::warn;

use crate::camera::Transform;
use crate::config::ProjectionConfig;
use crate::error::{MeshError, ProjectionError};
use crate::mesh::{SubdivisionGranularitySetting, TileMesh, TileMeshUsage};
use crate::tile::CanonicalTileId;

pub use clipping::ClippingPlane;
pub use error_measurement::{ErrorMeasurementLoop, FencePoll, GpuProbe, MeasurementState, SoftwareProbe};
pub use flat::{tile_mercator_coords, FlatProjection};
pub use spherical::{ray_sphere_intersection, SphericalProjection};
pub use transition::TransitionController;

/// Per-tile values a shader needs to place tile vertices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionData {
    /// Flat: tile matrix. Spherical: globe matrix over the unit sphere
    pub main_matrix: Mat4,
    /// Tile matrix, blended in while the globe transition runs
    pub fallback_matrix: Mat4,
    /// `(x, y)` offset and per-extent-unit scale of the tile in Mercator space
    pub tile_mercator_coords: [f32; 4],
    /// `(nx, ny, nz, d)`, all zero when nothing is clipped
    pub clipping_plane: [f32; 4],
    /// 0 flat, 1 spherical
    pub projection_transition: f32,
}

/// A tile point projected to clip space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointProjection {
    /// Normalized device coordinates
    pub point: DVec2,
    /// Clip-space `w`
    pub signed_distance_from_camera: f64,
    pub is_occluded: bool,
}

/// The active projection. Chosen by name when the style loads.
#[derive(Debug)]
pub enum Projection {
    Flat(FlatProjection),
    Spherical(Box<SphericalProjection>),
}

impl Projection {
    /// Unknown names fall back to Mercator.
    pub fn from_name(name: &str, config: &ProjectionConfig) -> Self {
        match name {
            FlatProjection::NAME => Projection::Flat(FlatProjection::new()),
            SphericalProjection::NAME | "vertical-perspective" => {
                Projection::Spherical(Box::new(SphericalProjection::new(config.clone())))
            }
            other => {
                warn!(projection = other, "unknown projection, using mercator");
                Projection::Flat(FlatProjection::new())
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Projection::Flat(_) => FlatProjection::NAME,
            Projection::Spherical(_) => SphericalProjection::NAME,
        }
    }

    /// Camera change at `now` seconds.
    pub fn update(&mut self, transform: &Transform, now: f64) {
        if let Projection::Spherical(globe) = self {
            globe.update(transform, now);
        }
    }

    /// Run one frame of GPU-side upkeep. A no-op for the flat map.
    pub fn advance_frame(&mut self, probe: &mut dyn GpuProbe, frame: u64, now: f64) {
        if let Projection::Spherical(globe) = self {
            globe.advance_error_measurement(probe, frame, now);
        }
    }

    pub fn projection_data(&self, tile: CanonicalTileId, tile_pos_matrix: DMat4) -> ProjectionData {
        match self {
            Projection::Flat(flat) => flat.projection_data(tile, tile_pos_matrix),
            Projection::Spherical(globe) => globe.projection_data(tile, tile_pos_matrix, true),
        }
    }

    pub fn is_occluded(&self, x: f64, y: f64, tile: CanonicalTileId) -> bool {
        match self {
            Projection::Flat(flat) => flat.is_occluded(x, y, tile),
            Projection::Spherical(globe) => globe.is_occluded(x, y, tile),
        }
    }

    pub fn project(&self, x: f64, y: f64, tile: CanonicalTileId) -> Result<PointProjection, ProjectionError> {
        match self {
            Projection::Flat(flat) => flat.project(x, y, tile),
            Projection::Spherical(globe) => Ok(globe.project(x, y, tile)),
        }
    }

    pub fn tile_mesh(
        &mut self,
        tile: CanonicalTileId,
        has_border: bool,
        allow_poles: bool,
        usage: TileMeshUsage,
    ) -> Result<Arc<TileMesh>, MeshError> {
        match self {
            Projection::Flat(flat) => Ok(flat.tile_mesh()),
            Projection::Spherical(globe) => globe.tile_mesh(tile, has_border, allow_poles, usage),
        }
    }

    /// Granularity for subdividing tile geometry before upload.
    pub fn subdivision_granularity(&self) -> SubdivisionGranularitySetting {
        match self {
            Projection::Flat(flat) => flat.subdivision_granularity(),
            Projection::Spherical(globe) => globe.subdivision_granularity(),
        }
    }

    pub fn globeness(&self) -> f64 {
        match self {
            Projection::Flat(_) => 0.0,
            Projection::Spherical(globe) => globe.globeness(),
        }
    }

    pub fn use_globe_rendering(&self) -> bool {
        matches!(self, Projection::Spherical(globe) if globe.use_globe_rendering())
    }

    pub fn is_rendering_dirty(&self, now: f64) -> bool {
        matches!(self, Projection::Spherical(globe) if globe.is_rendering_dirty(now))
    }

    pub fn as_spherical(&self) -> Option<&SphericalProjection> {
        match self {
            Projection::Spherical(globe) => Some(&**globe),
            Projection::Flat(_) => None,
        }
    }

    pub fn as_spherical_mut(&mut self) -> Option<&mut SphericalProjection> {
        match self {
            Projection::Spherical(globe) => Some(&mut **globe),
            Projection::Flat(_) => None,
        }
    }

    pub fn release(&mut self) {
        match self {
            Projection::Flat(flat) => flat.release(),
            Projection::Spherical(globe) => globe.release(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        let config = ProjectionConfig::default();
        assert_eq!(Projection::from_name("mercator", &config).name(), "mercator");
        assert_eq!(Projection::from_name("globe", &config).name(), "globe");
        assert_eq!(Projection::from_name("vertical-perspective", &config).name(), "globe");
        assert_eq!(Projection::from_name("equirectangular", &config).name(), "mercator");
    }

    #[test]
    fn test_dispatch() {
        let config = ProjectionConfig::default();
        let transform = Transform::new(400.0, 300.0);
        let tile = CanonicalTileId::new(0, 0, 0);

        let mut flat = Projection::from_name("mercator", &config);
        flat.update(&transform, 0.0);
        assert!(!flat.use_globe_rendering());
        assert!(!flat.is_rendering_dirty(0.0));
        assert!(flat.project(0.0, 0.0, tile).is_err());
        assert_eq!(
            flat.tile_mesh(tile, true, true, TileMeshUsage::Raster)
                .unwrap()
                .vertices
                .len(),
            4
        );

        assert_eq!(flat.subdivision_granularity(), SubdivisionGranularitySetting::none());

        let mut globe = Projection::from_name("globe", &config);
        assert_eq!(globe.subdivision_granularity(), config.granularity);
        globe.update(&transform, 0.0);
        assert!(globe.use_globe_rendering());
        assert_eq!(globe.globeness(), 1.0);
        assert!(globe.project(4096.0, 4096.0, tile).is_ok());
        assert!(globe.is_occluded(0.0, 4096.0, tile));
        let data = globe.projection_data(tile, transform.tile_pos_matrix(tile));
        assert_eq!(data.projection_transition, 1.0);
    }
}
