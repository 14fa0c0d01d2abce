use glam::DMat4;
use std::sync::Arc;

use crate::error::ProjectionError;
use crate::mesh::{flat_quad_mesh, SubdivisionGranularitySetting, TileMesh};
use crate::projection::{PointProjection, ProjectionData};
use crate::tile::CanonicalTileId;

/// Web Mercator. Tiles are drawn with their own matrix and a single quad.
#[derive(Debug, Default)]
pub struct FlatProjection {
    mesh: Option<Arc<TileMesh>>,
}

impl FlatProjection {
    pub const NAME: &'static str = "mercator";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn projection_data(&self, tile: CanonicalTileId, tile_pos_matrix: DMat4) -> ProjectionData {
        let matrix = tile_pos_matrix.as_mat4();
        ProjectionData {
            main_matrix: matrix,
            fallback_matrix: matrix,
            tile_mercator_coords: tile_mercator_coords(tile),
            clipping_plane: [0.0; 4],
            projection_transition: 0.0,
        }
    }

    /// Nothing is ever hidden behind a plane.
    pub fn is_occluded(&self, _x: f64, _y: f64, _tile: CanonicalTileId) -> bool {
        false
    }

    pub fn project(&self, _x: f64, _y: f64, _tile: CanonicalTileId) -> Result<PointProjection, ProjectionError> {
        Err(ProjectionError::ProjectUnsupported {
            projection: Self::NAME,
        })
    }

    /// Flat tiles are never subdivided.
    pub fn subdivision_granularity(&self) -> SubdivisionGranularitySetting {
        SubdivisionGranularitySetting::none()
    }

    /// The tile quad. Pole and border flags do not apply.
    pub fn tile_mesh(&mut self) -> Arc<TileMesh> {
        Arc::clone(self.mesh.get_or_insert_with(|| Arc::new(flat_quad_mesh())))
    }

    pub fn release(&mut self) {
        self.mesh = None;
    }
}

/// Tile offset and scale in Mercator units, as `f32` for the GPU.
pub fn tile_mercator_coords(tile: CanonicalTileId) -> [f32; 4] {
    tile.mercator_tile_coords().map(|v| v as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_data() {
        let flat = FlatProjection::new();
        let tile = CanonicalTileId::new(1, 1, 0);
        let matrix = DMat4::from_scale(glam::DVec3::splat(2.0));
        let data = flat.projection_data(tile, matrix);
        assert_eq!(data.main_matrix, matrix.as_mat4());
        assert_eq!(data.fallback_matrix, data.main_matrix);
        assert_eq!(data.tile_mercator_coords, [0.5, 0.0, 1.0 / 16384.0, 1.0 / 16384.0]);
        assert_eq!(data.clipping_plane, [0.0; 4]);
        assert_eq!(data.projection_transition, 0.0);
    }

    #[test]
    fn test_no_subdivision() {
        let granularity = FlatProjection::new().subdivision_granularity();
        let tile = CanonicalTileId::new(3, 2, 0);
        assert_eq!(granularity.fill.for_zoom(tile.z), 0);
        assert_eq!(granularity.line.for_zoom(tile.z), 0);
        assert_eq!(granularity.circle, 1);
    }

    #[test]
    fn test_project_unsupported() {
        let flat = FlatProjection::new();
        let tile = CanonicalTileId::new(0, 0, 0);
        assert!(!flat.is_occluded(1.0, 2.0, tile));
        assert_eq!(
            flat.project(0.0, 0.0, tile),
            Err(ProjectionError::ProjectUnsupported { projection: "mercator" })
        );
    }

    #[test]
    fn test_single_cached_quad() {
        let mut flat = FlatProjection::new();
        let a = flat.tile_mesh();
        let b = flat.tile_mesh();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.triangle_count(), 2);
        flat.release();
        assert!(!Arc::ptr_eq(&a, &flat.tile_mesh()));
    }
}
