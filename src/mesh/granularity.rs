use serde::{Deserialize, Serialize};

use crate::mesh::TileMeshOptions;
use crate::tile::CanonicalTileId;

/// Zoom-dependent granularity: `max(floor(base / 2^zoom), min, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GranularityExpression {
    /// Granularity at zoom 0, halved with every zoom level
    pub base: u32,
    /// Floor applied at high zoom
    pub min: u32,
}

impl GranularityExpression {
    pub const fn new(base: u32, min: u32) -> Self {
        Self { base, min }
    }

    pub fn for_zoom(&self, zoom: u8) -> u32 {
        let scaled = self.base.checked_shr(u32::from(zoom)).unwrap_or(0);
        scaled.max(self.min).max(1)
    }
}

/// Which granularity a raster/stencil tile mesh is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileMeshUsage {
    Raster,
    Stencil,
}

/// Granularity per geometry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubdivisionGranularitySetting {
    pub fill: GranularityExpression,
    pub line: GranularityExpression,
    /// Raster tiles and other full-tile quads
    pub tile: GranularityExpression,
    pub stencil: GranularityExpression,
    /// Subdivision of circle quads, not zoom dependent
    pub circle: u32,
}

impl SubdivisionGranularitySetting {
    /// Settings for globe rendering. Raster tiles keep some subdivision at every zoom so they
    /// do not warp before the flat cutover.
    pub const fn globe() -> Self {
        Self {
            fill: GranularityExpression::new(128, 1),
            line: GranularityExpression::new(512, 1),
            tile: GranularityExpression::new(128, 32),
            stencil: GranularityExpression::new(128, 4),
            circle: 3,
        }
    }

    /// No subdivision at all.
    pub const fn none() -> Self {
        Self {
            fill: GranularityExpression::new(0, 0),
            line: GranularityExpression::new(0, 0),
            tile: GranularityExpression::new(0, 0),
            stencil: GranularityExpression::new(0, 0),
            circle: 1,
        }
    }

    /// Mesh parameters for a full-tile mesh of `tile`.
    pub fn tile_mesh_options(
        &self,
        tile: CanonicalTileId,
        has_border: bool,
        allow_poles: bool,
        usage: TileMeshUsage,
    ) -> TileMeshOptions {
        let expression = match usage {
            TileMeshUsage::Raster => self.tile,
            TileMeshUsage::Stencil => self.stencil,
        };
        TileMeshOptions {
            granularity: expression.for_zoom(tile.z),
            generate_borders: has_border,
            extend_to_north_pole: allow_poles && tile.touches_north_pole(),
            extend_to_south_pole: allow_poles && tile.touches_south_pole(),
        }
    }
}

impl Default for SubdivisionGranularitySetting {
    fn default() -> Self {
        Self::globe()
    }
}
