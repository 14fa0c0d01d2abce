/// Integer extent of one tile edge in tile-local coordinates.
pub const EXTENT: i32 = 8192;

/// Margin outside the tile used for border rows/columns of stencil and raster meshes.
pub const EXTENT_STENCIL_BORDER: i32 = EXTENT / 128;

/// Sentinel Y value marking a vertex that sits exactly on the north pole.
pub const NORTH_POLE_Y: i16 = i16::MIN;

/// Sentinel Y value marking a vertex that sits exactly on the south pole.
pub const SOUTH_POLE_Y: i16 = i16::MAX;

/// Canonical (unwrapped) tile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalTileId {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl CanonicalTileId {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Number of tiles along one axis at this zoom.
    #[inline(always)]
    pub fn dim(&self) -> u32 {
        1u32 << self.z.min(31)
    }

    /// Whether the tile's top edge lies on the Mercator north boundary.
    #[inline(always)]
    pub fn touches_north_pole(&self) -> bool {
        self.y == 0
    }

    /// Whether the tile's bottom edge lies on the Mercator south boundary.
    #[inline(always)]
    pub fn touches_south_pole(&self) -> bool {
        self.y == self.dim() - 1
    }

    /// Offset/scale vector mapping tile-local extent coordinates to Mercator 0..1:
    /// `(x/2^z, y/2^z, 1/(2^z·EXTENT), 1/(2^z·EXTENT))`.
    pub fn mercator_tile_coords(&self) -> [f64; 4] {
        let scale = mercator_tile_scale(i32::from(self.z));
        let inv = 1.0 / scale;
        let per_unit = inv / f64::from(EXTENT);
        [
            f64::from(self.x) * inv,
            f64::from(self.y) * inv,
            per_unit,
            per_unit,
        ]
    }

    /// All tiles of a zoom level, row by row.
    pub fn all_at_zoom(z: u8) -> impl Iterator<Item = CanonicalTileId> {
        let dim = 1u32 << z.min(31);
        (0..dim).flat_map(move |y| (0..dim).map(move |x| CanonicalTileId::new(z, x, y)))
    }
}

/// `2^z`, with negative zoom clamped to zoom 0.
#[inline(always)]
pub fn mercator_tile_scale(z: i32) -> f64 {
    f64::from(z.max(0)).exp2()
}
