use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::MeshError;
use crate::tile::{EXTENT, EXTENT_STENCIL_BORDER, NORTH_POLE_Y, SOUTH_POLE_Y};

/// Parameters that fully determine a tile mesh. Also the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileMeshOptions {
    /// Quads per tile edge, values below 1 are treated as 1
    pub granularity: u32,
    /// Add a ring of quads just outside the tile
    pub generate_borders: bool,
    /// Add a row reaching the north pole sentinel
    pub extend_to_north_pole: bool,
    /// Add a row reaching the south pole sentinel
    pub extend_to_south_pole: bool,
}

impl TileMeshOptions {
    pub fn plain(granularity: u32) -> Self {
        Self {
            granularity,
            generate_borders: false,
            extend_to_north_pole: false,
            extend_to_south_pole: false,
        }
    }
}

/// Index width requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexWidth {
    /// 16-bit when the vertex count allows it, 32-bit otherwise
    Auto,
    /// 16-bit or fail
    U16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileIndices {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl TileIndices {
    pub fn len(&self) -> usize {
        match self {
            TileIndices::U16(v) => v.len(),
            TileIndices::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    pub fn get(&self, i: usize) -> u32 {
        match self {
            TileIndices::U16(v) => u32::from(v[i]),
            TileIndices::U32(v) => v[i],
        }
    }

    pub fn triangles(&self) -> impl Iterator<Item = [u32; 3]> + '_ {
        (0..self.len() / 3).map(move |t| [self.get(3 * t), self.get(3 * t + 1), self.get(3 * t + 2)])
    }
}

/// Immutable vertex/index buffer pair for a whole tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileMesh {
    pub vertices: Vec<[i16; 2]>,
    pub indices: TileIndices,
}

impl TileMesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// The single quad used by the flat projection.
pub fn flat_quad_mesh() -> TileMesh {
    let e = EXTENT as i16;
    TileMesh {
        vertices: vec![[0, 0], [e, 0], [0, e], [e, e]],
        indices: TileIndices::U16(vec![0, 2, 1, 1, 2, 3]),
    }
}

#[inline(always)]
fn grid_x(x: i64, granularity: i64) -> i16 {
    if x < 0 {
        -EXTENT_STENCIL_BORDER as i16
    } else if x > granularity {
        (EXTENT + EXTENT_STENCIL_BORDER) as i16
    } else {
        (x * i64::from(EXTENT) / granularity) as i16
    }
}

#[inline(always)]
fn grid_y(y: i64, granularity: i64, options: &TileMeshOptions) -> i16 {
    if y < 0 {
        if options.extend_to_north_pole {
            NORTH_POLE_Y
        } else {
            -EXTENT_STENCIL_BORDER as i16
        }
    } else if y > granularity {
        if options.extend_to_south_pole {
            SOUTH_POLE_Y
        } else {
            (EXTENT + EXTENT_STENCIL_BORDER) as i16
        }
    } else {
        (y * i64::from(EXTENT) / granularity) as i16
    }
}

/// Lay out a regular grid over the tile, optionally with a border ring and pole rows.
/// Two triangles per quad, `(v0, v2, v1)` and `(v1, v2, v3)`, rows top to bottom.
pub fn build_tile_mesh(options: TileMeshOptions, width: IndexWidth) -> Result<TileMesh, MeshError> {
    let granularity = i64::from(options.granularity.max(1));
    let border = options.generate_borders;
    let north = options.extend_to_north_pole;
    let south = options.extend_to_south_pole;

    let start_x: i64 = if border { -1 } else { 0 };
    let start_y: i64 = if border || north { -1 } else { 0 };
    let end_x = granularity + i64::from(border);
    let end_y = granularity + i64::from(border || south);

    let verts_x = (end_x - start_x + 1) as usize;
    let verts_y = (end_y - start_y + 1) as usize;
    let vertex_count = verts_x * verts_y;

    if width == IndexWidth::U16 && vertex_count > 1 << 16 {
        return Err(MeshError::GranularityTooLarge {
            granularity: options.granularity,
            vertex_count,
        });
    }

    let mut vertices = Vec::with_capacity(vertex_count);
    for y in start_y..=end_y {
        let vy = grid_y(y, granularity, &options);
        for x in start_x..=end_x {
            vertices.push([grid_x(x, granularity), vy]);
        }
    }

    let quads_x = verts_x - 1;
    let quads_y = verts_y - 1;
    let mut indices: Vec<u32> = Vec::with_capacity(quads_x * quads_y * 6);
    for y in 0..quads_y {
        for x in 0..quads_x {
            let v0 = (x + y * verts_x) as u32;
            let v1 = v0 + 1;
            let v2 = v0 + verts_x as u32;
            let v3 = v2 + 1;
            indices.extend_from_slice(&[v0, v2, v1, v1, v2, v3]);
        }
    }

    let indices = if vertex_count <= 1 << 16 {
        TileIndices::U16(indices.into_iter().map(|i| i as u16).collect())
    } else {
        TileIndices::U32(indices)
    };

    Ok(TileMesh { vertices, indices })
}

/// Meshes built so far, keyed by their options. Owned by one projection instance.
#[derive(Debug, Default)]
pub struct MeshCache {
    meshes: HashMap<TileMeshOptions, Arc<TileMesh>>,
}

impl MeshCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(
        &mut self,
        options: TileMeshOptions,
        width: IndexWidth,
    ) -> Result<Arc<TileMesh>, MeshError> {
        if let Some(mesh) = self.meshes.get(&options) {
            if width == IndexWidth::U16 && matches!(mesh.indices, TileIndices::U32(_)) {
                return Err(MeshError::GranularityTooLarge {
                    granularity: options.granularity,
                    vertex_count: mesh.vertices.len(),
                });
            }
            return Ok(Arc::clone(mesh));
        }

        let mesh = Arc::new(build_tile_mesh(options, width)?);
        debug!(
            granularity = options.granularity,
            border = options.generate_borders,
            north = options.extend_to_north_pole,
            south = options.extend_to_south_pole,
            vertices = mesh.vertices.len(),
            wide_indices = matches!(mesh.indices, TileIndices::U32(_)),
            "built tile mesh"
        );
        self.meshes.insert(options, Arc::clone(&mesh));
        Ok(mesh)
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Drop every cached mesh.
    pub fn clear(&mut self) {
        self.meshes.clear();
    }
}
