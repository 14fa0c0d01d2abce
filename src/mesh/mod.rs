//! Tile meshes and geometry subdivision.

mod granularity;
mod pack;
pub mod subdivision;
mod tile_mesh;

pub use granularity::{GranularityExpression, SubdivisionGranularitySetting, TileMeshUsage};
pub use pack::{pack_mesh, pack_mesh_with_limit, MeshSegment, PackedMesh, MAX_VERTEX_ARRAY_LENGTH};
pub use subdivision::{
    fix_tjoints, subdivide_fill, subdivide_line_clipped, subdivide_triangles, subdivide_vertex_line,
    SubdivisionResult,
};
pub use tile_mesh::{build_tile_mesh, flat_quad_mesh, IndexWidth, MeshCache, TileIndices, TileMesh, TileMeshOptions};
