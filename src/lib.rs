//! Flat and globe map projections over Web Mercator vector tiles, with the tile meshes and
//! geometry subdivision the globe needs to bend flat tiles onto a sphere.

pub mod camera;
pub mod config;
pub mod ease;
pub mod error;
pub mod geo;
pub mod mesh;
pub mod projection;
pub mod tile;

pub use camera::Transform;
pub use config::ProjectionConfig;
pub use error::{ConfigError, MeshError, ProjectionError};
pub use projection::{Projection, ProjectionData};
pub use tile::CanonicalTileId;
