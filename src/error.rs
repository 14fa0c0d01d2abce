use thiserror::Error;

/// Failures while building or subdividing tile geometry.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeshError {
    /// The requested grid needs more vertices than 16-bit indices can address.
    #[error(
        "granularity {granularity} is too large: {vertex_count} vertices do not fit 16-bit indices"
    )]
    GranularityTooLarge {
        granularity: u32,
        vertex_count: usize,
    },

    /// A vertex ended up outside the signed 16-bit tile coordinate domain.
    #[error("vertex ({x}, {y}) is outside the 16-bit tile coordinate range")]
    CoordinateOutOfRange { x: i32, y: i32 },

    #[error("triangulation failed: {0}")]
    Triangulation(String),
}

/// Failures of projection queries.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProjectionError {
    /// Per-vertex projection is only available on curved projections.
    #[error("projection '{projection}' does not support per-vertex projection")]
    ProjectUnsupported { projection: &'static str },
}

/// Failures while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] simd_json::Error),
}
