mod geometry;
mod renderer;

pub use renderer::{LineString, MapLayers, MapRenderer};
