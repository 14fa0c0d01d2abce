use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::mesh::SubdivisionGranularitySetting;

/// Timing of the flat/globe blend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionConfig {
    /// Duration of the globe enable/disable ramp
    pub globe_transition_seconds: f64,
    /// Duration of the high-zoom cutover ramp
    pub zoom_transition_seconds: f64,
    /// At or above this zoom the globe fades into the flat map
    pub max_globe_zoom: f64,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            globe_transition_seconds: 0.5,
            zoom_transition_seconds: 0.5,
            max_globe_zoom: 12.0,
        }
    }
}

/// Cadence and easing of the GPU latitude-error measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorMeasurementConfig {
    /// Frames between issuing a probe and the first readback attempt
    pub readback_wait_frames: u64,
    /// Frames between a finished readback and the next probe
    pub measure_wait_frames: u64,
    /// Duration of the ease from the previous correction to the new one
    pub error_transition_seconds: f64,
    /// Extra time the renderer keeps drawing after the ease ends
    pub dirty_grace_seconds: f64,
}

impl Default for ErrorMeasurementConfig {
    fn default() -> Self {
        Self {
            readback_wait_frames: 4,
            measure_wait_frames: 6,
            error_transition_seconds: 0.5,
            dirty_grace_seconds: 0.2,
        }
    }
}

/// All tuned constants of the projection subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    pub transition: TransitionConfig,
    pub error_measurement: ErrorMeasurementConfig,
    /// Scale applied to the horizon plane so visible geometry stays within the near clip distance
    pub clipping_plane_scale: f64,
    /// Granularity used by the spherical projection
    pub granularity: SubdivisionGranularitySetting,
    /// Refuse to build meshes that need 32-bit indices
    pub force_16bit_indices: bool,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            transition: TransitionConfig::default(),
            error_measurement: ErrorMeasurementConfig::default(),
            clipping_plane_scale: 0.25,
            granularity: SubdivisionGranularitySetting::globe(),
            force_16bit_indices: false,
        }
    }
}

impl ProjectionConfig {
    /// Parse a JSON document. Missing fields keep their defaults.
    pub fn from_json_bytes(bytes: &mut [u8]) -> Result<Self, ConfigError> {
        Ok(simd_json::serde::from_slice(bytes)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let mut bytes = fs::read(path)?;
        Self::from_json_bytes(&mut bytes)
    }
}
