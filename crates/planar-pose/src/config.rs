use planar_pose_core::{DecompositionMode, PatternSpec};
use planar_pose_detect::{BlobParams, SubPixParams};
use planar_pose_robust::{HomographyRansacOptions, PnpRansacOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to access config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid tracker config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything a [`crate::PlanarTracker`] needs besides the camera.
///
/// Missing JSON fields take their defaults, so a config file only has to name
/// what it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub pattern: PatternSpec,
    pub subpix: SubPixParams,
    pub blobs: BlobParams,
    pub pnp: PnpRansacOptions,
    pub homography: HomographyRansacOptions,
    /// Length of the drawn reference axes, in pattern units.
    pub axis_scale: f64,
    pub decomposition: DecompositionMode,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            pattern: PatternSpec::default(),
            subpix: SubPixParams::default(),
            blobs: BlobParams::default(),
            pnp: PnpRansacOptions::default(),
            homography: HomographyRansacOptions::default(),
            axis_scale: 50.0,
            decomposition: DecompositionMode::default(),
        }
    }
}

impl TrackerConfig {
    pub fn with_pattern(pattern: PatternSpec) -> Self {
        Self {
            pattern,
            ..Self::default()
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
