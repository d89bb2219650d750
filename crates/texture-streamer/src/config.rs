//! Loader configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::TextureError;
use crate::layout::DEFAULT_MAX_SUBRESOURCES;
use crate::view_registry::DEFAULT_VIEW_CAPACITY;

/// Settings passed to a [`TextureRegistry`](crate::TextureRegistry) at construction
///
/// Every field has a default, so a YAML file only lists what it changes:
///
/// ```yaml
/// force_srgb: true
/// manifest_path: assets/textures.yaml
/// preload: [MageDiffuseFire]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Create every texture with the SRGB variant of its format
    pub force_srgb: bool,
    /// YAML manifest listing the container paths
    pub manifest_path: PathBuf,
    /// Directory container paths are resolved against; the manifest's
    /// directory when unset
    pub asset_root: Option<PathBuf>,
    /// Logical names loaded as soon as the registry is built
    pub preload: Vec<String>,
    /// Largest number of subresources a single texture may have
    pub max_subresources: usize,
    /// Number of shader-visible view slots
    pub view_capacity: usize,
    /// Decode threads for parallel loading; one per core when unset
    pub worker_threads: Option<usize>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            force_srgb: false,
            manifest_path: PathBuf::from("textures.yaml"),
            asset_root: None,
            preload: Vec::new(),
            max_subresources: DEFAULT_MAX_SUBRESOURCES,
            view_capacity: DEFAULT_VIEW_CAPACITY,
            worker_threads: None,
        }
    }
}

impl LoaderConfig {
    /// Parses a configuration from YAML content
    pub fn from_yaml(yaml_content: &str) -> Result<Self, serde_norway::Error> {
        serde_norway::from_str(yaml_content)
    }

    /// Reads a configuration file
    ///
    /// Relative `manifest_path` and `asset_root` values are resolved against
    /// the directory containing the file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TextureError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content).map_err(|source| TextureError::Manifest { path: path.to_path_buf(), source })?;

        if let Some(dir) = path.parent() {
            config.manifest_path = dir.join(&config.manifest_path);
            config.asset_root = config.asset_root.map(|root| dir.join(root));
        }
        Ok(config)
    }

    /// Directory container paths are resolved against
    pub fn asset_root(&self) -> Option<PathBuf> {
        self.asset_root
            .clone()
            .or_else(|| self.manifest_path.parent().filter(|dir| !dir.as_os_str().is_empty()).map(Path::to_path_buf))
    }
}
