//! Texture manifests
//!
//! A manifest lists the container paths a registry knows about. Each path is
//! registered under its logical name, the file name without its extension.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::TextureError;

/// Supplies the container paths to register
pub trait ManifestProvider {
    fn file_list(&self) -> Result<Vec<String>, TextureError>;
}

impl ManifestProvider for Vec<String> {
    fn file_list(&self) -> Result<Vec<String>, TextureError> {
        Ok(self.clone())
    }
}

impl ManifestProvider for [&str] {
    fn file_list(&self) -> Result<Vec<String>, TextureError> {
        Ok(self.iter().map(|path| path.to_string()).collect())
    }
}

/// Parsed manifest document
///
/// ```yaml
/// textures:
///   - Char/Mage/MageDiffuseFire.dds
///   - Env/Sky/Skybox.dds
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Container paths, relative to the asset root
    #[serde(default)]
    pub textures: Vec<String>,
}

impl Manifest {
    /// Parses a manifest from YAML content
    pub fn from_yaml(yaml_content: &str) -> Result<Self, serde_norway::Error> {
        serde_norway::from_str(yaml_content)
    }
}

/// YAML manifest read from disk each time the file list is requested
#[derive(Debug, Clone)]
pub struct ManifestFile {
    path: PathBuf,
}

impl ManifestFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and parses the manifest
    ///
    /// # Errors
    /// [`TextureError::Io`] when the file cannot be read and
    /// [`TextureError::Manifest`] when it is not a valid manifest
    pub fn read(&self) -> Result<Manifest, TextureError> {
        let content = std::fs::read_to_string(&self.path)?;
        Manifest::from_yaml(&content).map_err(|source| TextureError::Manifest { path: self.path.clone(), source })
    }
}

impl ManifestProvider for ManifestFile {
    fn file_list(&self) -> Result<Vec<String>, TextureError> {
        let manifest = self.read()?;
        tracing::debug!(path = %self.path.display(), textures = manifest.textures.len(), "read texture manifest");
        Ok(manifest.textures)
    }
}

/// Logical name of a container path: the text after the last separator, up
/// to the last `.`
///
/// A leading dot is part of the name, so `.hidden` stays `.hidden`.
pub fn logical_name(path: &str) -> &str {
    let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match file_name.rfind('.') {
        Some(dot) if dot > 0 => &file_name[..dot],
        _ => file_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_name() {
        assert_eq!(logical_name("Char/Mage/MageDiffuseFire.dds"), "MageDiffuseFire");
        assert_eq!(logical_name("Env\\Sky\\Skybox.dds"), "Skybox");
        assert_eq!(logical_name("archive.tar.dds"), "archive.tar");
        assert_eq!(logical_name("NoExtension"), "NoExtension");
        assert_eq!(logical_name("dir.d/file"), "file");
        assert_eq!(logical_name("dir/.hidden"), ".hidden");
    }

    #[test]
    fn test_parse_manifest() {
        let manifest = Manifest::from_yaml("textures:\n  - Char/Mage/MageDiffuseFire.dds\n  - Env/Sky/Skybox.dds\n").unwrap();
        assert_eq!(manifest.textures, ["Char/Mage/MageDiffuseFire.dds", "Env/Sky/Skybox.dds"]);

        assert_eq!(Manifest::from_yaml("{}").unwrap(), Manifest::default());
        assert!(Manifest::from_yaml("textures: 3").is_err());
        assert!(Manifest::from_yaml("shaders: []").is_err());
    }

    #[test]
    fn test_manifest_file_errors() {
        let dir = std::env::temp_dir().join(format!("texture-streamer-manifest-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let missing = ManifestFile::new(dir.join("missing.yaml"));
        assert!(matches!(missing.file_list(), Err(TextureError::Io(_))));

        let invalid = dir.join("invalid.yaml");
        std::fs::write(&invalid, "textures: {").unwrap();
        assert!(matches!(ManifestFile::new(&invalid).file_list(), Err(TextureError::Manifest { .. })));

        let valid = dir.join("valid.yaml");
        std::fs::write(&valid, "textures:\n  - a/b.dds\n").unwrap();
        assert_eq!(ManifestFile::new(&valid).file_list().unwrap(), ["a/b.dds"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_in_memory_lists() {
        let list = vec!["x/y.dds".to_string()];
        assert_eq!(list.file_list().unwrap(), list);
        assert_eq!(["a.dds", "b.dds"][..].file_list().unwrap(), ["a.dds", "b.dds"]);
    }
}
