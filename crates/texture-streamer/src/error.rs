//! Error taxonomy for the texture upload pipeline
//!
//! Every stage of the pipeline returns a [`TextureError`]. The registry decides
//! whether a failure aborts a single asset or is reported and skipped.

use std::path::PathBuf;

/// Errors produced while decoding, laying out, staging or registering a texture
#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    /// The container file is missing, truncated, or uses an unsupported format
    #[error("failed to decode container {path:?}: {reason}")]
    Decode {
        /// Path of the container being decoded
        path: PathBuf,
        /// Human-readable cause
        reason: String,
    },

    /// A cubemap was declared without exactly six array slices
    #[error("cubemap declared with {array_size} array slices, expected 6")]
    FormatMismatch {
        /// The array size found in the container metadata
        array_size: u32,
    },

    /// The device could not create a resource, view or staging buffer
    #[error("device allocation failed for {what}: {reason}")]
    Allocation {
        /// What was being allocated
        what: &'static str,
        /// Device-reported cause
        reason: String,
    },

    /// Footprint arithmetic exceeded a device or table limit
    #[error("subresource layout overflow: {0}")]
    LayoutOverflow(String),

    /// The pixel source does not provide an image the footprint table requires
    #[error("pixel source is missing mip {mip}, slice {slice}, depth {z}: {reason}")]
    CopyBounds {
        /// Mip level of the missing image
        mip: u32,
        /// Array slice of the missing image
        slice: u32,
        /// Depth layer of the missing image
        z: u32,
        /// Why the image could not be used
        reason: &'static str,
    },

    /// No manifest entry exists for the requested logical name
    #[error("no texture named {0:?} is registered")]
    NotFound(String),

    /// The manifest or loader configuration could not be parsed
    #[error("invalid manifest {path:?}")]
    Manifest {
        /// Path of the manifest or configuration file
        path: PathBuf,
        /// Underlying parse error
        #[source]
        source: serde_norway::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TextureError {
    /// Convenience constructor for [`TextureError::Decode`]
    pub fn decode(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`TextureError::Allocation`]
    pub fn allocation(what: &'static str, reason: impl ToString) -> Self {
        Self::Allocation { what, reason: reason.to_string() }
    }
}
