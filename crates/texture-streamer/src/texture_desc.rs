//! Texture metadata and device resource descriptions
//!
//! [`TextureMetadata`] is what a container decoder reports. [`TextureDesc`] is the
//! description handed to the device; it differs from the metadata only in the
//! destination format when SRGB is forced.

use crate::TextureError;

/// Metadata decoded from a texture container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureMetadata {
    /// Width of mip 0 in texels
    pub width: u32,
    /// Height of mip 0 in texels
    pub height: u32,
    /// Depth of mip 0 in texels (1 unless the texture is volumetric)
    pub depth: u32,
    /// Pixel format of the stored bytes
    pub format: wgpu::TextureFormat,
    /// Number of mip levels
    pub mip_count: u32,
    /// Number of array slices (6 for a cubemap)
    pub array_size: u32,
    /// Whether the slices are the faces of a cube
    pub is_cubemap: bool,
    /// Resource dimensionality
    pub dimension: wgpu::TextureDimension,
}

impl TextureMetadata {
    /// Metadata for a plain 2D texture with a single slice
    pub fn new_2d(width: u32, height: u32, format: wgpu::TextureFormat, mip_count: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
            format,
            mip_count,
            array_size: 1,
            is_cubemap: false,
            dimension: wgpu::TextureDimension::D2,
        }
    }

    /// Texel width, height and depth of a mip level, each at least 1
    pub fn mip_extent(&self, mip: u32) -> (u32, u32, u32) {
        let shrink = |extent: u32| extent.checked_shr(mip).unwrap_or(0).max(1);
        let depth = match self.dimension {
            wgpu::TextureDimension::D3 => shrink(self.depth),
            _ => 1,
        };
        (shrink(self.width), shrink(self.height), depth)
    }

    /// Length of the full mip chain down to 1x1x1
    pub fn max_mip_count(&self) -> u32 {
        let (_, _, depth) = self.mip_extent(0);
        u32::BITS - self.width.max(self.height).max(depth).leading_zeros()
    }

    /// Number of array slices stored in the container (1 for volumes)
    pub fn slice_count(&self) -> u32 {
        match self.dimension {
            wgpu::TextureDimension::D3 => 1,
            _ => self.array_size,
        }
    }
}

/// Description of the device-resident texture to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    /// Debug label forwarded to the device
    pub label: Option<String>,
    /// Resource dimensionality
    pub dimension: wgpu::TextureDimension,
    /// Width of mip 0 in texels
    pub width: u32,
    /// Height of mip 0 in texels
    pub height: u32,
    /// Depth of mip 0 in texels (1 for 2D resources)
    pub depth: u32,
    /// Number of array slices (1 for 3D resources)
    pub array_size: u32,
    /// Number of mip levels
    pub mip_count: u32,
    /// Format the device interprets the stored bytes as
    pub format: wgpu::TextureFormat,
    /// Whether a cube view is bound over the slices
    pub is_cubemap: bool,
}

impl TextureDesc {
    /// Builds the device description for decoded metadata
    ///
    /// When `force_srgb` is set the destination format is mapped to its SRGB
    /// variant. Formats without one are left unchanged.
    ///
    /// # Errors
    /// Returns [`TextureError::FormatMismatch`] for a cubemap that does not have
    /// exactly six slices, and [`TextureError::LayoutOverflow`] for empty extents.
    pub fn from_metadata(metadata: &TextureMetadata, force_srgb: bool) -> Result<Self, TextureError> {
        if metadata.is_cubemap && metadata.array_size != 6 {
            return Err(TextureError::FormatMismatch { array_size: metadata.array_size });
        }
        if metadata.width == 0 || metadata.height == 0 || metadata.depth == 0 || metadata.mip_count == 0 || metadata.array_size == 0 {
            return Err(TextureError::LayoutOverflow(format!(
                "empty texture extent {}x{}x{} with {} mips and {} slices",
                metadata.width, metadata.height, metadata.depth, metadata.mip_count, metadata.array_size
            )));
        }

        let is_3d = metadata.dimension == wgpu::TextureDimension::D3;
        let format = if force_srgb { metadata.format.add_srgb_suffix() } else { metadata.format };

        Ok(Self {
            label: None,
            dimension: metadata.dimension,
            width: metadata.width,
            height: metadata.height,
            depth: if is_3d { metadata.depth } else { 1 },
            array_size: if is_3d { 1 } else { metadata.array_size },
            mip_count: metadata.mip_count,
            format,
            is_cubemap: metadata.is_cubemap,
        })
    }

    /// Attaches a debug label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Number of individually addressable (mip, slice) units
    pub fn subresource_count(&self) -> u64 {
        self.mip_count as u64 * self.array_size as u64
    }

    /// Subresource index of a (mip, slice) pair: `mip + slice * mip_count`
    pub fn subresource_index(&self, mip: u32, slice: u32) -> u32 {
        mip + slice * self.mip_count
    }

    /// Width of the given mip level in texels
    pub fn mip_width(&self, mip: u32) -> u32 {
        self.width.checked_shr(mip).unwrap_or(0).max(1)
    }

    /// Height of the given mip level in texels
    pub fn mip_height(&self, mip: u32) -> u32 {
        self.height.checked_shr(mip).unwrap_or(0).max(1)
    }

    /// Depth of the given mip level (always 1 for 2D resources)
    pub fn mip_depth(&self, mip: u32) -> u32 {
        match self.dimension {
            wgpu::TextureDimension::D3 => self.depth.checked_shr(mip).unwrap_or(0).max(1),
            _ => 1,
        }
    }

    /// Extent in the form wgpu expects, with depth and array layers folded together
    pub fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: match self.dimension {
                wgpu::TextureDimension::D3 => self.depth,
                _ => self.array_size,
            },
        }
    }
}
