//! Container decoding
//!
//! A decoder turns a container file into [`TextureMetadata`] plus tightly
//! packed pixel data. [`DecodedTexture`] exposes that data per (mip, slice,
//! depth layer) through [`PixelSource`].

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ddsfile::{Caps2, D3D10ResourceDimension, D3DFormat, Dds, DxgiFormat, MiscFlag};

use crate::copy_scheduler::{Image, PixelSource};
use crate::layout::packed_row_size;
use crate::{TextureError, TextureMetadata};

#[derive(Debug, Clone, Copy)]
struct ImageRange {
    offset: usize,
    row_pitch: usize,
    layer_size: usize,
    depth: u32,
}

/// Metadata and pixel data of one decoded container
///
/// Pixel data is stored slice by slice, each slice holding its mips from
/// largest to smallest, each mip holding its depth layers. Rows are packed
/// without padding. Cloning shares the pixel data.
#[derive(Debug, Clone)]
pub struct DecodedTexture {
    path: PathBuf,
    metadata: TextureMetadata,
    data: Arc<[u8]>,
    images: Vec<ImageRange>,
}

impl DecodedTexture {
    /// Splits tightly packed `data` into images according to `metadata`
    ///
    /// # Errors
    /// [`TextureError::Decode`] when the format has no copyable block size or
    /// `data` is shorter than the images `metadata` describes
    pub fn from_packed(path: impl Into<PathBuf>, metadata: TextureMetadata, data: impl Into<Arc<[u8]>>) -> Result<Self, TextureError> {
        let path = path.into();
        let data = data.into();
        let (_, block_height) = metadata.format.block_dimensions();

        if metadata.mip_count > metadata.max_mip_count() {
            return Err(TextureError::decode(
                &path,
                format!(
                    "{} mips declared for a {}x{}x{} texture",
                    metadata.mip_count, metadata.width, metadata.height, metadata.depth
                ),
            ));
        }
        let overflow = || TextureError::decode(&path, "image sizes overflow");

        // Every image holds at least one byte, so the count is bounded by the data
        let image_count = (metadata.slice_count() as usize).checked_mul(metadata.mip_count as usize).ok_or_else(overflow)?;
        if image_count > data.len() {
            return Err(TextureError::decode(&path, format!("truncated pixel data: {} bytes for {image_count} images", data.len())));
        }

        let mut images = Vec::with_capacity(image_count);
        let mut offset = 0usize;
        for _slice in 0..metadata.slice_count() {
            for mip in 0..metadata.mip_count {
                let (width, height, depth) = metadata.mip_extent(mip);
                let row_pitch = packed_row_size(metadata.format, width)
                    .ok_or_else(|| TextureError::decode(&path, format!("format {:?} has no copyable block size", metadata.format)))?;
                let row_pitch = usize::try_from(row_pitch).map_err(|_| overflow())?;
                let layer_size = row_pitch.checked_mul(height.div_ceil(block_height) as usize).ok_or_else(overflow)?;

                images.push(ImageRange { offset, row_pitch, layer_size, depth });
                offset = layer_size
                    .checked_mul(depth as usize)
                    .and_then(|size| offset.checked_add(size))
                    .ok_or_else(overflow)?;
            }
        }

        if data.len() < offset {
            return Err(TextureError::decode(&path, format!("truncated pixel data: {} bytes, expected {offset}", data.len())));
        }
        if data.len() > offset {
            tracing::debug!(path = %path.display(), trailing = data.len() - offset, "ignoring trailing container bytes");
        }

        Ok(Self { path, metadata, data, images })
    }

    pub fn metadata(&self) -> &TextureMetadata {
        &self.metadata
    }

    /// Path the texture was decoded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every depth layer of one subresource, rows packed without padding
    ///
    /// This matches what the device holds after the upload.
    pub fn subresource_bytes(&self, mip: u32, slice: u32) -> Option<Vec<u8>> {
        let (_, _, depth) = self.metadata.mip_extent(mip);
        let mut bytes = Vec::new();
        for z in 0..depth {
            bytes.extend_from_slice(self.image(mip, slice, z)?.pixels);
        }
        Some(bytes)
    }

    /// Total bytes of pixel data
    pub fn data_len(&self) -> usize {
        self.images.iter().map(|image| image.layer_size * image.depth as usize).sum()
    }
}

impl PixelSource for DecodedTexture {
    fn image(&self, mip: u32, slice: u32, z: u32) -> Option<Image<'_>> {
        if mip >= self.metadata.mip_count || slice >= self.metadata.slice_count() {
            return None;
        }
        let range = self.images.get((slice * self.metadata.mip_count + mip) as usize)?;
        if z >= range.depth {
            return None;
        }

        let start = range.offset + z as usize * range.layer_size;
        Some(Image {
            pixels: self.data.get(start..start + range.layer_size)?,
            row_pitch: range.row_pitch,
        })
    }
}

/// Decodes a container file into metadata and pixel images
pub trait ContainerDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedTexture, TextureError>;
}

/// Decoder for DirectDraw Surface containers
#[derive(Debug, Clone, Default)]
pub struct DdsDecoder {
    root: Option<PathBuf>,
}

impl DdsDecoder {
    /// Creates a decoder that resolves relative paths against `root`
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    /// Creates a decoder for the asset root of `config`
    pub fn from_config(config: &crate::LoaderConfig) -> Self {
        Self::new(config.asset_root())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Decodes an in-memory DDS file; `path` is used for error reporting
    pub fn decode_bytes(path: &Path, bytes: &[u8]) -> Result<DecodedTexture, TextureError> {
        let dds = Dds::read(&mut Cursor::new(bytes)).map_err(|e| TextureError::decode(path, e.to_string()))?;
        let metadata = dds_metadata(path, &dds)?;

        tracing::debug!(
            path = %path.display(),
            format = ?metadata.format,
            width = metadata.width,
            height = metadata.height,
            mips = metadata.mip_count,
            slices = metadata.array_size,
            cubemap = metadata.is_cubemap,
            "decoded dds header"
        );

        DecodedTexture::from_packed(path, metadata, dds.data)
    }
}

impl ContainerDecoder for DdsDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedTexture, TextureError> {
        let resolved = self.resolve(path);
        let bytes = std::fs::read(&resolved).map_err(|e| TextureError::decode(&resolved, e.to_string()))?;
        Self::decode_bytes(&resolved, &bytes)
    }
}

fn dds_metadata(path: &Path, dds: &Dds) -> Result<TextureMetadata, TextureError> {
    let format = dds
        .get_dxgi_format()
        .and_then(dxgi_to_wgpu)
        .or_else(|| dds.get_d3d_format().and_then(d3d_to_wgpu))
        .ok_or_else(|| TextureError::decode(path, "unsupported pixel format"))?;

    let header10 = dds.header10.as_ref();
    let is_cubemap = dds.header.caps2.contains(Caps2::CUBEMAP) || header10.is_some_and(|h| h.misc_flag.contains(MiscFlag::TEXTURECUBE));
    let dimension = match header10.map(|h| &h.resource_dimension) {
        Some(D3D10ResourceDimension::Texture1D) => wgpu::TextureDimension::D1,
        Some(D3D10ResourceDimension::Texture3D) => wgpu::TextureDimension::D3,
        Some(_) => wgpu::TextureDimension::D2,
        None if dds.header.caps2.contains(Caps2::VOLUME) => wgpu::TextureDimension::D3,
        None => wgpu::TextureDimension::D2,
    };

    // Cube arrays count whole cubes in the header; the texture counts faces
    let layers = header10.map_or(1, |h| h.array_size.max(1));
    let array_size = match (is_cubemap, header10.is_some()) {
        (true, true) => layers * 6,
        (true, false) => 6,
        (false, _) => layers,
    };

    Ok(TextureMetadata {
        width: dds.get_width(),
        height: dds.get_height(),
        depth: if dimension == wgpu::TextureDimension::D3 { dds.get_depth().max(1) } else { 1 },
        format,
        mip_count: dds.get_num_mipmap_levels().max(1),
        array_size,
        is_cubemap,
        dimension,
    })
}

fn dxgi_to_wgpu(format: DxgiFormat) -> Option<wgpu::TextureFormat> {
    use wgpu::TextureFormat as T;

    Some(match format {
        DxgiFormat::R8G8B8A8_UNorm => T::Rgba8Unorm,
        DxgiFormat::R8G8B8A8_UNorm_sRGB => T::Rgba8UnormSrgb,
        DxgiFormat::B8G8R8A8_UNorm => T::Bgra8Unorm,
        DxgiFormat::B8G8R8A8_UNorm_sRGB => T::Bgra8UnormSrgb,
        DxgiFormat::R10G10B10A2_UNorm => T::Rgb10a2Unorm,
        DxgiFormat::R8_UNorm => T::R8Unorm,
        DxgiFormat::R8G8_UNorm => T::Rg8Unorm,
        DxgiFormat::R16_Float => T::R16Float,
        DxgiFormat::R32_Float => T::R32Float,
        DxgiFormat::R16G16B16A16_Float => T::Rgba16Float,
        DxgiFormat::R32G32B32A32_Float => T::Rgba32Float,
        DxgiFormat::BC1_UNorm => T::Bc1RgbaUnorm,
        DxgiFormat::BC1_UNorm_sRGB => T::Bc1RgbaUnormSrgb,
        DxgiFormat::BC2_UNorm => T::Bc2RgbaUnorm,
        DxgiFormat::BC2_UNorm_sRGB => T::Bc2RgbaUnormSrgb,
        DxgiFormat::BC3_UNorm => T::Bc3RgbaUnorm,
        DxgiFormat::BC3_UNorm_sRGB => T::Bc3RgbaUnormSrgb,
        DxgiFormat::BC4_UNorm => T::Bc4RUnorm,
        DxgiFormat::BC4_SNorm => T::Bc4RSnorm,
        DxgiFormat::BC5_UNorm => T::Bc5RgUnorm,
        DxgiFormat::BC5_SNorm => T::Bc5RgSnorm,
        DxgiFormat::BC6H_UF16 => T::Bc6hRgbUfloat,
        DxgiFormat::BC6H_SF16 => T::Bc6hRgbFloat,
        DxgiFormat::BC7_UNorm => T::Bc7RgbaUnorm,
        DxgiFormat::BC7_UNorm_sRGB => T::Bc7RgbaUnormSrgb,
        _ => return None,
    })
}

fn d3d_to_wgpu(format: D3DFormat) -> Option<wgpu::TextureFormat> {
    use wgpu::TextureFormat as T;

    Some(match format {
        D3DFormat::A8B8G8R8 => T::Rgba8Unorm,
        D3DFormat::A8R8G8B8 => T::Bgra8Unorm,
        D3DFormat::DXT1 => T::Bc1RgbaUnorm,
        D3DFormat::DXT3 => T::Bc2RgbaUnorm,
        D3DFormat::DXT5 => T::Bc3RgbaUnorm,
        _ => return None,
    })
}

/// Decoder serving pre-decoded textures from memory, keyed by path
#[derive(Debug, Clone, Default)]
pub struct MemoryDecoder {
    textures: HashMap<PathBuf, DecodedTexture>,
}

impl MemoryDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `texture` available under `path`, replacing any previous entry
    pub fn insert(&mut self, path: impl Into<PathBuf>, texture: DecodedTexture) {
        self.textures.insert(path.into(), texture);
    }

    /// Builder form of [`MemoryDecoder::insert`]
    pub fn with_texture(mut self, path: impl Into<PathBuf>, texture: DecodedTexture) -> Self {
        self.insert(path, texture);
        self
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

impl ContainerDecoder for MemoryDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedTexture, TextureError> {
        self.textures.get(path).cloned().ok_or_else(|| TextureError::decode(path, "no such container"))
    }
}
