//! GPU-resident texture assets

use crate::backend::UploadBackend;
use crate::view_registry::ViewSlot;
use crate::{TextureDesc, TextureMetadata};

/// One uploaded texture: a device resource paired with its shader-visible view
///
/// The resource and the view slot are owned together. Dropping the texture
/// frees the view slot first and then the resource.
pub struct Texture<B: UploadBackend> {
    // Field order is drop order: the view goes before the resource it reads
    view: ViewSlot<B::View>,
    resource: B::Texture,
    format: wgpu::TextureFormat,
    source_format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    depth: u32,
    mip_count: u32,
    array_size: u32,
    is_cubemap: bool,
}

impl<B: UploadBackend> Texture<B> {
    pub(crate) fn new(resource: B::Texture, view: ViewSlot<B::View>, desc: &TextureDesc, metadata: &TextureMetadata) -> Self {
        Self {
            view,
            resource,
            format: desc.format,
            source_format: metadata.format,
            width: desc.width,
            height: desc.height,
            depth: desc.depth,
            mip_count: desc.mip_count,
            array_size: desc.array_size,
            is_cubemap: desc.is_cubemap,
        }
    }

    /// The device resource
    pub fn resource(&self) -> &B::Texture {
        &self.resource
    }

    /// The view slot through which shaders sample this texture
    pub fn view(&self) -> &ViewSlot<B::View> {
        &self.view
    }

    /// Format the device interprets the texture as
    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// Format the container stored the pixels in
    pub fn source_format(&self) -> wgpu::TextureFormat {
        self.source_format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn mip_count(&self) -> u32 {
        self.mip_count
    }

    pub fn array_size(&self) -> u32 {
        self.array_size
    }

    pub fn is_cubemap(&self) -> bool {
        self.is_cubemap
    }
}

impl<B: UploadBackend> std::fmt::Debug for Texture<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("view_slot", &self.view.index())
            .field("format", &self.format)
            .field("dimensions", &(self.width, self.height, self.depth))
            .field("mip_count", &self.mip_count)
            .field("array_size", &self.array_size)
            .field("is_cubemap", &self.is_cubemap)
            .finish()
    }
}
