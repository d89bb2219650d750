//! Device backends for the upload pipeline
//!
//! The pipeline never talks to a graphics API directly. Everything it needs from
//! the device (resource creation, staging memory, command recording and
//! completion tracking) goes through [`UploadBackend`].

pub mod software;
mod wgpu_device;

pub use software::SoftwareBackend;
pub use wgpu_device::{WgpuBackend, WgpuFence};

use crate::{LayoutLimits, SubresourceFootprint, TextureDesc, TextureError};

/// Device-visible access state of a texture resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Writable by copy commands
    CopyDest,
    /// Readable from shaders
    ShaderRead,
}

/// Shape of the shader-visible view bound over a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewDesc {
    pub dimension: wgpu::TextureViewDimension,
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_slice: u32,
    pub slice_count: u32,
}

impl ViewDesc {
    /// The standard read view for a texture
    ///
    /// Cubemaps get a cube view over all six faces starting at mip 0; other
    /// textures get a 2D, 2D-array or 3D view over every subresource.
    pub fn for_texture(desc: &TextureDesc) -> Self {
        let dimension = if desc.is_cubemap {
            wgpu::TextureViewDimension::Cube
        } else {
            match desc.dimension {
                wgpu::TextureDimension::D1 => wgpu::TextureViewDimension::D1,
                wgpu::TextureDimension::D3 => wgpu::TextureViewDimension::D3,
                wgpu::TextureDimension::D2 if desc.array_size > 1 => wgpu::TextureViewDimension::D2Array,
                wgpu::TextureDimension::D2 => wgpu::TextureViewDimension::D2,
            }
        };

        Self {
            dimension,
            base_mip: 0,
            mip_count: desc.mip_count,
            base_slice: 0,
            slice_count: desc.array_size,
        }
    }
}

/// The device, queue and command-recorder operations the pipeline consumes
///
/// Resources are owned values: dropping a `Texture`, `View` or `Staging`
/// releases it on the device.
pub trait UploadBackend {
    /// Device-resident texture resource
    type Texture;
    /// Shader-visible read view over a texture
    type View;
    /// Upload-visible buffer the CPU writes staged rows into
    type Staging;
    /// Records copy and barrier commands until executed
    type Recorder;
    /// Signals when an executed recorder has finished on the device
    type Fence;

    /// Alignment constants and size limits for footprint layout
    fn layout_limits(&self) -> LayoutLimits;

    /// Creates a texture in the copy-destination state
    fn create_texture(&self, desc: &TextureDesc) -> Result<Self::Texture, TextureError>;

    /// Creates a read view over `texture`
    fn create_view(&self, texture: &Self::Texture, desc: &ViewDesc) -> Result<Self::View, TextureError>;

    /// Creates a CPU-writable staging buffer of exactly `size` bytes
    fn create_staging(&self, size: u64) -> Result<Self::Staging, TextureError>;

    /// Gives `write` mutable access to `size` bytes of `staging` starting at `offset`
    fn write_staging<R>(&self, staging: &Self::Staging, offset: u64, size: u64, write: impl FnOnce(&mut [u8]) -> R) -> R;

    /// Starts a new command recorder
    fn create_recorder(&self, label: &str) -> Self::Recorder;

    /// Records a copy of one subresource from `src` at `src_offset` into `dst`
    fn record_copy(&self, recorder: &mut Self::Recorder, src: &Self::Staging, src_offset: u64, footprint: &SubresourceFootprint, dst: &Self::Texture);

    /// Records a state transition covering every subresource of `texture`
    fn record_barrier(&self, recorder: &mut Self::Recorder, texture: &Self::Texture, before: ResourceState, after: ResourceState);

    /// Submits the recorded commands; `staging` is finished being written
    fn execute(&self, recorder: Self::Recorder, staging: &Self::Staging) -> Result<Self::Fence, TextureError>;

    /// Whether the device has finished the work behind `fence`
    fn is_complete(&self, fence: &Self::Fence) -> bool;
}
