//! wgpu implementation of [`UploadBackend`]
//!
//! Staging buffers are created mapped and unmapped right before submission.
//! wgpu tracks texture states itself, so recorded barriers only validate the
//! transition and log it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{ResourceState, UploadBackend, ViewDesc};
use crate::{LayoutLimits, SubresourceFootprint, TextureDesc, TextureError};

/// Texture usage flags for streamed textures
///
/// Copy source is included so uploaded contents can be read back for verification
pub const TEXTURE_USAGE_STREAMED: wgpu::TextureUsages = wgpu::TextureUsages::TEXTURE_BINDING
    .union(wgpu::TextureUsages::COPY_DST)
    .union(wgpu::TextureUsages::COPY_SRC);

/// Completion flag set from the queue's submitted-work-done callback
#[derive(Debug, Clone)]
pub struct WgpuFence {
    done: Arc<AtomicBool>,
}

/// Upload backend driving a wgpu device and queue
#[derive(Debug, Clone)]
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    limits: LayoutLimits,
}

impl WgpuBackend {
    /// Wraps an existing device and queue
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let limits = LayoutLimits {
            max_resource_size: device.limits().max_buffer_size,
            ..LayoutLimits::default()
        };
        Self { device, queue, limits }
    }

    /// Requests a high-performance adapter and creates a device for streaming
    ///
    /// Block-compressed formats are enabled when the adapter supports them.
    pub async fn request() -> Result<Self, TextureError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| TextureError::allocation("adapter", e))?;

        let required_features = adapter.features() & wgpu::Features::TEXTURE_COMPRESSION_BC;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("texture-streamer"),
                required_features,
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: Default::default(),
            })
            .await
            .map_err(|e| TextureError::allocation("device", e))?;

        tracing::info!(adapter = ?adapter.get_info().name, ?required_features, "wgpu device ready");
        Ok(Self::new(device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Runs `create` inside error scopes and turns captured errors into allocation failures
    fn scoped<T>(&self, what: &'static str, create: impl FnOnce() -> T) -> Result<T, TextureError> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());

        match out_of_memory.or(validation) {
            Some(error) => Err(TextureError::allocation(what, error)),
            None => Ok(value),
        }
    }

    /// Reads one uploaded subresource back to the CPU
    ///
    /// # Arguments
    /// * `texture` - The texture to read from
    /// * `footprint` - Layout of the subresource, as used for the upload
    ///
    /// # Returns
    /// The subresource bytes with row padding removed
    pub fn read_subresource(&self, texture: &wgpu::Texture, footprint: &SubresourceFootprint) -> Result<Vec<u8>, TextureError> {
        let buffer = self.scoped("readback buffer", || {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Readback Buffer"),
                size: footprint.size(),
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            })
        })?;

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Readback Encoder") });
        encoder.copy_texture_to_buffer(
            texel_copy_texture(texture, footprint),
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: texel_copy_layout(0, footprint),
            },
            copy_extent(texture.format(), footprint),
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        // Map the buffer and block until the device has finished the copy
        let buffer_slice = buffer.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::PollType::Wait).map_err(|e| TextureError::allocation("readback buffer", e))?;
        pollster::block_on(receiver.receive())
            .ok_or_else(|| TextureError::allocation("readback buffer", "mapping was cancelled"))?
            .map_err(|e| TextureError::allocation("readback buffer", e))?;

        let data = buffer_slice.get_mapped_range();
        let mut packed = Vec::with_capacity(footprint.row_size as usize * footprint.row_count as usize * footprint.depth as usize);
        for row in data.chunks(footprint.row_pitch as usize) {
            packed.extend_from_slice(&row[..footprint.row_size as usize]);
        }
        drop(data);
        buffer.unmap();

        Ok(packed)
    }
}

fn texel_copy_texture<'a>(texture: &'a wgpu::Texture, footprint: &SubresourceFootprint) -> wgpu::TexelCopyTextureInfo<'a> {
    // Array slices are addressed through the z origin; volume mips start at z = 0
    let z = match texture.dimension() {
        wgpu::TextureDimension::D3 => 0,
        _ => footprint.slice,
    };
    wgpu::TexelCopyTextureInfo {
        texture,
        mip_level: footprint.mip,
        origin: wgpu::Origin3d { x: 0, y: 0, z },
        aspect: wgpu::TextureAspect::All,
    }
}

fn texel_copy_layout(offset: u64, footprint: &SubresourceFootprint) -> wgpu::TexelCopyBufferLayout {
    wgpu::TexelCopyBufferLayout {
        offset,
        bytes_per_row: Some(footprint.row_pitch),
        rows_per_image: Some(footprint.row_count),
    }
}

/// Copy size rounded up to whole blocks, as wgpu requires for compressed mips
fn copy_extent(format: wgpu::TextureFormat, footprint: &SubresourceFootprint) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: footprint.width,
        height: footprint.height,
        depth_or_array_layers: footprint.depth,
    }
    .physical_size(format)
}

impl UploadBackend for WgpuBackend {
    type Texture = wgpu::Texture;
    type View = wgpu::TextureView;
    type Staging = wgpu::Buffer;
    type Recorder = wgpu::CommandEncoder;
    type Fence = WgpuFence;

    fn layout_limits(&self) -> LayoutLimits {
        self.limits
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<Self::Texture, TextureError> {
        self.scoped("texture", || {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: desc.label.as_deref(),
                size: desc.extent(),
                mip_level_count: desc.mip_count,
                sample_count: 1,
                dimension: desc.dimension,
                format: desc.format,
                usage: TEXTURE_USAGE_STREAMED,
                view_formats: &[],
            })
        })
    }

    fn create_view(&self, texture: &Self::Texture, desc: &ViewDesc) -> Result<Self::View, TextureError> {
        self.scoped("texture view", || {
            texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some("Streamed Texture View"),
                dimension: Some(desc.dimension),
                base_mip_level: desc.base_mip,
                mip_level_count: Some(desc.mip_count),
                base_array_layer: desc.base_slice,
                array_layer_count: Some(desc.slice_count),
                ..Default::default()
            })
        })
    }

    fn create_staging(&self, size: u64) -> Result<Self::Staging, TextureError> {
        self.scoped("staging buffer", || {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Texture Staging Buffer"),
                size,
                usage: wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: true,
            })
        })
    }

    fn write_staging<R>(&self, staging: &Self::Staging, offset: u64, size: u64, write: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut mapped = staging.slice(offset..offset + size).get_mapped_range_mut();
        write(&mut mapped)
    }

    fn create_recorder(&self, label: &str) -> Self::Recorder {
        self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn record_copy(&self, recorder: &mut Self::Recorder, src: &Self::Staging, src_offset: u64, footprint: &SubresourceFootprint, dst: &Self::Texture) {
        recorder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: src,
                layout: texel_copy_layout(src_offset, footprint),
            },
            texel_copy_texture(dst, footprint),
            copy_extent(dst.format(), footprint),
        );
    }

    fn record_barrier(&self, _recorder: &mut Self::Recorder, texture: &Self::Texture, before: ResourceState, after: ResourceState) {
        tracing::trace!(size = ?texture.size(), ?before, ?after, "texture transition is tracked by wgpu");
    }

    fn execute(&self, recorder: Self::Recorder, staging: &Self::Staging) -> Result<Self::Fence, TextureError> {
        staging.unmap();
        let index = self.queue.submit(std::iter::once(recorder.finish()));

        let done = Arc::new(AtomicBool::new(false));
        let signal = done.clone();
        self.queue.on_submitted_work_done(move || signal.store(true, Ordering::Release));
        tracing::debug!(?index, "submitted texture upload");

        Ok(WgpuFence { done })
    }

    fn is_complete(&self, fence: &Self::Fence) -> bool {
        if let Err(e) = self.device.poll(wgpu::PollType::Poll) {
            tracing::warn!(error = %e, "device poll failed");
        }
        fence.done.load(Ordering::Acquire)
    }
}
