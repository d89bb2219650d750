//! Headless CPU implementation of [`UploadBackend`]
//!
//! Textures are plain byte vectors, one per subresource, packed without row
//! padding. Recorded commands are applied when the recorder is executed. The
//! backend keeps a log of executed commands and live resource counts so the
//! pipeline can be inspected without a GPU.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{ResourceState, UploadBackend, ViewDesc};
use crate::layout::packed_row_size;
use crate::{LayoutLimits, SubresourceFootprint, TextureDesc, TextureError};

/// A command as it appears in the execution log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Buffer-to-texture copy of one subresource
    Copy { texture: u64, subresource: u32, src_offset: u64 },
    /// State transition covering all subresources of a texture
    Barrier { texture: u64, before: ResourceState, after: ResourceState },
}

/// A recorded command with everything needed to replay it
#[derive(Debug)]
enum RecordedCommand {
    Copy {
        staging: Arc<Mutex<Vec<u8>>>,
        src_offset: u64,
        footprint: SubresourceFootprint,
        texture: u64,
    },
    Barrier {
        texture: u64,
        before: ResourceState,
        after: ResourceState,
    },
}

impl RecordedCommand {
    fn logged(&self) -> Command {
        match *self {
            RecordedCommand::Copy {
                src_offset, ref footprint, texture, ..
            } => Command::Copy {
                texture,
                subresource: footprint.subresource,
                src_offset,
            },
            RecordedCommand::Barrier { texture, before, after } => Command::Barrier { texture, before, after },
        }
    }
}

#[derive(Debug)]
struct TextureStorage {
    state: ResourceState,
    subresources: Vec<Vec<u8>>,
    size: u64,
}

#[derive(Debug, Default)]
struct DeviceState {
    next_texture_id: u64,
    textures: HashMap<u64, TextureStorage>,
    memory_budget: Option<u64>,
    memory_used: u64,
    live_views: usize,
    live_staging: usize,
    manual_fences: bool,
    submitted_fence: u64,
    completed_fence: u64,
    submissions: Vec<Vec<Command>>,
}

type SharedDevice = Arc<Mutex<DeviceState>>;

/// Texture owned by a [`SoftwareBackend`]; dropping it frees its storage
#[derive(Debug)]
pub struct SoftwareTexture {
    id: u64,
    desc: TextureDesc,
    device: SharedDevice,
}

impl SoftwareTexture {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The description the texture was created with
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }
}

impl Drop for SoftwareTexture {
    fn drop(&mut self) {
        let mut device = self.device.lock();
        if let Some(storage) = device.textures.remove(&self.id) {
            device.memory_used -= storage.size;
        }
    }
}

/// View over a [`SoftwareTexture`]
#[derive(Debug)]
pub struct SoftwareView {
    texture: u64,
    desc: ViewDesc,
    device: SharedDevice,
}

impl SoftwareView {
    /// Id of the texture this view reads from
    pub fn texture(&self) -> u64 {
        self.texture
    }

    pub fn desc(&self) -> &ViewDesc {
        &self.desc
    }
}

impl Drop for SoftwareView {
    fn drop(&mut self) {
        self.device.lock().live_views -= 1;
    }
}

/// Zero-initialized staging memory
#[derive(Debug)]
pub struct SoftwareStaging {
    bytes: Arc<Mutex<Vec<u8>>>,
    device: SharedDevice,
}

impl SoftwareStaging {
    /// Copy of the staged bytes
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl Drop for SoftwareStaging {
    fn drop(&mut self) {
        self.device.lock().live_staging -= 1;
    }
}

#[derive(Debug)]
pub struct SoftwareRecorder {
    label: String,
    commands: Vec<RecordedCommand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftwareFence(u64);

/// CPU-side device used for headless uploads and tests
#[derive(Debug, Clone)]
pub struct SoftwareBackend {
    device: SharedDevice,
    limits: LayoutLimits,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            device: Arc::new(Mutex::new(DeviceState::default())),
            limits: LayoutLimits::default(),
        }
    }

    /// Fails texture creation once `bytes` of texture memory are in use
    pub fn with_memory_budget(self, bytes: u64) -> Self {
        self.device.lock().memory_budget = Some(bytes);
        self
    }

    /// Overrides the reported layout limits
    pub fn with_limits(mut self, limits: LayoutLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Leaves fences pending until [`SoftwareBackend::signal_fences`] is called
    pub fn with_manual_fences(self) -> Self {
        self.device.lock().manual_fences = true;
        self
    }

    /// Completes every fence submitted so far
    pub fn signal_fences(&self) {
        let mut device = self.device.lock();
        device.completed_fence = device.submitted_fence;
    }

    pub fn live_textures(&self) -> usize {
        self.device.lock().textures.len()
    }

    pub fn live_views(&self) -> usize {
        self.device.lock().live_views
    }

    pub fn live_staging(&self) -> usize {
        self.device.lock().live_staging
    }

    /// Bytes of texture memory currently allocated
    pub fn memory_used(&self) -> u64 {
        self.device.lock().memory_used
    }

    /// Commands of every executed recorder, in submission order
    pub fn submissions(&self) -> Vec<Vec<Command>> {
        self.device.lock().submissions.clone()
    }

    pub fn texture_state(&self, texture: &SoftwareTexture) -> Option<ResourceState> {
        self.device.lock().textures.get(&texture.id).map(|storage| storage.state)
    }

    /// Contents of one subresource, rows packed without padding
    pub fn read_subresource(&self, texture: &SoftwareTexture, subresource: u32) -> Option<Vec<u8>> {
        self.device.lock()
            .textures
            .get(&texture.id)
            .and_then(|storage| storage.subresources.get(subresource as usize).cloned())
    }

    fn apply(device: &mut DeviceState, command: &RecordedCommand) {
        match command {
            RecordedCommand::Copy {
                staging,
                src_offset,
                footprint,
                texture,
            } => {
                let Some(storage) = device.textures.get_mut(texture) else {
                    tracing::error!(texture, "copy into a released texture");
                    return;
                };
                if storage.state != ResourceState::CopyDest {
                    tracing::warn!(texture, state = ?storage.state, "copy into a texture that is not a copy destination");
                }
                let Some(destination) = storage.subresources.get_mut(footprint.subresource as usize) else {
                    tracing::error!(texture, subresource = footprint.subresource, "copy into a missing subresource");
                    return;
                };

                let staging = staging.lock();
                let row_size = footprint.row_size as usize;
                let rows = footprint.row_count as usize * footprint.depth as usize;
                for row in 0..rows {
                    let src_start = *src_offset as usize + row * footprint.row_pitch as usize;
                    let dst_start = row * row_size;
                    match (staging.get(src_start..src_start + row_size), destination.get_mut(dst_start..dst_start + row_size)) {
                        (Some(src), Some(dst)) => dst.copy_from_slice(src),
                        _ => {
                            tracing::error!(texture, row, "copy row out of bounds");
                            return;
                        }
                    }
                }
            }
            RecordedCommand::Barrier { texture, before, after } => {
                let Some(storage) = device.textures.get_mut(texture) else {
                    tracing::error!(texture, "barrier on a released texture");
                    return;
                };
                if storage.state != *before {
                    tracing::warn!(texture, state = ?storage.state, expected = ?before, "barrier state mismatch");
                }
                storage.state = *after;
            }
        }
    }
}

impl UploadBackend for SoftwareBackend {
    type Texture = SoftwareTexture;
    type View = SoftwareView;
    type Staging = SoftwareStaging;
    type Recorder = SoftwareRecorder;
    type Fence = SoftwareFence;

    fn layout_limits(&self) -> LayoutLimits {
        self.limits
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<Self::Texture, TextureError> {
        let (_, block_height) = desc.format.block_dimensions();

        let mut subresources = Vec::with_capacity(desc.subresource_count() as usize);
        for _slice in 0..desc.array_size {
            for mip in 0..desc.mip_count {
                let row_size = packed_row_size(desc.format, desc.mip_width(mip))
                    .ok_or_else(|| TextureError::allocation("texture", format!("unsupported format {:?}", desc.format)))?;
                let rows = desc.mip_height(mip).div_ceil(block_height) as u64 * desc.mip_depth(mip) as u64;
                subresources.push(vec![0u8; (row_size * rows) as usize]);
            }
        }
        let size: u64 = subresources.iter().map(|s| s.len() as u64).sum();

        let mut device = self.device.lock();
        if let Some(budget) = device.memory_budget {
            if device.memory_used + size > budget {
                return Err(TextureError::allocation(
                    "texture",
                    format!("out of memory: {size} bytes requested, {} of {budget} in use", device.memory_used),
                ));
            }
        }

        let id = device.next_texture_id;
        device.next_texture_id += 1;
        device.memory_used += size;
        device.textures.insert(
            id,
            TextureStorage {
                state: ResourceState::CopyDest,
                subresources,
                size,
            },
        );

        Ok(SoftwareTexture {
            id,
            desc: desc.clone(),
            device: self.device.clone(),
        })
    }

    fn create_view(&self, texture: &Self::Texture, desc: &ViewDesc) -> Result<Self::View, TextureError> {
        let mut device = self.device.lock();
        if !device.textures.contains_key(&texture.id) {
            return Err(TextureError::allocation("texture view", "texture was released"));
        }
        device.live_views += 1;

        Ok(SoftwareView {
            texture: texture.id,
            desc: *desc,
            device: self.device.clone(),
        })
    }

    fn create_staging(&self, size: u64) -> Result<Self::Staging, TextureError> {
        if size > self.limits.max_resource_size {
            return Err(TextureError::allocation("staging buffer", format!("{size} bytes exceeds the device maximum")));
        }
        self.device.lock().live_staging += 1;

        Ok(SoftwareStaging {
            bytes: Arc::new(Mutex::new(vec![0u8; size as usize])),
            device: self.device.clone(),
        })
    }

    fn write_staging<R>(&self, staging: &Self::Staging, offset: u64, size: u64, write: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut bytes = staging.bytes.lock();
        write(&mut bytes[offset as usize..(offset + size) as usize])
    }

    fn create_recorder(&self, label: &str) -> Self::Recorder {
        SoftwareRecorder {
            label: label.to_string(),
            commands: Vec::new(),
        }
    }

    fn record_copy(&self, recorder: &mut Self::Recorder, src: &Self::Staging, src_offset: u64, footprint: &SubresourceFootprint, dst: &Self::Texture) {
        recorder.commands.push(RecordedCommand::Copy {
            staging: src.bytes.clone(),
            src_offset,
            footprint: *footprint,
            texture: dst.id,
        });
    }

    fn record_barrier(&self, recorder: &mut Self::Recorder, texture: &Self::Texture, before: ResourceState, after: ResourceState) {
        recorder.commands.push(RecordedCommand::Barrier {
            texture: texture.id,
            before,
            after,
        });
    }

    fn execute(&self, recorder: Self::Recorder, _staging: &Self::Staging) -> Result<Self::Fence, TextureError> {
        let mut device = self.device.lock();
        for command in &recorder.commands {
            Self::apply(&mut device, command);
        }

        device.submissions.push(recorder.commands.iter().map(RecordedCommand::logged).collect());
        device.submitted_fence += 1;
        if !device.manual_fences {
            device.completed_fence = device.submitted_fence;
        }
        tracing::debug!(label = %recorder.label, commands = recorder.commands.len(), "executed software recorder");

        Ok(SoftwareFence(device.submitted_fence))
    }

    fn is_complete(&self, fence: &Self::Fence) -> bool {
        self.device.lock().completed_fence >= fence.0
    }
}
