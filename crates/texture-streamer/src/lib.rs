//! Texture streaming and upload pipeline for wgpu
//!
//! This crate loads texture containers from disk into GPU-resident textures
//! ready for sampling. It decodes container metadata, lays out every mip and
//! array subresource the way the device expects, stages pixel rows into
//! upload memory while correcting row pitch mismatches, records the copies and
//! transitions the texture into a shader-readable state.

pub mod backend;
mod config;
pub mod copy_scheduler;
pub mod decoder;
mod error;
pub mod job_batch;
pub mod layout;
pub mod manifest;
mod resource_allocator;
pub mod staging_arena;
mod texture;
mod texture_desc;
mod texture_registry;
pub mod view_registry;

pub use backend::{SoftwareBackend, UploadBackend, WgpuBackend};
pub use config::LoaderConfig;
pub use copy_scheduler::{Image, PixelSource, stage_and_copy};
pub use decoder::{ContainerDecoder, DdsDecoder, DecodedTexture, MemoryDecoder};
pub use error::TextureError;
pub use job_batch::{JobBatch, JobOutcome, WorkerPool};
pub use layout::{FootprintTable, LayoutLimits, SubresourceFootprint, compute_footprints};
pub use manifest::{ManifestFile, ManifestProvider};
pub use resource_allocator::allocate_texture;
pub use staging_arena::{StagingAllocation, StagingArena};
pub use texture::Texture;
pub use texture_desc::{TextureDesc, TextureMetadata};
pub use texture_registry::{LoadReport, TextureRegistry, TextureState};
pub use view_registry::{ViewRegistry, ViewSlot};
