//! Row staging and copy recording
//!
//! Decoded images rarely share the device's row pitch. Rows are copied one at a
//! time into the staging region at the footprint's pitch, then one copy per
//! subresource and a single state transition are recorded.

use crate::backend::{ResourceState, UploadBackend};
use crate::layout::FootprintTable;
use crate::staging_arena::StagingAllocation;
use crate::{Texture, TextureError};

/// One decoded 2D image: a single depth layer of a single subresource
#[derive(Debug, Clone, Copy)]
pub struct Image<'a> {
    /// Block rows, `row_pitch` bytes apart
    pub pixels: &'a [u8],
    /// Distance in bytes between consecutive rows of `pixels`
    pub row_pitch: usize,
}

/// Supplies decoded images by (mip, slice, depth layer)
pub trait PixelSource {
    fn image(&self, mip: u32, slice: u32, z: u32) -> Option<Image<'_>>;
}

/// Copies every image of `source` into `dst` at the positions given by `footprints`
///
/// Each row copies `min(row_pitch, source_row_pitch)` bytes. Bytes past that
/// clamp are not written.
///
/// # Errors
/// [`TextureError::CopyBounds`] when an image is missing or shorter than its rows
pub fn stage_rows(dst: &mut [u8], footprints: &FootprintTable, source: &impl PixelSource) -> Result<(), TextureError> {
    for footprint in footprints {
        let row_pitch = footprint.row_pitch as usize;
        let rows = footprint.row_count as usize;
        let layer_pitch = row_pitch * rows;

        for z in 0..footprint.depth {
            let bounds = |reason| TextureError::CopyBounds {
                mip: footprint.mip,
                slice: footprint.slice,
                z,
                reason,
            };

            let image = source.image(footprint.mip, footprint.slice, z).ok_or_else(|| bounds("image not provided"))?;
            let copy_len = row_pitch.min(image.row_pitch);
            if rows > 0 && image.pixels.len() < (rows - 1) * image.row_pitch + copy_len {
                return Err(bounds("image shorter than its rows"));
            }

            let layer_start = footprint.offset as usize + z as usize * layer_pitch;
            for row in 0..rows {
                let src_start = row * image.row_pitch;
                let dst_start = layer_start + row * row_pitch;
                let dst_row = dst.get_mut(dst_start..dst_start + copy_len).ok_or_else(|| bounds("staging region too small"))?;
                dst_row.copy_from_slice(&image.pixels[src_start..src_start + copy_len]);
            }
        }
    }

    Ok(())
}

/// Records one copy per footprint, in ascending subresource order, then the
/// transition into the shader-readable state
pub fn record_copies<B: UploadBackend>(backend: &B, allocation: &mut StagingAllocation<B>, footprints: &FootprintTable, texture: &B::Texture) {
    let base = allocation.offset();
    let (staging, recorder) = allocation.parts_mut();

    for footprint in footprints {
        backend.record_copy(recorder, staging, base + footprint.offset, footprint, texture);
    }
    backend.record_barrier(recorder, texture, ResourceState::CopyDest, ResourceState::ShaderRead);
}

/// Stages every image of `source` into `allocation` and records the upload of `texture`
///
/// Nothing is submitted; the caller executes the allocation's recorder.
///
/// # Errors
/// [`TextureError::LayoutOverflow`] when the allocation is smaller than the
/// footprint table, and [`TextureError::CopyBounds`] from [`stage_rows`].
pub fn stage_and_copy<B: UploadBackend>(
    backend: &B,
    texture: &Texture<B>,
    footprints: &FootprintTable,
    source: &impl PixelSource,
    allocation: &mut StagingAllocation<B>,
) -> Result<(), TextureError> {
    if allocation.size() < footprints.total_size() {
        return Err(TextureError::LayoutOverflow(format!(
            "staging allocation of {} bytes cannot hold {} bytes of subresources",
            allocation.size(),
            footprints.total_size()
        )));
    }

    backend.write_staging(allocation.staging(), allocation.offset(), footprints.total_size(), |dst| stage_rows(dst, footprints, source))?;
    record_copies(backend, allocation, footprints, texture.resource());

    tracing::trace!(subresources = footprints.len(), bytes = footprints.total_size(), "recorded texture upload");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::backend::software::Command;
    use crate::resource_allocator::allocate_texture;
    use crate::staging_arena::StagingArena;
    use crate::view_registry::ViewRegistry;
    use crate::{TextureDesc, TextureMetadata, compute_footprints};

    /// Images keyed by (mip, slice, z), each with its own pitch
    #[derive(Default)]
    struct Images(HashMap<(u32, u32, u32), (Vec<u8>, usize)>);

    impl Images {
        fn insert(&mut self, mip: u32, slice: u32, z: u32, pixels: Vec<u8>, row_pitch: usize) {
            self.0.insert((mip, slice, z), (pixels, row_pitch));
        }
    }

    impl PixelSource for Images {
        fn image(&self, mip: u32, slice: u32, z: u32) -> Option<Image<'_>> {
            self.0.get(&(mip, slice, z)).map(|(pixels, row_pitch)| Image { pixels, row_pitch: *row_pitch })
        }
    }

    /// Tightly packed RGBA8 mip chain whose bytes count up from `seed`
    fn rgba_chain(desc: &TextureDesc, seed: u8) -> Images {
        let mut images = Images::default();
        let mut value = seed;
        for mip in 0..desc.mip_count {
            let row_pitch = desc.mip_width(mip) as usize * 4;
            let pixels = (0..row_pitch * desc.mip_height(mip) as usize)
                .map(|_| {
                    value = value.wrapping_add(1);
                    value
                })
                .collect();
            images.insert(mip, 0, 0, pixels, row_pitch);
        }
        images
    }

    fn rgba_desc(width: u32, height: u32, mips: u32, force_srgb: bool) -> (TextureDesc, TextureMetadata) {
        let metadata = TextureMetadata::new_2d(width, height, wgpu::TextureFormat::Rgba8Unorm, mips);
        (TextureDesc::from_metadata(&metadata, force_srgb).unwrap(), metadata)
    }

    #[test]
    fn test_rows_round_trip_through_padded_staging() {
        let backend = SoftwareBackend::new();
        let views = ViewRegistry::new(4);
        let mut arena = StagingArena::new(&backend.layout_limits());
        let (desc, metadata) = rgba_desc(3, 5, 3, false);
        let images = rgba_chain(&desc, 0);

        let texture = allocate_texture(&backend, &views, &desc, &metadata).unwrap();
        let table = compute_footprints(&desc, &backend.layout_limits()).unwrap();
        let mut allocation = arena.allocate(&backend, table.total_size(), "round trip").unwrap();
        stage_and_copy(&backend, &texture, &table, &images, &mut allocation).unwrap();

        // Row 1 of mip 0 sits one pitch in, with zero padding after its 12 bytes
        let staged = allocation.staging().contents();
        assert_eq!(&staged[256..268], &images.image(0, 0, 0).unwrap().pixels[12..24]);
        assert!(staged[268..512].iter().all(|&b| b == 0));

        arena.submit(&backend, allocation).unwrap();
        for mip in 0..3 {
            let expected = images.image(mip, 0, 0).unwrap().pixels.to_vec();
            assert_eq!(backend.read_subresource(texture.resource(), mip), Some(expected), "mip {mip}");
        }
        assert_eq!(backend.texture_state(texture.resource()), Some(ResourceState::ShaderRead));
    }

    #[test]
    fn test_wide_source_pitch_is_clamped() {
        let (desc, _) = rgba_desc(2, 2, 1, false);
        let table = compute_footprints(&desc, &Default::default()).unwrap();

        // 300-byte source rows: only the first 256 bytes of each row fit the pitch
        let mut images = Images::default();
        let pixels: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
        images.insert(0, 0, 0, pixels.clone(), 300);

        let mut staging = vec![0xAAu8; table.total_size() as usize];
        stage_rows(&mut staging, &table, &images).unwrap();
        assert_eq!(&staging[..256], &pixels[..256]);
        assert_eq!(&staging[256..512], &pixels[300..556]);
    }

    #[test]
    fn test_narrow_source_pitch_leaves_padding_unwritten() {
        let (desc, _) = rgba_desc(2, 2, 1, false);
        let table = compute_footprints(&desc, &Default::default()).unwrap();

        let mut images = Images::default();
        images.insert(0, 0, 0, (1..=24).collect(), 12);

        let mut staging = vec![0xAAu8; table.total_size() as usize];
        stage_rows(&mut staging, &table, &images).unwrap();
        assert_eq!(&staging[..12], &(1..=12).collect::<Vec<u8>>()[..]);
        assert!(staging[12..256].iter().all(|&b| b == 0xAA));
        assert_eq!(&staging[256..268], &(13..=24).collect::<Vec<u8>>()[..]);
    }

    #[test]
    fn test_allocation_offset_is_honored() {
        let backend = SoftwareBackend::new();
        let views = ViewRegistry::new(4);
        let (desc, metadata) = rgba_desc(4, 4, 2, false);
        let images = rgba_chain(&desc, 7);

        let texture = allocate_texture(&backend, &views, &desc, &metadata).unwrap();
        let table = compute_footprints(&desc, &backend.layout_limits()).unwrap();
        let staging = backend.create_staging(512 + table.total_size()).unwrap();
        let mut allocation = StagingAllocation::from_parts(staging, 512, table.total_size(), backend.create_recorder("offset"));
        stage_and_copy(&backend, &texture, &table, &images, &mut allocation).unwrap();

        let staged = allocation.staging().contents();
        assert!(staged[..512].iter().all(|&b| b == 0));
        assert_eq!(&staged[512..528], &images.image(0, 0, 0).unwrap().pixels[..16]);

        let mut arena = StagingArena::new(&backend.layout_limits());
        arena.submit(&backend, allocation).unwrap();
        let id = texture.resource().id();
        assert_eq!(
            backend.submissions()[0],
            vec![
                Command::Copy { texture: id, subresource: 0, src_offset: 512 },
                Command::Copy { texture: id, subresource: 1, src_offset: 512 + table.get(1).unwrap().offset },
                Command::Barrier { texture: id, before: ResourceState::CopyDest, after: ResourceState::ShaderRead },
            ]
        );
        assert_eq!(backend.read_subresource(texture.resource(), 1), Some(images.image(1, 0, 0).unwrap().pixels.to_vec()));
    }

    #[test]
    fn test_missing_and_short_images() {
        let (desc, _) = rgba_desc(4, 4, 2, false);
        let table = compute_footprints(&desc, &Default::default()).unwrap();
        let mut staging = vec![0u8; table.total_size() as usize];

        let mut images = Images::default();
        images.insert(0, 0, 0, vec![0; 64], 16);
        let err = stage_rows(&mut staging, &table, &images).unwrap_err();
        assert!(matches!(err, TextureError::CopyBounds { mip: 1, slice: 0, z: 0, .. }));

        images.insert(1, 0, 0, vec![0; 15], 8);
        let err = stage_rows(&mut staging, &table, &images).unwrap_err();
        assert!(matches!(err, TextureError::CopyBounds { mip: 1, reason: "image shorter than its rows", .. }));
    }

    #[test]
    fn test_undersized_allocation_is_rejected() {
        let backend = SoftwareBackend::new();
        let views = ViewRegistry::new(4);
        let (desc, metadata) = rgba_desc(64, 64, 1, false);
        let texture = allocate_texture(&backend, &views, &desc, &metadata).unwrap();
        let table = compute_footprints(&desc, &backend.layout_limits()).unwrap();
        let images = rgba_chain(&desc, 0);

        let mut allocation = StagingArena::new(&backend.layout_limits()).allocate(&backend, 512, "small").unwrap();
        let err = stage_and_copy(&backend, &texture, &table, &images, &mut allocation).unwrap_err();
        assert!(matches!(err, TextureError::LayoutOverflow(_)));
    }

    #[test]
    fn test_srgb_stages_identical_bytes() {
        let backend = SoftwareBackend::new();
        let views = ViewRegistry::new(4);
        let mut arena = StagingArena::new(&backend.layout_limits());

        let mut staged = Vec::new();
        for force_srgb in [false, true] {
            let (desc, metadata) = rgba_desc(8, 8, 4, force_srgb);
            let texture = allocate_texture(&backend, &views, &desc, &metadata).unwrap();
            assert_eq!(texture.source_format(), wgpu::TextureFormat::Rgba8Unorm);

            let table = compute_footprints(&desc, &backend.layout_limits()).unwrap();
            let mut allocation = arena.allocate(&backend, table.total_size(), "srgb").unwrap();
            stage_and_copy(&backend, &texture, &table, &rgba_chain(&desc, 3), &mut allocation).unwrap();
            staged.push((texture.format(), allocation.staging().contents()));
        }

        assert_eq!(staged[0].0, wgpu::TextureFormat::Rgba8Unorm);
        assert_eq!(staged[1].0, wgpu::TextureFormat::Rgba8UnormSrgb);
        assert_eq!(staged[0].1, staged[1].1);
    }
}
