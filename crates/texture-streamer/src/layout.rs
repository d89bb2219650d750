//! Subresource footprint computation
//!
//! Computes where each (mip, slice) subresource lives inside a linear staging
//! buffer, using the row pitch and placement alignment the device requires for
//! buffer-to-texture copies.

use crate::{TextureDesc, TextureError};

/// Row pitch alignment required for buffer-to-texture copies
pub const ROW_PITCH_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
/// Alignment of every subresource's starting offset inside the staging buffer
pub const PLACEMENT_ALIGNMENT: u64 = 512;
/// Capacity of the per-texture subresource table
pub const DEFAULT_MAX_SUBRESOURCES: usize = 512;

/// Alignment constants and size limits that constrain footprint layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutLimits {
    /// Every destination row pitch is a multiple of this
    pub row_pitch_alignment: u32,
    /// Every footprint extent is rounded up to a multiple of this
    pub placement_alignment: u64,
    /// Largest staging region the device can address
    pub max_resource_size: u64,
    /// Largest number of subresources a single texture may have
    pub max_subresources: usize,
}

impl Default for LayoutLimits {
    fn default() -> Self {
        Self {
            row_pitch_alignment: ROW_PITCH_ALIGNMENT,
            placement_alignment: PLACEMENT_ALIGNMENT,
            max_resource_size: u32::MAX as u64,
            max_subresources: DEFAULT_MAX_SUBRESOURCES,
        }
    }
}

/// Byte layout of one subresource inside the staging region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceFootprint {
    /// `mip + slice * mip_count`
    pub subresource: u32,
    pub mip: u32,
    pub slice: u32,
    /// Byte offset from the start of the staging region
    pub offset: u64,
    /// Texel width of this mip level
    pub width: u32,
    /// Texel height of this mip level
    pub height: u32,
    /// Number of block rows
    pub row_count: u32,
    /// Bytes of pixel data in one row, without padding
    pub row_size: u32,
    /// Distance in bytes between consecutive rows in the staging region
    pub row_pitch: u32,
    /// Depth layers of this mip level
    pub depth: u32,
}

impl SubresourceFootprint {
    /// Bytes occupied by this subresource before placement alignment
    pub fn size(&self) -> u64 {
        self.row_pitch as u64 * self.row_count as u64 * self.depth as u64
    }
}

/// Footprints of every subresource of a texture plus the staging size they need
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FootprintTable {
    footprints: Vec<SubresourceFootprint>,
    total_size: u64,
}

impl FootprintTable {
    /// Footprints in ascending subresource order
    pub fn footprints(&self) -> &[SubresourceFootprint] {
        &self.footprints
    }

    /// Sum of all aligned extents
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn len(&self) -> usize {
        self.footprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.footprints.is_empty()
    }

    /// Footprint of the given subresource index
    pub fn get(&self, subresource: u32) -> Option<&SubresourceFootprint> {
        self.footprints.get(subresource as usize)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SubresourceFootprint> {
        self.footprints.iter()
    }
}

impl<'a> IntoIterator for &'a FootprintTable {
    type Item = &'a SubresourceFootprint;
    type IntoIter = std::slice::Iter<'a, SubresourceFootprint>;

    fn into_iter(self) -> Self::IntoIter {
        self.footprints.iter()
    }
}

/// Rounds `value` up to a multiple of `alignment`, or `None` on overflow
fn align_up(value: u64, alignment: u64) -> Option<u64> {
    value.div_ceil(alignment).checked_mul(alignment)
}

/// Bytes of block data in one row `width` texels wide, without padding
///
/// `None` for formats without a single copyable block size.
pub(crate) fn packed_row_size(format: wgpu::TextureFormat, width: u32) -> Option<u64> {
    let (block_width, _) = format.block_dimensions();
    Some(width.div_ceil(block_width) as u64 * format.block_copy_size(None)? as u64)
}

fn overflow(what: impl Into<String>) -> TextureError {
    TextureError::LayoutOverflow(what.into())
}

/// Computes the staging footprint of every subresource of `desc`
///
/// Subresources are enumerated slice-major, so entry `i` of the result is the
/// footprint of subresource index `i`.
///
/// # Arguments
/// * `desc` - The destination texture description
/// * `limits` - Device alignment constants and table capacity
///
/// # Returns
/// The footprint table, whose total size is the staging region to allocate
///
/// # Errors
/// [`TextureError::LayoutOverflow`] when the subresource count exceeds the table
/// capacity or the accumulated size exceeds the device limit, and
/// [`TextureError::Decode`] for formats without a single copyable block size.
pub fn compute_footprints(desc: &TextureDesc, limits: &LayoutLimits) -> Result<FootprintTable, TextureError> {
    let count = desc.subresource_count();
    if count > limits.max_subresources as u64 {
        return Err(overflow(format!("{count} subresources exceed the table capacity of {}", limits.max_subresources)));
    }

    if desc.format.block_copy_size(None).is_none() {
        return Err(TextureError::decode(
            desc.label.clone().unwrap_or_default(),
            format!("format {:?} has no single copyable block size", desc.format),
        ));
    }
    let (_, block_height) = desc.format.block_dimensions();

    let mut footprints = Vec::with_capacity(count as usize);
    let mut offset = 0u64;

    for slice in 0..desc.array_size {
        for mip in 0..desc.mip_count {
            let width = desc.mip_width(mip);
            let height = desc.mip_height(mip);
            let depth = desc.mip_depth(mip);

            let row_size = packed_row_size(desc.format, width).ok_or_else(|| overflow("row size"))?;
            let row_pitch = align_up(row_size, limits.row_pitch_alignment as u64).ok_or_else(|| overflow("row pitch"))?;
            let row_count = height.div_ceil(block_height);

            let extent = row_pitch
                .checked_mul(row_count as u64)
                .and_then(|bytes| bytes.checked_mul(depth as u64))
                .and_then(|bytes| align_up(bytes, limits.placement_alignment))
                .ok_or_else(|| overflow(format!("extent of mip {mip}, slice {slice}")))?;

            footprints.push(SubresourceFootprint {
                subresource: desc.subresource_index(mip, slice),
                mip,
                slice,
                offset,
                width,
                height,
                row_count,
                row_size: u32::try_from(row_size).map_err(|_| overflow("row size"))?,
                row_pitch: u32::try_from(row_pitch).map_err(|_| overflow("row pitch"))?,
                depth,
            });

            offset = offset.checked_add(extent).ok_or_else(|| overflow("staging size"))?;
            if offset > limits.max_resource_size {
                return Err(overflow(format!("staging size {offset} exceeds device maximum {}", limits.max_resource_size)));
            }
        }
    }

    Ok(FootprintTable { footprints, total_size: offset })
}
