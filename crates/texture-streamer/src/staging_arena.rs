//! Upload-visible staging memory
//!
//! Each upload gets its own staging allocation and command recorder. Once the
//! recorder is submitted the arena holds on to the backing buffer until the
//! device reports the work complete, so the buffer outlives every copy that
//! reads from it.

use std::collections::VecDeque;

use crate::backend::UploadBackend;
use crate::{LayoutLimits, TextureError};

/// CPU-writable staging region plus the recorder its copies go on
pub struct StagingAllocation<B: UploadBackend> {
    staging: B::Staging,
    offset: u64,
    size: u64,
    recorder: B::Recorder,
}

impl<B: UploadBackend> StagingAllocation<B> {
    /// Wraps a region of an existing staging buffer
    ///
    /// `offset..offset + size` must lie inside `staging`.
    pub fn from_parts(staging: B::Staging, offset: u64, size: u64, recorder: B::Recorder) -> Self {
        Self { staging, offset, size, recorder }
    }

    /// The backing upload buffer
    pub fn staging(&self) -> &B::Staging {
        &self.staging
    }

    /// Byte offset of this allocation inside the backing buffer
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Backing buffer and recorder, borrowed together for recording copies
    pub(crate) fn parts_mut(&mut self) -> (&B::Staging, &mut B::Recorder) {
        (&self.staging, &mut self.recorder)
    }
}

struct InFlight<B: UploadBackend> {
    staging: B::Staging,
    fence: B::Fence,
    size: u64,
}

/// Hands out staging allocations and retires them once the device is done
pub struct StagingArena<B: UploadBackend> {
    placement_alignment: u64,
    in_flight: VecDeque<InFlight<B>>,
}

impl<B: UploadBackend> StagingArena<B> {
    pub fn new(limits: &LayoutLimits) -> Self {
        Self {
            placement_alignment: limits.placement_alignment,
            in_flight: VecDeque::new(),
        }
    }

    /// Creates a staging allocation of at least `size` bytes
    ///
    /// The size is rounded up to the placement alignment. The returned
    /// allocation starts at offset 0 of a fresh buffer.
    pub fn allocate(&mut self, backend: &B, size: u64, label: &str) -> Result<StagingAllocation<B>, TextureError> {
        let size = size
            .max(1)
            .div_ceil(self.placement_alignment)
            .checked_mul(self.placement_alignment)
            .ok_or_else(|| TextureError::LayoutOverflow(format!("staging size {size}")))?;

        let staging = backend.create_staging(size)?;
        let recorder = backend.create_recorder(label);
        tracing::trace!(size, label, "allocated staging buffer");

        Ok(StagingAllocation::from_parts(staging, 0, size, recorder))
    }

    /// Executes the allocation's recorder and keeps its buffer until the fence signals
    pub fn submit(&mut self, backend: &B, allocation: StagingAllocation<B>) -> Result<(), TextureError> {
        let StagingAllocation { staging, size, recorder, .. } = allocation;
        let fence = backend.execute(recorder, &staging)?;
        self.in_flight.push_back(InFlight { staging, fence, size });
        Ok(())
    }

    /// Drops every staging buffer whose work has completed
    ///
    /// # Returns
    /// The number of buffers released
    pub fn retire(&mut self, backend: &B) -> usize {
        let before = self.in_flight.len();
        self.in_flight.retain(|pending| !backend.is_complete(&pending.fence));
        let retired = before - self.in_flight.len();
        if retired > 0 {
            tracing::trace!(retired, pending = self.in_flight.len(), "retired staging buffers");
        }
        retired
    }

    /// Number of submitted allocations still awaiting completion
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Total bytes held by submitted allocations
    pub fn in_flight_bytes(&self) -> u64 {
        self.in_flight.iter().map(|pending| pending.size).sum()
    }
}

impl<B: UploadBackend> std::fmt::Debug for StagingArena<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingArena")
            .field("placement_alignment", &self.placement_alignment)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}
