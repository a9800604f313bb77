//! Segment bookkeeping on top of [`Memory`].
//!
//! The manager owns the ordered list of segments and the relocation table
//! for temporary ones. Absolute addresses only exist after a run, when the
//! segments are laid out back to back starting at address 1.

use std::collections::HashMap;

use tracing::debug;

use super::{Memory, MemoryError};
use crate::field::Felt;
use crate::relocatable::{Relocatable, Value};

#[derive(Debug, Default)]
pub struct SegmentManager {
    pub memory: Memory,
    num_segments: usize,
    num_temp_segments: usize,
    segment_used_sizes: Option<Vec<usize>>,
    /// Destination of each temporary segment, keyed by `-index - 1`.
    relocation_rules: HashMap<usize, Relocatable>,
}

impl SegmentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a segment and returns its base address.
    pub fn add_segment(&mut self) -> Relocatable {
        let base = Relocatable::new(self.num_segments as isize, 0);
        self.num_segments += 1;
        base
    }

    /// Creates a segment with a negative index whose final placement is
    /// decided later through [`SegmentManager::add_relocation_rule`].
    pub fn add_temporary_segment(&mut self) -> Relocatable {
        self.num_temp_segments += 1;
        Relocatable::new(-(self.num_temp_segments as isize), 0)
    }

    pub fn num_segments(&self) -> usize {
        self.num_segments
    }

    /// Writes `data` sequentially starting at `ptr` and returns the first
    /// address past the written range.
    pub fn load_data(
        &mut self,
        ptr: Relocatable,
        data: &[Value],
    ) -> Result<Relocatable, MemoryError> {
        for (index, value) in data.iter().enumerate() {
            self.memory.insert(ptr.add_offset(index)?, *value)?;
        }
        ptr.add_offset(data.len())
    }

    /// Snapshots every segment's used-size watermark (max written offset
    /// plus one).
    pub fn compute_effective_sizes(&mut self) -> &[usize] {
        if self.segment_used_sizes.is_none() {
            self.segment_used_sizes = Some(
                (0..self.num_segments)
                    .map(|index| self.memory.segment_watermark(index as isize))
                    .collect(),
            );
        }
        self.segment_used_sizes.as_deref().unwrap_or(&[])
    }

    /// Used size of a segment, available once effective sizes have been
    /// computed.
    pub fn get_segment_used_size(&self, index: usize) -> Option<usize> {
        self.segment_used_sizes.as_ref()?.get(index).copied()
    }

    /// Maps the temporary segment based at `src` to `dst`. At most one rule
    /// per temporary segment.
    pub fn add_relocation_rule(
        &mut self,
        src: Relocatable,
        dst: Relocatable,
    ) -> Result<(), MemoryError> {
        if !src.is_temporary() || src.offset != 0 {
            return Err(MemoryError::InvalidRelocationSource(src));
        }
        let key = (-src.segment_index) as usize - 1;
        if key >= self.num_temp_segments {
            return Err(MemoryError::InvalidRelocationSource(src));
        }
        if self.relocation_rules.contains_key(&key) {
            return Err(MemoryError::DuplicateRelocationRule(src.segment_index));
        }
        self.relocation_rules.insert(key, dst);
        Ok(())
    }

    /// Resolves every temporary reference held in memory through the
    /// relocation table. Fails if a temporary segment was used but never
    /// assigned a destination. Calling this twice is a no-op.
    pub fn relocate_segments(&mut self) -> Result<(), MemoryError> {
        self.memory.relocate_with(&self.relocation_rules)?;
        // Destinations may have grown watermarks; drop any stale snapshot.
        self.segment_used_sizes = None;
        debug!(
            rules = self.relocation_rules.len(),
            "temporary segments resolved"
        );
        Ok(())
    }

    /// Lays the segments out contiguously and returns the absolute base
    /// address of each one. The first usable address is 1.
    pub fn base_address_table(&mut self) -> Vec<usize> {
        let sizes = self.compute_effective_sizes().to_vec();
        let mut bases = Vec::with_capacity(sizes.len());
        let mut next = 1;
        for size in sizes {
            bases.push(next);
            next += size;
        }
        bases
    }
}

/// Maps a segment-relative address to its absolute location.
pub(crate) fn relocate_address(
    addr: Relocatable,
    bases: &[usize],
) -> Result<usize, MemoryError> {
    if addr.is_temporary() {
        return Err(MemoryError::UnresolvedTemporary(addr.segment_index));
    }
    bases
        .get(addr.segment_index as usize)
        .map(|base| base + addr.offset)
        .ok_or(MemoryError::UnknownMemoryCell(addr))
}

/// Maps a stored value to the field element it relocates to: integers are
/// kept, addresses become their absolute location.
pub(crate) fn relocate_value(value: Value, bases: &[usize]) -> Result<Felt, MemoryError> {
    match value {
        Value::Int(felt) => Ok(felt),
        Value::Addr(addr) => relocate_address(addr, bases).map(Felt::from),
    }
}
