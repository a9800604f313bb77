//! Write-once segmented memory.
//!
//! Cells are addressed by [`Relocatable`] and hold tagged [`Value`]s. A cell
//! can be written exactly once: rewriting with the same value is a no-op,
//! rewriting with a different one is an error. Segments may carry validation
//! rules (registered by builtin runners) that fire on every fresh insert
//! into the segment, after the write is visible.

mod error;
mod segments;

use std::collections::{HashMap, HashSet};
use std::fmt;

pub use error::MemoryError;
pub use segments::SegmentManager;

pub(crate) use segments::{relocate_address, relocate_value};

use crate::field::Felt;
use crate::relocatable::{Relocatable, Value};

/// A pure check over a freshly written address. It reads through the memory
/// (which already reflects the write) and reports the addresses it
/// considers validated, or fails the step.
pub type ValidationRule =
    Box<dyn Fn(&Memory, Relocatable) -> Result<Vec<Relocatable>, MemoryError>>;

#[derive(Default)]
pub struct Memory {
    data: HashMap<Relocatable, Value>,
    /// Per-segment used-size watermark: max written offset + 1.
    watermarks: HashMap<isize, usize>,
    validation_rules: HashMap<isize, Vec<ValidationRule>>,
    validated_addresses: HashSet<Relocatable>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `value` at `addr`.
    ///
    /// The cell is write-once: an equal rewrite succeeds without firing
    /// validation again, a conflicting one fails. On a fresh insert every
    /// validation rule registered for the segment runs; a failing rule
    /// aborts the caller but the write itself is retained for post-mortem.
    pub fn insert(
        &mut self,
        addr: Relocatable,
        value: impl Into<Value>,
    ) -> Result<(), MemoryError> {
        let value = value.into();
        match self.data.get(&addr) {
            Some(old) if *old != value => {
                return Err(MemoryError::InconsistentMemory {
                    addr,
                    old: *old,
                    new: value,
                })
            }
            Some(_) => return Ok(()),
            None => {
                self.data.insert(addr, value);
            }
        }

        let watermark = self.watermarks.entry(addr.segment_index).or_insert(0);
        *watermark = (*watermark).max(addr.offset + 1);

        self.validate(addr)
    }

    fn validate(&mut self, addr: Relocatable) -> Result<(), MemoryError> {
        if self.validated_addresses.contains(&addr) {
            return Ok(());
        }
        let mut validated = Vec::new();
        if let Some(rules) = self.validation_rules.get(&addr.segment_index) {
            for rule in rules {
                validated.extend(rule(self, addr)?);
            }
        }
        self.validated_addresses.extend(validated);
        Ok(())
    }

    pub fn get(&self, addr: Relocatable) -> Option<Value> {
        self.data.get(&addr).copied()
    }

    /// Reads a cell that must hold a field element.
    pub fn get_felt(&self, addr: Relocatable) -> Result<Felt, MemoryError> {
        match self.get(addr) {
            Some(Value::Int(felt)) => Ok(felt),
            Some(Value::Addr(_)) => Err(MemoryError::ExpectedFelt(addr)),
            None => Err(MemoryError::UnknownMemoryCell(addr)),
        }
    }

    /// Reads a cell that must hold an address.
    pub fn get_relocatable(&self, addr: Relocatable) -> Result<Relocatable, MemoryError> {
        match self.get(addr) {
            Some(Value::Addr(value)) => Ok(value),
            Some(Value::Int(_)) => Err(MemoryError::ExpectedRelocatable(addr)),
            None => Err(MemoryError::UnknownMemoryCell(addr)),
        }
    }

    /// Registers a validation rule for a segment. Append-only.
    pub fn add_validation_rule(&mut self, segment_index: isize, rule: ValidationRule) {
        self.validation_rules
            .entry(segment_index)
            .or_default()
            .push(rule);
    }

    pub fn is_validated(&self, addr: Relocatable) -> bool {
        self.validated_addresses.contains(&addr)
    }

    pub(crate) fn segment_watermark(&self, segment_index: isize) -> usize {
        self.watermarks.get(&segment_index).copied().unwrap_or(0)
    }

    /// Resolves every temporary reference through the relocation table:
    /// stored values pointing into temporary segments are rewritten in
    /// place, then cells living in temporary segments are re-inserted at
    /// their destination (write-once checks and destination validation
    /// rules apply). A temporary that was used but never mapped fails.
    pub(crate) fn relocate_with(
        &mut self,
        rules: &HashMap<usize, Relocatable>,
    ) -> Result<(), MemoryError> {
        let mut rewrites = Vec::new();
        for (&addr, &value) in &self.data {
            if let Value::Addr(target) = value {
                if target.is_temporary() {
                    rewrites.push((addr, Value::Addr(resolve_temporary(rules, target)?)));
                }
            }
        }
        for (addr, value) in rewrites {
            self.data.insert(addr, value);
        }

        let mut temporary_cells: Vec<Relocatable> = self
            .data
            .keys()
            .copied()
            .filter(Relocatable::is_temporary)
            .collect();
        temporary_cells.sort_by_key(|addr| (addr.segment_index, addr.offset));

        for addr in temporary_cells {
            let dest = resolve_temporary(rules, addr)?;
            if let Some(value) = self.data.remove(&addr) {
                self.validated_addresses.remove(&addr);
                self.insert(dest, value)?;
            }
        }
        self.watermarks.retain(|&segment, _| segment >= 0);
        Ok(())
    }
}

fn resolve_temporary(
    rules: &HashMap<usize, Relocatable>,
    addr: Relocatable,
) -> Result<Relocatable, MemoryError> {
    let key = addr
        .segment_index
        .checked_neg()
        .and_then(|index| usize::try_from(index).ok())
        .and_then(|index| index.checked_sub(1))
        .ok_or(MemoryError::UnresolvedTemporary(addr.segment_index))?;
    let base = rules
        .get(&key)
        .ok_or(MemoryError::UnresolvedTemporary(addr.segment_index))?;
    base.add_offset(addr.offset)
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("cells", &self.data.len())
            .field("validated", &self.validated_addresses.len())
            .finish()
    }
}
