//! Builtin runners.
//!
//! A builtin owns one memory segment whose cells obey an extra validation
//! rule enforced on every write. Runners are values behind a capability
//! trait; the machine holds them in declaration order and consults them for
//! segment setup, cell deduction and allocation accounting.

mod range_check;

use strum::{Display, EnumString};
use thiserror::Error;

pub use range_check::{
    range_check_validation_rule, RangeCheckRunner, CELLS_PER_RANGE_CHECK, INNER_RC_BOUND_SHIFT,
    RANGE_CHECK_N_PARTS,
};

use crate::memory::{Memory, MemoryError, SegmentManager};
use crate::relocatable::{Relocatable, Value};
use crate::utils::safe_div;

/// The builtins this machine knows how to run, keyed by their declared
/// string name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum BuiltinName {
    #[strum(serialize = "range_check")]
    RangeCheck,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuiltinError {
    #[error("number of steps must be at least {min_steps} for the {builtin} builtin, got {current_step}")]
    InsufficientSteps {
        builtin: BuiltinName,
        min_steps: usize,
        current_step: usize,
    },
    #[error("step count {current_step} is not divisible by the {builtin} ratio {ratio}")]
    UnevenSteps {
        builtin: BuiltinName,
        current_step: usize,
        ratio: usize,
    },
    #[error("the {builtin} builtin used {used} cells but the capacity is {allocated}")]
    BuiltinOverflow {
        builtin: BuiltinName,
        used: usize,
        allocated: usize,
    },
    #[error("effective segment sizes have not been computed")]
    MissingSegmentUsedSizes,
}

/// The capability set every builtin runner provides.
///
/// Runners are constructed before segment initialization and live as long
/// as the machine. The allocation-accounting methods have a shared default
/// implementation; a runner only supplies its geometry.
pub trait BuiltinRunner {
    fn name(&self) -> BuiltinName;

    /// Base address of the segment this builtin owns.
    fn base(&self) -> Relocatable;

    fn included(&self) -> bool;

    fn set_included(&mut self, included: bool);

    /// Trace cells allocated per step, zero meaning a dynamic layout.
    fn ratio(&self) -> usize;

    fn cells_per_instance(&self) -> usize;

    fn instances_per_component(&self) -> usize;

    fn initialize_segments(&mut self, segments: &mut SegmentManager);

    /// The pointers this builtin contributes to the initial stack.
    fn initial_stack(&self) -> Vec<Value>;

    fn add_validation_rule(&self, memory: &mut Memory);

    /// Derives the value of a vacant cell in the builtin's segment, when
    /// the builtin defines one.
    fn deduce_memory_cell(
        &self,
        addr: Relocatable,
        memory: &Memory,
    ) -> Result<Option<Value>, MemoryError>;

    fn get_used_cells(&self, segments: &SegmentManager) -> Result<usize, BuiltinError> {
        usize::try_from(self.base().segment_index)
            .ok()
            .and_then(|index| segments.get_segment_used_size(index))
            .ok_or(BuiltinError::MissingSegmentUsedSizes)
    }

    /// Memory units reserved for this builtin after `current_step` steps.
    fn get_allocated_memory_units(
        &self,
        segments: &SegmentManager,
        current_step: usize,
    ) -> Result<usize, BuiltinError> {
        let ratio = self.ratio();
        if ratio == 0 {
            // Dynamic layout: exactly the instances in use, rounded up to a
            // power-of-two number of components.
            let used = self.get_used_cells(segments)?;
            let instances = used / self.cells_per_instance();
            let components = (instances / self.instances_per_component()).next_power_of_two();
            return Ok(self.cells_per_instance() * self.instances_per_component() * components);
        }

        let min_steps = ratio * self.instances_per_component();
        if current_step < min_steps {
            return Err(BuiltinError::InsufficientSteps {
                builtin: self.name(),
                min_steps,
                current_step,
            });
        }
        let instances = safe_div(current_step, ratio).ok_or(BuiltinError::UnevenSteps {
            builtin: self.name(),
            current_step,
            ratio,
        })?;
        Ok(self.cells_per_instance() * instances)
    }

    /// Used and allocated cell counts, failing when usage exceeds the
    /// allocation.
    fn get_used_cells_and_allocated_size(
        &self,
        segments: &SegmentManager,
        current_step: usize,
    ) -> Result<(usize, usize), BuiltinError> {
        let used = self.get_used_cells(segments)?;
        let allocated = self.get_allocated_memory_units(segments, current_step)?;
        if used > allocated {
            return Err(BuiltinError::BuiltinOverflow {
                builtin: self.name(),
                used,
                allocated,
            });
        }
        Ok((used, allocated))
    }
}
