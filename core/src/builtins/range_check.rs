//! The range-check builtin: every cell of its segment must hold a field
//! element that fits in 128 bits.

use super::{BuiltinName, BuiltinRunner};
use crate::memory::{Memory, MemoryError, SegmentManager};
use crate::relocatable::{Relocatable, Value};

pub const RANGE_CHECK_N_PARTS: u64 = 8;
pub const INNER_RC_BOUND_SHIFT: u64 = 16;
pub const CELLS_PER_RANGE_CHECK: usize = 1;

const DEFAULT_RATIO: usize = 8;

#[derive(Debug)]
pub struct RangeCheckRunner {
    base: Relocatable,
    included: bool,
    ratio: usize,
    instances_per_component: usize,
}

impl RangeCheckRunner {
    pub fn new(ratio: usize) -> Self {
        Self {
            base: Relocatable::new(0, 0),
            included: false,
            ratio,
            instances_per_component: 1,
        }
    }
}

impl Default for RangeCheckRunner {
    fn default() -> Self {
        Self::new(DEFAULT_RATIO)
    }
}

/// Accepts the freshly written cell iff it holds a field element of at most
/// `N_PARTS * INNER_RC_BOUND_SHIFT` bits.
pub fn range_check_validation_rule(
    memory: &Memory,
    address: Relocatable,
) -> Result<Vec<Relocatable>, MemoryError> {
    let value = memory
        .get(address)
        .ok_or(MemoryError::UnknownMemoryCell(address))?;
    let felt = value
        .get_int()
        .ok_or(MemoryError::RangeCheckNotAFelt(address))?;
    if felt.bits() <= RANGE_CHECK_N_PARTS * INNER_RC_BOUND_SHIFT {
        Ok(vec![address])
    } else {
        Err(MemoryError::RangeCheckOutOfBounds(felt))
    }
}

impl BuiltinRunner for RangeCheckRunner {
    fn name(&self) -> BuiltinName {
        BuiltinName::RangeCheck
    }

    fn base(&self) -> Relocatable {
        self.base
    }

    fn included(&self) -> bool {
        self.included
    }

    fn set_included(&mut self, included: bool) {
        self.included = included;
    }

    fn ratio(&self) -> usize {
        self.ratio
    }

    fn cells_per_instance(&self) -> usize {
        CELLS_PER_RANGE_CHECK
    }

    fn instances_per_component(&self) -> usize {
        self.instances_per_component
    }

    fn initialize_segments(&mut self, segments: &mut SegmentManager) {
        self.base = segments.add_segment();
    }

    fn initial_stack(&self) -> Vec<Value> {
        if self.included {
            vec![Value::Addr(self.base)]
        } else {
            Vec::new()
        }
    }

    fn add_validation_rule(&self, memory: &mut Memory) {
        memory.add_validation_rule(self.base.segment_index, Box::new(range_check_validation_rule));
    }

    fn deduce_memory_cell(
        &self,
        _addr: Relocatable,
        _memory: &Memory,
    ) -> Result<Option<Value>, MemoryError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::super::BuiltinError;
    use super::*;
    use crate::field::Felt;

    /// A manager with the range-check segment installed and its rule
    /// registered, alongside the initialized runner.
    fn setup() -> (SegmentManager, RangeCheckRunner) {
        let mut segments = SegmentManager::new();
        let mut runner = RangeCheckRunner::default();
        runner.initialize_segments(&mut segments);
        runner.add_validation_rule(&mut segments.memory);
        (segments, runner)
    }

    #[test]
    fn bounded_felts_are_validated() {
        let (mut segments, runner) = setup();
        let base = runner.base();

        segments.memory.insert(base, 55_u64).unwrap();
        assert!(segments.memory.is_validated(base));

        let top = Felt::from((1_u128 << 127) - 1) * Felt::from(2_u64) + Felt::from(1_u64);
        segments
            .memory
            .insert(base.add_offset(1).unwrap(), top)
            .unwrap();
        assert!(segments.memory.is_validated(base.add_offset(1).unwrap()));
    }

    #[test]
    fn out_of_bounds_felts_are_rejected() {
        let (mut segments, runner) = setup();
        let base = runner.base();

        let big = Felt::from(1_u128 << 127) * Felt::from(4_u64); // 2^129
        let result = segments.memory.insert(base, big);
        assert_eq!(result, Err(MemoryError::RangeCheckOutOfBounds(big)));
    }

    #[test]
    fn addresses_are_rejected() {
        let (mut segments, runner) = setup();
        let base = runner.base();

        let result = segments.memory.insert(base, Relocatable::new(0, 0));
        assert_eq!(result, Err(MemoryError::RangeCheckNotAFelt(base)));
    }

    #[test]
    fn initial_stack_carries_the_base_when_included() {
        let (_, mut runner) = setup();
        assert!(runner.initial_stack().is_empty());
        runner.set_included(true);
        assert_eq!(runner.initial_stack(), vec![Value::Addr(runner.base())]);
    }

    #[test]
    fn allocation_requires_enough_steps() {
        let (mut segments, runner) = setup();
        segments.compute_effective_sizes();

        assert_eq!(
            runner.get_allocated_memory_units(&segments, 7),
            Err(BuiltinError::InsufficientSteps {
                builtin: BuiltinName::RangeCheck,
                min_steps: 8,
                current_step: 7,
            })
        );
        assert_eq!(runner.get_allocated_memory_units(&segments, 8), Ok(1));
        assert_eq!(runner.get_allocated_memory_units(&segments, 32), Ok(4));
        assert_eq!(
            runner.get_allocated_memory_units(&segments, 9),
            Err(BuiltinError::UnevenSteps {
                builtin: BuiltinName::RangeCheck,
                current_step: 9,
                ratio: 8,
            })
        );
    }

    #[test]
    fn dynamic_layout_rounds_to_a_power_of_two() {
        let mut segments = SegmentManager::new();
        let mut runner = RangeCheckRunner::new(0);
        runner.initialize_segments(&mut segments);

        for offset in 0..5 {
            segments
                .memory
                .insert(runner.base().add_offset(offset).unwrap(), 1_u64)
                .unwrap();
        }
        segments.compute_effective_sizes();

        // Five instances round up to eight components.
        assert_eq!(runner.get_allocated_memory_units(&segments, 0), Ok(8));
    }

    #[test]
    fn usage_above_allocation_overflows() {
        let (mut segments, runner) = setup();
        let base = runner.base();
        for offset in 0..3 {
            segments
                .memory
                .insert(base.add_offset(offset).unwrap(), 1_u64)
                .unwrap();
        }
        segments.compute_effective_sizes();

        assert_eq!(
            runner.get_used_cells_and_allocated_size(&segments, 24),
            Ok((3, 3))
        );
        assert_eq!(
            runner.get_used_cells_and_allocated_size(&segments, 16),
            Err(BuiltinError::BuiltinOverflow {
                builtin: BuiltinName::RangeCheck,
                used: 3,
                allocated: 2,
            })
        );
    }

    proptest! {
        /// The rule accepts exactly the felts of at most 128 bits.
        #[test]
        fn acceptance_matches_bit_length(bytes in any::<[u8; 32]>()) {
            let felt = Felt::from(num_bigint::BigUint::from_bytes_le(&bytes));
            let mut segments = SegmentManager::new();
            let mut runner = RangeCheckRunner::default();
            runner.initialize_segments(&mut segments);
            runner.add_validation_rule(&mut segments.memory);

            let result = segments.memory.insert(runner.base(), felt);
            if felt.bits() <= 128 {
                prop_assert!(result.is_ok());
            } else {
                prop_assert_eq!(result, Err(MemoryError::RangeCheckOutOfBounds(felt)));
            }
        }

        /// For a fixed positive ratio the allocation is non-decreasing in
        /// the step count and exact on divisible steps.
        #[test]
        fn allocation_is_monotonic(steps in 1_usize..64) {
            let (mut segments, runner) = setup();
            segments.compute_effective_sizes();

            let mut previous = 0;
            for step in (8..=8 * steps).step_by(8) {
                let allocated = runner.get_allocated_memory_units(&segments, step).unwrap();
                prop_assert_eq!(allocated, CELLS_PER_RANGE_CHECK * step / 8);
                prop_assert!(allocated >= previous);
                previous = allocated;
            }
        }
    }
}
