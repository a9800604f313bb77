//! Execution engine for the AIR virtual machine.
//!
//! Runs compiled programs over the prime field `F_P` with
//! `P = 2^251 + 17*2^192 + 1` and produces the deterministic trace and
//! relocated memory a downstream proving system consumes. Program parsing,
//! hint interpretation and artifact persistence live outside this crate;
//! the engine exposes the interfaces they plug into.

pub mod builtins;
pub mod error;
pub mod execution;
pub mod field;
pub mod hints;
pub mod memory;
pub mod program;
pub mod relocatable;
pub mod util;
pub mod utils;

pub use builtins::{BuiltinName, BuiltinRunner, RangeCheckRunner};
pub use error::VmError;
pub use execution::{RelocatedTraceEntry, RunContext, TraceEntry, VirtualMachine};
pub use field::Felt;
pub use hints::{ExecutionScopes, HintData, HintError, HintExecutor, NullHintExecutor};
pub use memory::{Memory, MemoryError, SegmentManager};
pub use program::{Identifier, Program};
pub use relocatable::{Relocatable, Value};
