pub mod context;
pub mod instruction;
pub mod trace;
pub mod vm;

pub use context::RunContext;
pub use instruction::{decode_instruction, DecodeError, Instruction};
pub use trace::{RelocatedTraceEntry, TraceEntry};
pub use vm::{Operands, VirtualMachine};
