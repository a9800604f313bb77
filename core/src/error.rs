//! The top-level error surface of the engine.
//!
//! Every failure a run can hit is a variant here, directly or through one
//! of the nested subsystem enums. There is no recovery within a run: a
//! failing step aborts execution and is reported wrapped in [`VmError::StepFailed`]
//! with the step counter and a register snapshot; prior trace entries and
//! memory writes are retained for post-mortem.

use thiserror::Error;

use crate::builtins::BuiltinError;
use crate::execution::instruction::DecodeError;
use crate::field::Felt;
use crate::hints::HintError;
use crate::memory::MemoryError;
use crate::relocatable::{Relocatable, Value};

#[derive(Debug, Error, PartialEq)]
pub enum VmError {
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Builtin(#[from] BuiltinError),
    #[error(transparent)]
    Hint(#[from] HintError),

    #[error("an unconstrained result cannot drive a jump")]
    UnconstrainedResJump,
    #[error("an unconstrained result cannot drive a relative jump")]
    UnconstrainedResJumpRel,
    #[error("an unconstrained result cannot be added to ap")]
    UnconstrainedResAdd,
    #[error("an unconstrained result cannot satisfy an equality assertion")]
    UnconstrainedResAssertEq,

    #[error("jump target must be an address, got {0}")]
    JumpRequiresAddress(Felt),
    #[error("relative jump offset must be a field element, got address {0}")]
    JumpRelRequiresFelt(Relocatable),

    #[error("equality assertion failed: {dst} != {res}")]
    DiffAssertValues { dst: Value, res: Value },
    #[error("return pc cell holds {found}, expected {expected}")]
    CantWriteReturnPc { found: Value, expected: Value },
    #[error("return fp cell holds {found}, expected {expected}")]
    CantWriteReturnFp { found: Value, expected: Value },

    #[error("result multiplication requires field elements, got {0} and {1}")]
    MulRequiresFelts(Value, Value),
    #[error("cannot deduce operand {name} at {addr}")]
    FailedToComputeOperand { name: &'static str, addr: Relocatable },
    #[error("instruction has no destination operand")]
    NoDst,
    #[error("op1 is addressed relative to op0, but op0 is not an address")]
    Op0NotRelocatable,
    #[error("op1 is addressed relative to op0, but op0 is unknown")]
    UnknownOp0,

    #[error("no runner registered for builtin {0:?}")]
    UnknownBuiltin(String),

    #[error("step {step} failed at pc {pc} (ap {ap}, fp {fp}): {source}")]
    StepFailed {
        step: usize,
        pc: Relocatable,
        ap: Relocatable,
        fp: Relocatable,
        #[source]
        source: Box<VmError>,
    },
}
