//! The register file: `pc`, `ap` and `fp`, plus the operand-address rules.

use crate::error::VmError;
use crate::execution::instruction::{Instruction, Op1Addr, Register};
use crate::memory::MemoryError;
use crate::relocatable::{Relocatable, Value};

/// The machine registers. All three are segment-relative addresses: `pc`
/// walks the program segment, `ap` and `fp` the execution segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    pub pc: Relocatable,
    pub ap: Relocatable,
    pub fp: Relocatable,
}

impl RunContext {
    pub const fn new(pc: Relocatable, ap: Relocatable, fp: Relocatable) -> Self {
        Self { pc, ap, fp }
    }

    fn register(&self, register: Register) -> Relocatable {
        match register {
            Register::Ap => self.ap,
            Register::Fp => self.fp,
        }
    }

    pub fn compute_dst_addr(&self, instruction: &Instruction) -> Result<Relocatable, MemoryError> {
        self.register(instruction.dst_register)
            .add_signed(instruction.off_dst)
    }

    pub fn compute_op0_addr(&self, instruction: &Instruction) -> Result<Relocatable, MemoryError> {
        self.register(instruction.op0_register)
            .add_signed(instruction.off_op0)
    }

    /// The op1 cell address. Immediate mode reads the word following the
    /// instruction; `Op0` mode dereferences the op0 value, which must
    /// therefore be a known address.
    pub fn compute_op1_addr(
        &self,
        instruction: &Instruction,
        op0: Option<&Value>,
    ) -> Result<Relocatable, VmError> {
        let addr = match instruction.op1_addr {
            Op1Addr::Imm => self.pc.add_signed(instruction.off_op1)?,
            Op1Addr::Ap => self.ap.add_signed(instruction.off_op1)?,
            Op1Addr::Fp => self.fp.add_signed(instruction.off_op1)?,
            Op1Addr::Op0 => match op0 {
                Some(Value::Addr(base)) => base.add_signed(instruction.off_op1)?,
                Some(Value::Int(_)) => return Err(VmError::Op0NotRelocatable),
                None => return Err(VmError::UnknownOp0),
            },
        };
        Ok(addr)
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(
            Relocatable::new(0, 0),
            Relocatable::new(1, 0),
            Relocatable::new(1, 0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::instruction::{ApUpdate, FpUpdate, Opcode, PcUpdate, Res};
    use crate::field::Felt;

    fn instruction(off_dst: isize, off_op0: isize, off_op1: isize) -> Instruction {
        Instruction {
            off_dst,
            off_op0,
            off_op1,
            dst_register: Register::Ap,
            op0_register: Register::Fp,
            op1_addr: Op1Addr::Ap,
            res: Res::Op1,
            pc_update: PcUpdate::Regular,
            ap_update: ApUpdate::Regular,
            fp_update: FpUpdate::Regular,
            opcode: Opcode::NOp,
        }
    }

    fn context() -> RunContext {
        RunContext::new(
            Relocatable::new(0, 4),
            Relocatable::new(1, 5),
            Relocatable::new(1, 6),
        )
    }

    #[test]
    fn operand_addresses_follow_registers() {
        let ctx = context();
        let instruction = instruction(1, -2, 3);

        assert_eq!(
            ctx.compute_dst_addr(&instruction).unwrap(),
            Relocatable::new(1, 6)
        );
        assert_eq!(
            ctx.compute_op0_addr(&instruction).unwrap(),
            Relocatable::new(1, 4)
        );
        assert_eq!(
            ctx.compute_op1_addr(&instruction, None).unwrap(),
            Relocatable::new(1, 8)
        );
    }

    #[test]
    fn immediate_op1_reads_past_the_pc() {
        let ctx = context();
        let mut instruction = instruction(0, 0, 1);
        instruction.op1_addr = Op1Addr::Imm;
        assert_eq!(
            ctx.compute_op1_addr(&instruction, None).unwrap(),
            Relocatable::new(0, 5)
        );
    }

    #[test]
    fn op0_relative_op1_requires_an_address() {
        let ctx = context();
        let mut instruction = instruction(0, 0, 2);
        instruction.op1_addr = Op1Addr::Op0;

        let base = Value::Addr(Relocatable::new(3, 10));
        assert_eq!(
            ctx.compute_op1_addr(&instruction, Some(&base)).unwrap(),
            Relocatable::new(3, 12)
        );
        assert!(matches!(
            ctx.compute_op1_addr(&instruction, Some(&Value::Int(Felt::from(3_u64)))),
            Err(VmError::Op0NotRelocatable)
        ));
        assert!(matches!(
            ctx.compute_op1_addr(&instruction, None),
            Err(VmError::UnknownOp0)
        ));
    }

    #[test]
    fn negative_offsets_cannot_underflow() {
        let ctx = context();
        let instruction = instruction(-6, 0, 0);
        assert!(ctx.compute_dst_addr(&instruction).is_err());
    }
}
