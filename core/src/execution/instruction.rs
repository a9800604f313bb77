//! Instruction words and their decoding.
//!
//! An instruction is packed into 63 bits of a field element: three 16-bit
//! biased offsets (stored value minus 2^15) followed by 15 flag bits. The
//! flag groups for the op1 source, the result rule, the pc/ap updates and
//! the opcode are one-hot; any other combination is undefined and rejected
//! up front.

use thiserror::Error;

use crate::field::Felt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Ap,
    Fp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op1Addr {
    Imm,
    Ap,
    Fp,
    Op0,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Res {
    Op1,
    Add,
    Mul,
    Unconstrained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcUpdate {
    Regular,
    Jump,
    JumpRel,
    Jnz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApUpdate {
    Regular,
    Add,
    Add1,
    Add2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpUpdate {
    Regular,
    ApPlus2,
    Dst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    NOp,
    AssertEq,
    Call,
    Ret,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub off_dst: isize,
    pub off_op0: isize,
    pub off_op1: isize,
    pub dst_register: Register,
    pub op0_register: Register,
    pub op1_addr: Op1Addr,
    pub res: Res,
    pub pc_update: PcUpdate,
    pub ap_update: ApUpdate,
    pub fp_update: FpUpdate,
    pub opcode: Opcode,
}

impl Instruction {
    /// Words occupied by the instruction: an immediate operand lives in the
    /// following word.
    pub fn size(&self) -> usize {
        match self.op1_addr {
            Op1Addr::Imm => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("instruction word {0} does not fit the 63-bit offset layout")]
    OffsetOutOfRange(Felt),
    #[error("reserved instruction bit set in {0:#x}")]
    ReservedBitSet(u64),
    #[error("undefined opcode flag combination {0:#05b}")]
    InvalidOpcode(u64),
    #[error("undefined pc-update flag combination {0:#05b}")]
    InvalidPcUpdate(u64),
    #[error("undefined ap-update flag combination {0:#04b}")]
    InvalidApUpdate(u64),
    #[error("undefined result flag combination {0:#04b}")]
    InvalidResLogic(u64),
    #[error("undefined op1 source flag combination {0:#05b}")]
    InvalidOp1Source(u64),
    #[error("an immediate op1 must use offset 1, got {0}")]
    ImmOffsetMustBeOne(isize),
}

const OFF_BIAS: isize = 1 << 15;

// Flag bit positions within the 15-bit flag field.
const DST_REG_FP: u64 = 1;
const OP0_REG_FP: u64 = 1 << 1;
const OP1_SRC_SHIFT: u64 = 2;
const RES_SHIFT: u64 = 5;
const PC_UPDATE_SHIFT: u64 = 7;
const AP_UPDATE_SHIFT: u64 = 10;
const OPCODE_SHIFT: u64 = 12;

/// Decodes a 63-bit instruction word.
pub fn decode_instruction(word: Felt) -> Result<Instruction, DecodeError> {
    let encoded = word
        .to_u64()
        .ok_or(DecodeError::OffsetOutOfRange(word))?;
    if encoded & (1 << 63) != 0 {
        return Err(DecodeError::ReservedBitSet(encoded));
    }

    let off_dst = (encoded & 0xffff) as isize - OFF_BIAS;
    let off_op0 = ((encoded >> 16) & 0xffff) as isize - OFF_BIAS;
    let off_op1 = ((encoded >> 32) & 0xffff) as isize - OFF_BIAS;
    let flags = encoded >> 48;

    let dst_register = if flags & DST_REG_FP != 0 {
        Register::Fp
    } else {
        Register::Ap
    };
    let op0_register = if flags & OP0_REG_FP != 0 {
        Register::Fp
    } else {
        Register::Ap
    };

    let op1_addr = match (flags >> OP1_SRC_SHIFT) & 0b111 {
        0 => Op1Addr::Op0,
        1 => Op1Addr::Imm,
        2 => Op1Addr::Fp,
        4 => Op1Addr::Ap,
        bits => return Err(DecodeError::InvalidOp1Source(bits)),
    };
    if op1_addr == Op1Addr::Imm && off_op1 != 1 {
        return Err(DecodeError::ImmOffsetMustBeOne(off_op1));
    }

    let pc_update = match (flags >> PC_UPDATE_SHIFT) & 0b111 {
        0 => PcUpdate::Regular,
        1 => PcUpdate::Jump,
        2 => PcUpdate::JumpRel,
        4 => PcUpdate::Jnz,
        bits => return Err(DecodeError::InvalidPcUpdate(bits)),
    };

    // A conditional jump leaves the result unconstrained; any explicit
    // result flag combined with it is undefined.
    let res = match ((flags >> RES_SHIFT) & 0b11, pc_update) {
        (0, PcUpdate::Jnz) => Res::Unconstrained,
        (0, _) => Res::Op1,
        (1, PcUpdate::Jnz) | (2, PcUpdate::Jnz) => {
            return Err(DecodeError::InvalidResLogic((flags >> RES_SHIFT) & 0b11))
        }
        (1, _) => Res::Add,
        (2, _) => Res::Mul,
        (bits, _) => return Err(DecodeError::InvalidResLogic(bits)),
    };

    let opcode = match (flags >> OPCODE_SHIFT) & 0b111 {
        0 => Opcode::NOp,
        1 => Opcode::Call,
        2 => Opcode::Ret,
        4 => Opcode::AssertEq,
        bits => return Err(DecodeError::InvalidOpcode(bits)),
    };

    let ap_update = match (flags >> AP_UPDATE_SHIFT) & 0b11 {
        0 if opcode == Opcode::Call => ApUpdate::Add2,
        0 => ApUpdate::Regular,
        1 => ApUpdate::Add,
        2 => ApUpdate::Add1,
        bits => return Err(DecodeError::InvalidApUpdate(bits)),
    };

    let fp_update = match opcode {
        Opcode::Call => FpUpdate::ApPlus2,
        Opcode::Ret => FpUpdate::Dst,
        _ => FpUpdate::Regular,
    };

    Ok(Instruction {
        off_dst,
        off_op0,
        off_op1,
        dst_register,
        op0_register,
        op1_addr,
        res,
        pc_update,
        ap_update,
        fp_update,
        opcode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(word: u64) -> Result<Instruction, DecodeError> {
        decode_instruction(Felt::from(word))
    }

    #[test]
    fn decode_immediate_store() {
        // [ap] = imm; ap++
        let instruction = decode(0x480680017fff8000).unwrap();
        assert_eq!(instruction.off_dst, 0);
        assert_eq!(instruction.off_op0, -1);
        assert_eq!(instruction.off_op1, 1);
        assert_eq!(instruction.dst_register, Register::Ap);
        assert_eq!(instruction.op0_register, Register::Fp);
        assert_eq!(instruction.op1_addr, Op1Addr::Imm);
        assert_eq!(instruction.res, Res::Op1);
        assert_eq!(instruction.pc_update, PcUpdate::Regular);
        assert_eq!(instruction.ap_update, ApUpdate::Add1);
        assert_eq!(instruction.fp_update, FpUpdate::Regular);
        assert_eq!(instruction.opcode, Opcode::AssertEq);
        assert_eq!(instruction.size(), 2);
    }

    #[test]
    fn decode_return() {
        let instruction = decode(0x208b7fff7fff7ffe).unwrap();
        assert_eq!(instruction.off_dst, -2);
        assert_eq!(instruction.off_op0, -1);
        assert_eq!(instruction.off_op1, -1);
        assert_eq!(instruction.dst_register, Register::Fp);
        assert_eq!(instruction.op0_register, Register::Fp);
        assert_eq!(instruction.op1_addr, Op1Addr::Fp);
        assert_eq!(instruction.res, Res::Op1);
        assert_eq!(instruction.pc_update, PcUpdate::Jump);
        assert_eq!(instruction.ap_update, ApUpdate::Regular);
        assert_eq!(instruction.fp_update, FpUpdate::Dst);
        assert_eq!(instruction.opcode, Opcode::Ret);
        assert_eq!(instruction.size(), 1);
    }

    #[test]
    fn decode_add_chain() {
        // [ap] = [ap - 2] + [ap - 1]; ap++
        let instruction = decode(0x48307fff7ffe8000).unwrap();
        assert_eq!(instruction.off_op0, -2);
        assert_eq!(instruction.off_op1, -1);
        assert_eq!(instruction.op1_addr, Op1Addr::Ap);
        assert_eq!(instruction.res, Res::Add);
        assert_eq!(instruction.opcode, Opcode::AssertEq);
        assert_eq!(instruction.ap_update, ApUpdate::Add1);
    }

    #[test]
    fn decode_call_derives_frame_updates() {
        // call rel imm
        let instruction = decode(0x1104800180018000).unwrap();
        assert_eq!(instruction.opcode, Opcode::Call);
        assert_eq!(instruction.pc_update, PcUpdate::JumpRel);
        assert_eq!(instruction.op1_addr, Op1Addr::Imm);
        assert_eq!(instruction.ap_update, ApUpdate::Add2);
        assert_eq!(instruction.fp_update, FpUpdate::ApPlus2);
        assert_eq!(instruction.off_dst, 0);
        assert_eq!(instruction.off_op0, 1);
    }

    #[test]
    fn decode_conditional_jump() {
        // jmp rel imm if [ap - 1] != 0
        let instruction = decode(0x020680017fff7fff).unwrap();
        assert_eq!(instruction.pc_update, PcUpdate::Jnz);
        assert_eq!(instruction.res, Res::Unconstrained);
        assert_eq!(instruction.opcode, Opcode::NOp);
        assert_eq!(instruction.dst_register, Register::Ap);
        assert_eq!(instruction.off_dst, -1);
        assert_eq!(instruction.op1_addr, Op1Addr::Imm);
    }

    #[test]
    fn reserved_bit_is_rejected() {
        assert_eq!(
            decode(1 << 63),
            Err(DecodeError::ReservedBitSet(1 << 63))
        );
    }

    #[test]
    fn oversized_words_are_rejected() {
        let word = Felt::from(1_u128 << 70);
        assert_eq!(
            decode_instruction(word),
            Err(DecodeError::OffsetOutOfRange(word))
        );
    }

    #[test]
    fn undefined_flag_combinations_are_rejected() {
        let word = |flags: u64| (flags << 48) | 0x8000_8000_8000;

        // op1 source: imm and fp bits set together.
        assert_eq!(
            decode(word(0b1100)),
            Err(DecodeError::InvalidOp1Source(0b011))
        );
        // Two opcode bits set at once.
        assert_eq!(
            decode(word(0b011 << 12)),
            Err(DecodeError::InvalidOpcode(0b011))
        );
        // Both pc-update jump bits.
        assert_eq!(
            decode(word(0b011 << 7)),
            Err(DecodeError::InvalidPcUpdate(0b011))
        );
        // Both ap-update bits.
        assert_eq!(
            decode(word(0b11 << 10)),
            Err(DecodeError::InvalidApUpdate(0b11))
        );
        // Both result bits.
        assert_eq!(
            decode(word(0b11 << 5)),
            Err(DecodeError::InvalidResLogic(0b11))
        );
        // A conditional jump with an explicit result rule.
        assert_eq!(
            decode(word((1 << 9) | (1 << 5))),
            Err(DecodeError::InvalidResLogic(0b01))
        );
    }

    #[test]
    fn immediate_requires_offset_one() {
        // Immediate op1 with off_op1 = 0.
        let word = (0b100 << 48) | 0x8000_8000_8000;
        assert_eq!(decode(word), Err(DecodeError::ImmOffsetMustBeOne(0)));
    }
}
