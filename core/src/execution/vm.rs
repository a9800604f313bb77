//! The virtual machine: operand resolution, the register-update state
//! machine and the step driver.
//!
//! A machine instance is single-owner and single-threaded; the step driver
//! is the only mutator of the registers, the memory and the builtin state.
//! Every step appends exactly one trace entry, so identical inputs replay
//! to identical traces.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::builtins::{BuiltinName, BuiltinRunner, RangeCheckRunner};
use crate::error::VmError;
use crate::execution::context::RunContext;
use crate::execution::instruction::{
    decode_instruction, ApUpdate, FpUpdate, Instruction, Opcode, PcUpdate, Res,
};
use crate::execution::trace::{RelocatedTraceEntry, TraceEntry};
use crate::field::Felt;
use crate::hints::{ExecutionScopes, HintData, HintExecutor};
use crate::memory::{relocate_address, relocate_value, SegmentManager};
use crate::program::Program;
use crate::relocatable::{Relocatable, Value};

/// The fully resolved operands of one instruction. `res` stays empty for
/// unconstrained result rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operands {
    pub dst: Value,
    pub res: Option<Value>,
    pub op0: Value,
    pub op1: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandsAddresses {
    pub dst_addr: Relocatable,
    pub op0_addr: Relocatable,
    pub op1_addr: Relocatable,
}

/// Which operands were deduced rather than read, and therefore still have
/// to be written back to memory.
#[derive(Debug, Clone, Copy, Default)]
struct DeducedOperands {
    dst: bool,
    op0: bool,
    op1: bool,
}

#[derive(Default)]
pub struct VirtualMachine {
    pub run_context: RunContext,
    pub segments: SegmentManager,
    pub builtin_runners: Vec<Box<dyn BuiltinRunner>>,
    trace: Vec<TraceEntry>,
    current_step: usize,
}

impl fmt::Debug for VirtualMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualMachine")
            .field("run_context", &self.run_context)
            .field("segments", &self.segments)
            .field(
                "builtin_runners",
                &self.builtin_runners.iter().map(|b| b.name()).collect::<Vec<_>>(),
            )
            .field("trace", &self.trace)
            .field("current_step", &self.current_step)
            .finish()
    }
}

impl VirtualMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    /// Wires a loaded program into the machine: resolves declared builtins
    /// to runners, lays out the program, execution and builtin segments,
    /// loads the data words and the initial stack, registers validation
    /// rules and points the registers at `entrypoint`. Returns the end
    /// address the run halts on.
    pub fn initialize(
        &mut self,
        program: &Program,
        entrypoint: usize,
    ) -> Result<Relocatable, VmError> {
        for name in &program.builtins {
            let parsed = BuiltinName::from_str(name)
                .map_err(|_| VmError::UnknownBuiltin(name.clone()))?;
            let mut runner: Box<dyn BuiltinRunner> = match parsed {
                BuiltinName::RangeCheck => Box::new(RangeCheckRunner::default()),
            };
            runner.set_included(true);
            self.builtin_runners.push(runner);
        }

        let program_base = self.segments.add_segment();
        let execution_base = self.segments.add_segment();
        for runner in &mut self.builtin_runners {
            runner.initialize_segments(&mut self.segments);
        }

        self.segments.load_data(program_base, &program.data)?;

        let mut stack: Vec<Value> = self
            .builtin_runners
            .iter()
            .flat_map(|runner| runner.initial_stack())
            .collect();
        let return_fp = self.segments.add_segment();
        let end = self.segments.add_segment();
        stack.push(Value::Addr(return_fp));
        stack.push(Value::Addr(end));
        let stack_len = stack.len();
        self.segments.load_data(execution_base, &stack)?;

        for runner in &self.builtin_runners {
            runner.add_validation_rule(&mut self.segments.memory);
        }

        let ap = execution_base.add_offset(stack_len)?;
        self.run_context = RunContext::new(program_base.add_offset(entrypoint)?, ap, ap);
        debug!(
            builtins = self.builtin_runners.len(),
            data_len = program.data.len(),
            entrypoint,
            "program initialized"
        );
        Ok(end)
    }

    fn update_pc(
        &mut self,
        instruction: &Instruction,
        operands: &Operands,
    ) -> Result<(), VmError> {
        match instruction.pc_update {
            PcUpdate::Regular => {
                self.run_context.pc = self.run_context.pc.add_offset(instruction.size())?;
            }
            PcUpdate::Jump => match operands.res {
                Some(Value::Addr(target)) => self.run_context.pc = target,
                Some(Value::Int(felt)) => return Err(VmError::JumpRequiresAddress(felt)),
                None => return Err(VmError::UnconstrainedResJump),
            },
            PcUpdate::JumpRel => match operands.res {
                Some(Value::Int(offset)) => {
                    self.run_context.pc = self.run_context.pc.add_felt(offset)?;
                }
                Some(Value::Addr(addr)) => return Err(VmError::JumpRelRequiresFelt(addr)),
                None => return Err(VmError::UnconstrainedResJumpRel),
            },
            PcUpdate::Jnz => {
                if operands.dst.is_zero() {
                    self.run_context.pc = self.run_context.pc.add_offset(instruction.size())?;
                } else {
                    self.run_context.pc = self.run_context.pc.add_value(operands.op1)?;
                }
            }
        }
        Ok(())
    }

    fn update_ap(
        &mut self,
        instruction: &Instruction,
        operands: &Operands,
    ) -> Result<(), VmError> {
        match instruction.ap_update {
            ApUpdate::Regular => {}
            ApUpdate::Add => match operands.res {
                Some(res) => self.run_context.ap = self.run_context.ap.add_value(res)?,
                None => return Err(VmError::UnconstrainedResAdd),
            },
            ApUpdate::Add1 => self.run_context.ap = self.run_context.ap.add_offset(1)?,
            ApUpdate::Add2 => self.run_context.ap = self.run_context.ap.add_offset(2)?,
        }
        Ok(())
    }

    fn update_fp(
        &mut self,
        instruction: &Instruction,
        operands: &Operands,
    ) -> Result<(), VmError> {
        match instruction.fp_update {
            FpUpdate::Regular => {}
            FpUpdate::ApPlus2 => {
                self.run_context.fp = Relocatable::new(
                    self.run_context.fp.segment_index,
                    self.run_context.ap.offset + 2,
                );
            }
            FpUpdate::Dst => match operands.dst {
                Value::Addr(addr) => self.run_context.fp = addr,
                Value::Int(offset) => {
                    self.run_context.fp = self.run_context.fp.add_felt(offset)?;
                }
            },
        }
        Ok(())
    }

    /// Applies the update rules. `fp` reads the pre-update `ap`, so the
    /// order is fixed: fp, ap, pc.
    fn update_registers(
        &mut self,
        instruction: &Instruction,
        operands: &Operands,
    ) -> Result<(), VmError> {
        self.update_fp(instruction, operands)?;
        self.update_ap(instruction, operands)?;
        self.update_pc(instruction, operands)?;
        Ok(())
    }

    /// Offers a vacant cell to the builtin owning its segment.
    fn deduce_memory_cell(&self, addr: Relocatable) -> Result<Option<Value>, VmError> {
        for runner in &self.builtin_runners {
            if runner.base().segment_index == addr.segment_index {
                return runner
                    .deduce_memory_cell(addr, &self.segments.memory)
                    .map_err(VmError::Memory);
            }
        }
        Ok(None)
    }

    /// Deduces `op0`, and `res` when it falls out as well: a call pushes
    /// its return pc, an equality assertion inverts its result rule.
    fn deduce_op0(
        &self,
        instruction: &Instruction,
        dst: Option<&Value>,
        op1: Option<&Value>,
    ) -> Result<(Option<Value>, Option<Value>), VmError> {
        match instruction.opcode {
            Opcode::Call => Ok((
                Some(Value::Addr(
                    self.run_context.pc.add_offset(instruction.size())?,
                )),
                None,
            )),
            Opcode::AssertEq => match (instruction.res, dst, op1) {
                (Res::Add, Some(dst), Some(op1)) => {
                    Ok((Some(dst.sub(*op1)?), Some(*dst)))
                }
                (Res::Mul, Some(Value::Int(dst)), Some(Value::Int(op1))) => match op1.inv() {
                    Some(inverse) => {
                        Ok((Some(Value::Int(*dst * inverse)), Some(Value::Int(*dst))))
                    }
                    None => Ok((None, None)),
                },
                _ => Ok((None, None)),
            },
            _ => Ok((None, None)),
        }
    }

    /// Deduces `op1` (and `res`) from `dst` and `op0` under an equality
    /// assertion.
    fn deduce_op1(
        &self,
        instruction: &Instruction,
        dst: Option<&Value>,
        op0: Option<&Value>,
    ) -> Result<(Option<Value>, Option<Value>), VmError> {
        if instruction.opcode != Opcode::AssertEq {
            return Ok((None, None));
        }
        match instruction.res {
            Res::Op1 => Ok((dst.copied(), dst.copied())),
            Res::Add => Ok((
                dst.zip(op0).and_then(|(dst, op0)| dst.sub(*op0).ok()),
                dst.copied(),
            )),
            Res::Mul => match (dst, op0) {
                (Some(Value::Int(dst)), Some(Value::Int(op0))) => match op0.inv() {
                    Some(inverse) => Ok((
                        Some(Value::Int(*dst * inverse)),
                        Some(Value::Int(*dst)),
                    )),
                    None => Ok((None, None)),
                },
                _ => Ok((None, None)),
            },
            Res::Unconstrained => Ok((None, None)),
        }
    }

    /// Computes the result value when the rule constrains one.
    fn compute_res(
        &self,
        instruction: &Instruction,
        op0: Value,
        op1: Value,
    ) -> Result<Option<Value>, VmError> {
        match instruction.res {
            Res::Op1 => Ok(Some(op1)),
            Res::Add => Ok(Some(op0.add(op1)?)),
            Res::Mul => match (op0, op1) {
                (Value::Int(a), Value::Int(b)) => Ok(Some(Value::Int(a * b))),
                _ => Err(VmError::MulRequiresFelts(op0, op1)),
            },
            Res::Unconstrained => Ok(None),
        }
    }

    fn deduce_dst(
        &self,
        instruction: &Instruction,
        res: Option<&Value>,
    ) -> Result<Value, VmError> {
        match (instruction.opcode, res) {
            (Opcode::AssertEq, Some(res)) => Ok(*res),
            (Opcode::Call, _) => Ok(Value::Addr(self.run_context.fp)),
            _ => Err(VmError::NoDst),
        }
    }

    /// Resolves all three operands, deducing the ones memory does not hold
    /// yet. Returns the values, their addresses, and which of them must be
    /// written back.
    fn compute_operands(
        &self,
        instruction: &Instruction,
    ) -> Result<(Operands, OperandsAddresses, DeducedOperands), VmError> {
        let dst_addr = self.run_context.compute_dst_addr(instruction)?;
        let dst_read = self.segments.memory.get(dst_addr);

        let op0_addr = self.run_context.compute_op0_addr(instruction)?;
        let op0_read = self.segments.memory.get(op0_addr);

        let op1_addr = self
            .run_context
            .compute_op1_addr(instruction, op0_read.as_ref())?;
        let op1_read = self.segments.memory.get(op1_addr);

        let mut deduced = DeducedOperands::default();
        let mut res: Option<Value> = None;

        let op0 = match op0_read {
            Some(op0) => op0,
            None => {
                deduced.op0 = true;
                let deduced_op0 = match self.deduce_memory_cell(op0_addr)? {
                    Some(value) => Some(value),
                    None => {
                        let (op0, deduced_res) =
                            self.deduce_op0(instruction, dst_read.as_ref(), op1_read.as_ref())?;
                        res = deduced_res;
                        op0
                    }
                };
                deduced_op0.ok_or(VmError::FailedToComputeOperand {
                    name: "op0",
                    addr: op0_addr,
                })?
            }
        };

        let op1 = match op1_read {
            Some(op1) => op1,
            None => {
                deduced.op1 = true;
                let deduced_op1 = match self.deduce_memory_cell(op1_addr)? {
                    Some(value) => Some(value),
                    None => {
                        let (op1, deduced_res) =
                            self.deduce_op1(instruction, dst_read.as_ref(), Some(&op0))?;
                        if res.is_none() {
                            res = deduced_res;
                        }
                        op1
                    }
                };
                deduced_op1.ok_or(VmError::FailedToComputeOperand {
                    name: "op1",
                    addr: op1_addr,
                })?
            }
        };

        if res.is_none() {
            res = self.compute_res(instruction, op0, op1)?;
        }

        let dst = match dst_read {
            Some(dst) => dst,
            None => {
                deduced.dst = true;
                self.deduce_dst(instruction, res.as_ref())?
            }
        };

        Ok((
            Operands { dst, res, op0, op1 },
            OperandsAddresses {
                dst_addr,
                op0_addr,
                op1_addr,
            },
            deduced,
        ))
    }

    /// Writes deduced operands back to memory. This is how source programs
    /// populate builtin segments, so validation rules fire here.
    fn insert_deduced_operands(
        &mut self,
        deduced: DeducedOperands,
        operands: &Operands,
        addresses: &OperandsAddresses,
    ) -> Result<(), VmError> {
        if deduced.op0 {
            self.segments.memory.insert(addresses.op0_addr, operands.op0)?;
        }
        if deduced.op1 {
            self.segments.memory.insert(addresses.op1_addr, operands.op1)?;
        }
        if deduced.dst {
            self.segments.memory.insert(addresses.dst_addr, operands.dst)?;
        }
        Ok(())
    }

    fn opcode_assertions(
        &self,
        instruction: &Instruction,
        operands: &Operands,
    ) -> Result<(), VmError> {
        match instruction.opcode {
            Opcode::AssertEq => match operands.res {
                None => Err(VmError::UnconstrainedResAssertEq),
                Some(res) if res != operands.dst => Err(VmError::DiffAssertValues {
                    dst: operands.dst,
                    res,
                }),
                _ => Ok(()),
            },
            Opcode::Call => {
                let return_pc = Value::Addr(
                    self.run_context.pc.add_offset(instruction.size())?,
                );
                if operands.op0 != return_pc {
                    return Err(VmError::CantWriteReturnPc {
                        found: operands.op0,
                        expected: return_pc,
                    });
                }
                let return_fp = Value::Addr(self.run_context.fp);
                if operands.dst != return_fp {
                    return Err(VmError::CantWriteReturnFp {
                        found: operands.dst,
                        expected: return_fp,
                    });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Executes the instruction at `pc`: decode, resolve operands, enforce
    /// the opcode contract, run the hints registered at this pc, update the
    /// registers, and append one trace entry holding the registers as they
    /// stood when the step began.
    pub fn step(
        &mut self,
        executor: &mut dyn HintExecutor,
        exec_scopes: &mut ExecutionScopes,
        hints: &[HintData],
        constants: &HashMap<String, Felt>,
    ) -> Result<(), VmError> {
        let entry = TraceEntry {
            pc: self.run_context.pc,
            ap: self.run_context.ap,
            fp: self.run_context.fp,
        };

        let word = self.segments.memory.get_felt(self.run_context.pc)?;
        let instruction = decode_instruction(word)?;
        trace!(pc = %entry.pc, opcode = ?instruction.opcode, "executing");

        let (operands, addresses, deduced) = self.compute_operands(&instruction)?;
        self.insert_deduced_operands(deduced, &operands, &addresses)?;
        self.opcode_assertions(&instruction, &operands)?;

        for hint in hints {
            executor.execute_hint(self, hint, constants, exec_scopes)?;
        }

        self.update_registers(&instruction, &operands)?;
        self.current_step += 1;
        self.trace.push(entry);
        Ok(())
    }

    /// Drives the machine until `pc` reaches `end` or the externally
    /// supplied stop predicate fires between steps. A stopped run exits
    /// cleanly with its trace intact; a failing step aborts with the step
    /// counter and a register snapshot attached.
    #[allow(clippy::too_many_arguments)]
    pub fn run_until(
        &mut self,
        end: Relocatable,
        executor: &mut dyn HintExecutor,
        exec_scopes: &mut ExecutionScopes,
        hints: &HashMap<usize, Vec<HintData>>,
        constants: &HashMap<String, Felt>,
        stop: &mut dyn FnMut(&VirtualMachine) -> bool,
    ) -> Result<(), VmError> {
        while self.run_context.pc != end {
            if stop(self) {
                debug!(step = self.current_step, "stop predicate hit, halting");
                break;
            }
            let pc_hints = hints
                .get(&self.run_context.pc.offset)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let (step, pc, ap, fp) = (
                self.current_step,
                self.run_context.pc,
                self.run_context.ap,
                self.run_context.fp,
            );
            self.step(executor, exec_scopes, pc_hints, constants)
                .map_err(|source| VmError::StepFailed {
                    step,
                    pc,
                    ap,
                    fp,
                    source: Box::new(source),
                })?;
        }
        debug!(steps = self.current_step, "run finished");
        Ok(())
    }

    /// Resolves temporary segments, lays all segments out contiguously from
    /// address 1, and returns the relocated trace together with the
    /// relocated memory as ascending `(absolute address, value)` pairs.
    pub fn relocate(
        &mut self,
    ) -> Result<(Vec<RelocatedTraceEntry>, Vec<(usize, Felt)>), VmError> {
        self.segments.relocate_segments()?;
        let sizes = self.segments.compute_effective_sizes().to_vec();
        let bases = self.segments.base_address_table();

        let trace = self
            .trace
            .iter()
            .map(|entry| {
                Ok(RelocatedTraceEntry {
                    pc: relocate_address(entry.pc, &bases)?,
                    ap: relocate_address(entry.ap, &bases)?,
                    fp: relocate_address(entry.fp, &bases)?,
                })
            })
            .collect::<Result<Vec<_>, VmError>>()?;

        let mut memory = Vec::new();
        for (segment, size) in sizes.iter().enumerate() {
            for offset in 0..*size {
                let addr = Relocatable::new(segment as isize, offset);
                if let Some(value) = self.segments.memory.get(addr) {
                    memory.push((bases[segment] + offset, relocate_value(value, &bases)?));
                }
            }
        }
        debug!(
            trace_len = trace.len(),
            memory_len = memory.len(),
            "run relocated"
        );
        Ok((trace, memory))
    }
}
