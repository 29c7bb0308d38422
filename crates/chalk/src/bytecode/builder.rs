//! Builder for emitting bytecode during compilation.
//!
//! `CodeBuilder` appends opcodes and operands, tracks the running stack depth
//! and its high-water mark, patches forward jumps, and feeds every instruction
//! offset into the line program.

use std::fmt;

use super::{line_program::LineProgramBuilder, op::Opcode};
use crate::value::Value;

/// Largest number of constants a single function may hold.
pub const MAX_CONSTANTS: usize = 1 << 16;

/// Failures the builder detects while emitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitError {
    JumpTooLarge,
    TooManyConstants,
}

impl fmt::Display for EmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::JumpTooLarge => "Jump too large",
            Self::TooManyConstants => "Too many constants",
        })
    }
}

impl std::error::Error for EmitError {}

/// Position of a forward jump's placeholder operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct JumpLabel(usize);

/// The finished pieces of a function body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltCode {
    pub code: Vec<u8>,
    pub constants: Vec<Value>,
    pub max_stack: u32,
    pub first_line: u32,
    pub line_program: Vec<u8>,
}

/// Builder for emitting bytecode during compilation.
///
/// # Usage
///
/// ```ignore
/// let mut builder = CodeBuilder::new(1, 1);
/// builder.emit(Opcode::Literal1);
/// let jump = builder.emit_jump(Opcode::JumpIf);
/// // ... emit more code ...
/// builder.patch_jump(jump)?;
/// builder.emit(Opcode::End);
/// let code = builder.build();
/// ```
#[derive(Debug, Default)]
pub struct CodeBuilder {
    /// The bytecode being built.
    bytecode: Vec<u8>,

    /// Constants collected during compilation.
    constants: Vec<Value>,

    /// Instruction start offsets in emission order.
    ///
    /// Lets later passes walk instructions without decoding operand lengths
    /// from raw bytes (break placeholders carry operands `End` normally lacks).
    instruction_offsets: Vec<usize>,

    /// Offsets that some patched forward jump lands on.
    jump_targets: Vec<usize>,

    lines: LineProgramBuilder,

    /// Source line attributed to the next instruction.
    current_line: u32,

    /// Absolute number of occupied stack slots, parameters included.
    stack_slots: i32,

    /// Slots occupied on entry (receiver plus parameters).
    stack_base: i32,

    /// Highest value `stack_slots` has reached.
    stack_peak: i32,
}

impl CodeBuilder {
    /// Creates a builder for a frame that starts with `stack_base` occupied slots.
    #[must_use]
    pub fn new(stack_base: usize, line: u32) -> Self {
        let base = i32::try_from(stack_base).unwrap_or(i32::MAX);
        Self {
            current_line: line,
            stack_slots: base,
            stack_base: base,
            stack_peak: base,
            ..Self::default()
        }
    }

    /// Sets the source line for subsequent instructions.
    pub fn set_line(&mut self, line: u32) {
        self.current_line = line;
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.current_line
    }

    /// Emits a no-operand instruction and updates stack depth tracking.
    pub fn emit(&mut self, op: Opcode) {
        self.start_instruction(op);
    }

    /// Emits an instruction with a u8 operand and updates stack depth tracking.
    pub fn emit_u8(&mut self, op: Opcode, operand: u8) {
        self.start_instruction(op);
        self.bytecode.push(operand);
        if op == Opcode::IndirectCall {
            // pops the callee and its arguments, pushes the result
            self.adjust_stack(-i32::from(operand));
        }
    }

    /// Emits an instruction with a big-endian u16 operand.
    pub fn emit_u16(&mut self, op: Opcode, operand: u16) {
        self.start_instruction(op);
        self.bytecode.extend_from_slice(&operand.to_be_bytes());
    }

    /// Emits a method call on the receiver sitting below `arity` arguments.
    ///
    /// Uses the compact `CallN` form when one exists.
    pub fn emit_call(&mut self, arity: u8, symbol: u16) {
        if let Some(op) = Opcode::call_for_arity(arity) {
            self.emit_u16(op, symbol);
        } else {
            self.start_instruction(Opcode::Call);
            self.bytecode.push(arity);
            self.bytecode.extend_from_slice(&symbol.to_be_bytes());
            self.adjust_stack(-i32::from(arity));
        }
    }

    /// Emits a call that dispatches starting at the superclass of `class_symbol`.
    pub fn emit_super_call(&mut self, arity: u8, symbol: u16, class_symbol: u16) {
        if let Some(op) = Opcode::super_call_for_arity(arity) {
            self.start_instruction(op);
        } else {
            self.start_instruction(Opcode::SuperCall);
            self.bytecode.push(arity);
            self.adjust_stack(-i32::from(arity));
        }
        self.bytecode.extend_from_slice(&symbol.to_be_bytes());
        self.bytecode.extend_from_slice(&class_symbol.to_be_bytes());
    }

    /// Emits `Closure` for the function constant at `function`, followed by one
    /// `(is_local, index)` pair per captured variable.
    pub fn emit_closure(&mut self, function: u16, upvalues: &[(bool, u8)]) {
        self.start_instruction(Opcode::Closure);
        self.bytecode.extend_from_slice(&function.to_be_bytes());
        for &(is_local, index) in upvalues {
            self.bytecode.push(u8::from(is_local));
            self.bytecode.push(index);
        }
    }

    /// Emits a forward jump instruction, returning a label to patch later.
    ///
    /// The displacement is a placeholder until [`CodeBuilder::patch_jump`].
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        self.start_instruction(op);
        let label = JumpLabel(self.bytecode.len());
        self.bytecode.extend_from_slice(&[0xFF, 0xFF]);
        label
    }

    /// Patches a forward jump to land on the current bytecode location.
    ///
    /// The displacement is measured from the byte after the operand.
    pub fn patch_jump(&mut self, label: JumpLabel) -> Result<(), EmitError> {
        let target = self.bytecode.len();
        let displacement = u16::try_from(target - label.0 - 2).map_err(|_| EmitError::JumpTooLarge)?;
        self.bytecode[label.0..label.0 + 2].copy_from_slice(&displacement.to_be_bytes());
        self.jump_targets.push(target);
        Ok(())
    }

    /// Emits a `Loop` back to `target`, an earlier instruction boundary.
    pub fn emit_loop(&mut self, target: usize) -> Result<(), EmitError> {
        self.start_instruction(Opcode::Loop);
        let displacement = u16::try_from(self.bytecode.len() + 2 - target).map_err(|_| EmitError::JumpTooLarge)?;
        self.bytecode.extend_from_slice(&displacement.to_be_bytes());
        Ok(())
    }

    /// Turns every `End` placeholder at or after `from` into a `Jump` to here.
    pub fn patch_breaks(&mut self, from: usize) -> Result<(), EmitError> {
        let first = self.instruction_offsets.partition_point(|&offset| offset < from);
        let breaks: Vec<usize> = self.instruction_offsets[first..]
            .iter()
            .copied()
            .filter(|&offset| self.bytecode[offset] == Opcode::End as u8)
            .collect();
        for offset in breaks {
            self.bytecode[offset] = Opcode::Jump as u8;
            self.patch_jump(JumpLabel(offset + 1))?;
        }
        Ok(())
    }

    /// Overwrites a single operand byte.
    pub fn patch_u8(&mut self, offset: usize, value: u8) {
        self.bytecode[offset] = value;
    }

    /// Returns the current bytecode offset.
    ///
    /// Use this to record loop start positions for backward jumps.
    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.bytecode.len()
    }

    /// Opcode of the most recently emitted instruction.
    #[must_use]
    pub fn last_op(&self) -> Option<Opcode> {
        let offset = *self.instruction_offsets.last()?;
        Opcode::from_repr(self.bytecode[offset])
    }

    /// Returns true if a patched jump lands on `offset`.
    #[must_use]
    pub fn is_jump_target(&self, offset: usize) -> bool {
        self.jump_targets.contains(&offset)
    }

    /// Adds a constant to the pool, returning its index.
    pub fn add_const(&mut self, value: Value) -> Result<u16, EmitError> {
        let index = u16::try_from(self.constants.len()).map_err(|_| EmitError::TooManyConstants)?;
        self.constants.push(value);
        Ok(index)
    }

    #[must_use]
    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    #[must_use]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// Applies a stack effect the opcode table cannot express.
    pub fn adjust_stack(&mut self, delta: i32) {
        self.stack_slots += delta;
        self.stack_peak = self.stack_peak.max(self.stack_slots);
    }

    /// Returns the current tracked stack depth, counting from the frame's slot 0.
    #[must_use]
    pub fn stack_slots(&self) -> i32 {
        self.stack_slots
    }

    /// Resets the tracked depth, for code paths that rejoin at a known height.
    pub fn set_stack_slots(&mut self, slots: i32) {
        self.stack_slots = slots;
    }

    /// Builds the final code record.
    #[must_use]
    pub fn build(self) -> BuiltCode {
        let (first_line, line_program) = self.lines.finish();
        BuiltCode {
            code: self.bytecode,
            constants: self.constants,
            max_stack: u32::try_from(self.stack_peak - self.stack_base).unwrap_or(0),
            first_line,
            line_program,
        }
    }

    /// Writes the opcode byte, records its offset and line, and applies its
    /// tabulated stack effect.
    fn start_instruction(&mut self, op: Opcode) {
        let offset = self.bytecode.len();
        self.instruction_offsets.push(offset);
        self.bytecode.push(op as u8);
        if let Some(effect) = op.stack_effect() {
            self.adjust_stack(i32::from(effect));
        }
        self.lines
            .record(self.current_line, u32::try_from(offset).unwrap_or(u32::MAX));
    }
}
