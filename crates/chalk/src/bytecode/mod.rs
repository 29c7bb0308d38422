//! Bytecode representation and emission.
//!
//! # Module Structure
//!
//! - `op` - Opcode enum, operand layouts and stack effects
//! - `builder` - CodeBuilder for emitting bytecode during compilation
//! - `line_program` - compact offset to line mapping
//! - `dump` - disassembler and stack traces

pub use builder::{BuiltCode, CodeBuilder, EmitError, JumpLabel, MAX_CONSTANTS};
pub use dump::{dump_function, dump_instruction, instruction_size, instruction_starts, stack_trace};
pub use line_program::{LineProgramBuilder, LineRow, LineRows, line_for_offset};
pub use op::Opcode;

mod builder;
mod dump;
mod line_program;
mod op;
