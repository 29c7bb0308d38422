//! Human-readable disassembly and stack traces.
//!
//! Output goes through the [`Host`]: disassembly to `write`, stack trace
//! frames to `error` with [`Report::StackTrace`].

use std::fmt::Write as _;

use indexmap::IndexMap;

use super::op::Opcode;
use crate::{
    heap::Heap,
    intern::{StringId, StringTable},
    io::{Host, Report},
    object::{Fiber, Function, Module},
    resource::ResourceTracker,
    value::Value,
};

/// Disassembles `function` to `host.write`, a header line followed by one
/// line per instruction.
pub fn dump_function<T: ResourceTracker>(function: &Function, module: &Module, heap: &Heap<T>, host: &mut dyn Host) {
    let mut out = format!(
        "{} ({}): {} bytes, {} constants, max stack {}, {} upvalues\n",
        function.debug.name,
        function.debug.first_line,
        function.code.len(),
        function.constants.len(),
        function.max_stack,
        function.upvalue_count,
    );
    let mut previous_line = None;
    let mut offset = 0;
    while offset < function.code.len() {
        let line = function.line_for_offset(offset);
        let (text, size) = render_instruction(function, module, heap, offset, line, previous_line);
        out.push_str(&text);
        out.push('\n');
        previous_line = line;
        offset += size;
    }
    host.write(&out);
}

/// Renders the instruction at `offset`, returning the text and the
/// instruction's length in bytes.
///
/// The line column shows `|` when the previous instruction is on the same line.
#[must_use]
pub fn dump_instruction<T: ResourceTracker>(
    function: &Function,
    module: &Module,
    heap: &Heap<T>,
    offset: usize,
) -> (String, usize) {
    let previous_line = instruction_starts(function, heap)
        .into_iter()
        .take_while(|&start| start < offset)
        .last()
        .and_then(|start| function.line_for_offset(start));
    let line = function.line_for_offset(offset);
    render_instruction(function, module, heap, offset, line, previous_line)
}

/// Start offsets of every instruction in `function`, in order.
#[must_use]
pub fn instruction_starts<T: ResourceTracker>(function: &Function, heap: &Heap<T>) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut offset = 0;
    while offset < function.code.len() {
        starts.push(offset);
        offset += instruction_size(function, heap, offset);
    }
    starts
}

/// Length in bytes of the instruction at `offset`, operands and closure
/// captures included. An invalid opcode counts as one byte.
#[must_use]
pub fn instruction_size<T: ResourceTracker>(function: &Function, heap: &Heap<T>, offset: usize) -> usize {
    let Ok(op) = Opcode::try_from(function.code[offset]) else {
        return 1;
    };
    let mut size = 1 + op.operand_size();
    if op == Opcode::Closure {
        size += 2 * closure_captures(function, heap, offset);
    }
    size
}

fn closure_captures<T: ResourceTracker>(function: &Function, heap: &Heap<T>, offset: usize) -> usize {
    read_u16(&function.code, offset + 1)
        .and_then(|index| function.constants.get(usize::from(index)))
        .and_then(|value| value.ref_id())
        .and_then(|id| heap.function(id))
        .map_or(0, |captured| captured.upvalue_count)
}

fn read_u16(code: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*code.get(at)?, *code.get(at + 1)?]))
}

fn string_at(strings: &StringTable, symbol: u16) -> &str {
    strings.get(StringId::from_index(usize::from(symbol))).unwrap_or("?")
}

fn render_instruction<T: ResourceTracker>(
    function: &Function,
    module: &Module,
    heap: &Heap<T>,
    offset: usize,
    line: Option<u32>,
    previous_line: Option<u32>,
) -> (String, usize) {
    let code = &function.code;
    let mut out = format!("{offset:04} ");
    match line {
        Some(line) if previous_line == Some(line) => out.push_str("   | "),
        Some(line) => {
            let _ = write!(out, "{line:4} ");
        }
        None => out.push_str("   ? "),
    }

    let Ok(op) = Opcode::try_from(code[offset]) else {
        let _ = write!(out, "<invalid 0x{:02x}>", code[offset]);
        return (out, 1);
    };
    out.push_str(op.name());

    let u8_at = |at: usize| code.get(at).copied().unwrap_or(0);
    let u16_at = |at: usize| read_u16(code, at).unwrap_or(0);
    let symbol = |out: &mut String, index: u16| {
        let _ = write!(out, " {index} '{}'", string_at(&module.strings, index));
    };

    match op {
        Opcode::Constant => {
            let index = u16_at(offset + 1);
            let _ = write!(out, " {index}");
            if let Some(value) = function.constants.get(usize::from(index)) {
                let _ = write!(out, " ({})", describe_constant(*value, heap));
            }
        }
        Opcode::StringConstant | Opcode::Method | Opcode::StaticMethod => symbol(&mut out, u16_at(offset + 1)),
        Opcode::LoadModuleVariable | Opcode::StoreModuleVariable => {
            let index = u16_at(offset + 1);
            let name = module
                .variable_names
                .get(StringId::from_index(usize::from(index)))
                .unwrap_or("?");
            let _ = write!(out, " {index} '{name}'");
        }
        Opcode::Jump | Opcode::JumpIf | Opcode::And | Opcode::Or | Opcode::Try => {
            let target = offset + 3 + usize::from(u16_at(offset + 1));
            let _ = write!(out, " -> {target:04}");
        }
        Opcode::Loop => {
            let target = (offset + 3).saturating_sub(usize::from(u16_at(offset + 1)));
            let _ = write!(out, " -> {target:04}");
        }
        Opcode::Call => {
            let _ = write!(out, " {}", u8_at(offset + 1));
            symbol(&mut out, u16_at(offset + 2));
        }
        Opcode::SuperCall => {
            let _ = write!(out, " {}", u8_at(offset + 1));
            symbol(&mut out, u16_at(offset + 2));
            symbol(&mut out, u16_at(offset + 4));
        }
        Opcode::Closure => {
            let index = u16_at(offset + 1);
            let _ = write!(out, " {index}");
            if let Some(value) = function.constants.get(usize::from(index)) {
                let _ = write!(out, " ({})", describe_constant(*value, heap));
            }
            let captures = closure_captures(function, heap, offset);
            for capture in 0..captures {
                let at = offset + 3 + 2 * capture;
                let kind = if u8_at(at) == 1 { "local" } else { "upvalue" };
                let separator = if capture == 0 { " " } else { ", " };
                let _ = write!(out, "{separator}{kind} {}", u8_at(at + 1));
            }
        }
        op if (Opcode::Call0 as u8..=Opcode::Call8 as u8).contains(&(op as u8)) => {
            symbol(&mut out, u16_at(offset + 1));
        }
        op if (Opcode::SuperCall0 as u8..=Opcode::SuperCall8 as u8).contains(&(op as u8)) => {
            symbol(&mut out, u16_at(offset + 1));
            symbol(&mut out, u16_at(offset + 3));
        }
        op if op.operand_size() == 1 => {
            let _ = write!(out, " {}", u8_at(offset + 1));
        }
        _ => {}
    }
    (out, instruction_size(function, heap, offset))
}

fn describe_constant<T: ResourceTracker>(value: Value, heap: &Heap<T>) -> String {
    match value.ref_id().and_then(|id| heap.function(id)) {
        Some(function) => format!("fn {}", function.debug.name),
        None => value.to_string(),
    }
}

/// Reports one [`Report::StackTrace`] frame per call frame of `fiber`,
/// innermost first, as `"{module}:{line} in {function}"`.
///
/// The line is that of the instruction being executed, the one just before
/// each frame's `ip`.
pub fn stack_trace<T: ResourceTracker>(
    heap: &Heap<T>,
    modules: &IndexMap<String, Module>,
    fiber: &Fiber,
    host: &mut dyn Host,
) {
    for frame in fiber.frames.iter().rev() {
        let Some(function) = heap.closure(frame.closure).and_then(|closure| heap.function(closure.function)) else {
            continue;
        };
        let module = modules
            .get_index(function.module.index())
            .map_or("?", |(name, _)| name.as_str());
        let current = instruction_starts(function, heap)
            .into_iter()
            .take_while(|&start| start < frame.ip)
            .last()
            .unwrap_or(0);
        let line = function.line_for_offset(current).unwrap_or(0);
        let message = format!("{module}:{line} in {}", function.debug.name);
        host.error(Report::StackTrace, module, line, &message);
    }
}
