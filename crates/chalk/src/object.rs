//! Records produced by compilation and wrapped by the loader.
//!
//! `Function` is the compiler's output. `Closure` and `Fiber` are the minimal
//! runtime wrappers the loader needs to hand back something runnable, and
//! `Class` backs the builtin names every module is seeded with. Modules are not
//! heap objects: the VM owns them in its module dictionary and functions refer
//! to them by [`ModuleId`].

use crate::{heap::HeapId, intern::StringTable, value::Value};

/// Index of a module in the VM's module dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ModuleId(u32);

impl ModuleId {
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(u32::try_from(index).unwrap_or(u32::MAX))
    }

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Debug information attached to a compiled function.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FunctionDebug {
    pub name: String,
    /// Line of the first instruction; the line program is relative to it.
    pub first_line: u32,
    pub line_program: Vec<u8>,
}

/// A compiled function prototype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub code: Vec<u8>,
    pub constants: Vec<Value>,
    pub module: ModuleId,
    pub upvalue_count: usize,
    /// Peak number of stack slots used above the parameters.
    pub max_stack: u32,
    pub arity: u8,
    pub debug: FunctionDebug,
}

impl Function {
    /// Source line of the instruction starting at `offset`.
    #[must_use]
    pub fn line_for_offset(&self, offset: usize) -> Option<u32> {
        crate::bytecode::line_for_offset(
            self.debug.first_line,
            &self.debug.line_program,
            u32::try_from(offset).ok()?,
        )
    }

    pub(crate) fn estimate_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.code.len()
            + self.constants.len() * std::mem::size_of::<Value>()
            + self.debug.name.len()
            + self.debug.line_program.len()
    }
}

/// A function paired with its captured variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Closure {
    pub function: HeapId,
    /// Captured cells; empty until the interpreter closes over live frames.
    pub upvalues: Vec<Value>,
}

/// One activation record on a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    pub closure: HeapId,
    /// Offset of the next instruction to execute.
    pub ip: usize,
    /// Index of the frame's slot 0 in the fiber stack.
    pub base: usize,
}

/// A cooperatively scheduled execution context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fiber {
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
}

impl Fiber {
    /// Creates a fiber ready to run `closure` as its single frame.
    #[must_use]
    pub fn new(closure: HeapId) -> Self {
        Self {
            stack: vec![Value::Ref(closure)],
            frames: vec![CallFrame {
                closure,
                ip: 0,
                base: 0,
            }],
        }
    }
}

/// A class object. Only builtin classes are created outside the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Class {
    pub name: String,
    pub superclass: Option<HeapId>,
    pub field_count: u8,
}

/// A named namespace of ordered variables plus a string pool.
///
/// `variable_names` and `variables` always have the same length. A slot whose
/// value is [`Value::Undefined`] is declared but not yet defined.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: String,
    pub variable_names: StringTable,
    pub variables: Vec<Value>,
    /// String literals and method signatures referenced by `StringConstant`
    /// and call instructions.
    pub strings: StringTable,
    /// Fiber created by the most recent successful load.
    pub top_fiber: Option<HeapId>,
}

impl Module {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns the slot of the variable called `name`.
    #[must_use]
    pub fn find_variable(&self, name: &str) -> Option<usize> {
        self.variable_names.find(name).map(|id| id.index())
    }

    #[must_use]
    pub fn variable(&self, name: &str) -> Option<Value> {
        self.find_variable(name).map(|slot| self.variables[slot])
    }

    /// Appends a new variable slot holding `value` and returns its index.
    ///
    /// The caller checks that `name` is not already declared.
    pub fn add_variable(&mut self, name: &str, value: Value) -> usize {
        let id = self.variable_names.push(name);
        self.variables.push(value);
        debug_assert_eq!(self.variables.len(), self.variable_names.len());
        id.index()
    }

    /// Sets `name` to `value`, declaring it if needed.
    pub fn define_variable(&mut self, name: &str, value: Value) -> usize {
        match self.find_variable(name) {
            Some(slot) => {
                self.variables[slot] = value;
                slot
            }
            None => self.add_variable(name, value),
        }
    }

    #[must_use]
    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    /// Removes every variable declared at or after slot `len`.
    pub fn truncate_variables(&mut self, len: usize) {
        self.variable_names.truncate(len);
        self.variables.truncate(len);
    }

    /// Heap objects this module keeps alive.
    pub fn heap_refs(&self) -> impl Iterator<Item = HeapId> + '_ {
        self.variables
            .iter()
            .filter_map(|v| v.ref_id())
            .chain(self.top_fiber)
    }
}
