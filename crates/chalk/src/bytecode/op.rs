//! Opcode definitions.
//!
//! Each opcode is one byte followed by a fixed operand layout (except `Closure`,
//! whose length depends on the capture count of the function it closes over).
//! Every u16 operand, index or displacement, is stored big-endian.

use strum::{FromRepr, IntoStaticStr};

/// Every instruction the compiler emits.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
pub enum Opcode {
    Nop,
    /// u16 index into the function's constants.
    Constant,
    /// u16 index into the module's string pool.
    StringConstant,
    Null,
    Literal0,
    Literal1,
    Literal2,
    Literal3,
    Literal4,
    Literal5,
    Literal6,
    Literal7,
    Literal8,

    // === Locals ===
    LoadLocal0,
    LoadLocal1,
    LoadLocal2,
    LoadLocal3,
    LoadLocal4,
    LoadLocal5,
    LoadLocal6,
    LoadLocal7,
    LoadLocal8,
    /// u8 slot.
    LoadLocal,
    /// u8 slot. Leaves the stored value on the stack.
    StoreLocal,
    /// u8 upvalue index.
    LoadUpvalue,
    StoreUpvalue,
    /// u16 module variable index.
    LoadModuleVariable,
    StoreModuleVariable,

    // === Fields ===
    /// u8 field index on the receiver in slot 0.
    LoadFieldThis,
    StoreFieldThis,
    /// u8 field index on the instance popped from the stack.
    LoadField,
    StoreField,

    Pop,

    // === Calls ===
    // `CallN` carries a u16 method symbol and consumes the receiver plus N
    // arguments, leaving one result.
    Call0,
    Call1,
    Call2,
    Call3,
    Call4,
    Call5,
    Call6,
    Call7,
    Call8,
    /// u8 arity, u16 method symbol.
    Call,
    /// u8 arity; the callee sits below its arguments.
    IndirectCall,
    // `SuperCallN` carries the u16 method symbol and a u16 class-name symbol.
    SuperCall0,
    SuperCall1,
    SuperCall2,
    SuperCall3,
    SuperCall4,
    SuperCall5,
    SuperCall6,
    SuperCall7,
    SuperCall8,
    /// u8 arity, u16 method symbol, u16 class-name symbol.
    SuperCall,

    // === Control flow ===
    /// Forward u16 displacement.
    Jump,
    /// Backward u16 displacement.
    Loop,
    /// Pops the condition and jumps when it is falsey.
    JumpIf,
    /// Jumps keeping the top when it is falsey, else pops it.
    And,
    /// Jumps keeping the top when it is truthy, else pops it.
    Or,
    CloseUpvalue,
    Return,

    // === Closures and classes ===
    /// u16 constant index of a function, then `(u8 is_local, u8 index)` per upvalue.
    Closure,
    /// u8 field count; pops the superclass and replaces the name with the class.
    Class,
    /// u16 method symbol; pops the class and the closure.
    Method,
    StaticMethod,

    // === Exceptions ===
    /// Forward u16 displacement to the handler. Opens a try block; an
    /// exception raised inside it resumes at the handler with the exception
    /// pushed on the stack as it stood here.
    Try,
    /// Closes the innermost try block.
    PopTry,

    /// Terminates a top-level body. Inside loops, marks a pending `break`.
    End,
}

impl Opcode {
    /// Fixed stack effect of this opcode, or `None` where it depends on an
    /// operand the emitter accounts for at the call site.
    #[must_use]
    pub fn stack_effect(self) -> Option<i16> {
        use Opcode::{
            And, Call, Call0, Call1, Call2, Call3, Call4, Call5, Call6, Call7, Call8, Class, CloseUpvalue, Closure,
            Constant, End, IndirectCall, Jump, JumpIf, Literal0, Literal1, Literal2, Literal3, Literal4, Literal5,
            Literal6, Literal7, Literal8, LoadField, LoadFieldThis, LoadLocal, LoadLocal0, LoadLocal1, LoadLocal2,
            LoadLocal3, LoadLocal4, LoadLocal5, LoadLocal6, LoadLocal7, LoadLocal8, LoadModuleVariable, LoadUpvalue,
            Loop, Method, Nop, Null, Or, Pop, PopTry, Return, StaticMethod, StoreField, StoreFieldThis, StoreLocal,
            StoreModuleVariable, StoreUpvalue, StringConstant, SuperCall, SuperCall0, SuperCall1, SuperCall2,
            SuperCall3, SuperCall4, SuperCall5, SuperCall6, SuperCall7, SuperCall8, Try,
        };
        Some(match self {
            Nop | StoreLocal | StoreUpvalue | StoreModuleVariable | StoreFieldThis | Jump | Loop | Try | PopTry
            | End => 0,
            Constant | StringConstant | Null | Literal0 | Literal1 | Literal2 | Literal3 | Literal4 | Literal5
            | Literal6 | Literal7 | Literal8 | LoadLocal0 | LoadLocal1 | LoadLocal2 | LoadLocal3 | LoadLocal4
            | LoadLocal5 | LoadLocal6 | LoadLocal7 | LoadLocal8 | LoadLocal | LoadUpvalue | LoadModuleVariable
            | LoadFieldThis | LoadField | Closure => 1,
            StoreField | Pop | JumpIf | And | Or | CloseUpvalue | Return | Class => -1,
            Method | StaticMethod => -2,
            Call0 | Call1 | Call2 | Call3 | Call4 | Call5 | Call6 | Call7 | Call8 => {
                -i16::from(self as u8 - Call0 as u8)
            }
            SuperCall0 | SuperCall1 | SuperCall2 | SuperCall3 | SuperCall4 | SuperCall5 | SuperCall6
            | SuperCall7 | SuperCall8 => -i16::from(self as u8 - SuperCall0 as u8),
            Call | IndirectCall | SuperCall => return None,
        })
    }

    /// Operand bytes following the opcode. For `Closure` this excludes the
    /// per-upvalue pairs, whose count is stored in the referenced function.
    #[must_use]
    pub fn operand_size(self) -> usize {
        use Opcode::{
            And, Call, Call0, Call8, Class, Closure, Constant, IndirectCall, Jump, JumpIf, LoadField, LoadFieldThis,
            LoadLocal, LoadModuleVariable, LoadUpvalue, Loop, Method, Or, StaticMethod, StoreField, StoreFieldThis,
            StoreLocal, StoreModuleVariable, StoreUpvalue, StringConstant, SuperCall, SuperCall0, SuperCall8, Try,
        };
        match self {
            LoadLocal | StoreLocal | LoadUpvalue | StoreUpvalue | LoadFieldThis | StoreFieldThis | LoadField
            | StoreField | IndirectCall | Class => 1,
            Constant | StringConstant | LoadModuleVariable | StoreModuleVariable | Jump | Loop | JumpIf | And | Or
            | Closure | Method | StaticMethod | Try => 2,
            Call => 3,
            SuperCall => 5,
            op if (Call0 as u8..=Call8 as u8).contains(&(op as u8)) => 2,
            op if (SuperCall0 as u8..=SuperCall8 as u8).contains(&(op as u8)) => 4,
            _ => 0,
        }
    }

    /// The compact `CallN` form for `arity`, if one exists.
    #[must_use]
    pub fn call_for_arity(arity: u8) -> Option<Self> {
        (arity <= 8).then(|| Self::from_repr(Self::Call0 as u8 + arity)).flatten()
    }

    /// The compact `SuperCallN` form for `arity`, if one exists.
    #[must_use]
    pub fn super_call_for_arity(arity: u8) -> Option<Self> {
        (arity <= 8).then(|| Self::from_repr(Self::SuperCall0 as u8 + arity)).flatten()
    }

    /// Returns true for opcodes whose operand is a jump displacement.
    #[must_use]
    pub fn is_jump(self) -> bool {
        matches!(self, Self::Jump | Self::Loop | Self::JumpIf | Self::And | Self::Or | Self::Try)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::from_repr(byte).ok_or(byte)
    }
}
