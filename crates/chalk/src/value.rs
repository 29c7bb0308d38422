use std::fmt;

use crate::heap::HeapId;

/// Runtime value representation observed by the compiler.
///
/// Small immediate values are stored inline; strings, functions, classes,
/// closures and fibers live in the heap arena and are referenced via `Ref`.
/// Booleans never appear in constant pools: the compiler emits `Literal0` /
/// `Literal1` for them instead.
///
/// NOTE: keep this type small; module variable arrays and constant pools hold
/// it by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum Value {
    /// A declared module variable that has not been assigned yet.
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Ref(HeapId),
}

impl Value {
    /// Returns the heap id this value points at, if any.
    #[inline]
    #[must_use]
    pub fn ref_id(self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(id),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_undefined(self) -> bool {
        matches!(self, Self::Undefined)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Ref(id) => write!(f, "<object {}>", id.index()),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<HeapId> for Value {
    fn from(id: HeapId) -> Self {
        Self::Ref(id)
    }
}
