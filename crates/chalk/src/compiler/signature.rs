//! Method signatures and the operator-to-method table.
//!
//! Every operator compiles to a method call on its left (or only) operand.
//! The signature strings below are what the runtime dispatches on, so they
//! must not change.

use std::fmt;

use crate::lexer::TokenKind;

/// A method name together with its arity, rendered as `name@arity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature<'a> {
    pub name: &'a str,
    pub arity: u8,
}

impl<'a> Signature<'a> {
    #[must_use]
    pub fn new(name: &'a str, arity: u8) -> Self {
        Self { name, arity }
    }
}

impl fmt::Display for Signature<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.arity)
    }
}

/// Method implementing a binary or compound-assignment operator.
///
/// `assign` selects the setter forms of `.` and `[]`.
#[must_use]
pub fn binary_operator(kind: TokenKind, assign: bool) -> Option<&'static str> {
    use TokenKind as T;
    Some(match kind {
        T::Is => "__is@1",
        T::RightShift | T::RightAssign => "__rightShift@1",
        T::LeftShift | T::LeftAssign => "__leftShift@1",
        T::LessOrEqual => "__le@1",
        T::GreaterOrEqual => "__ge@1",
        T::IsEqual => "__eq@1",
        T::IsNotEqual => "__ne@1",
        T::OpenBracket if assign => "__sliceAssign@2",
        T::OpenBracket => "__slice@1",
        T::BitAnd | T::AndAssign => "__and@1",
        T::Minus | T::SubtractAssign => "__sub@1",
        T::Plus | T::AddAssign => "__add@1",
        T::Asterisk | T::MultiplyAssign => "__mul@1",
        T::Divide | T::DivideAssign => "__div@1",
        T::Modulo | T::ModuloAssign => "__mod@1",
        T::LessThan => "__lt@1",
        T::GreaterThan => "__gt@1",
        T::Xor | T::XorAssign => "__xor@1",
        T::BitOr | T::OrAssign => "__or@1",
        T::Dot if assign => "__set@2",
        T::Dot => "__get@1",
        T::DotDot => "__rangeExclusive@1",
        T::DotDotDot => "__rangeInclusive@1",
        _ => return None,
    })
}

/// Method implementing a prefix or postfix unary operator.
///
/// Unary `+` has no method and compiles to nothing.
#[must_use]
pub fn unary_operator(kind: TokenKind) -> Option<&'static str> {
    use TokenKind as T;
    Some(match kind {
        T::Increment => "__inc@0",
        T::Decrement => "__dec@0",
        T::LogicalNot => "__lnot@0",
        T::BitNot => "__compl@0",
        T::Minus => "__neg@0",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_render_name_and_arity() {
        assert_eq!(Signature::new("run", 0).to_string(), "run@0");
        assert_eq!(Signature::new("iterate", 1).to_string(), "iterate@1");
    }

    #[test]
    fn compound_assignments_share_the_plain_method() {
        assert_eq!(binary_operator(TokenKind::AddAssign, false), binary_operator(TokenKind::Plus, false));
        assert_eq!(binary_operator(TokenKind::LeftAssign, false), Some("__leftShift@1"));
        assert_eq!(binary_operator(TokenKind::NullAssign, false), None);
    }

    #[test]
    fn accessors_switch_to_setters_when_assigning() {
        assert_eq!(binary_operator(TokenKind::Dot, true), Some("__set@2"));
        assert_eq!(binary_operator(TokenKind::OpenBracket, false), Some("__slice@1"));
        assert_eq!(unary_operator(TokenKind::Plus), None);
        assert_eq!(unary_operator(TokenKind::Minus), Some("__neg@0"));
    }
}
