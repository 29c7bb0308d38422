//! Expressions.
//!
//! Every operator other than `&&`, `||` and `?:` lowers to a method call on
//! its left operand. Assignment targets are compiled by visiting the target
//! subtree again with `assign` set, which turns the final load into a store.

use super::{
    CResult, Compiler, list_items,
    literal::{decode_string, parse_integer},
    signature::{Signature, binary_operator, unary_operator},
};
use crate::{
    ast::{AstElement, AstNode, NodeId, NodeKind},
    bytecode::Opcode,
    error::{CompileError, CompileErrorKind},
    lexer::{Token, TokenKind},
    resource::ResourceTracker,
    tracer::CompileTracer,
};

impl<T: ResourceTracker, Tr: CompileTracer> Compiler<'_, '_, T, Tr> {
    /// Comma expression: every value but the last is discarded.
    pub(super) fn visit_expression(&mut self, id: NodeId) -> CResult<()> {
        for (i, item) in list_items(self.ast, id).into_iter().enumerate() {
            if i > 0 {
                self.emit(Opcode::Pop);
            }
            self.visit(item)?;
        }
        Ok(())
    }

    pub(super) fn visit_assignment(&mut self, node: &AstNode) -> CResult<()> {
        if node.children == 1 {
            return self.visit(node.child(0));
        }
        let target = node.child(0);
        let value = node.child(2);
        let operator = self.token(self.ast.node(node.child(1)).child(0));
        let saved = self.assign;

        match operator.kind {
            TokenKind::Assign => {
                self.assign = false;
                self.visit(value)?;
                self.assign = true;
                self.visit(target)?;
            }
            TokenKind::NullAssign => {
                // the target keeps its value unless it is null
                self.assign = false;
                self.visit(target)?;
                let keep = self.emit_jump(Opcode::Or);
                self.visit(value)?;
                self.assign = true;
                self.visit(target)?;
                self.patch_jump(keep)?;
            }
            kind => {
                let Some(method) = binary_operator(kind, false) else {
                    return Err(self.error_at(&operator, CompileErrorKind::Syntax, "Unknown assignment operator"));
                };
                self.assign = false;
                self.visit(target)?;
                self.visit(value)?;
                self.emit_call(1, method)?;
                self.assign = true;
                self.visit(target)?;
            }
        }
        self.assign = saved;
        Ok(())
    }

    pub(super) fn visit_conditional(&mut self, node: &AstNode) -> CResult<()> {
        if node.children == 1 {
            return self.visit(node.child(0));
        }
        let question = self.token(node.child(1));
        self.complain_if_assigning(&question, "Conditional expression")?;

        self.visit(node.child(0))?;
        let otherwise = self.emit_jump(Opcode::JumpIf);
        self.visit(node.child(2))?;
        let end = self.emit_jump(Opcode::Jump);
        // only one arm's value reaches the join
        self.builder().adjust_stack(-1);
        self.patch_jump(otherwise)?;
        self.visit(node.child(4))?;
        self.patch_jump(end)
    }

    pub(super) fn visit_binary(&mut self, node: &AstNode) -> CResult<()> {
        let operator = self.token(node.child(1));
        self.complain_if_assigning(&operator, "Binary expression")?;
        self.visit(node.child(0))?;

        match operator.kind {
            TokenKind::LogicalAnd | TokenKind::LogicalOr => {
                let op = if operator.kind == TokenKind::LogicalAnd {
                    Opcode::And
                } else {
                    Opcode::Or
                };
                let end = self.emit_jump(op);
                self.visit(node.child(2))?;
                self.patch_jump(end)
            }
            kind => {
                let Some(method) = binary_operator(kind, false) else {
                    return Err(self.error_at(&operator, CompileErrorKind::Syntax, "Unknown binary operator"));
                };
                self.visit(node.child(2))?;
                self.emit_call(1, method)
            }
        }
    }

    pub(super) fn visit_unary(&mut self, node: &AstNode) -> CResult<()> {
        if node.children == 1 {
            return self.visit(node.child(0));
        }
        let operator = match self.ast.element(node.child(0)) {
            AstElement::Node(wrapper) => self.token(wrapper.child(0)),
            AstElement::Token(element) => element.token,
        };
        self.complain_if_assigning(&operator, "Unary expression")?;

        let operand = node.child(1);
        self.visit(operand)?;
        if let Some(method) = unary_operator(operator.kind) {
            self.emit_call(0, method)?;
        }
        // prefix ++/-- stores the result back and leaves it as the value
        if matches!(operator.kind, TokenKind::Increment | TokenKind::Decrement) {
            self.assign = true;
            self.visit(operand)?;
            self.assign = false;
        }
        Ok(())
    }

    pub(super) fn visit_postfix(&mut self, node: &AstNode) -> CResult<()> {
        let receiver = node.child(0);
        if node.children == 1 {
            return self.visit(receiver);
        }
        let assign = self.assign;
        self.assign = false;
        let operator = self.token(node.child(1));

        match operator.kind {
            TokenKind::Increment | TokenKind::Decrement => {
                if assign {
                    return Err(self.not_an_lvalue(&operator, "Increment/decrement"));
                }
                // the old value stays below as the expression's result
                self.visit(receiver)?;
                self.visit(receiver)?;
                let method = unary_operator(operator.kind).expect("increment operators have methods");
                self.emit_call(0, method)?;
                self.assign = true;
                self.visit(receiver)?;
                self.assign = false;
                self.emit(Opcode::Pop);
            }
            TokenKind::Dot if node.children == 3 => {
                self.visit(receiver)?;
                let name = self.token(node.child(2));
                self.emit_string_constant(self.text(&name))?;
                self.accessor_call(TokenKind::Dot, assign)?;
            }
            TokenKind::OpenBracket => {
                self.visit(receiver)?;
                self.visit(node.child(2))?;
                self.accessor_call(TokenKind::OpenBracket, assign)?;
            }
            TokenKind::Dot => {
                if assign {
                    return Err(self.not_an_lvalue(&operator, "Function call"));
                }
                self.visit(receiver)?;
                let name = self.token(node.child(2));
                let arity = self.visit_arguments(node.child(node.children - 2), &name)?;
                let signature = Signature::new(self.text(&name), arity).to_string();
                if self.is_super(receiver) {
                    self.emit_super_call(arity, &signature, &name)?;
                } else {
                    self.emit_call(arity, &signature)?;
                }
            }
            _ => {
                if assign {
                    return Err(self.not_an_lvalue(&operator, "Function call"));
                }
                self.visit(receiver)?;
                let arity = self.visit_arguments(node.child(2), &operator)?;
                self.emit_u8(Opcode::IndirectCall, arity);
            }
        }
        self.assign = assign;
        Ok(())
    }

    /// Calls the getter or setter for `.name` or `[index]`; receiver and key
    /// are already on the stack.
    ///
    /// A setter receives the assigned value, which sits just below them.
    fn accessor_call(&mut self, kind: TokenKind, assign: bool) -> CResult<()> {
        let method = binary_operator(kind, assign).expect("accessors have methods");
        if !assign {
            return self.emit_call(1, method);
        }
        let value_slot = usize::try_from(self.builder().stack_slots() - 3)
            .map_err(|_| self.error_here(CompileErrorKind::NotAnLvalue, "Nothing to assign"))?;
        self.load_local(value_slot)?;
        self.emit_call(2, method)?;
        self.emit(Opcode::Pop);
        Ok(())
    }

    /// Compiles call arguments, returning how many there are.
    fn visit_arguments(&mut self, list: NodeId, at: &Token) -> CResult<u8> {
        let arguments = list_items(self.ast, list);
        let Ok(arity) = u8::try_from(arguments.len()) else {
            return Err(self.error_at(at, CompileErrorKind::LimitExceeded, "Too many arguments"));
        };
        for argument in arguments {
            self.visit(argument)?;
        }
        Ok(arity)
    }

    /// True when `receiver` is a bare `super`.
    fn is_super(&self, receiver: NodeId) -> bool {
        let postfix = self.ast.node(receiver);
        if postfix.children != 1 {
            return false;
        }
        let primary = self.ast.node(postfix.child(0));
        primary.children == 1 && self.ast.element(primary.child(0)).is_token(TokenKind::Super)
    }

    /// Dispatches to the superclass of the enclosing class.
    fn emit_super_call(&mut self, arity: u8, signature: &str, at: &Token) -> CResult<()> {
        let Some((_, class)) = self.enclosing_class() else {
            return Err(self.error_at(
                at,
                CompileErrorKind::ThisOutsideMethod,
                "Cannot use 'super' outside of a class method",
            ));
        };
        let class_name = self.classes[class].name;
        let symbol = self.string_symbol(signature)?;
        let class_symbol = self.string_symbol(class_name)?;
        self.builder().emit_super_call(arity, symbol, class_symbol);
        Ok(())
    }

    pub(super) fn visit_primary(&mut self, node: &AstNode) -> CResult<()> {
        let token = match *self.ast.element(node.child(0)) {
            AstElement::Token(element) => element.token,
            AstElement::Node(inner) => {
                if self.assign {
                    return Err(self.error_here(
                        CompileErrorKind::NotAnLvalue,
                        "Cannot assign to a constant, it is not an lvalue",
                    ));
                }
                return match inner.kind {
                    NodeKind::StringLiteralList => self.visit_string_literals(node.child(0)),
                    _ => self.visit(node.child(0)),
                };
            }
        };

        if token.kind == TokenKind::OpenParentheses {
            if self.assign {
                return Err(self.not_an_lvalue(&token, "Parenthesized expression"));
            }
            return self.visit(node.child(1));
        }
        if token.kind == TokenKind::Identifier {
            return self.compile_identifier(&token, self.assign);
        }
        if self.assign {
            return Err(self.error_at(
                &token,
                CompileErrorKind::NotAnLvalue,
                "Cannot assign to a constant, it is not an lvalue",
            ));
        }

        match token.kind {
            TokenKind::Constant | TokenKind::HexConstant | TokenKind::BinaryConstant => {
                let value =
                    parse_integer(self.text(&token)).map_err(|msg| self.error_at(&token, CompileErrorKind::Lex, &msg))?;
                self.emit_integer(value)
            }
            TokenKind::True => {
                self.emit(Opcode::Literal1);
                Ok(())
            }
            TokenKind::False => {
                self.emit(Opcode::Literal0);
                Ok(())
            }
            TokenKind::Null => {
                self.emit(Opcode::Null);
                Ok(())
            }
            TokenKind::This | TokenKind::Super => self.load_this(&token),
            _ => Err(self.error_at(&token, CompileErrorKind::Syntax, "Unexpected token in expression")),
        }
    }

    /// Adjacent string literals concatenate into one constant.
    fn visit_string_literals(&mut self, list: NodeId) -> CResult<()> {
        let mut value = String::new();
        for item in list_items(self.ast, list) {
            let token = self.token(item);
            decode_string(self.text(&token), &mut value)
                .map_err(|msg| self.error_at(&token, CompileErrorKind::Lex, &msg))?;
        }
        self.emit_string_constant(&value)
    }

    /// `[a, b]` builds a fresh `List` and appends each element in order.
    pub(super) fn visit_list(&mut self, node: &AstNode) -> CResult<()> {
        self.load_core("List")?;
        self.emit_u8(Opcode::IndirectCall, 0);
        if node.children > 2 {
            for element in list_items(self.ast, node.child(1)) {
                self.visit(element)?;
                self.emit_call(1, "_addElement@1")?;
            }
        }
        Ok(())
    }

    /// `{k: v}` builds a fresh `Dict` and adds each entry in order.
    pub(super) fn visit_dict(&mut self, node: &AstNode) -> CResult<()> {
        self.load_core("Dict")?;
        self.emit_u8(Opcode::IndirectCall, 0);
        if node.children > 2 {
            for entry in list_items(self.ast, node.child(1)) {
                self.visit(entry)?;
                self.emit_call(2, "_addEntry@2")?;
            }
        }
        Ok(())
    }

    fn complain_if_assigning(&self, token: &Token, what: &str) -> CResult<()> {
        if self.assign {
            return Err(self.not_an_lvalue(token, what));
        }
        Ok(())
    }

    fn not_an_lvalue(&self, token: &Token, what: &str) -> CompileError {
        self.error_at(token, CompileErrorKind::NotAnLvalue, &format!("{what} is not an lvalue"))
    }
}
