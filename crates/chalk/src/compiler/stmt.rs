//! Statements: blocks, variables, control flow and imports.

use super::{CResult, Compiler, LoopContext, list_items};
use crate::{
    ast::{AstNode, NodeId, NodeKind},
    bytecode::{JumpLabel, Opcode},
    error::CompileErrorKind,
    lexer::{Token, TokenKind},
    resource::ResourceTracker,
    tracer::CompileTracer,
};

/// The pieces of a `[static] var name [= value];` definition.
pub(super) struct VariableParts {
    pub is_static: bool,
    pub name: Token,
    pub initializer: Option<NodeId>,
}

impl<T: ResourceTracker, Tr: CompileTracer> Compiler<'_, '_, T, Tr> {
    pub(super) fn visit_compound(&mut self, node: &AstNode) -> CResult<()> {
        self.push_scope();
        if node.children == 3 {
            self.visit(node.child(1))?;
        }
        self.pop_scope();
        Ok(())
    }

    pub(super) fn visit_expression_statement(&mut self, node: &AstNode) -> CResult<()> {
        if node.children == 1 {
            return Ok(());
        }
        // echoing only applies to a module's own statements
        let echo = self.env.flags.print_expressions && self.functions.len() == 1;
        if echo {
            self.load_core("Core")?;
        }
        self.visit(node.child(0))?;
        if echo {
            self.emit_call(1, "repr@1")?;
        }
        self.emit(Opcode::Pop);
        Ok(())
    }

    pub(super) fn variable_parts(&self, node: &AstNode) -> VariableParts {
        let (specifier, initializer) = if node.children == 4 {
            (node.child(0), Some(node.child(2)))
        } else {
            (self.ast.node(node.child(0)).child(0), None)
        };
        let specifier = self.ast.node(specifier);
        VariableParts {
            is_static: specifier.children == 3,
            name: self.token(specifier.last_child()),
            initializer,
        }
    }

    pub(super) fn visit_variable_definition(&mut self, node: &AstNode) -> CResult<()> {
        let parts = self.variable_parts(node);
        if parts.is_static {
            return Err(self.error_at(&parts.name, CompileErrorKind::Misuse, "Only fields can be marked static"));
        }
        self.define_initialized(&parts)
    }

    /// Evaluates the initializer (or `null`) and binds it to the new variable.
    pub(super) fn define_initialized(&mut self, parts: &VariableParts) -> CResult<()> {
        match parts.initializer {
            Some(value) => self.visit(value)?,
            None => self.emit(Opcode::Null),
        }
        let variable = self.declare_variable(&parts.name)?;
        self.define_variable(variable)?;
        Ok(())
    }

    pub(super) fn visit_selection(&mut self, node: &AstNode) -> CResult<()> {
        self.visit(node.child(2))?;
        let otherwise = self.emit_jump(Opcode::JumpIf);
        self.visit(node.child(4))?;
        if node.children == 7 {
            let end = self.emit_jump(Opcode::Jump);
            self.patch_jump(otherwise)?;
            self.visit(node.child(6))?;
            self.patch_jump(end)
        } else {
            self.patch_jump(otherwise)
        }
    }

    // === Loops ===

    pub(super) fn visit_iteration(&mut self, node: &AstNode) -> CResult<()> {
        match self.token(node.child(0)).kind {
            TokenKind::While => self.compile_while(node),
            TokenKind::Do => self.compile_do_while(node),
            _ if self.ast.element(node.child(3)).is_token(TokenKind::In) => self.compile_for_in(node),
            _ => self.compile_for(node),
        }
    }

    /// Marks the start of a loop body. `continue` jumps back to `start`.
    fn begin_loop_body(&mut self, start: usize) {
        let state = self.fs_mut();
        let body = state.builder.current_offset();
        state.loops.push(LoopContext {
            start,
            body,
            scope_depth: state.scope_depth,
            open_tries: 0,
        });
    }

    /// Closes the innermost loop: back edge, exit jump and pending breaks.
    fn end_loop(&mut self, exit: JumpLabel) -> CResult<()> {
        let context = self.fs_mut().loops.pop().expect("loop being compiled");
        self.emit_loop(context.start)?;
        self.patch_jump(exit)?;
        self.builder()
            .patch_breaks(context.body)
            .map_err(|err| self.emit_failure(err))
    }

    fn compile_while(&mut self, node: &AstNode) -> CResult<()> {
        let start = self.builder().current_offset();
        self.visit(node.child(2))?;
        let exit = self.emit_jump(Opcode::JumpIf);
        self.begin_loop_body(start);
        self.visit(node.child(4))?;
        self.end_loop(exit)
    }

    fn compile_do_while(&mut self, node: &AstNode) -> CResult<()> {
        // the first pass enters the body without testing
        let enter = self.emit_jump(Opcode::Jump);
        let start = self.builder().current_offset();
        self.visit(node.child(4))?;
        let exit = self.emit_jump(Opcode::JumpIf);
        self.patch_jump(enter)?;
        self.begin_loop_body(start);
        self.visit(node.child(1))?;
        self.end_loop(exit)
    }

    /// `for (init; condition; step) body`. `continue` goes straight back to
    /// the condition.
    fn compile_for(&mut self, node: &AstNode) -> CResult<()> {
        self.push_scope();
        self.visit(node.child(2))?;
        let start = self.builder().current_offset();
        self.visit(node.child(3))?;
        let exit = self.emit_jump(Opcode::JumpIf);
        self.begin_loop_body(start);
        self.visit(node.last_child())?;
        if node.children == 8 {
            self.visit(node.child(5))?;
            self.emit(Opcode::Pop);
        }
        self.end_loop(exit)?;
        self.pop_scope();
        Ok(())
    }

    /// `for (name in sequence) body`, driven by the sequence's `iterate` and
    /// `iteratorValue` methods. Iteration ends when `iterate` returns null.
    fn compile_for_in(&mut self, node: &AstNode) -> CResult<()> {
        self.push_scope();
        self.visit(node.child(4))?;
        let sequence = self.add_local("seq ")?;
        self.emit(Opcode::Null);
        let iterator = self.add_local("iter ")?;

        let start = self.builder().current_offset();
        // `null != iterator` once advanced
        self.emit(Opcode::Null);
        self.load_local(sequence)?;
        self.load_local(iterator)?;
        self.emit_call(1, "iterate@1")?;
        self.store_local(iterator)?;
        self.emit_call(1, "__ne@1")?;
        let exit = self.emit_jump(Opcode::JumpIf);

        self.begin_loop_body(start);
        self.load_local(sequence)?;
        self.load_local(iterator)?;
        self.emit_call(1, "iteratorValue@1")?;
        self.push_scope();
        let name = self.token(node.child(2));
        self.declare_variable(&name)?;
        self.visit(node.child(6))?;
        self.pop_scope();
        self.end_loop(exit)?;
        self.pop_scope();
        Ok(())
    }

    pub(super) fn visit_jump(&mut self, node: &AstNode) -> CResult<()> {
        let keyword = self.token(node.child(0));
        if keyword.kind == TokenKind::Return {
            if node.children == 3 {
                self.visit(node.child(1))?;
            } else {
                self.emit(Opcode::Null);
            }
            self.emit(Opcode::Return);
            return Ok(());
        }

        let Some(context) = self.fs().loops.last().copied() else {
            let word = if keyword.kind == TokenKind::Break { "break" } else { "continue" };
            let message = format!("Cannot use '{word}' outside of a loop");
            return Err(self.error_at(&keyword, CompileErrorKind::Misuse, &message));
        };
        // locals stay declared; only the code leaving the loop drops them
        self.with_stack_restored(|compiler| {
            for _ in 0..context.open_tries {
                compiler.emit(Opcode::PopTry);
            }
            compiler.discard_locals(context.scope_depth);
            if keyword.kind == TokenKind::Break {
                // patched into a Jump to the loop exit by end_loop
                let _placeholder = compiler.emit_jump(Opcode::End);
                Ok(())
            } else {
                compiler.emit_loop(context.start)
            }
        })
    }

    // === Exceptions ===

    /// `try {..} except E [as e] {..}... [else {..}] [finally {..}]`.
    ///
    /// The body runs under a `Try` whose operand points at the handler. On
    /// success it falls through into `else` and `finally`, then jumps past the
    /// handler. The handler starts with the raised exception on the stack as
    /// a hidden local; each clause that matches runs and loops back to the
    /// `finally` code, and an exception no clause matches is raised again.
    pub(super) fn visit_try(&mut self, node: &AstNode) -> CResult<()> {
        let handler = self.emit_jump(Opcode::Try);
        self.count_open_try(1);
        self.visit(node.child(1))?;
        self.count_open_try(-1);
        self.emit(Opcode::PopTry);

        let ending = *self.ast.node(node.child(3));
        let mut finally = None;
        if ending.children > 0 {
            if self.ast.element(ending.child(0)).is_token(TokenKind::Else) {
                self.visit(ending.child(1))?;
                if ending.children == 4 {
                    finally = Some(ending.child(3));
                }
            } else {
                finally = Some(ending.child(1));
            }
        }
        // with no finally block this is the jump past the handler
        let finally_start = self.builder().current_offset();
        if let Some(finally) = finally {
            self.visit(finally)?;
        }
        let end = self.emit_jump(Opcode::Jump);

        self.patch_jump(handler)?;
        self.push_scope();
        self.builder().adjust_stack(1);
        let exception = self.add_local("exception ")?;
        let outer = self.fs_mut().finally.replace(finally_start);
        let clauses = self.visit(node.child(2));
        self.fs_mut().finally = outer;
        clauses?;

        self.load_core("Core")?;
        self.load_local(exception)?;
        self.emit_call(1, "raise@1")?;
        // never reached at run time, but keeps the tracked depth in step
        self.emit(Opcode::Pop);
        self.pop_scope();
        self.patch_jump(end)
    }

    /// One `except` clause, tested against the hidden exception local that
    /// `visit_try` declared last.
    pub(super) fn visit_except(&mut self, node: &AstNode) -> CResult<()> {
        let exception = self.fs().locals.len() - 1;
        self.push_scope();
        self.load_local(exception)?;
        self.visit(node.child(1))?;
        self.emit_call(1, "__is@1")?;
        let next = self.emit_jump(Opcode::JumpIf);
        if node.children == 5 {
            let name = self.token(node.child(3));
            self.load_local(exception)?;
            let variable = self.declare_variable(&name)?;
            self.define_variable(variable)?;
        }
        self.visit(node.last_child())?;
        self.pop_scope();

        // the finally code is shared with the success path, which has no
        // exception on the stack, so drop it before going there
        self.with_stack_restored(|compiler| {
            compiler.emit(Opcode::Pop);
            match compiler.fs().finally {
                Some(finally) => compiler.emit_loop(finally),
                None => Ok(()),
            }
        })?;
        self.patch_jump(next)
    }

    /// Tracks `try` blocks open inside the innermost loop.
    fn count_open_try(&mut self, delta: i32) {
        if let Some(context) = self.fs_mut().loops.last_mut() {
            context.open_tries = context.open_tries.saturating_add_signed(delta);
        }
    }

    // === Imports ===

    /// `import a.b;` binds `b`. `from a.b import x, y;` binds `x` and `y`;
    /// `from a.b import *;` copies every symbol of the module.
    pub(super) fn visit_import(&mut self, node: &AstNode) -> CResult<()> {
        let path = list_items(self.ast, node.child(1));
        let dotted = path
            .iter()
            .map(|&id| self.text(&self.token(id)))
            .collect::<Vec<_>>()
            .join(".");
        self.load_core("Core")?;
        self.emit_string_constant(&dotted)?;
        self.emit_call(1, "importModule@1")?;

        if node.children == 3 {
            let last = self.token(*path.last().expect("module names have at least one part"));
            let variable = self.declare_variable(&last)?;
            self.define_variable(variable)?;
            self.load_variable(variable)?;
            self.emit_call(0, "run@0")?;
            self.emit(Opcode::Pop);
            return Ok(());
        }

        let module = self.add_local("_mod ")?;
        self.load_local(module)?;
        self.emit_call(0, "run@0")?;
        self.emit(Opcode::Pop);

        let what = node.child(3);
        if self.ast.element(what).is_node(NodeKind::IdentifierList) {
            for id in list_items(self.ast, what) {
                let name = self.token(id);
                let variable = self.declare_variable(&name)?;
                self.load_local(module)?;
                self.emit_string_constant(self.text(&name))?;
                self.emit_call(1, "__get@1")?;
                self.define_variable(variable)?;
            }
        } else {
            self.load_core("Core")?;
            self.load_local(module)?;
            self.emit_call(1, "importAllSymbols@1")?;
            self.emit(Opcode::Pop);
        }

        // at module scope no block will pop the hidden local
        if self.fs().scope_depth == -1 {
            self.fs_mut().locals.pop();
            self.emit(Opcode::Pop);
        }
        Ok(())
    }
}
