//! Scopes, locals, upvalues and module variables.
//!
//! Names resolve innermost first: locals of the current function, then
//! upvalues captured from enclosing functions, then fields of the enclosing
//! class, then module variables.

use super::{CResult, Compiler, Local, MAX_LOCALS, MAX_MODULE_VARIABLES, MAX_UPVALUES, UpvalueRef, Variable};
use crate::{
    bytecode::Opcode,
    error::{CompileErrorKind, MAX_NAME},
    lexer::Token,
    resource::ResourceTracker,
    tracer::CompileTracer,
    value::Value,
};

impl<'a, T: ResourceTracker, Tr: CompileTracer> Compiler<'a, '_, T, Tr> {
    /// Operand for a module variable slot.
    fn module_operand(&self, index: usize) -> CResult<u16> {
        u16::try_from(index).map_err(|_| self.error_here(CompileErrorKind::LimitExceeded, "Too many module variables"))
    }

    pub(super) fn push_scope(&mut self) {
        self.fs_mut().scope_depth += 1;
    }

    /// Leaves the innermost scope, discarding its locals.
    pub(super) fn pop_scope(&mut self) {
        let state = self.fs_mut();
        while let Some(local) = state.locals.last().copied()
            && local.depth >= state.scope_depth
        {
            state
                .builder
                .emit(if local.is_upvalue { Opcode::CloseUpvalue } else { Opcode::Pop });
            state.locals.pop();
        }
        state.scope_depth -= 1;
    }

    /// Emits the pops for every local deeper than `depth` without forgetting
    /// them, for jumps that leave scopes early.
    pub(super) fn discard_locals(&mut self, depth: i32) {
        let state = self.fs_mut();
        for local in state.locals.iter().rev().take_while(|local| local.depth > depth) {
            state
                .builder
                .emit(if local.is_upvalue { Opcode::CloseUpvalue } else { Opcode::Pop });
        }
    }

    /// Declares the variable named by `token` in the current scope.
    ///
    /// Outside any block this is a module variable, otherwise a local whose
    /// slot is the next free stack slot.
    pub(super) fn declare_variable(&mut self, token: &Token) -> CResult<Variable> {
        let name = self.text(token);
        if name.len() > MAX_NAME {
            return Err(self.error_at(token, CompileErrorKind::LimitExceeded, "Name too long"));
        }

        if self.fs().scope_depth == -1 {
            if self.module.find_variable(name).is_some() {
                return Err(self.error_at(token, CompileErrorKind::Duplicate, "Module variable is already defined"));
            }
            if self.module.variable_count() >= MAX_MODULE_VARIABLES {
                return Err(self.error_at(token, CompileErrorKind::LimitExceeded, "Too many module variables"));
            }
            return Ok(Variable::Module(self.module.add_variable(name, Value::Undefined)));
        }

        let state = self.fs();
        let duplicate = state
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth >= state.scope_depth)
            .any(|local| local.name == name);
        if duplicate {
            return Err(self.error_at(token, CompileErrorKind::Duplicate, "Variable is already defined in this scope"));
        }
        if state.locals.len() >= MAX_LOCALS {
            return Err(self.error_at(token, CompileErrorKind::LimitExceeded, "Too many locals"));
        }
        Ok(Variable::Local(self.push_local(name)))
    }

    /// Adds a compiler-internal local without a duplicate check.
    ///
    /// Hidden names end in a space so they never collide with identifiers.
    pub(super) fn add_local(&mut self, name: &'a str) -> CResult<usize> {
        if self.fs().locals.len() >= MAX_LOCALS {
            return Err(self.error_here(CompileErrorKind::LimitExceeded, "Too many locals"));
        }
        Ok(self.push_local(name))
    }

    fn push_local(&mut self, name: &'a str) -> usize {
        let state = self.fs_mut();
        state.locals.push(Local {
            name,
            depth: state.scope_depth,
            is_upvalue: false,
        });
        state.locals.len() - 1
    }

    /// Completes a declaration once its value is on top of the stack.
    ///
    /// Locals need nothing: the value already sits in the local's slot.
    pub(super) fn define_variable(&mut self, variable: Variable) -> CResult<()> {
        if let Variable::Module(index) = variable {
            let operand = self.module_operand(index)?;
            self.emit_u16(Opcode::StoreModuleVariable, operand);
            self.emit(Opcode::Pop);
        }
        Ok(())
    }

    pub(super) fn load_variable(&mut self, variable: Variable) -> CResult<()> {
        match variable {
            Variable::Local(slot) => self.load_local(slot)?,
            Variable::Upvalue(index) => self.emit_u8(Opcode::LoadUpvalue, index),
            Variable::Module(index) => {
                let operand = self.module_operand(index)?;
                self.emit_u16(Opcode::LoadModuleVariable, operand);
            }
        }
        Ok(())
    }

    pub(super) fn store_variable(&mut self, variable: Variable) -> CResult<()> {
        match variable {
            Variable::Local(slot) => self.store_local(slot)?,
            Variable::Upvalue(index) => self.emit_u8(Opcode::StoreUpvalue, index),
            Variable::Module(index) => {
                let operand = self.module_operand(index)?;
                self.emit_u16(Opcode::StoreModuleVariable, operand);
            }
        }
        Ok(())
    }

    pub(super) fn load_local(&mut self, slot: usize) -> CResult<()> {
        if slot <= 8 {
            let op = Opcode::from_repr(Opcode::LoadLocal0 as u8 + slot as u8).expect("LoadLocalN opcodes are contiguous");
            self.emit(op);
        } else {
            let operand = self.local_operand(slot)?;
            self.emit_u8(Opcode::LoadLocal, operand);
        }
        Ok(())
    }

    pub(super) fn store_local(&mut self, slot: usize) -> CResult<()> {
        let operand = self.local_operand(slot)?;
        self.emit_u8(Opcode::StoreLocal, operand);
        Ok(())
    }

    fn local_operand(&self, slot: usize) -> CResult<u8> {
        u8::try_from(slot).map_err(|_| self.error_here(CompileErrorKind::LimitExceeded, "Too many locals"))
    }

    /// Loads a variable the core module seeds every module with.
    pub(super) fn load_core(&mut self, name: &str) -> CResult<()> {
        let Some(index) = self.module.find_variable(name) else {
            let message = format!("Core variable '{name}' is not defined");
            return Err(self.error_here(CompileErrorKind::UndefinedVariable, &message));
        };
        let operand = self.module_operand(index)?;
        self.emit_u16(Opcode::LoadModuleVariable, operand);
        Ok(())
    }

    /// Loads the receiver of the enclosing method.
    pub(super) fn load_this(&mut self, token: &Token) -> CResult<()> {
        match self.resolve_nonglobal("this", token)? {
            Some(variable) => self.load_variable(variable),
            None => Err(self.error_at(
                token,
                CompileErrorKind::ThisOutsideMethod,
                "Cannot use 'this' outside of a class method",
            )),
        }
    }

    /// Resolves `name` as a local or upvalue of the current function.
    pub(super) fn resolve_nonglobal(&mut self, name: &str, token: &Token) -> CResult<Option<Variable>> {
        let current = self.functions.len() - 1;
        if let Some(slot) = self.resolve_local(current, name) {
            return Ok(Some(Variable::Local(slot)));
        }
        Ok(self.resolve_upvalue(current, name, token)?.map(Variable::Upvalue))
    }

    fn resolve_local(&self, function: usize, name: &str) -> Option<usize> {
        self.functions[function]
            .locals
            .iter()
            .rposition(|local| local.name == name)
    }

    /// Finds `name` in the functions enclosing `function`, threading an
    /// upvalue through every function in between.
    fn resolve_upvalue(&mut self, function: usize, name: &str, token: &Token) -> CResult<Option<u8>> {
        if function == 0 {
            return Ok(None);
        }
        let parent = function - 1;
        if let Some(slot) = self.resolve_local(parent, name) {
            self.functions[parent].locals[slot].is_upvalue = true;
            return self.add_upvalue(function, true, slot, token).map(Some);
        }
        if let Some(index) = self.resolve_upvalue(parent, name, token)? {
            return self.add_upvalue(function, false, usize::from(index), token).map(Some);
        }
        Ok(None)
    }

    fn add_upvalue(&mut self, function: usize, is_local: bool, index: usize, token: &Token) -> CResult<u8> {
        let too_many = |compiler: &Self| compiler.error_at(token, CompileErrorKind::LimitExceeded, "Too many upvalues");
        let upvalue = UpvalueRef {
            is_local,
            index: u8::try_from(index).map_err(|_| too_many(self))?,
        };
        let upvalues = &self.functions[function].upvalues;
        let position = match upvalues.iter().position(|existing| *existing == upvalue) {
            Some(position) => position,
            None if upvalues.len() >= MAX_UPVALUES => return Err(too_many(self)),
            None => {
                self.functions[function].upvalues.push(upvalue);
                self.functions[function].upvalues.len() - 1
            }
        };
        u8::try_from(position).map_err(|_| too_many(self))
    }

    /// The class body enclosing the current function, as `(owner, class)`
    /// where `owner` indexes the function compiling the class body.
    pub(super) fn enclosing_class(&self) -> Option<(usize, usize)> {
        self.functions
            .iter()
            .enumerate()
            .rev()
            .find_map(|(index, state)| state.enclosing_class.map(|class| (index, class)))
    }

    /// Loads or stores the identifier `token`.
    pub(super) fn compile_identifier(&mut self, token: &Token, store: bool) -> CResult<()> {
        let name = self.text(token);
        if let Some(variable) = self.resolve_nonglobal(name, token)? {
            return self.access(variable, store);
        }

        if let Some((owner, class)) = self.enclosing_class()
            && !self.classes[class].in_static
            && let Some(field) = self.classes[class].fields.find(name)
        {
            let field = u8::try_from(field.index())
                .map_err(|_| self.error_at(token, CompileErrorKind::LimitExceeded, "Too many fields"))?;
            // a method sits directly above the function compiling its class
            if owner + 2 == self.functions.len() {
                self.emit_u8(if store { Opcode::StoreFieldThis } else { Opcode::LoadFieldThis }, field);
            } else {
                self.load_this(token)?;
                self.emit_u8(if store { Opcode::StoreField } else { Opcode::LoadField }, field);
            }
            return Ok(());
        }

        if let Some(index) = self.module.find_variable(name) {
            return self.access(Variable::Module(index), store);
        }
        Err(self.error_at(token, CompileErrorKind::UndefinedVariable, "Undefined variable"))
    }

    fn access(&mut self, variable: Variable, store: bool) -> CResult<()> {
        if store {
            self.store_variable(variable)
        } else {
            self.load_variable(variable)
        }
    }
}
