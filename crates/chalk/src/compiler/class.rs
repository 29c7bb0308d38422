//! Classes, methods and function literals.
//!
//! A class body is compiled in two passes. Instance fields are collected
//! first so every method can see every field regardless of order; static
//! variables and methods are then compiled in source order.

use super::{
    CResult, ClassState, Compiler, Declaration, MAX_FIELDS, MAX_FUNCTION_DEPTH, Variable, list_items,
    signature::Signature,
};
use crate::{
    ast::{AstNode, NodeId, NodeKind},
    bytecode::Opcode,
    error::{CompileErrorKind, MAX_NAME},
    intern::StringTable,
    lexer::Token,
    resource::ResourceTracker,
    tracer::CompileTracer,
};

/// What a function header declares, shared by definitions and declarations.
struct FunctionHeader {
    name: Token,
    is_static: bool,
    /// Index into `Compiler::classes` for methods.
    class: Option<usize>,
    parameters: Vec<NodeId>,
    arity: u8,
    signature: String,
    symbol: u16,
}

/// Where a compiled function's closure ends up.
enum FunctionTarget {
    /// Bound into the class below it on the stack.
    Method,
    /// A variable declared for this definition.
    Fresh(Variable),
    /// The variable of an earlier forward declaration.
    Declared(Variable),
}

impl<T: ResourceTracker, Tr: CompileTracer> Compiler<'_, '_, T, Tr> {
    pub(super) fn visit_class_definition(&mut self, node: &AstNode) -> CResult<()> {
        let name = self.token(node.child(1));
        let class_name = self.text(&name);
        let variable = self.declare_variable(&name)?;

        self.emit_string_constant(class_name)?;
        if node.children == 5 {
            self.visit(node.child(3))?;
        } else {
            self.load_core("Object")?;
        }
        // the field count is known only once the body has been compiled
        self.emit_u8(Opcode::Class, 0xFF);
        let field_count_at = self.builder().current_offset() - 1;
        self.define_variable(variable)?;

        self.push_scope();
        let class = self.classes.len();
        self.classes.push(ClassState {
            name: class_name,
            fields: StringTable::new(),
            methods: Vec::new(),
            static_methods: Vec::new(),
            in_static: false,
            variable,
        });
        let outer = self.fs_mut().enclosing_class.replace(class);
        let body = self.compile_class_body(node.last_child());
        self.fs_mut().enclosing_class = outer;
        let field_count = self.classes.pop().map_or(0, |state| state.fields.len());
        body?;

        let field_count = u8::try_from(field_count)
            .map_err(|_| self.error_at(&name, CompileErrorKind::LimitExceeded, "Too many fields"))?;
        self.builder().patch_u8(field_count_at, field_count);
        self.pop_scope();
        Ok(())
    }

    fn compile_class_body(&mut self, body: NodeId) -> CResult<()> {
        let body = *self.ast.node(body);
        if body.children < 3 {
            return Ok(());
        }
        let members: Vec<AstNode> = list_items(self.ast, body.child(1))
            .into_iter()
            .map(|member| *self.ast.node(self.ast.node(member).child(0)))
            .collect();

        for member in members.iter().filter(|m| m.kind == NodeKind::VariableDefinition) {
            self.declare_field(member)?;
        }

        for member in &members {
            self.builder().set_line(member.line);
            match member.kind {
                NodeKind::VariableDefinition => self.compile_static_variable(member)?,
                NodeKind::FunctionDefinition => self.visit_function_definition(member)?,
                NodeKind::FunctionDeclaration => self.visit_function_declaration(member)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn declare_field(&mut self, node: &AstNode) -> CResult<()> {
        let parts = self.variable_parts(node);
        if parts.is_static {
            return Ok(());
        }
        if parts.initializer.is_some() {
            return Err(self.error_at(&parts.name, CompileErrorKind::Misuse, "Fields cannot have initializers"));
        }
        let name = self.text(&parts.name);
        if name.len() > MAX_NAME {
            return Err(self.error_at(&parts.name, CompileErrorKind::LimitExceeded, "Name too long"));
        }
        let fields = &self.classes.last().expect("class being compiled").fields;
        if fields.find(name).is_some() {
            return Err(self.error_at(&parts.name, CompileErrorKind::Duplicate, "Field already declared"));
        }
        if fields.len() >= MAX_FIELDS {
            return Err(self.error_at(&parts.name, CompileErrorKind::LimitExceeded, "Too many fields"));
        }
        self.classes
            .last_mut()
            .expect("class being compiled")
            .fields
            .ensure(name);
        Ok(())
    }

    /// A `static var` lives as a local of the class body's scope.
    fn compile_static_variable(&mut self, node: &AstNode) -> CResult<()> {
        let parts = self.variable_parts(node);
        if !parts.is_static {
            return Ok(());
        }
        self.classes.last_mut().expect("class being compiled").in_static = true;
        self.define_initialized(&parts)
    }

    // === Functions ===

    fn function_header(&mut self, node: &AstNode) -> CResult<FunctionHeader> {
        let is_static = node.children == 7;
        let offset = u32::from(is_static);
        let name = self.token(node.child(offset + 1));
        let text = self.text(&name);
        if text.len() > MAX_NAME {
            return Err(self.error_at(&name, CompileErrorKind::LimitExceeded, "Name too long"));
        }

        let class = self.fs().enclosing_class;
        match class {
            Some(class) => self.classes[class].in_static = is_static,
            None if is_static => {
                return Err(self.error_at(&name, CompileErrorKind::Misuse, "Only class methods can be static"));
            }
            None => {}
        }

        let parameters = list_items(self.ast, node.child(offset + 3));
        let Ok(arity) = u8::try_from(parameters.len()) else {
            return Err(self.error_at(&name, CompileErrorKind::LimitExceeded, "Too many arguments"));
        };
        let signature = Signature::new(text, arity).to_string();
        let symbol = self.string_symbol(&signature)?;
        Ok(FunctionHeader {
            name,
            is_static,
            class,
            parameters,
            arity,
            signature,
            symbol,
        })
    }

    pub(super) fn visit_function_definition(&mut self, node: &AstNode) -> CResult<()> {
        let header = self.function_header(node)?;
        if self.functions.len() > MAX_FUNCTION_DEPTH {
            return Err(self.error_at(
                &header.name,
                CompileErrorKind::LimitExceeded,
                "Functions nested too deeply",
            ));
        }
        let target = self.declare_function(&header)?;

        self.begin_function(node.line, header.arity, header.class.is_some());
        for &parameter in &header.parameters {
            let parameter = self.token(parameter);
            self.declare_variable(&parameter)?;
        }
        self.visit(node.last_child())?;

        // a trailing return that no jump skips past makes the implicit one dead
        let builder = self.builder();
        let offset = builder.current_offset();
        if builder.last_op() != Some(Opcode::Return) || builder.is_jump_target(offset) {
            builder.emit(Opcode::Null);
            builder.emit(Opcode::Return);
        }
        self.end_function(self.text(&header.name))?;
        self.define_function(&header, target)
    }

    /// `function f(a);` reserves `f` so code before its definition can call it.
    pub(super) fn visit_function_declaration(&mut self, node: &AstNode) -> CResult<()> {
        let header = self.function_header(node)?;
        if header.class.is_some() {
            return Err(self.error_at(
                &header.name,
                CompileErrorKind::Misuse,
                "Methods cannot be forward declared",
            ));
        }
        let variable = self.declare_variable(&header.name)?;
        if let Variable::Local(_) = variable {
            self.emit(Opcode::Null);
        }
        let state = self.fs_mut();
        state.declarations.push(Declaration {
            signature: header.symbol,
            scope_depth: state.scope_depth,
            variable,
        });
        Ok(())
    }

    /// Reserves the name of a function about to be compiled.
    ///
    /// For a method this loads the class, which the closure is bound into
    /// once compiled.
    fn declare_function(&mut self, header: &FunctionHeader) -> CResult<FunctionTarget> {
        if let Some(class) = header.class {
            let state = &self.classes[class];
            let (existing, kind) = if header.is_static {
                (&state.static_methods, "static method")
            } else {
                (&state.methods, "method")
            };
            if existing.contains(&header.symbol) {
                let message = format!("Class {} already defines {kind} {}", state.name, header.signature);
                return Err(self.error_at(&header.name, CompileErrorKind::DuplicateMethod, &message));
            }
            let state = &mut self.classes[class];
            if header.is_static {
                state.static_methods.push(header.symbol);
            } else {
                state.methods.push(header.symbol);
            }
            let class_variable = state.variable;
            self.load_variable(class_variable)?;
            return Ok(FunctionTarget::Method);
        }

        let state = self.fs();
        let scope_depth = state.scope_depth;
        let declared = state
            .declarations
            .iter()
            .position(|d| d.signature == header.symbol && d.scope_depth == scope_depth);
        if let Some(position) = declared {
            let declaration = self.fs_mut().declarations.remove(position);
            return Ok(FunctionTarget::Declared(declaration.variable));
        }
        Ok(FunctionTarget::Fresh(self.declare_variable(&header.name)?))
    }

    /// Binds the closure on top of the stack to its target.
    fn define_function(&mut self, header: &FunctionHeader, target: FunctionTarget) -> CResult<()> {
        match target {
            FunctionTarget::Method => {
                let op = if header.is_static { Opcode::StaticMethod } else { Opcode::Method };
                self.emit_u16(op, header.symbol);
            }
            FunctionTarget::Declared(Variable::Local(slot)) => {
                self.store_local(slot)?;
                self.emit(Opcode::Pop);
            }
            FunctionTarget::Fresh(variable) | FunctionTarget::Declared(variable) => self.define_variable(variable)?,
        }
        Ok(())
    }
}
