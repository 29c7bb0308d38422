//! AST to bytecode compiler.
//!
//! The compiler keeps a stack of [`FnState`]s: the module's top-level body at
//! the bottom and one entry per function literal being compiled above it. Each
//! state owns a [`CodeBuilder`]. Finishing a function allocates its
//! [`Function`] on the heap and emits a `Closure` for it into the enclosing
//! function's code.
//!
//! Compilation stops at the first error. That error is reported once to the
//! host and the tracer, and no function is produced.
//!
//! # Module Structure
//!
//! - `scope` - locals, upvalues, module variables and name resolution
//! - `expr` - expressions, literals and operator lowering
//! - `stmt` - statements, loops and imports
//! - `class` - class bodies, methods and function literals
//! - `signature` - method signatures and the operator table
//! - `literal` - integer and string literal decoding

mod class;
mod expr;
mod literal;
mod scope;
mod signature;
mod stmt;

pub use signature::{Signature, binary_operator, unary_operator};
use smallvec::SmallVec;

use crate::{
    ast::{Ast, AstElement, AstNode, NodeId, NodeKind},
    bytecode::{CodeBuilder, EmitError, JumpLabel, Opcode, dump_function},
    config::CompileFlags,
    error::{CompileError, CompileErrorKind, render_message},
    heap::{Heap, HeapData, HeapId},
    intern::StringTable,
    io::{Host, Report},
    lexer::Token,
    object::{Function, FunctionDebug, Module, ModuleId},
    parser::{ParseError, ParseErrorKind, parse},
    resource::ResourceTracker,
    stack::with_stack,
    tracer::CompileTracer,
    value::Value,
};

/// Locals per function, the receiver slot included.
pub const MAX_LOCALS: usize = 256;
pub const MAX_UPVALUES: usize = 256;
pub const MAX_ARGUMENTS: usize = 255;
pub const MAX_FIELDS: usize = 255;
pub const MAX_MODULE_VARIABLES: usize = 1 << 16;
/// Function literals nested inside one another, the top level excluded.
pub const MAX_FUNCTION_DEPTH: usize = 64;

/// Debug name of a module's top-level function.
pub const MODULE_FUNCTION_NAME: &str = "(module)";

type CResult<T> = Result<T, CompileError>;

/// Everything outside the module that a compilation touches.
pub struct CompileEnv<'e, T: ResourceTracker, Tr: CompileTracer> {
    pub heap: &'e mut Heap<T>,
    pub tracer: &'e mut Tr,
    pub host: &'e mut dyn Host,
    pub flags: CompileFlags,
    /// Objects the rest of the VM keeps alive while this module compiles.
    pub roots: &'e [HeapId],
}

impl<T: ResourceTracker, Tr: CompileTracer> CompileEnv<'_, T, Tr> {
    fn report(&mut self, err: &CompileError) {
        if self.flags.print_errors {
            self.host
                .error(Report::Compile(err.kind), &err.module, err.line, &err.message);
        }
        self.tracer.on_error(err.kind, err.line);
    }
}

/// Compiles `source` into `module`, returning the module's top-level function.
///
/// Module variables declared by the source are added to `module` as they are
/// encountered; the caller decides what to do with them if compilation fails.
pub fn compile<T: ResourceTracker, Tr: CompileTracer>(
    module: &mut Module,
    module_id: ModuleId,
    source: &str,
    first_line: u32,
    mut env: CompileEnv<'_, T, Tr>,
) -> Result<HeapId, CompileError> {
    env.tracer.on_module_start(&module.name);
    let parsed = match parse(source, first_line) {
        Ok(parsed) => parsed,
        Err(err) => {
            let err = parse_failure(&module.name, source, &err);
            env.report(&err);
            return Err(err);
        }
    };

    let mut compiler = Compiler::new(source, &parsed.ast, module, module_id, env, first_line);
    let result = compiler.compile_unit(parsed.root);
    if let Err(err) = &result {
        compiler.env.report(err);
    }
    result
}

fn parse_failure(module: &str, source: &str, err: &ParseError) -> CompileError {
    let kind = match err.kind {
        ParseErrorKind::Lexical => CompileErrorKind::Lex,
        ParseErrorKind::Syntax => CompileErrorKind::Syntax,
    };
    CompileError::new(
        kind,
        module,
        err.token.line,
        render_message(Some(err.token.text(source)), err.kind.message()),
    )
}

#[derive(Debug, Clone, Copy)]
struct Local<'a> {
    name: &'a str,
    depth: i32,
    /// Captured by a nested function; closed instead of popped at scope exit.
    is_upvalue: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UpvalueRef {
    is_local: bool,
    index: u8,
}

/// Where a resolved name lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variable {
    Local(usize),
    Upvalue(u8),
    Module(usize),
}

#[derive(Debug, Clone, Copy)]
struct LoopContext {
    /// Target of `continue` and of the loop's back edge.
    start: usize,
    /// First body offset; `break` placeholders after it are patched at loop end.
    body: usize,
    scope_depth: i32,
    /// `try` blocks opened inside the loop body and still running; leaving
    /// the loop early pops each of them.
    open_tries: u32,
}

/// A function declared ahead of its definition.
#[derive(Debug, Clone, Copy)]
struct Declaration {
    /// String symbol of the function's signature.
    signature: u16,
    scope_depth: i32,
    variable: Variable,
}

/// Per-function compilation state.
struct FnState<'a> {
    builder: CodeBuilder,
    locals: Vec<Local<'a>>,
    upvalues: SmallVec<[UpvalueRef; 8]>,
    declarations: Vec<Declaration>,
    /// −1 only for a module's top-level code outside any block.
    scope_depth: i32,
    loops: Vec<LoopContext>,
    /// Index into `Compiler::classes` while this function compiles a class body.
    enclosing_class: Option<usize>,
    /// Where an `except` clause of the innermost `try` continues once handled.
    finally: Option<usize>,
    arity: u8,
}

impl<'a> FnState<'a> {
    fn new(builder: CodeBuilder, receiver: &'a str, scope_depth: i32, arity: u8) -> Self {
        Self {
            builder,
            locals: vec![Local {
                name: receiver,
                depth: scope_depth,
                is_upvalue: false,
            }],
            upvalues: SmallVec::new(),
            declarations: Vec::new(),
            scope_depth,
            loops: Vec::new(),
            enclosing_class: None,
            finally: None,
            arity,
        }
    }
}

/// State for the class body currently being compiled.
struct ClassState<'a> {
    name: &'a str,
    fields: StringTable,
    methods: Vec<u16>,
    static_methods: Vec<u16>,
    /// Set while compiling a static member; fields are not visible there.
    in_static: bool,
    variable: Variable,
}

struct Compiler<'a, 'e, T: ResourceTracker, Tr: CompileTracer> {
    source: &'a str,
    ast: &'a Ast,
    module: &'a mut Module,
    module_id: ModuleId,
    env: CompileEnv<'e, T, Tr>,
    first_line: u32,
    functions: Vec<FnState<'a>>,
    classes: Vec<ClassState<'a>>,
    /// Set while compiling the target of an assignment.
    assign: bool,
    /// Heap objects held outside any builder across an allocation.
    working_roots: Vec<HeapId>,
}

impl<'a, 'e, T: ResourceTracker, Tr: CompileTracer> Compiler<'a, 'e, T, Tr> {
    fn new(
        source: &'a str,
        ast: &'a Ast,
        module: &'a mut Module,
        module_id: ModuleId,
        env: CompileEnv<'e, T, Tr>,
        first_line: u32,
    ) -> Self {
        Self {
            source,
            ast,
            module,
            module_id,
            env,
            first_line,
            functions: Vec::new(),
            classes: Vec::new(),
            assign: false,
            working_roots: Vec::new(),
        }
    }

    fn compile_unit(&mut self, root: NodeId) -> CResult<HeapId> {
        self.env.tracer.on_function_start(0);
        let builder = CodeBuilder::new(1, self.first_line);
        self.functions.push(FnState::new(builder, "", -1, 0));
        self.visit(root)?;
        let state = self.functions.pop().expect("top-level function state");
        self.finish_function(state, MODULE_FUNCTION_NAME)
    }

    // === Visitor dispatch ===

    /// Compiles the subtree at `id`. Tokens compile to nothing.
    fn visit(&mut self, id: NodeId) -> CResult<()> {
        with_stack(|| self.visit_node(id))
    }

    fn visit_node(&mut self, id: NodeId) -> CResult<()> {
        let AstElement::Node(node) = *self.ast.element(id) else {
            return Ok(());
        };
        self.builder().set_line(node.line);
        match node.kind {
            NodeKind::TranslationUnit
            | NodeKind::StatementList
            | NodeKind::ClassMemberList
            | NodeKind::ArgumentExpressionList
            | NodeKind::ListElementList
            | NodeKind::DictElementList
            | NodeKind::ExceptStatementList => self.visit_left_recursive(id),
            NodeKind::ExternalDeclaration | NodeKind::Statement | NodeKind::ClassMember | NodeKind::DictElement => {
                self.visit_children(&node)
            }
            NodeKind::List => self.visit_list(&node),
            NodeKind::Dict => self.visit_dict(&node),
            NodeKind::PrimaryExpression => self.visit_primary(&node),
            NodeKind::PostfixExpression => self.visit_postfix(&node),
            NodeKind::UnaryExpression => self.visit_unary(&node),
            NodeKind::BinaryExpression => self.visit_binary(&node),
            NodeKind::ConditionalExpression => self.visit_conditional(&node),
            NodeKind::AssignmentExpression => self.visit_assignment(&node),
            NodeKind::Expression => self.visit_expression(id),
            NodeKind::VariableDefinition => self.visit_variable_definition(&node),
            NodeKind::CompoundStatement => self.visit_compound(&node),
            NodeKind::ExpressionStatement => self.visit_expression_statement(&node),
            NodeKind::SelectionStatement => self.visit_selection(&node),
            NodeKind::IterationStatement => self.visit_iteration(&node),
            NodeKind::JumpStatement => self.visit_jump(&node),
            NodeKind::TryStatement => self.visit_try(&node),
            NodeKind::ExceptStatement => self.visit_except(&node),
            NodeKind::FunctionDefinition => self.visit_function_definition(&node),
            NodeKind::FunctionDeclaration => self.visit_function_declaration(&node),
            NodeKind::ClassDefinition => self.visit_class_definition(&node),
            NodeKind::ImportStatement => self.visit_import(&node),
            // consumed directly by the visitors of their parents
            NodeKind::StringLiteralList
            | NodeKind::UnaryOperator
            | NodeKind::AssignmentOperator
            | NodeKind::VariableSpecifier
            | NodeKind::VariableDeclaration
            | NodeKind::IdentifierList
            | NodeKind::ClassBody
            | NodeKind::ModuleName
            | NodeKind::TryEnding => Ok(()),
        }
    }

    fn visit_children(&mut self, node: &AstNode) -> CResult<()> {
        for i in 0..node.children {
            self.visit(node.child(i))?;
        }
        Ok(())
    }

    /// Visits a left-recursive list in source order without recursing per item.
    fn visit_left_recursive(&mut self, id: NodeId) -> CResult<()> {
        for item in list_items(self.ast, id) {
            self.visit(item)?;
        }
        Ok(())
    }

    // === Emission ===

    fn fs(&self) -> &FnState<'a> {
        self.functions.last().expect("no function being compiled")
    }

    fn fs_mut(&mut self) -> &mut FnState<'a> {
        self.functions.last_mut().expect("no function being compiled")
    }

    fn builder(&mut self) -> &mut CodeBuilder {
        &mut self.fs_mut().builder
    }

    fn line(&self) -> u32 {
        self.functions.last().map_or(self.first_line, |state| state.builder.line())
    }

    fn emit(&mut self, op: Opcode) {
        self.builder().emit(op);
    }

    fn emit_u8(&mut self, op: Opcode, operand: u8) {
        self.builder().emit_u8(op, operand);
    }

    fn emit_u16(&mut self, op: Opcode, operand: u16) {
        self.builder().emit_u16(op, operand);
    }

    /// Interns `s` in the module's string pool, returning its operand.
    fn string_symbol(&mut self, s: &str) -> CResult<u16> {
        let id = self.module.strings.ensure(s);
        u16::try_from(id.index()).map_err(|_| self.error_here(CompileErrorKind::LimitExceeded, "Too many strings"))
    }

    fn emit_string_constant(&mut self, s: &str) -> CResult<()> {
        let symbol = self.string_symbol(s)?;
        self.emit_u16(Opcode::StringConstant, symbol);
        Ok(())
    }

    /// Emits a method call with the given signature on the receiver below
    /// `arity` arguments.
    fn emit_call(&mut self, arity: u8, signature: &str) -> CResult<()> {
        let symbol = self.string_symbol(signature)?;
        self.builder().emit_call(arity, symbol);
        Ok(())
    }

    fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        self.builder().emit_jump(op)
    }

    fn patch_jump(&mut self, label: JumpLabel) -> CResult<()> {
        self.builder().patch_jump(label).map_err(|err| self.emit_failure(err))
    }

    fn emit_loop(&mut self, start: usize) -> CResult<()> {
        self.builder().emit_loop(start).map_err(|err| self.emit_failure(err))
    }

    fn add_constant(&mut self, value: Value) -> CResult<u16> {
        self.builder().add_const(value).map_err(|err| self.emit_failure(err))
    }

    fn emit_integer(&mut self, value: i64) -> CResult<()> {
        if let Ok(small @ 0..=8) = u8::try_from(value) {
            let op = Opcode::from_repr(Opcode::Literal0 as u8 + small).expect("literal opcodes are contiguous");
            self.emit(op);
        } else {
            let index = self.add_constant(Value::Int(value))?;
            self.emit_u16(Opcode::Constant, index);
        }
        Ok(())
    }

    /// Restores the tracked stack depth after code that is never followed
    /// by its fall-through successor.
    fn with_stack_restored(&mut self, f: impl FnOnce(&mut Self) -> CResult<()>) -> CResult<()> {
        let slots = self.builder().stack_slots();
        f(self)?;
        self.builder().set_stack_slots(slots);
        Ok(())
    }

    // === Functions ===

    /// Pushes a function state for a literal at `line` with `arity` parameters.
    ///
    /// Slot 0 holds the receiver, named `this` for methods and unnamed otherwise.
    fn begin_function(&mut self, line: u32, arity: u8, is_method: bool) {
        let depth = self.functions.len();
        self.env.tracer.on_function_start(depth);
        let builder = CodeBuilder::new(1 + usize::from(arity), line);
        let receiver = if is_method { "this" } else { "" };
        self.functions.push(FnState::new(builder, receiver, 0, arity));
    }

    /// Pops the innermost function, allocates it and emits its closure into
    /// the enclosing function.
    fn end_function(&mut self, name: &str) -> CResult<()> {
        let state = self.functions.pop().expect("function state to finish");
        let upvalues: SmallVec<[(bool, u8); 8]> = state
            .upvalues
            .iter()
            .map(|upvalue| (upvalue.is_local, upvalue.index))
            .collect();
        let function = self.finish_function(state, name)?;
        let index = self.add_constant(Value::Ref(function))?;
        self.builder().emit_closure(index, &upvalues);
        Ok(())
    }

    /// Terminates `state`'s code and allocates the resulting function.
    fn finish_function(&mut self, state: FnState<'a>, name: &str) -> CResult<HeapId> {
        let mut builder = state.builder;
        // the trailing End takes the line after the last statement
        builder.set_line(builder.line() + 1);
        builder.emit(Opcode::End);
        let built = builder.build();

        let function = Function {
            code: built.code,
            constants: built.constants,
            module: self.module_id,
            upvalue_count: state.upvalues.len(),
            max_stack: built.max_stack,
            arity: state.arity,
            debug: FunctionDebug {
                name: name.to_owned(),
                first_line: built.first_line,
                line_program: built.line_program,
            },
        };
        self.env
            .tracer
            .on_function_end(name, function.code.len(), function.max_stack);

        // nested functions are only referenced from the new function's
        // constants until it is allocated
        let roots = self.working_roots.len();
        self.working_roots
            .extend(function.constants.iter().filter_map(|value| value.ref_id()));
        let id = self.allocate(HeapData::Function(function));
        self.working_roots.truncate(roots);
        let id = id?;

        if self.env.flags.debug_compiler
            && let Some(function) = self.env.heap.function(id)
        {
            dump_function(function, &*self.module, self.env.heap, self.env.host);
        }
        Ok(id)
    }

    // === Heap ===

    /// Allocates `data`, collecting first when the heap asks for it.
    fn allocate(&mut self, data: HeapData) -> CResult<HeapId> {
        if self.env.heap.should_collect() {
            self.collect_garbage();
        }
        self.env
            .heap
            .allocate(data)
            .map_err(|err| CompileError::out_of_memory(self.module.name.as_str(), self.line(), &err))
    }

    /// Runs a collection rooted at everything the compiler can still reach.
    fn collect_garbage(&mut self) {
        let mut roots: Vec<HeapId> = self.env.roots.to_vec();
        roots.extend(self.module.heap_refs());
        roots.extend(self.working_roots.iter().copied());
        for state in &self.functions {
            roots.extend(state.builder.constants().iter().filter_map(|value| value.ref_id()));
        }
        let before = self.env.heap.live_count();
        self.env.heap.collect_garbage(roots);
        let after = self.env.heap.live_count();
        self.env.tracer.on_gc(before, after);
    }

    // === Errors ===

    /// Builds an error located at `token`.
    fn error_at(&self, token: &Token, kind: CompileErrorKind, message: &str) -> CompileError {
        CompileError::new(
            kind,
            self.module.name.as_str(),
            token.line,
            render_message(Some(token.text(self.source)), message),
        )
    }

    /// Builds an error located at the current line with no token.
    fn error_here(&self, kind: CompileErrorKind, message: &str) -> CompileError {
        CompileError::new(kind, self.module.name.as_str(), self.line(), render_message(None, message))
    }

    fn emit_failure(&self, err: EmitError) -> CompileError {
        self.error_here(CompileErrorKind::LimitExceeded, &err.to_string())
    }

    fn token(&self, id: NodeId) -> Token {
        *self.ast.token(id)
    }

    fn text(&self, token: &Token) -> &'a str {
        token.text(self.source)
    }
}

/// Items of the left-recursive list rooted at `id`, in source order.
///
/// Lists reduce as `[item]` or `[list, item]` or `[list, separator, item]`;
/// the leftmost node carries the first item. An empty list has no items.
fn list_items(ast: &Ast, id: NodeId) -> Vec<NodeId> {
    let kind = ast.node(id).kind;
    let mut spine = Vec::new();
    let mut current = id;
    loop {
        let node = ast.node(current);
        spine.push(current);
        if node.children > 0 && ast.element(node.child(0)).is_node(kind) {
            current = node.child(0);
        } else {
            break;
        }
    }

    let mut items = Vec::new();
    for (depth, &list) in spine.iter().rev().enumerate() {
        let node = ast.node(list);
        if depth == 0 {
            items.extend((0..node.children).map(|i| node.child(i)));
        } else {
            items.push(node.last_child());
        }
    }
    items
}
