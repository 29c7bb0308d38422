//! Compile failures: what the host hears, what the caller gets back and what
//! the module looks like afterwards.

use chalk::{
    CollectHost, CompileErrorKind, LimitedTracker, RecordingTracer, Report, ResourceLimits, TraceEvent, Vm, VmConfig,
};
use pretty_assertions::assert_eq;

/// Loads `source` into a fresh VM and returns the error with the host that saw it.
fn fail(source: &str) -> (chalk::CompileError, CollectHost) {
    let mut vm = Vm::new();
    let mut host = CollectHost::new();
    let err = vm
        .load_module("main", source, &mut host)
        .expect_err("source should not compile");
    assert_eq!(vm.last_error(), Some(&err));
    (err, host)
}

#[test]
fn duplicate_module_variable_is_reported_once() {
    let (err, host) = fail("var a;\nvar a;");
    assert_eq!(err.kind, CompileErrorKind::Duplicate);
    assert_eq!(err.line, 2);
    assert_eq!(err.message, "Error near 'a': Module variable is already defined");
    assert_eq!(host.errors().len(), 1);
    let reported = &host.errors()[0];
    assert_eq!(reported.report, Report::Compile(CompileErrorKind::Duplicate));
    assert_eq!(reported.module, "main");
    assert_eq!(reported.line, 2);
    assert_eq!(reported.message, err.message);
}

#[test]
fn duplicate_local_in_the_same_block() {
    let (err, _) = fail("if (true) { var a; var a; }");
    assert_eq!(err.kind, CompileErrorKind::Duplicate);
    assert_eq!(err.message, "Error near 'a': Variable is already defined in this scope");
}

#[test]
fn shadowing_in_an_inner_block_is_allowed() {
    let mut vm = Vm::new();
    let mut host = CollectHost::new();
    vm.load_module("main", "if (true) { var a; if (a) { var a; } }", &mut host).unwrap();
    assert!(host.errors().is_empty());
}

#[test]
fn assignment_to_an_undefined_name() {
    let (err, _) = fail("a = 3;");
    assert_eq!(err.kind, CompileErrorKind::UndefinedVariable);
    assert_eq!(err.message, "Error near 'a': Undefined variable");
}

#[test]
fn assignment_to_a_literal() {
    let (err, _) = fail("1 = 2;");
    assert_eq!(err.kind, CompileErrorKind::NotAnLvalue);
    assert!(err.message.contains("is not an lvalue"), "{}", err.message);
}

#[test]
fn too_many_locals() {
    // the receiver takes slot 0, so 255 named locals fill the frame
    let fits: String = (0..255).map(|i| format!("var v{i}; ")).collect();
    let mut vm = Vm::new();
    vm.load_module("fits", &format!("if (true) {{ {fits} }}"), &mut CollectHost::new())
        .unwrap();

    let (err, _) = fail(&format!("if (true) {{ {fits} var v255; }}"));
    assert_eq!(err.kind, CompileErrorKind::LimitExceeded);
    assert_eq!(err.message, "Error near 'v255': Too many locals");
}

#[test]
fn too_many_fields() {
    let fits: String = (0..255).map(|i| format!("var f{i}; ")).collect();
    let mut vm = Vm::new();
    vm.load_module("fits", &format!("class C {{ {fits} }}"), &mut CollectHost::new())
        .unwrap();

    let (err, _) = fail(&format!("class C {{ {fits} var f255; }}"));
    assert_eq!(err.kind, CompileErrorKind::LimitExceeded);
    assert_eq!(err.message, "Error near 'f255': Too many fields");
}

#[test]
fn too_many_upvalues() {
    // 200 captures through `middle` plus 200 of its own locals overflow the
    // 256 upvalues `inner` may hold
    let outer: String = (0..200).map(|i| format!("var a{i}; ")).collect();
    let middle: String = (0..200).map(|i| format!("var b{i}; ")).collect();
    let uses: String = (0..200).map(|i| format!("a{i}; b{i}; ")).collect();
    let source = format!("function outer() {{ {outer} function middle() {{ {middle} function inner() {{ {uses} }} }} }}");
    let (err, _) = fail(&source);
    assert_eq!(err.kind, CompileErrorKind::LimitExceeded);
    assert_eq!(err.message, "Error near 'a128': Too many upvalues");
}

#[test]
fn except_bindings_end_with_their_clause() {
    let (err, _) = fail("try { } except 1 as e { e; }
e;");
    assert_eq!(err.kind, CompileErrorKind::UndefinedVariable);
    assert_eq!(err.line, 2);
}

#[test]
fn break_and_continue_need_a_loop() {
    let (err, _) = fail("break;");
    assert_eq!(err.kind, CompileErrorKind::Misuse);
    assert_eq!(err.message, "Error near 'break': Cannot use 'break' outside of a loop");

    let (err, _) = fail("function f() { continue; }");
    assert_eq!(err.message, "Error near 'continue': Cannot use 'continue' outside of a loop");
}

#[test]
fn this_and_super_need_a_method() {
    let (err, _) = fail("function f() { return this; }");
    assert_eq!(err.kind, CompileErrorKind::ThisOutsideMethod);
    assert_eq!(err.message, "Error near 'this': Cannot use 'this' outside of a class method");

    let (err, _) = fail("function f() { return super.g(); }");
    assert_eq!(err.kind, CompileErrorKind::ThisOutsideMethod);
}

#[test]
fn duplicate_method() {
    let (err, _) = fail("class C {\n function m() {}\n function m() {}\n}");
    assert_eq!(err.kind, CompileErrorKind::DuplicateMethod);
    assert_eq!(err.line, 3);
    assert_eq!(err.message, "Error near 'm': Class C already defines method m@0");
}

#[test]
fn same_name_with_another_arity_is_another_method() {
    let mut vm = Vm::new();
    vm.load_module("main", "class C { function m() {} function m(a) {} }", &mut CollectHost::new())
        .unwrap();
}

#[test]
fn static_outside_a_class() {
    let (err, _) = fail("static function f() {}");
    assert_eq!(err.kind, CompileErrorKind::Misuse);
    assert_eq!(err.message, "Error near 'f': Only class methods can be static");

    let (err, _) = fail("static var x;");
    assert_eq!(err.message, "Error near 'x': Only fields can be marked static");
}

#[test]
fn field_initializers_are_rejected() {
    let (err, _) = fail("class C { var x = 1; }");
    assert_eq!(err.kind, CompileErrorKind::Misuse);
    assert_eq!(err.message, "Error near 'x': Fields cannot have initializers");
}

#[test]
fn lexical_and_syntax_errors() {
    let (err, host) = fail("var a = 1;\nvar b = @;");
    assert_eq!(err.kind, CompileErrorKind::Lex);
    assert_eq!(err.line, 2);
    assert_eq!(host.errors().len(), 1);

    let (err, _) = fail("var = 1;");
    assert_eq!(err.kind, CompileErrorKind::Syntax);
    assert!(err.message.ends_with("Syntax error"), "{}", err.message);
}

#[test]
fn overlong_names_are_truncated_in_the_message() {
    let name = "n".repeat(chalk::MAX_NAME + 1);
    let (err, _) = fail(&format!("var {name};"));
    assert_eq!(err.kind, CompileErrorKind::LimitExceeded);
    assert_eq!(
        err.message,
        format!("Error near '{}...': Name too long", "n".repeat(chalk::MAX_NAME - 4))
    );
}

#[test]
fn print_errors_off_keeps_the_host_quiet() {
    let mut vm = Vm::with_config(VmConfig::new().print_errors(false));
    let mut host = CollectHost::new();
    let err = vm.load_module("main", "a = 1;", &mut host).unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::UndefinedVariable);
    assert!(host.errors().is_empty());
}

#[test]
fn failed_load_removes_only_its_own_variables() {
    let mut vm = Vm::new();
    let mut host = CollectHost::new();
    vm.load_module("main", "var a;", &mut host).unwrap();
    let before = vm.module("main").unwrap().variable_count();

    vm.load_module("main", "var b; var c; d = 1;", &mut host).unwrap_err();
    let module = vm.module("main").unwrap();
    assert_eq!(module.variable_count(), before);
    assert!(module.find_variable("a").is_some());
    assert_eq!(module.find_variable("b"), None);
    assert!(module.top_fiber.is_some(), "the earlier fiber stays in place");
}

#[test]
fn errors_reach_the_tracer() {
    let tracer = RecordingTracer::new();
    let mut vm = Vm::with_tracker(chalk::NoLimitTracker, VmConfig::new(), tracer).unwrap();
    vm.load_module("main", "var a;\nb;", &mut CollectHost::new()).unwrap_err();
    let errors: Vec<_> = vm
        .tracer()
        .events()
        .iter()
        .filter(|event| matches!(event, TraceEvent::Error { .. }))
        .cloned()
        .collect();
    assert_eq!(
        errors,
        vec![TraceEvent::Error {
            kind: CompileErrorKind::UndefinedVariable,
            line: 2,
        }]
    );
}

fn limited(max_allocations: usize) -> Vm<LimitedTracker> {
    let limits = ResourceLimits::new().max_allocations(max_allocations);
    Vm::limited(VmConfig::new().limits(limits)).unwrap()
}

#[test]
fn core_classes_need_allocations_of_their_own() {
    let limits = ResourceLimits::new().max_allocations(chalk::CORE_CLASSES.len() - 1);
    assert!(Vm::limited(VmConfig::new().limits(limits)).is_err());
}

#[test]
fn out_of_memory_while_compiling() {
    // room for the core classes and nothing else
    let mut vm = limited(chalk::CORE_CLASSES.len());
    let mut host = CollectHost::new();
    let err = vm.load_module("main", "var a = 1;", &mut host).unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::Allocation);
    assert_eq!(err.message, "Error: Out of memory");
    assert_eq!(host.errors().len(), 1);
    assert_eq!(vm.module("main").unwrap().find_variable("a"), None);
}

#[test]
fn out_of_memory_while_creating_the_fiber() {
    // the top-level function fits, its closure does not
    let mut vm = limited(chalk::CORE_CLASSES.len() + 1);
    let mut host = CollectHost::new();
    let err = vm.load_module("main", "var a = 1;", &mut host).unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::Allocation);
    assert_eq!(err.line, 0);
    assert_eq!(host.errors().len(), 1);
    let module = vm.module("main").unwrap();
    assert_eq!(module.find_variable("a"), None);
    assert_eq!(module.top_fiber, None);
}
