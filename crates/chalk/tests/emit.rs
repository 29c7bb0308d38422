//! Instruction sequences emitted for small programs.
//!
//! Module variable operands start after the core classes every module is
//! seeded with, so the first user variable is slot `CORE_CLASSES.len()`.

use chalk::{CORE_CLASSES, CollectHost, Function, Value, Vm, bytecode::Opcode};
use pretty_assertions::assert_eq;

/// Builds expected bytecode from opcode names, byte literals and
/// parenthesized byte expressions.
macro_rules! code {
    (@byte $op:ident) => { Opcode::$op as u8 };
    (@byte $n:literal) => { $n };
    (@byte ($e:expr)) => { $e };
    ($($item:tt),* $(,)?) => { vec![$(code!(@byte $item)),*] };
}

/// Slot of the `n`th module variable declared by the test source.
fn var(n: usize) -> u8 {
    (CORE_CLASSES.len() + n) as u8
}

fn core(name: &str) -> u8 {
    CORE_CLASSES.iter().position(|&class| class == name).unwrap() as u8
}

fn load(source: &str) -> Vm {
    let mut vm = Vm::new();
    let mut host = CollectHost::new();
    if let Err(err) = vm.load_module("main", source, &mut host) {
        panic!("{err}\nhost errors: {:?}", host.errors());
    }
    vm
}

fn top_code(vm: &Vm) -> Vec<u8> {
    vm.module_function("main").unwrap().code.clone()
}

fn symbol(vm: &Vm, s: &str) -> u8 {
    let id = vm.module("main").unwrap().strings.find(s).unwrap();
    u8::try_from(id.index()).unwrap()
}

/// Every function named `name` reachable from the module's top-level function,
/// in constant pool order.
fn functions_named<'v>(vm: &'v Vm, name: &str) -> Vec<&'v Function> {
    fn walk<'v>(vm: &'v Vm, function: &'v Function, name: &str, found: &mut Vec<&'v Function>) {
        for id in function.constants.iter().filter_map(|value| value.ref_id()) {
            let nested = vm.function(id).unwrap();
            if nested.debug.name == name {
                found.push(nested);
            }
            walk(vm, nested, name, found);
        }
    }
    let mut found = Vec::new();
    walk(vm, vm.module_function("main").unwrap(), name, &mut found);
    found
}

fn function_named<'v>(vm: &'v Vm, name: &str) -> &'v Function {
    let found = functions_named(vm, name);
    assert_eq!(found.len(), 1, "expected exactly one function named {name}");
    found[0]
}

#[test]
fn module_variable_definition() {
    let vm = load("var a = 3;");
    assert_eq!(top_code(&vm), code![Literal3, StoreModuleVariable, 0, (var(0)), Pop, End]);
    let module = vm.module("main").unwrap();
    assert_eq!(module.find_variable("a"), Some(var(0) as usize));
    // the interpreter defines the slot when the fiber runs
    assert_eq!(module.variable("a"), Some(Value::Undefined));
}

#[test]
fn binary_operator_is_a_method_call() {
    let vm = load("1 + 2;");
    assert_eq!(top_code(&vm), code![Literal1, Literal2, Call1, 0, (symbol(&vm, "__add@1")), Pop, End]);
}

#[test]
fn if_else() {
    let vm = load("if (true) { 1; } else { 2; }");
    assert_eq!(
        top_code(&vm),
        code![Literal1, JumpIf, 0, 5, Literal1, Pop, Jump, 0, 2, Literal2, Pop, End]
    );
}

#[test]
fn break_becomes_a_jump_to_the_loop_exit() {
    let vm = load("while (false) { break; }");
    assert_eq!(
        top_code(&vm),
        code![Literal0, JumpIf, 0, 6, Jump, 0, 3, Loop, 0, 10, End]
    );
}

#[test]
fn function_definition() {
    let vm = load("function f(x) { return x; }");
    assert_eq!(
        top_code(&vm),
        code![Closure, 0, 0, StoreModuleVariable, 0, (var(0)), Pop, End]
    );
    let f = function_named(&vm, "f");
    assert_eq!(f.code, code![LoadLocal1, Return, End]);
    assert_eq!(f.max_stack, 1);
    assert_eq!(f.arity, 1);
    assert_eq!(f.upvalue_count, 0);
}

#[test]
fn class_with_a_method() {
    let vm = load("class C { function m() { return 1; } }");
    let c = var(0);
    assert_eq!(
        top_code(&vm),
        code![
            StringConstant, 0, (symbol(&vm, "C")),
            LoadModuleVariable, 0, (core("Object")),
            Class, 0,
            StoreModuleVariable, 0, (c),
            Pop,
            LoadModuleVariable, 0, (c),
            Closure, 0, 0,
            Method, 0, (symbol(&vm, "m@0")),
            End,
        ]
    );
    assert_eq!(function_named(&vm, "m").code, code![Literal1, Return, End]);
}

#[test]
fn class_field_count_is_patched_after_the_body() {
    let vm = load("class P { var x; var y; function m() { return y; } }");
    let code = top_code(&vm);
    let class_at = code.iter().position(|&b| b == Opcode::Class as u8).unwrap();
    assert_eq!(code[class_at + 1], 2);
    assert_eq!(function_named(&vm, "m").code, code![LoadFieldThis, 1, Return, End]);
}

#[test]
fn superclass_expression_replaces_object() {
    let vm = load("class A {} class B is A {}");
    let code = top_code(&vm);
    // second class: name, superclass A, Class
    assert_eq!(
        code[12..19].to_vec(),
        code![StringConstant, 0, (symbol(&vm, "B")), LoadModuleVariable, 0, (var(0)), Class]
    );
}

#[test]
fn integer_literals() {
    let vm = load("8; 9; 0x10; 0b11; 010;");
    assert_eq!(
        top_code(&vm),
        code![
            Literal8, Pop,
            Constant, 0, 0, Pop,
            Constant, 0, 1, Pop,
            Literal3, Pop,
            Literal8, Pop,
            End,
        ]
    );
    let main = vm.module_function("main").unwrap();
    assert_eq!(main.constants, vec![Value::Int(9), Value::Int(16)]);
}

#[test]
fn constants_and_adjacent_strings() {
    let vm = load("true; false; null; \"ab\" \"c\\n\";");
    assert_eq!(
        top_code(&vm),
        code![Literal1, Pop, Literal0, Pop, Null, Pop, StringConstant, 0, 0, Pop, End]
    );
    assert_eq!(vm.module("main").unwrap().strings.get(chalk::StringId::from_index(0)), Some("abc\n"));
}

#[test]
fn every_binary_operator_lowers_to_its_method() {
    let table = [
        ("is", "__is@1"),
        (">>", "__rightShift@1"),
        ("<<", "__leftShift@1"),
        ("<=", "__le@1"),
        (">=", "__ge@1"),
        ("==", "__eq@1"),
        ("!=", "__ne@1"),
        ("&", "__and@1"),
        ("-", "__sub@1"),
        ("+", "__add@1"),
        ("*", "__mul@1"),
        ("/", "__div@1"),
        ("%", "__mod@1"),
        ("<", "__lt@1"),
        (">", "__gt@1"),
        ("^", "__xor@1"),
        ("|", "__or@1"),
        ("..", "__rangeExclusive@1"),
        ("...", "__rangeInclusive@1"),
    ];
    for (operator, method) in table {
        let vm = load(&format!("var a; var b; a {operator} b;"));
        let code = top_code(&vm);
        assert_eq!(
            code[10..].to_vec(),
            code![
                LoadModuleVariable, 0, (var(0)),
                LoadModuleVariable, 0, (var(1)),
                Call1, 0, 0,
                Pop, End,
            ],
            "operator {operator}"
        );
        assert_eq!(symbol(&vm, method), 0, "operator {operator}");
    }
}

#[test]
fn unary_operators() {
    for (operator, method) in [("-", "__neg@0"), ("!", "__lnot@0"), ("~", "__compl@0")] {
        let vm = load(&format!("var a; {operator}a;"));
        assert_eq!(
            top_code(&vm)[5..].to_vec(),
            code![LoadModuleVariable, 0, (var(0)), Call0, 0, (symbol(&vm, method)), Pop, End],
            "operator {operator}"
        );
    }
}

#[test]
fn prefix_increment_stores_the_new_value() {
    let vm = load("var a; ++a;");
    assert_eq!(
        top_code(&vm)[5..].to_vec(),
        code![
            LoadModuleVariable, 0, (var(0)),
            Call0, 0, (symbol(&vm, "__inc@0")),
            StoreModuleVariable, 0, (var(0)),
            Pop, End,
        ]
    );
}

#[test]
fn postfix_increment_keeps_the_old_value() {
    let vm = load("var a; a--;");
    assert_eq!(
        top_code(&vm)[5..].to_vec(),
        code![
            LoadModuleVariable, 0, (var(0)),
            LoadModuleVariable, 0, (var(0)),
            Call0, 0, (symbol(&vm, "__dec@0")),
            StoreModuleVariable, 0, (var(0)),
            Pop,
            Pop, End,
        ]
    );
}

#[test]
fn compound_assignment() {
    let vm = load("var a; a += 1;");
    assert_eq!(
        top_code(&vm)[5..].to_vec(),
        code![
            LoadModuleVariable, 0, (var(0)),
            Literal1,
            Call1, 0, (symbol(&vm, "__add@1")),
            StoreModuleVariable, 0, (var(0)),
            Pop, End,
        ]
    );
}

#[test]
fn null_assignment_skips_the_store_when_set() {
    let vm = load("var a; a ?= 2;");
    assert_eq!(
        top_code(&vm)[5..].to_vec(),
        code![
            LoadModuleVariable, 0, (var(0)),
            Or, 0, 4,
            Literal2,
            StoreModuleVariable, 0, (var(0)),
            Pop, End,
        ]
    );
}

#[test]
fn logical_operators_short_circuit() {
    let vm = load("var a; var b; a && b; a || b;");
    assert_eq!(
        top_code(&vm)[10..].to_vec(),
        code![
            LoadModuleVariable, 0, (var(0)),
            And, 0, 3,
            LoadModuleVariable, 0, (var(1)),
            Pop,
            LoadModuleVariable, 0, (var(0)),
            Or, 0, 3,
            LoadModuleVariable, 0, (var(1)),
            Pop,
            End,
        ]
    );
}

#[test]
fn conditional_expression() {
    let vm = load("var a; a ? 1 : 2;");
    assert_eq!(
        top_code(&vm)[5..].to_vec(),
        code![
            LoadModuleVariable, 0, (var(0)),
            JumpIf, 0, 4,
            Literal1,
            Jump, 0, 1,
            Literal2,
            Pop, End,
        ]
    );
}

#[test]
fn field_and_subscript_stores_call_setters() {
    let vm = load("var a; a.b = 1; a[0] = 2;");
    assert_eq!(
        top_code(&vm)[5..].to_vec(),
        code![
            Literal1,
            LoadModuleVariable, 0, (var(0)),
            StringConstant, 0, (symbol(&vm, "b")),
            LoadLocal1,
            Call2, 0, (symbol(&vm, "__set@2")),
            Pop,
            Pop,
            Literal2,
            LoadModuleVariable, 0, (var(0)),
            Literal0,
            LoadLocal1,
            Call2, 0, (symbol(&vm, "__sliceAssign@2")),
            Pop,
            Pop,
            End,
        ]
    );
}

#[test]
fn getters_and_calls() {
    let vm = load("var a; a.b; a[1]; a.f(1, 2); a(3);");
    assert_eq!(
        top_code(&vm)[5..].to_vec(),
        code![
            LoadModuleVariable, 0, (var(0)),
            StringConstant, 0, (symbol(&vm, "b")),
            Call1, 0, (symbol(&vm, "__get@1")),
            Pop,
            LoadModuleVariable, 0, (var(0)),
            Literal1,
            Call1, 0, (symbol(&vm, "__slice@1")),
            Pop,
            LoadModuleVariable, 0, (var(0)),
            Literal1,
            Literal2,
            Call2, 0, (symbol(&vm, "f@2")),
            Pop,
            LoadModuleVariable, 0, (var(0)),
            Literal3,
            IndirectCall, 1,
            Pop,
            End,
        ]
    );
}

#[test]
fn calls_with_many_arguments_use_the_general_form() {
    let vm = load("var a; a.f(1, 2, 3, 4, 5, 6, 7, 8, 0);");
    let code = top_code(&vm);
    let tail = code[code.len() - 6..].to_vec();
    assert_eq!(tail, code![Call, 9, 0, (symbol(&vm, "f@9")), Pop, End]);
    assert_eq!(vm.module_function("main").unwrap().max_stack, 10);
}

#[test]
fn list_and_dict_literals() {
    let vm = load("[1, 2]; var d = {1: 2};");
    assert_eq!(
        top_code(&vm),
        code![
            LoadModuleVariable, 0, (core("List")),
            IndirectCall, 0,
            Literal1,
            Call1, 0, (symbol(&vm, "_addElement@1")),
            Literal2,
            Call1, 0, (symbol(&vm, "_addElement@1")),
            Pop,
            LoadModuleVariable, 0, (core("Dict")),
            IndirectCall, 0,
            Literal1,
            Literal2,
            Call2, 0, (symbol(&vm, "_addEntry@2")),
            StoreModuleVariable, 0, (var(0)),
            Pop,
            End,
        ]
    );
}

#[test]
fn comma_expression_keeps_the_last_value() {
    let vm = load("1, 2, 3;");
    assert_eq!(top_code(&vm), code![Literal1, Pop, Literal2, Pop, Literal3, Pop, End]);
}

#[test]
fn locals_live_in_stack_slots() {
    let vm = load("if (true) { var a = 1; var b = a; b = 2; }");
    assert_eq!(
        top_code(&vm),
        code![Literal1, JumpIf, 0, 8, Literal1, LoadLocal1, Literal2, StoreLocal, 2, Pop, Pop, Pop, End]
    );
}

#[test]
fn captured_locals_close_their_upvalue() {
    let vm = load("function outer() { var a = 1; function inner() { return a; } return inner; }");
    let inner = function_named(&vm, "inner");
    assert_eq!(inner.code, code![LoadUpvalue, 0, Return, End]);
    assert_eq!(inner.upvalue_count, 1);

    let outer = function_named(&vm, "outer");
    assert_eq!(
        outer.code,
        code![
            Literal1,
            Closure, 0, 0, 1, 1,
            LoadLocal2,
            Return,
            Pop,
            CloseUpvalue,
            Null,
            Return,
            End,
        ]
    );
}

#[test]
fn upvalues_are_threaded_through_intermediate_functions() {
    let vm = load(
        "function a() { var x = 1; function b() { function c() { return x; } return c; } return b; }",
    );
    let c = function_named(&vm, "c");
    assert_eq!(c.code, code![LoadUpvalue, 0, Return, End]);
    // b captures a's local, c captures b's upvalue
    let b = function_named(&vm, "b");
    assert_eq!(b.upvalue_count, 1);
    assert_eq!(b.code[..5].to_vec(), code![Closure, 0, 0, 0, 0]);
    let a = function_named(&vm, "a");
    assert_eq!(a.code[1..6].to_vec(), code![Closure, 0, 0, 1, 1]);
}

#[test]
fn resolution_prefers_locals_then_fields_then_module_variables() {
    let local = load("var x = 0; class C { var x; function m() { var x = 1; return x; } }");
    assert_eq!(
        function_named(&local, "m").code,
        code![Literal1, LoadLocal1, Return, Pop, Null, Return, End]
    );

    let field = load("var x = 0; class C { var x; function m() { return x; } }");
    assert_eq!(function_named(&field, "m").code, code![LoadFieldThis, 0, Return, End]);

    let module = load("var x = 0; class C { function m() { return x; } }");
    assert_eq!(
        function_named(&module, "m").code,
        code![LoadModuleVariable, 0, (var(0)), Return, End]
    );
}

#[test]
fn fields_from_nested_functions_go_through_this() {
    let vm = load("class C { var x; function m() { function g() { x = 5; return x; } return g; } }");
    let g = function_named(&vm, "g");
    assert_eq!(
        g.code,
        code![Literal5, LoadUpvalue, 0, StoreField, 0, Pop, LoadUpvalue, 0, LoadField, 0, Return, End]
    );
}

#[test]
fn static_methods_cannot_see_fields() {
    let vm = load("var x = 0; class C { var x; static function s() { return x; } }");
    assert_eq!(
        function_named(&vm, "s").code,
        code![LoadModuleVariable, 0, (var(0)), Return, End]
    );
    let code = top_code(&vm);
    assert!(code.contains(&(Opcode::StaticMethod as u8)));
}

#[test]
fn super_calls_name_the_enclosing_class() {
    let vm = load("class A { function m() { return 1; } } class B is A { function m() { return super.m(); } }");
    let methods = functions_named(&vm, "m");
    assert_eq!(methods.len(), 2);
    assert_eq!(
        methods[1].code,
        code![LoadLocal0, SuperCall0, 0, (symbol(&vm, "m@0")), 0, (symbol(&vm, "B")), Return, End]
    );
}

#[test]
fn this_loads_the_receiver() {
    let vm = load("class C { function me() { return this; } }");
    assert_eq!(function_named(&vm, "me").code, code![LoadLocal0, Return, End]);
}

#[test]
fn forward_declaration_reuses_the_local() {
    let vm = load("function f() { function g(); var h = g; function g() { return 1; } return h; }");
    let f = function_named(&vm, "f");
    assert_eq!(
        f.code,
        code![
            Null,
            LoadLocal1,
            Closure, 0, 0,
            StoreLocal, 1,
            Pop,
            LoadLocal2,
            Return,
            Pop,
            Pop,
            Null,
            Return,
            End,
        ]
    );
}

#[test]
fn continue_loops_back_to_the_condition() {
    let vm = load("while (true) { continue; }");
    assert_eq!(top_code(&vm), code![Literal1, JumpIf, 0, 6, Loop, 0, 7, Loop, 0, 10, End]);
}

#[test]
fn break_pops_the_locals_of_the_loop_body() {
    let vm = load("while (true) { var a = 1; break; }");
    assert_eq!(
        top_code(&vm),
        code![Literal1, JumpIf, 0, 9, Literal1, Pop, Jump, 0, 4, Pop, Loop, 0, 13, End]
    );
}

#[test]
fn try_except_finally() {
    let vm = load("var E; try { E; } except E as e { e; } finally { E; }");
    let (e, is, raise) = (var(0), symbol(&vm, "__is@1"), symbol(&vm, "raise@1"));
    assert_eq!(
        top_code(&vm)[5..].to_vec(),
        code![
            Try, 0, 12,
            LoadModuleVariable, 0, (e), Pop,
            PopTry,
            // finally, shared by both paths
            LoadModuleVariable, 0, (e), Pop,
            Jump, 0, 27,
            // handler: the exception is in slot 1
            LoadLocal1, LoadModuleVariable, 0, (e), Call1, 0, (is), JumpIf, 0, 8,
            LoadLocal1, LoadLocal2, Pop, Pop,
            Pop, Loop, 0, 25,
            // no clause matched
            LoadModuleVariable, 0, (core("Core")), LoadLocal1, Call1, 0, (raise), Pop, Pop,
            End,
        ]
    );
    assert_eq!(vm.module_function("main").unwrap().max_stack, 3);
}

#[test]
fn break_closes_the_try_blocks_it_leaves() {
    let vm = load("while (true) { try { break; } except 1 { } }");
    let (is, raise) = (symbol(&vm, "__is@1"), symbol(&vm, "raise@1"));
    assert_eq!(
        top_code(&vm),
        code![
            Literal1, JumpIf, 0, 35,
            Try, 0, 8,
            PopTry, Jump, 0, 28,
            PopTry,
            Jump, 0, 21,
            LoadLocal1, Literal1, Call1, 0, (is), JumpIf, 0, 4,
            Pop, Loop, 0, 15,
            LoadModuleVariable, 0, (core("Core")), LoadLocal1, Call1, 0, (raise), Pop, Pop,
            Loop, 0, 39,
            End,
        ]
    );
}

#[test]
fn do_while_enters_the_body_first() {
    let vm = load("do { 1; } while (false);");
    assert_eq!(
        top_code(&vm),
        code![Jump, 0, 4, Literal0, JumpIf, 0, 5, Literal1, Pop, Loop, 0, 9, End]
    );
}

#[test]
fn for_in_drives_the_iterator_protocol() {
    let vm = load("for (x in 3) { x; }");
    let iterate = symbol(&vm, "iterate@1");
    let ne = symbol(&vm, "__ne@1");
    let value = symbol(&vm, "iteratorValue@1");
    assert_eq!(
        top_code(&vm),
        code![
            Literal3,
            Null,
            // condition: null != (iter = seq.iterate(iter))
            Null,
            LoadLocal1,
            LoadLocal2,
            Call1, 0, (iterate),
            StoreLocal, 2,
            Call1, 0, (ne),
            JumpIf, 0, 11,
            LoadLocal1,
            LoadLocal2,
            Call1, 0, (value),
            LoadLocal3,
            Pop,
            Pop,
            Loop, 0, 25,
            Pop,
            Pop,
            End,
        ]
    );
}

#[test]
fn imports() {
    let vm = load("import a.b;");
    let b = var(0);
    assert_eq!(
        top_code(&vm),
        code![
            LoadModuleVariable, 0, (core("Core")),
            StringConstant, 0, (symbol(&vm, "a.b")),
            Call1, 0, (symbol(&vm, "importModule@1")),
            StoreModuleVariable, 0, (b),
            Pop,
            LoadModuleVariable, 0, (b),
            Call0, 0, (symbol(&vm, "run@0")),
            Pop,
            End,
        ]
    );

    let vm = load("from m import x, y;");
    let module = vm.module("main").unwrap();
    assert_eq!(module.find_variable("x"), Some(var(0) as usize));
    assert_eq!(module.find_variable("y"), Some(var(1) as usize));
    let code = top_code(&vm);
    // the hidden module local is dropped at the end of the statement
    assert_eq!(code[code.len() - 2..].to_vec(), code![Pop, End]);
    assert!(vm.module("main").unwrap().strings.find("__get@1").is_some());

    let vm = load("from m import *;");
    assert!(vm.module("main").unwrap().strings.find("importAllSymbols@1").is_some());
}

#[test]
fn print_expressions_echoes_top_level_statements() {
    let mut vm = Vm::with_config(chalk::VmConfig::new().print_expressions(true));
    vm.load_module("main", "1; function f() { 2; }", &mut CollectHost::new()).unwrap();
    let code = top_code(&vm);
    assert_eq!(
        code[..8].to_vec(),
        code![LoadModuleVariable, 0, (core("Core")), Literal1, Call1, 0, (symbol(&vm, "repr@1")), Pop]
    );
    assert_eq!(function_named(&vm, "f").code, code![Literal2, Pop, Null, Return, End]);
}
