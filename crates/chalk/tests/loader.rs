//! Module loading end to end: heap cooperation, tracing, disassembly,
//! stack traces and frozen modules.

use chalk::{
    CollectHost, FrozenModule, HeapId, NoLimitTracker, RecordingTracer, Report, TraceEvent, Vm, VmConfig,
};
use pretty_assertions::assert_eq;

const NESTED: &str = "\
function counter() {
  var n = 0;
  function next() { n = n + 1; return n; }
  return next;
}
class Point {
  var x;
  function get() { return x; }
}
var c = counter();
";

/// Ids of every function reachable from `main`'s top-level function.
fn function_ids<Tr: chalk::CompileTracer>(vm: &Vm<NoLimitTracker, Tr>) -> Vec<HeapId> {
    let mut ids: Vec<HeapId> = Vec::new();
    let mut pending: Vec<HeapId> = vm
        .module_function("main")
        .unwrap()
        .constants
        .iter()
        .filter_map(|value| value.ref_id())
        .collect();
    while let Some(id) = pending.pop() {
        let function = vm.heap().function(id).expect("constant refers to a live function");
        pending.extend(function.constants.iter().filter_map(|value| value.ref_id()));
        ids.push(id);
    }
    ids
}

#[test]
fn collecting_on_every_allocation_keeps_nested_functions() {
    let tracer = RecordingTracer::new();
    let mut vm = Vm::with_tracker(NoLimitTracker, VmConfig::new().gc_threshold(0), tracer).unwrap();
    let fiber = vm.load_module("main", NESTED, &mut CollectHost::new()).unwrap();

    let ids = function_ids(&vm);
    assert_eq!(ids.len(), 3, "counter, next and get");
    vm.collect_garbage();
    assert!(vm.heap().is_live(fiber));
    assert!(ids.iter().all(|&id| vm.heap().is_live(id)));

    let gcs: Vec<_> = vm
        .tracer()
        .events()
        .iter()
        .filter_map(|event| match *event {
            TraceEvent::Gc { before, after } => Some((before, after)),
            _ => None,
        })
        .collect();
    assert!(!gcs.is_empty());
    assert!(gcs.iter().all(|&(before, after)| after <= before));
}

#[test]
fn other_modules_stay_rooted_while_one_compiles() {
    let mut vm = Vm::with_config(VmConfig::new().gc_threshold(0));
    let mut host = CollectHost::new();
    let first = vm.load_module("main", NESTED, &mut host).unwrap();
    let ids = function_ids(&vm);
    vm.load_module("other", "function f() { return 1; }", &mut host).unwrap();

    assert!(vm.heap().is_live(first));
    assert!(ids.iter().all(|&id| vm.heap().is_live(id)));
    let core_class = vm.core().variable("Object").unwrap().ref_id().unwrap();
    assert!(vm.heap().is_live(core_class));
}

#[test]
fn reload_replaces_the_top_fiber() {
    let mut vm = Vm::new();
    let mut host = CollectHost::new();
    let first = vm.load_module("main", "var a;", &mut host).unwrap();
    let second = vm.load_module("main", "a = 1;", &mut host).unwrap();
    assert_ne!(first, second);
    assert_eq!(vm.module("main").unwrap().top_fiber, Some(second));

    vm.collect_garbage();
    assert!(!vm.heap().is_live(first));
    assert!(vm.heap().is_live(second));
}

#[test]
fn tracer_sees_each_function() {
    let tracer = RecordingTracer::new();
    let mut vm = Vm::with_tracker(NoLimitTracker, VmConfig::new(), tracer).unwrap();
    vm.load_module("main", "function f() {}", &mut CollectHost::new()).unwrap();
    assert_eq!(
        vm.into_tracer().into_events(),
        vec![
            TraceEvent::ModuleStart {
                module: "main".to_owned()
            },
            TraceEvent::FunctionStart { depth: 0 },
            TraceEvent::FunctionStart { depth: 1 },
            TraceEvent::FunctionEnd {
                name: "f".to_owned(),
                code_len: 3,
                max_stack: 1
            },
            TraceEvent::FunctionEnd {
                name: "(module)".to_owned(),
                code_len: 8,
                max_stack: 1
            },
            TraceEvent::ModuleLoaded {
                module: "main".to_owned(),
                variables: chalk::CORE_CLASSES.len() + 1
            },
        ]
    );
}

#[test]
fn debug_compiler_disassembles_each_function() {
    let mut vm = Vm::with_config(VmConfig::new().debug_compiler(true));
    let mut host = CollectHost::new();
    vm.load_module("main", "1 + 2;", &mut host).unwrap();
    assert_eq!(
        host.output(),
        "\
(module) (1): 7 bytes, 0 constants, max stack 2, 0 upvalues
0000    1 Literal1
0001    | Literal2
0002    | Call1 0 '__add@1'
0005    | Pop
0006    2 End
"
    );
}

#[test]
fn nested_functions_are_dumped_before_their_parent() {
    let mut vm = Vm::with_config(VmConfig::new().debug_compiler(true));
    let mut host = CollectHost::new();
    vm.load_module("main", "function f(x) { return x; }", &mut host).unwrap();
    let output = host.output();
    let f = output.find("f (1):").expect("f is dumped");
    let module = output.find("(module) (1):").expect("top level is dumped");
    assert!(f < module, "{output}");
    assert!(output.contains("0000    1 Closure 0 (fn f)\n"), "{output}");
    assert!(output.contains("| StoreModuleVariable 13 'f'\n"), "{output}");
}

#[test]
fn dump_function_on_request() {
    let mut vm = Vm::new();
    let mut host = CollectHost::new();
    let function = vm.compile_module("main", "var a = 300;", &mut host).unwrap();
    vm.dump_function(function, &mut host);
    assert!(host.output().contains("0000    1 Constant 0 (300)\n"), "{}", host.output());
}

#[test]
fn stack_trace_of_a_fresh_fiber() {
    let mut vm = Vm::new();
    let mut host = CollectHost::new();
    vm.load_module("lib", "var x;", &mut host).unwrap();
    let fiber = vm.load_module("main", "\n\nvar a = 1;", &mut host).unwrap();
    vm.stack_trace(fiber, &mut host);
    assert_eq!(host.errors().len(), 1);
    let frame = &host.errors()[0];
    assert_eq!(frame.report, Report::StackTrace);
    assert_eq!(frame.module, "main");
    assert_eq!(frame.line, 3);
    assert_eq!(frame.message, "main:3 in (module)");
}

#[test]
fn frozen_modules_move_between_vms() {
    let mut vm = Vm::new();
    let mut host = CollectHost::new();
    vm.load_module("main", NESTED, &mut host).unwrap();
    let bytes = vm.freeze_module("main").unwrap().dump().unwrap();

    let mut other = Vm::with_config(VmConfig::new().gc_threshold(0));
    let fiber = other.thaw_bytes(&bytes).unwrap();
    other.collect_garbage();
    assert!(function_ids(&other).iter().all(|&id| other.heap().is_live(id)));

    other.stack_trace(fiber, &mut host);
    assert_eq!(host.errors()[0].message, "main:1 in (module)");

    // freezing the thawed copy gives back the same module
    let again = other.freeze_module("main").unwrap();
    assert_eq!(again, FrozenModule::load(&bytes).unwrap());
}

#[test]
fn heap_stats_count_compiled_objects() {
    let mut vm = Vm::new();
    vm.load_module("main", "function f() {}", &mut CollectHost::new()).unwrap();
    let stats = vm.heap_stats();
    assert_eq!(stats.objects_by_type.get("Class"), Some(&chalk::CORE_CLASSES.len()));
    assert_eq!(stats.objects_by_type.get("Function"), Some(&2));
    assert_eq!(stats.objects_by_type.get("Closure"), Some(&1));
    assert_eq!(stats.objects_by_type.get("Fiber"), Some(&1));
}
