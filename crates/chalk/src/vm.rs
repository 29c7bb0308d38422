//! The VM: module dictionary, heap and the module loader.
//!
//! The interpreter proper is not part of this crate. `Vm` owns what the
//! compiler needs around it: the heap every compiled object lives in, the
//! core module that seeds each new module, and the named modules themselves.

use indexmap::IndexMap;

use crate::{
    bytecode,
    compiler::{CompileEnv, compile},
    config::VmConfig,
    error::{CompileError, CompileErrorKind},
    heap::{Heap, HeapData, HeapId, HeapStats},
    io::{Host, Report},
    object::{Class, Closure, Fiber, Function, Module, ModuleId},
    resource::{LimitedTracker, NoLimitTracker, ResourceError, ResourceTracker},
    tracer::{CompileTracer, NoopTracer},
    value::Value,
};

/// Name of the module holding the builtin classes.
pub const CORE_MODULE_NAME: &str = "core";

/// Builtin classes every module starts with, in slot order. `Object` comes
/// first and is the superclass of the rest.
pub const CORE_CLASSES: &[&str] = &[
    "Object", "Class", "Null", "Bool", "Int", "String", "Function", "List", "Dict", "Range", "Fiber", "Module", "Core",
];

/// A compiler host VM.
///
/// # Example
///
/// ```ignore
/// let mut vm = Vm::new();
/// let fiber = vm.load_module("main", "var a = 3;", &mut StdHost)?;
/// ```
#[derive(Debug)]
pub struct Vm<T: ResourceTracker = NoLimitTracker, Tr: CompileTracer = NoopTracer> {
    core: Module,
    modules: IndexMap<String, Module>,
    heap: Heap<T>,
    /// Objects the embedder keeps alive across allocations.
    working_roots: Vec<HeapId>,
    config: VmConfig,
    tracer: Tr,
    last_error: Option<CompileError>,
}

impl Vm {
    /// Creates a VM with no resource limits and the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    #[must_use]
    pub fn with_config(config: VmConfig) -> Self {
        Self::with_tracker(NoLimitTracker, config, NoopTracer).expect("unlimited heap refuses no allocation")
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm<LimitedTracker> {
    /// Creates a VM whose heap enforces `config.limits`.
    pub fn limited(config: VmConfig) -> Result<Self, ResourceError> {
        let tracker = LimitedTracker::new(config.limits.clone());
        Self::with_tracker(tracker, config, NoopTracer)
    }
}

impl<T: ResourceTracker, Tr: CompileTracer> Vm<T, Tr> {
    /// Creates a VM with an explicit tracker and tracer.
    ///
    /// Fails only if the tracker refuses the core classes.
    pub fn with_tracker(tracker: T, config: VmConfig, tracer: Tr) -> Result<Self, ResourceError> {
        let mut vm = Self {
            core: Module::new(CORE_MODULE_NAME),
            modules: IndexMap::new(),
            heap: Heap::new(tracker, config.gc_threshold),
            working_roots: Vec::new(),
            config,
            tracer,
            last_error: None,
        };
        vm.seed_core()?;
        Ok(vm)
    }

    fn seed_core(&mut self) -> Result<(), ResourceError> {
        let mut object = None;
        for &name in CORE_CLASSES {
            let class = Class {
                name: name.to_owned(),
                superclass: object,
                field_count: 0,
            };
            let id = self.allocate(HeapData::Class(class), &[])?;
            object.get_or_insert(id);
            self.core.add_variable(name, Value::Ref(id));
        }
        Ok(())
    }

    /// Compiles `source` as module `name` and wraps it in a fiber ready to run.
    ///
    /// A new module starts with a copy of every core variable. Loading an
    /// existing module compiles into it again, so earlier declarations stay
    /// visible. On failure every module variable the failed load declared is
    /// removed again; interned strings are kept.
    pub fn load_module(&mut self, name: &str, source: &str, host: &mut dyn Host) -> Result<HeapId, CompileError> {
        self.load_module_at(name, source, 1, host)
    }

    /// Like [`Vm::load_module`], numbering source lines from `first_line`.
    pub fn load_module_at(
        &mut self,
        name: &str,
        source: &str,
        first_line: u32,
        host: &mut dyn Host,
    ) -> Result<HeapId, CompileError> {
        let index = self.ensure_module(name);
        let snapshot = self.modules[index].variable_count();

        let result = self
            .compile_at(index, source, first_line, host)
            .and_then(|function| self.wrap_in_fiber(index, function, host));
        match result {
            Ok(fiber) => {
                let module = &mut self.modules[index];
                module.top_fiber = Some(fiber);
                self.tracer.on_module_loaded(&module.name, module.variable_count());
                Ok(fiber)
            }
            Err(err) => {
                self.modules[index].truncate_variables(snapshot);
                Err(err)
            }
        }
    }

    /// Compiles `source` into module `name` and returns its top-level function.
    ///
    /// Unlike [`Vm::load_module`] nothing references the function afterwards:
    /// push it with [`Vm::push_root`] before the next allocation to keep it.
    pub fn compile_module(&mut self, name: &str, source: &str, host: &mut dyn Host) -> Result<HeapId, CompileError> {
        let index = self.ensure_module(name);
        self.compile_at(index, source, 1, host)
    }

    fn ensure_module(&mut self, name: &str) -> usize {
        if let Some(index) = self.modules.get_index_of(name) {
            return index;
        }
        let mut module = Module::new(name);
        for (id, variable) in self.core.variable_names.iter() {
            module.add_variable(variable, self.core.variables[id.index()]);
        }
        self.modules.insert_full(name.to_owned(), module).0
    }

    fn compile_at(&mut self, index: usize, source: &str, first_line: u32, host: &mut dyn Host) -> CompileResult {
        let roots = self.roots_except(Some(index));
        let (_, module) = self.modules.get_index_mut(index).expect("module index from ensure_module");
        let env = CompileEnv {
            heap: &mut self.heap,
            tracer: &mut self.tracer,
            host,
            flags: self.config.flags,
            roots: &roots,
        };
        let result = compile(module, ModuleId::new(index), source, first_line, env);
        if let Err(err) = &result {
            self.last_error = Some(err.clone());
        }
        result
    }

    fn wrap_in_fiber(&mut self, index: usize, function: HeapId, host: &mut dyn Host) -> CompileResult {
        let closure = Closure {
            function,
            upvalues: Vec::new(),
        };
        let wrapped = self
            .allocate(HeapData::Closure(closure), &[function])
            .and_then(|closure| self.allocate(HeapData::Fiber(Fiber::new(closure)), &[closure]));
        wrapped.map_err(|err| {
            let err = CompileError::out_of_memory(self.modules[index].name.as_str(), 0, &err);
            if self.config.flags.print_errors {
                host.error(Report::Compile(err.kind), &err.module, err.line, &err.message);
            }
            self.tracer.on_error(CompileErrorKind::Allocation, 0);
            self.last_error = Some(err.clone());
            err
        })
    }

    /// Allocates `data`, first collecting if the heap asks for it.
    ///
    /// `pending` lists objects not yet reachable from any root that must survive.
    pub(crate) fn allocate(&mut self, data: HeapData, pending: &[HeapId]) -> Result<HeapId, ResourceError> {
        if self.heap.should_collect() {
            let mut roots = self.roots_except(None);
            roots.extend_from_slice(pending);
            self.collect_with(roots);
        }
        self.heap.allocate(data)
    }

    /// Every root outside the module at `skip`.
    fn roots_except(&self, skip: Option<usize>) -> Vec<HeapId> {
        let mut roots: Vec<HeapId> = self.core.heap_refs().collect();
        for (index, module) in self.modules.values().enumerate() {
            if Some(index) != skip {
                roots.extend(module.heap_refs());
            }
        }
        roots.extend(self.working_roots.iter().copied());
        roots
    }

    fn collect_with(&mut self, roots: Vec<HeapId>) {
        let before = self.heap.live_count();
        self.heap.collect_garbage(roots);
        self.tracer.on_gc(before, self.heap.live_count());
    }

    /// Runs a full collection rooted at the modules and the working roots.
    pub fn collect_garbage(&mut self) {
        let roots = self.roots_except(None);
        self.collect_with(roots);
    }

    /// Keeps `id` alive until the matching [`Vm::pop_root`].
    pub fn push_root(&mut self, id: HeapId) {
        self.working_roots.push(id);
    }

    pub fn pop_root(&mut self) -> Option<HeapId> {
        self.working_roots.pop()
    }

    // === Accessors ===

    #[must_use]
    pub fn core(&self) -> &Module {
        &self.core
    }

    #[must_use]
    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    #[must_use]
    pub fn module_by_id(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get_index(id.index()).map(|(_, module)| module)
    }

    #[must_use]
    pub fn module_id(&self, name: &str) -> Option<ModuleId> {
        self.modules.get_index_of(name).map(ModuleId::new)
    }

    /// Module names in load order.
    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Installs `module` under its own name, replacing nothing.
    pub(crate) fn insert_module(&mut self, module: Module) -> Option<ModuleId> {
        if self.modules.contains_key(&module.name) {
            return None;
        }
        let (index, _) = self.modules.insert_full(module.name.clone(), module);
        Some(ModuleId::new(index))
    }

    #[must_use]
    pub fn heap(&self) -> &Heap<T> {
        &self.heap
    }

    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    #[must_use]
    pub fn function(&self, id: HeapId) -> Option<&Function> {
        self.heap.function(id)
    }

    /// The top-level function of the fiber created by the last successful load of `name`.
    #[must_use]
    pub fn module_function(&self, name: &str) -> Option<&Function> {
        let fiber = self.heap.fiber(self.module(name)?.top_fiber?)?;
        let closure = self.heap.closure(fiber.frames.first()?.closure)?;
        self.heap.function(closure.function)
    }

    /// The first error of the most recent failed compile.
    #[must_use]
    pub fn last_error(&self) -> Option<&CompileError> {
        self.last_error.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    pub fn into_tracer(self) -> Tr {
        self.tracer
    }

    // === Debugging ===

    /// Disassembles the function `id` to `host.write`.
    pub fn dump_function(&self, id: HeapId, host: &mut dyn Host) {
        let Some(function) = self.heap.function(id) else {
            return;
        };
        if let Some(module) = self.module_by_id(function.module) {
            bytecode::dump_function(function, module, &self.heap, host);
        }
    }

    /// Reports the frames of `fiber` to `host.error`, innermost first.
    pub fn stack_trace(&self, fiber: HeapId, host: &mut dyn Host) {
        if let Some(fiber) = self.heap.fiber(fiber) {
            bytecode::stack_trace(&self.heap, &self.modules, fiber, host);
        }
    }
}

type CompileResult = Result<HeapId, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::NoHost;

    #[test]
    fn new_modules_start_with_the_core_classes() {
        let mut vm = Vm::new();
        vm.load_module("main", "", &mut NoHost).unwrap();
        let module = vm.module("main").unwrap();
        assert_eq!(module.variable_count(), CORE_CLASSES.len());
        assert_eq!(module.find_variable("Object"), Some(0));
        assert_eq!(module.variable("List"), vm.core().variable("List"));
    }

    #[test]
    fn failed_reload_rolls_back_its_declarations() {
        let mut vm = Vm::new();
        vm.load_module("main", "var a = 1;", &mut NoHost).unwrap();
        let err = vm.load_module("main", "var b = 2; var c = 3; var b;", &mut NoHost).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Duplicate);
        let module = vm.module("main").unwrap();
        assert!(module.find_variable("a").is_some());
        assert_eq!(module.find_variable("b"), None);
        assert_eq!(module.find_variable("c"), None);
        assert_eq!(vm.last_error(), Some(&err));
    }

    #[test]
    fn reload_sees_earlier_declarations() {
        let mut vm = Vm::new();
        vm.load_module("main", "var a = 1;", &mut NoHost).unwrap();
        vm.load_module("main", "a = a + 1;", &mut NoHost).unwrap();
        assert_eq!(vm.module_names().collect::<Vec<_>>(), ["main"]);
    }

    #[test]
    fn roots_keep_compiled_functions_alive() {
        let mut vm = Vm::new();
        let function = vm.compile_module("main", "function f() {}", &mut NoHost).unwrap();
        vm.push_root(function);
        vm.collect_garbage();
        assert!(vm.heap().is_live(function));
        assert_eq!(vm.pop_root(), Some(function));
        vm.collect_garbage();
        assert!(!vm.heap().is_live(function));
    }
}
