//! Serialized compiled modules.
//!
//! A [`FrozenModule`] holds what is needed to recreate a module's top-level
//! function in another VM without recompiling. That is the string pool the
//! bytecode's symbols index, the module variable names in slot order, and
//! the function tree with nested functions inlined where the constant pool
//! referenced them on the heap.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    heap::{Heap, HeapData, HeapId},
    intern::StringTable,
    object::{Closure, Fiber, Function, FunctionDebug, Module, ModuleId},
    resource::{ResourceError, ResourceTracker},
    tracer::CompileTracer,
    value::Value,
    vm::Vm,
};

/// A compiled module detached from any heap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenModule {
    pub name: String,
    /// The module's string pool, indexed by symbol operands.
    pub strings: Vec<String>,
    /// Module variable names, indexed by `LoadModuleVariable` operands.
    pub variable_names: Vec<String>,
    pub function: FrozenFunction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenFunction {
    pub code: Vec<u8>,
    pub constants: Vec<FrozenConstant>,
    pub upvalue_count: usize,
    pub max_stack: u32,
    pub arity: u8,
    pub debug: FunctionDebug,
}

/// A constant pool entry. Nested functions are stored inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrozenConstant {
    Null,
    Bool(bool),
    Int(i64),
    Function(FrozenFunction),
}

/// Why a module could not be frozen or thawed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreezeError {
    UnknownModule(String),
    /// The module exists but has no successfully loaded top-level function.
    NotLoaded(String),
    /// A constant pool held something other than a number or a function.
    Unfreezable { function: String },
    /// Thawing never replaces a module already present in the VM.
    ModuleExists(String),
    Resource(ResourceError),
    Decode(postcard::Error),
}

impl fmt::Display for FreezeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownModule(name) => write!(f, "no module named '{name}'"),
            Self::NotLoaded(name) => write!(f, "module '{name}' has not been loaded"),
            Self::Unfreezable { function } => write!(f, "function '{function}' has a constant that cannot be frozen"),
            Self::ModuleExists(name) => write!(f, "module '{name}' already exists"),
            Self::Resource(err) => write!(f, "{err}"),
            Self::Decode(err) => write!(f, "corrupt frozen module: {err}"),
        }
    }
}

impl std::error::Error for FreezeError {}

impl From<ResourceError> for FreezeError {
    fn from(err: ResourceError) -> Self {
        Self::Resource(err)
    }
}

impl FrozenModule {
    /// Serializes the module to postcard bytes.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Deserializes a module written by [`FrozenModule::dump`].
    ///
    /// # Errors
    /// Returns an error if deserialization fails.
    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

fn freeze_function<T: ResourceTracker>(heap: &Heap<T>, function: &Function) -> Result<FrozenFunction, FreezeError> {
    let unfreezable = || FreezeError::Unfreezable {
        function: function.debug.name.clone(),
    };
    let constants = function
        .constants
        .iter()
        .map(|value| match *value {
            Value::Null => Ok(FrozenConstant::Null),
            Value::Bool(b) => Ok(FrozenConstant::Bool(b)),
            Value::Int(i) => Ok(FrozenConstant::Int(i)),
            Value::Ref(id) => match heap.function(id) {
                Some(nested) => freeze_function(heap, nested).map(FrozenConstant::Function),
                None => Err(unfreezable()),
            },
            Value::Undefined => Err(unfreezable()),
        })
        .collect::<Result<_, _>>()?;
    Ok(FrozenFunction {
        code: function.code.clone(),
        constants,
        upvalue_count: function.upvalue_count,
        max_stack: function.max_stack,
        arity: function.arity,
        debug: function.debug.clone(),
    })
}

impl<T: ResourceTracker, Tr: CompileTracer> Vm<T, Tr> {
    /// Captures the top-level function of the last successful load of `name`.
    pub fn freeze_module(&self, name: &str) -> Result<FrozenModule, FreezeError> {
        let module = self
            .module(name)
            .ok_or_else(|| FreezeError::UnknownModule(name.to_owned()))?;
        let function = self
            .module_function(name)
            .ok_or_else(|| FreezeError::NotLoaded(name.to_owned()))?;
        Ok(FrozenModule {
            name: module.name.clone(),
            strings: module.strings.clone().into(),
            variable_names: module.variable_names.clone().into(),
            function: freeze_function(self.heap(), function)?,
        })
    }

    /// Recreates `frozen` as a new module and returns a fiber ready to run it.
    ///
    /// Variables named like a core class start bound to it; the rest start
    /// undefined, exactly as after a fresh compile.
    pub fn thaw_module(&mut self, frozen: &FrozenModule) -> Result<HeapId, FreezeError> {
        if self.module(&frozen.name).is_some() {
            return Err(FreezeError::ModuleExists(frozen.name.clone()));
        }
        let module_id = ModuleId::new(self.module_names().count());

        let mut pending = Vec::new();
        let function = self.thaw_function(&frozen.function, module_id, &mut pending)?;
        let closure = Closure {
            function,
            upvalues: Vec::new(),
        };
        let closure = self.allocate(HeapData::Closure(closure), &pending)?;
        let fiber = self.allocate(HeapData::Fiber(Fiber::new(closure)), &[closure])?;

        let mut module = Module::new(frozen.name.as_str());
        for name in &frozen.variable_names {
            let value = self.core().variable(name).unwrap_or(Value::Undefined);
            module.add_variable(name, value);
        }
        module.strings = StringTable::from(frozen.strings.clone());
        module.top_fiber = Some(fiber);
        let inserted = self.insert_module(module);
        debug_assert_eq!(inserted, Some(module_id));
        Ok(fiber)
    }

    /// Allocates `frozen` and its nested functions, innermost first.
    ///
    /// Every allocated id is appended to `pending` so later allocations keep it alive.
    fn thaw_function(
        &mut self,
        frozen: &FrozenFunction,
        module: ModuleId,
        pending: &mut Vec<HeapId>,
    ) -> Result<HeapId, ResourceError> {
        let mut constants = Vec::with_capacity(frozen.constants.len());
        for constant in &frozen.constants {
            constants.push(match constant {
                FrozenConstant::Null => Value::Null,
                FrozenConstant::Bool(b) => Value::Bool(*b),
                FrozenConstant::Int(i) => Value::Int(*i),
                FrozenConstant::Function(nested) => Value::Ref(self.thaw_function(nested, module, pending)?),
            });
        }
        let function = Function {
            code: frozen.code.clone(),
            constants,
            module,
            upvalue_count: frozen.upvalue_count,
            max_stack: frozen.max_stack,
            arity: frozen.arity,
            debug: frozen.debug.clone(),
        };
        let id = self.allocate(HeapData::Function(function), pending)?;
        pending.push(id);
        Ok(id)
    }

    /// Thaws `bytes` written by [`FrozenModule::dump`].
    pub fn thaw_bytes(&mut self, bytes: &[u8]) -> Result<HeapId, FreezeError> {
        let frozen = FrozenModule::load(bytes).map_err(FreezeError::Decode)?;
        self.thaw_module(&frozen)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::io::NoHost;

    const SOURCE: &str = "var a = 7;\nfunction add(x) { return x + a; }\nvar b = add(1);\n";

    #[test]
    fn thawed_module_matches_the_compiled_one() {
        let mut vm = Vm::new();
        vm.load_module("main", SOURCE, &mut NoHost).unwrap();
        let bytes = vm.freeze_module("main").unwrap().dump().unwrap();

        let mut other = Vm::new();
        let frozen = FrozenModule::load(&bytes).unwrap();
        other.thaw_module(&frozen).unwrap();

        let original = vm.module_function("main").unwrap();
        let thawed = other.module_function("main").unwrap();
        assert_eq!(thawed.code, original.code);
        assert_eq!(thawed.debug, original.debug);
        assert_eq!(
            other.module("main").unwrap().find_variable("add"),
            vm.module("main").unwrap().find_variable("add")
        );
        let nested = thawed.constants.iter().find_map(|c| c.ref_id()).unwrap();
        assert_eq!(other.function(nested).unwrap().debug.name, "add");
        assert_eq!(other.module("main").unwrap().variable("Object"), other.core().variable("Object"));
    }

    #[test]
    fn thawing_never_replaces_a_module() {
        let mut vm = Vm::new();
        vm.load_module("main", SOURCE, &mut NoHost).unwrap();
        let frozen = vm.freeze_module("main").unwrap();
        assert_eq!(vm.thaw_module(&frozen), Err(FreezeError::ModuleExists("main".to_owned())));
    }

    #[test]
    fn freezing_requires_a_loaded_module() {
        let mut vm = Vm::new();
        assert_eq!(vm.freeze_module("main"), Err(FreezeError::UnknownModule("main".to_owned())));
        vm.compile_module("main", "var a;", &mut NoHost).unwrap();
        assert_eq!(vm.freeze_module("main"), Err(FreezeError::NotLoaded("main".to_owned())));
    }

    #[test]
    fn corrupt_bytes_are_rejected() {
        let mut vm = Vm::new();
        let err = vm.thaw_bytes(&[0xFF, 0xFF, 0xFF]).unwrap_err();
        assert!(matches!(err, FreezeError::Decode(_)));
        assert_eq!(vm.module_names().count(), 0);
    }
}
