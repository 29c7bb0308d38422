#![doc = include_str!("../../../README.md")]
// first so every later module can allocate
mod heap;

pub mod ast;
pub mod bytecode;
mod compiler;
mod config;
mod error;
mod freeze;
mod intern;
mod io;
pub mod lexer;
mod object;
pub mod parser;
mod resource;
mod stack;
pub mod tracer;
mod value;
mod vm;

pub use crate::{
    compiler::{
        CompileEnv, MAX_ARGUMENTS, MAX_FIELDS, MAX_FUNCTION_DEPTH, MAX_LOCALS, MAX_MODULE_VARIABLES, MAX_UPVALUES,
        MODULE_FUNCTION_NAME, Signature, binary_operator, compile, unary_operator,
    },
    config::{CompileFlags, DEFAULT_GC_THRESHOLD, VmConfig},
    error::{CompileError, CompileErrorKind, MAX_NAME, render_message},
    freeze::{FreezeError, FrozenConstant, FrozenFunction, FrozenModule},
    heap::{Heap, HeapData, HeapId, HeapStats},
    intern::{StringId, StringTable},
    io::{CollectHost, CollectedError, Host, NoHost, Report, StdHost},
    object::{CallFrame, Class, Closure, Fiber, Function, FunctionDebug, Module, ModuleId},
    resource::{LimitedTracker, NoLimitTracker, ResourceError, ResourceLimits, ResourceTracker},
    tracer::{CompileTracer, NoopTracer, RecordingTracer, StderrTracer, TraceEvent},
    value::Value,
    vm::{CORE_CLASSES, CORE_MODULE_NAME, Vm},
};
