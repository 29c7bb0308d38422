use crate::resource::ResourceLimits;

/// Default number of bytes allocated between collections.
pub const DEFAULT_GC_THRESHOLD: usize = 1024 * 1024;

/// Switches that change what the compiler reports and emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileFlags {
    /// Forward compile errors to the host's `error` callback.
    pub print_errors: bool,
    /// Disassemble every compiled function to the host's `write` callback.
    pub debug_compiler: bool,
    /// Interactive mode: expression statements print their value through
    /// `Core.repr@1` before it is discarded.
    pub print_expressions: bool,
}

impl Default for CompileFlags {
    fn default() -> Self {
        Self {
            print_errors: true,
            debug_compiler: false,
            print_expressions: false,
        }
    }
}

/// Configuration for a [`Vm`](crate::Vm).
///
/// ```ignore
/// let config = VmConfig::new().gc_threshold(64 * 1024).debug_compiler(true);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    pub flags: CompileFlags,
    /// Bytes allocated since the last collection that trigger the next one.
    pub gc_threshold: usize,
    /// Limits applied when the VM uses a [`LimitedTracker`](crate::LimitedTracker).
    pub limits: ResourceLimits,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            flags: CompileFlags::default(),
            gc_threshold: DEFAULT_GC_THRESHOLD,
            limits: ResourceLimits::new(),
        }
    }
}

impl VmConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn print_errors(mut self, enabled: bool) -> Self {
        self.flags.print_errors = enabled;
        self
    }

    #[must_use]
    pub fn debug_compiler(mut self, enabled: bool) -> Self {
        self.flags.debug_compiler = enabled;
        self
    }

    #[must_use]
    pub fn print_expressions(mut self, enabled: bool) -> Self {
        self.flags.print_expressions = enabled;
        self
    }

    #[must_use]
    pub fn gc_threshold(mut self, bytes: usize) -> Self {
        self.gc_threshold = bytes;
        self
    }

    #[must_use]
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }
}
