use std::fmt;

/// Error returned when a resource limit is exceeded while allocating heap objects.
///
/// The compiler surfaces these through its error channel as allocation failures;
/// they never abort the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Maximum number of allocations exceeded.
    Allocation { limit: usize, count: usize },
    /// Maximum memory usage exceeded.
    Memory { limit: usize, used: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { limit, count } => {
                write!(f, "allocation limit exceeded: {count} > {limit}")
            }
            Self::Memory { limit, used } => {
                write!(f, "memory limit exceeded: {used} bytes > {limit} bytes")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

/// Trait for tracking heap usage and scheduling garbage collection.
///
/// The heap calls `on_allocate` before every allocation and `on_free` for every
/// object reclaimed by the collector. `should_collect` decides when the next
/// allocation should first run a collection.
pub trait ResourceTracker: fmt::Debug {
    /// Called before each heap allocation.
    ///
    /// Returns `Ok(())` if the allocation should proceed, or `Err(ResourceError)`
    /// if a limit would be exceeded.
    ///
    /// # Arguments
    /// * `get_size` - Lazily computes the approximate size in bytes of the allocation
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError>;

    /// Called when an object is reclaimed by the collector.
    fn on_free(&mut self, get_size: impl FnOnce() -> usize);

    /// Returns whether a collection should run before the next allocation.
    ///
    /// # Arguments
    /// * `bytes_since_gc` - Bytes allocated since the last collection
    /// * `allocations_since_gc` - Objects allocated since the last collection
    /// * `threshold` - The configured byte threshold
    fn should_collect(&self, bytes_since_gc: usize, allocations_since_gc: usize, threshold: usize) -> bool {
        let _ = allocations_since_gc;
        bytes_since_gc >= threshold
    }

    /// Returns the total number of allocations tracked, if this tracker records them.
    fn allocation_count(&self) -> Option<usize> {
        None
    }

    /// Returns the current approximate memory usage in bytes, if tracked.
    fn current_memory_bytes(&self) -> Option<usize> {
        None
    }
}

/// A tracker that never refuses an allocation.
///
/// Collections are still scheduled by the byte threshold the VM is configured with.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    #[inline]
    fn on_allocate(&mut self, _get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn on_free(&mut self, _get_size: impl FnOnce() -> usize) {}
}

/// Configuration for resource limits.
///
/// All limits are optional - set to `None` to disable a specific limit.
/// Use `ResourceLimits::default()` for no limits, or build custom limits
/// with the builder pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    /// Maximum number of heap allocations allowed.
    pub max_allocations: Option<usize>,
    /// Maximum heap memory in bytes (approximate).
    pub max_memory: Option<usize>,
    /// Run garbage collection every N allocations, regardless of the byte threshold.
    pub gc_interval: Option<usize>,
}

impl ResourceLimits {
    /// Creates a new ResourceLimits with all limits disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of allocations.
    #[must_use]
    pub fn max_allocations(mut self, limit: usize) -> Self {
        self.max_allocations = Some(limit);
        self
    }

    /// Sets the maximum memory usage in bytes.
    #[must_use]
    pub fn max_memory(mut self, limit: usize) -> Self {
        self.max_memory = Some(limit);
        self
    }

    /// Sets the garbage collection interval (run GC every N allocations).
    #[must_use]
    pub fn gc_interval(mut self, interval: usize) -> Self {
        self.gc_interval = Some(interval);
        self
    }
}

/// A resource tracker that enforces configurable limits.
///
/// Tracks allocation count and memory usage, returning errors when limits are
/// exceeded. Also schedules garbage collection every `gc_interval` allocations
/// when one is configured.
#[derive(Debug, Clone)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    /// Total number of allocations made.
    allocation_count: usize,
    /// Current approximate memory usage in bytes.
    current_memory: usize,
}

impl LimitedTracker {
    /// Creates a new LimitedTracker with the given limits.
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            allocation_count: 0,
            current_memory: 0,
        }
    }

    /// Returns the configured limits.
    #[must_use]
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_allocations
            && self.allocation_count >= max
        {
            return Err(ResourceError::Allocation {
                limit: max,
                count: self.allocation_count + 1,
            });
        }

        let size = get_size();
        if let Some(max) = self.limits.max_memory {
            let new_memory = self.current_memory + size;
            if new_memory > max {
                return Err(ResourceError::Memory {
                    limit: max,
                    used: new_memory,
                });
            }
        }

        self.allocation_count += 1;
        self.current_memory += size;
        Ok(())
    }

    fn on_free(&mut self, get_size: impl FnOnce() -> usize) {
        self.current_memory = self.current_memory.saturating_sub(get_size());
    }

    fn should_collect(&self, bytes_since_gc: usize, allocations_since_gc: usize, threshold: usize) -> bool {
        if let Some(interval) = self.limits.gc_interval
            && allocations_since_gc >= interval
        {
            return true;
        }
        bytes_since_gc >= threshold
    }

    fn allocation_count(&self) -> Option<usize> {
        Some(self.allocation_count)
    }

    fn current_memory_bytes(&self) -> Option<usize> {
        Some(self.current_memory)
    }
}
