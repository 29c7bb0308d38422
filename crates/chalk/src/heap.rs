use std::collections::BTreeMap;

use strum::IntoStaticStr;

use crate::{
    object::{Class, Closure, Fiber, Function},
    resource::{ResourceError, ResourceTracker},
    value::Value,
};

/// Unique identifier for values stored inside the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct HeapId(usize);

impl HeapId {
    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Payload of a heap slot.
#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
pub enum HeapData {
    Str(String),
    Function(Function),
    Closure(Closure),
    Fiber(Fiber),
    Class(Class),
}

impl HeapData {
    /// Approximate size in bytes, reported to the resource tracker.
    #[must_use]
    pub fn estimate_size(&self) -> usize {
        let payload = match self {
            Self::Str(s) => s.len(),
            Self::Function(f) => f.estimate_size(),
            Self::Closure(c) => c.upvalues.len() * size_of::<Value>(),
            Self::Fiber(f) => f.stack.len() * size_of::<Value>() + f.frames.len() * 24,
            Self::Class(c) => c.name.len(),
        };
        size_of::<Self>() + payload
    }

    /// Pushes every heap id this object references onto `work_list`.
    fn collect_child_ids(&self, work_list: &mut Vec<HeapId>) {
        match self {
            Self::Str(_) => {}
            Self::Function(f) => work_list.extend(f.constants.iter().filter_map(|v| v.ref_id())),
            Self::Closure(c) => {
                work_list.push(c.function);
                work_list.extend(c.upvalues.iter().filter_map(|v| v.ref_id()));
            }
            Self::Fiber(f) => {
                work_list.extend(f.stack.iter().filter_map(|v| v.ref_id()));
                work_list.extend(f.frames.iter().map(|frame| frame.closure));
            }
            Self::Class(c) => work_list.extend(c.superclass),
        }
    }
}

/// Snapshot of heap state at a point in time.
///
/// The `objects_by_type` map uses `BTreeMap` for deterministic iteration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Total number of live objects on the heap.
    pub live_objects: usize,
    /// Number of free (recycled) slots available for reuse.
    pub free_slots: usize,
    /// Total heap capacity (live + free).
    pub total_slots: usize,
    /// Breakdown of live objects by `HeapData` variant name.
    pub objects_by_type: BTreeMap<&'static str, usize>,
    /// Bytes allocated since the last collection.
    pub bytes_since_gc: usize,
    /// Resource tracker allocation count, if the tracker records it.
    pub tracker_allocations: Option<usize>,
    /// Resource tracker memory usage in bytes, if the tracker records it.
    pub tracker_memory_bytes: Option<usize>,
}

/// Mark-and-sweep arena backing every heap-allocated runtime value.
///
/// Freed slots go onto a free list and are reused by later allocations. The heap
/// never collects on its own: the VM asks [`Heap::should_collect`] before each
/// allocation and runs [`Heap::collect_garbage`] with the complete root set,
/// which includes whatever the compiler is holding mid-build.
///
/// Generic over `T: ResourceTracker`; with `NoLimitTracker` all limit checks
/// compile away.
#[derive(Debug)]
pub struct Heap<T: ResourceTracker> {
    entries: Vec<Option<HeapData>>,
    /// IDs of freed slots available for reuse. Populated by the sweep, consumed by `allocate`.
    free_list: Vec<HeapId>,
    tracker: T,
    bytes_since_gc: usize,
    allocations_since_gc: usize,
    /// Byte count after which the next allocation should first collect.
    gc_threshold: usize,
}

impl<T: ResourceTracker> Heap<T> {
    #[must_use]
    pub fn new(tracker: T, gc_threshold: usize) -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            tracker,
            bytes_since_gc: 0,
            allocations_since_gc: 0,
            gc_threshold,
        }
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Returns true when the next allocation should be preceded by a collection.
    #[must_use]
    pub fn should_collect(&self) -> bool {
        self.tracker
            .should_collect(self.bytes_since_gc, self.allocations_since_gc, self.gc_threshold)
    }

    /// Allocates a new heap entry.
    ///
    /// Returns `Err(ResourceError)` if the allocation would exceed configured limits.
    pub fn allocate(&mut self, data: HeapData) -> Result<HeapId, ResourceError> {
        let size = data.estimate_size();
        self.tracker.on_allocate(|| size)?;
        self.bytes_since_gc += size;
        self.allocations_since_gc += 1;

        let id = if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(data);
            id
        } else {
            self.entries.push(Some(data));
            HeapId(self.entries.len() - 1)
        };
        Ok(id)
    }

    /// Returns the live object at `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was freed. Holding a freed id means a root was missed.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.get_if_live(id).expect("Heap::get: object already freed")
    }

    #[must_use]
    pub fn get_if_live(&self, id: HeapId) -> Option<&HeapData> {
        self.entries.get(id.index()).and_then(Option::as_ref)
    }

    /// # Panics
    ///
    /// Panics if `id` was freed.
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.entries
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .expect("Heap::get_mut: object already freed")
    }

    #[must_use]
    pub fn function(&self, id: HeapId) -> Option<&Function> {
        match self.get_if_live(id)? {
            HeapData::Function(f) => Some(f),
            _ => None,
        }
    }

    #[must_use]
    pub fn closure(&self, id: HeapId) -> Option<&Closure> {
        match self.get_if_live(id)? {
            HeapData::Closure(c) => Some(c),
            _ => None,
        }
    }

    #[must_use]
    pub fn fiber(&self, id: HeapId) -> Option<&Fiber> {
        match self.get_if_live(id)? {
            HeapData::Fiber(f) => Some(f),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_live(&self, id: HeapId) -> bool {
        self.get_if_live(id).is_some()
    }

    /// Number of live objects.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries.len() - self.free_list.len()
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut objects_by_type = BTreeMap::new();
        for data in self.entries.iter().flatten() {
            *objects_by_type.entry(<&'static str>::from(data)).or_insert(0) += 1;
        }
        HeapStats {
            live_objects: self.live_count(),
            free_slots: self.free_list.len(),
            total_slots: self.entries.len(),
            objects_by_type,
            bytes_since_gc: self.bytes_since_gc,
            tracker_allocations: self.tracker.allocation_count(),
            tracker_memory_bytes: self.tracker.current_memory_bytes(),
        }
    }

    /// Frees every object not reachable from `roots`.
    pub fn collect_garbage(&mut self, roots: Vec<HeapId>) {
        // Mark phase: collect all reachable IDs
        let mut reachable: Vec<bool> = vec![false; self.entries.len()];
        let mut work_list: Vec<HeapId> = roots;

        while let Some(id) = work_list.pop() {
            let idx = id.index();
            if idx >= reachable.len() || reachable[idx] {
                continue;
            }
            reachable[idx] = true;
            if let Some(Some(data)) = self.entries.get(idx) {
                data.collect_child_ids(&mut work_list);
            }
        }

        // Sweep phase: free unreachable values
        for (id, entry) in self.entries.iter_mut().enumerate() {
            if reachable[id] {
                continue;
            }
            if let Some(data) = entry.take() {
                self.tracker.on_free(|| data.estimate_size());
                self.free_list.push(HeapId(id));
            }
        }

        self.bytes_since_gc = 0;
        self.allocations_since_gc = 0;
    }
}
