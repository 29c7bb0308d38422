//! Stack growth for the recursive parser and code generator.
//!
//! Source nesting has no fixed limit: both passes recurse once per nested
//! construct, and `stacker` moves them onto a fresh segment when the current
//! one runs low.

/// Headroom left on the current segment before a new one is allocated.
const RED_ZONE: usize = 128 * 1024;

/// Size of each newly allocated segment.
const SEGMENT_SIZE: usize = 1024 * 1024;

/// Runs `f`, first switching to a new stack segment if fewer than
/// [`RED_ZONE`] bytes remain.
#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn with_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, SEGMENT_SIZE, f)
}

#[inline]
#[cfg(target_arch = "wasm32")]
pub(crate) fn with_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_recursion_grows_the_stack() {
        fn depth(n: u32) -> u32 {
            with_stack(|| if n == 0 { 0 } else { depth(n - 1) + 1 })
        }
        assert_eq!(depth(200_000), 200_000);
    }
}
