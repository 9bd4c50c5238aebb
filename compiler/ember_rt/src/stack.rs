//! Stack growth for teardown cascades.
//!
//! Releasing an object can release members that hold the last reference to
//! other objects, whose destructors release further objects. A long chain of
//! owned objects turns into equally deep native recursion, so destructor and
//! obliterate paths run under [`ensure_sufficient_stack`].
//!
//! - **Native targets**: `stacker` grows the stack on demand.
//! - **WASM targets**: passthrough.

/// Grow when less than this remains (128KB).
const RED_ZONE: usize = 128 * 1024;

/// Segment size allocated per growth (1MB).
const GROW_BY: usize = 1024 * 1024;

/// Run `f`, first growing the stack if it is close to exhausted.
#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, GROW_BY, f)
}

#[inline]
#[cfg(target_arch = "wasm32")]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}
