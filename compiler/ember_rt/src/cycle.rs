//! Breakable references for edges that close a reference cycle.
//!
//! A closure references its program, the program (through its namespaces
//! and classes) references objects, and objects hold closures in their
//! members. With reference counting alone none of these would ever be freed.
//! Every edge that closes such a loop is a [`CycleRef`] instead of a plain
//! `Arc`, and its owner exposes [`ProgramCycle::deref_program_cycle`] so the
//! program's teardown can cut the edge once, after which ordinary counting
//! reclaims the rest.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Something holding a breakable edge back to a program.
pub trait ProgramCycle: Send + Sync {
    /// Release the program edge.
    ///
    /// Returns `true` if this call released it; later calls are no-ops that
    /// return `false`.
    fn deref_program_cycle(&self) -> bool;
}

/// Owning reference that can be released early, exactly once.
pub struct CycleRef<T> {
    target: Mutex<Option<Arc<T>>>,
}

impl<T> CycleRef<T> {
    /// Take a reference on `target`.
    pub fn new(target: Arc<T>) -> Self {
        CycleRef {
            target: Mutex::new(Some(target)),
        }
    }

    /// An edge that was never connected.
    pub fn empty() -> Self {
        CycleRef {
            target: Mutex::new(None),
        }
    }

    /// The target, unless the edge has been broken.
    pub fn get(&self) -> Option<Arc<T>> {
        self.target.lock().clone()
    }

    /// Drop the reference. Returns `false` if it was already gone.
    pub fn break_cycle(&self) -> bool {
        // Take under the lock, drop outside it: the target's own teardown
        // may come back through this edge.
        let taken = self.target.lock().take();
        taken.is_some()
    }

    pub fn is_broken(&self) -> bool {
        self.target.lock().is_none()
    }
}

impl<T> fmt::Debug for CycleRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_broken() {
            write!(f, "CycleRef(broken)")
        } else {
            write!(f, "CycleRef(live)")
        }
    }
}
