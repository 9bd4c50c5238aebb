//! Per-thread diagnostic call chains and the process-wide registry.
//!
//! Every attached thread owns one [`CallStack`]. The registry keeps a handle
//! to each so a host can snapshot every live thread's chain at once.
//!
//! # Inverted Lock
//!
//! One reader/writer lock guards the registry, but its sides are used the
//! other way round from usual:
//!
//! - **Read side**: a thread pushing or popping its *own* frames. Many
//!   threads do this at once and never touch each other's chains.
//! - **Write side**: a global snapshot (and thread registration), which must
//!   see every chain in a quiescent state.
//!
//! Each chain additionally sits behind its own mutex, which is uncontended in
//! both modes: under the read side only its owner touches it, and under the
//! write side nobody else holds the read side.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::errors::{call_depth_exceeded, RuntimeResult};
use crate::ids::{SourceLocation, ThreadId};
use crate::object::Object;

/// What kind of code a frame belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallKind {
    /// Script function, method or closure.
    User,
    /// Native built-in.
    Builtin,
    /// Entry frame of a spawned thread.
    NewThread,
}

/// One live frame.
#[derive(Clone, Debug)]
pub struct CallNode {
    pub name: Arc<str>,
    pub kind: CallKind,
    /// Receiver of a method call.
    pub object: Option<Arc<Object>>,
    pub location: SourceLocation,
}

impl CallNode {
    pub fn new(name: impl Into<Arc<str>>, kind: CallKind, location: SourceLocation) -> Self {
        CallNode {
            name: name.into(),
            kind,
            object: None,
            location,
        }
    }

    #[must_use]
    pub fn with_object(mut self, object: Arc<Object>) -> Self {
        self.object = Some(object);
        self
    }

    fn record(&self) -> CallRecord {
        CallRecord {
            function: self.name.to_string(),
            line: self.location.line,
            endline: self.location.end_line,
            file: self.location.file.to_string(),
            kind: self.kind,
        }
    }
}

/// Host-facing snapshot of one frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CallRecord {
    pub function: String,
    pub line: u32,
    pub endline: u32,
    pub file: String,
    #[serde(rename = "type")]
    pub kind: CallKind,
}

type Chain = Arc<Mutex<Vec<CallNode>>>;

/// Registry of every attached thread's chain.
#[derive(Debug, Default)]
pub struct CallStackRegistry {
    stacks: RwLock<FxHashMap<ThreadId, Chain>>,
}

impl CallStackRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create and register the chain of `thread`.
    pub fn register(self: &Arc<Self>, thread: ThreadId, max_depth: Option<usize>) -> CallStack {
        let chain: Chain = Arc::default();
        self.stacks.write().insert(thread, Arc::clone(&chain));
        CallStack {
            thread,
            registry: Arc::clone(self),
            chain,
            max_depth,
        }
    }

    fn unregister(&self, thread: ThreadId) {
        self.stacks.write().remove(&thread);
    }

    /// Apply `f` to one thread's own chain under the shared side of the lock.
    fn mutate_own_stack<R>(&self, chain: &Mutex<Vec<CallNode>>, f: impl FnOnce(&mut Vec<CallNode>) -> R) -> R {
        let _shared = self.stacks.read();
        f(&mut chain.lock())
    }

    /// Every registered thread's chain, most recent frame first.
    ///
    /// Takes the exclusive side, so no thread pushes or pops meanwhile.
    pub fn snapshot_all_stacks(&self) -> BTreeMap<ThreadId, Vec<CallRecord>> {
        let stacks = self.stacks.write();
        stacks
            .iter()
            .map(|(thread, chain)| {
                let records = chain.lock().iter().rev().map(CallNode::record).collect();
                (*thread, records)
            })
            .collect()
    }

    pub fn thread_count(&self) -> usize {
        self.stacks.read().len()
    }
}

/// A thread's own call chain.
#[derive(Debug)]
pub struct CallStack {
    thread: ThreadId,
    registry: Arc<CallStackRegistry>,
    chain: Chain,
    max_depth: Option<usize>,
}

impl CallStack {
    #[inline]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Apply `f` to this thread's chain.
    pub fn mutate_own_stack<R>(&self, f: impl FnOnce(&mut Vec<CallNode>) -> R) -> R {
        self.registry.mutate_own_stack(&self.chain, f)
    }

    /// Push a frame, returning a guard that pops it.
    ///
    /// Fails with a stack overflow error when the chain is already at the
    /// depth limit; the frame is not pushed in that case.
    pub fn push(&self, node: CallNode) -> RuntimeResult<CallFrameGuard> {
        let pushed = self.mutate_own_stack(|nodes| {
            if self.max_depth.is_some_and(|max| nodes.len() >= max) {
                return None;
            }
            nodes.push(node);
            Some(nodes.len() - 1)
        });
        match pushed {
            Some(index) => Ok(CallFrameGuard {
                registry: Arc::clone(&self.registry),
                chain: Arc::clone(&self.chain),
                index,
            }),
            None => {
                let limit = self.max_depth.unwrap_or_default();
                Err(call_depth_exceeded(limit).with_backtrace(self.get_call_stack()))
            }
        }
    }

    /// The chain walked tail to head: most recent call first.
    pub fn get_call_stack(&self) -> Vec<CallRecord> {
        self.mutate_own_stack(|nodes| nodes.iter().rev().map(CallNode::record).collect())
    }

    pub fn depth(&self) -> usize {
        self.mutate_own_stack(|nodes| nodes.len())
    }

    /// The innermost frame.
    pub fn current(&self) -> Option<CallNode> {
        self.mutate_own_stack(|nodes| nodes.last().cloned())
    }

    /// Remove this chain from the registry. Called once, at thread exit.
    pub(crate) fn unregister(&self) {
        self.registry.unregister(self.thread);
    }
}

/// Pops its frame when dropped.
#[must_use = "the frame is popped as soon as the guard is dropped"]
#[derive(Debug)]
pub struct CallFrameGuard {
    registry: Arc<CallStackRegistry>,
    chain: Chain,
    index: usize,
}

impl Drop for CallFrameGuard {
    fn drop(&mut self) {
        let index = self.index;
        self.registry.mutate_own_stack(&self.chain, |nodes| {
            debug_assert_eq!(
                nodes.len(),
                index + 1,
                "call frame popped out of order"
            );
            nodes.truncate(index);
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests can panic")]
mod tests;
