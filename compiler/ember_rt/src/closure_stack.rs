//! Per-thread stack of capturable variable bindings.
//!
//! Same LIFO arena discipline as the local stack, but each slot is a
//! separately allocated, atomically counted [`ClosureVarSlot`]. A closure
//! literal takes its own reference on every slot it captures, so the binding
//! outlives the frame that declared it and can be released from whichever
//! thread drops the last reference.
//!
//! # Slot Forms
//!
//! - **Value**: an ordinary binding guarded by a reader/writer lock, since a
//!   captured slot can be read and written by several threads.
//! - **Reference**: an unevaluated [`ReferenceExpr`] plus the object it is
//!   evaluated against, so a variable can alias a member through `self`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::arena::{SlotArena, SlotId};
use crate::errors::RuntimeResult;
use crate::ids::VarId;
use crate::object::Object;
use crate::thread::ThreadContext;
use crate::value::Value;

/// Expression a reference-form slot evaluates against its owning object.
///
/// The evaluator supplies richer implementations; the runtime ships
/// [`MemberPath`].
pub trait ReferenceExpr: Send + Sync + fmt::Debug {
    /// Read the aliased location.
    fn evaluate(&self, ctx: &ThreadContext, object: &Object) -> RuntimeResult<Value>;

    /// Write the aliased location, returning the previous value.
    fn assign(&self, ctx: &ThreadContext, object: &Object, value: Value) -> RuntimeResult<Value>;
}

/// Aliases a single member of the owning object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberPath {
    member: Arc<str>,
}

impl MemberPath {
    pub fn new(member: impl Into<Arc<str>>) -> Self {
        MemberPath {
            member: member.into(),
        }
    }

    #[inline]
    pub fn member(&self) -> &str {
        &self.member
    }
}

impl ReferenceExpr for MemberPath {
    fn evaluate(&self, ctx: &ThreadContext, object: &Object) -> RuntimeResult<Value> {
        object.get_member(ctx, &self.member)
    }

    fn assign(&self, ctx: &ThreadContext, object: &Object, value: Value) -> RuntimeResult<Value> {
        object.set_member(ctx, &self.member, value)
    }
}

enum SlotBinding {
    Value(RwLock<Value>),
    Reference {
        expr: Arc<dyn ReferenceExpr>,
        object: Arc<Object>,
    },
}

/// A capturable binding.
pub struct ClosureVarSlot {
    id: VarId,
    binding: SlotBinding,
    skip: AtomicBool,
}

impl ClosureVarSlot {
    fn with_binding(id: VarId, binding: SlotBinding) -> Self {
        ClosureVarSlot {
            id,
            binding,
            skip: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn id(&self) -> VarId {
        self.id
    }

    #[inline]
    pub fn is_skipped(&self) -> bool {
        self.skip.load(Ordering::Relaxed)
    }

    /// Whether this slot aliases an object member.
    #[inline]
    pub fn is_reference(&self) -> bool {
        matches!(self.binding, SlotBinding::Reference { .. })
    }

    /// Current value of the binding.
    pub fn get(&self, ctx: &ThreadContext) -> RuntimeResult<Value> {
        match &self.binding {
            SlotBinding::Value(value) => Ok(value.read().clone()),
            SlotBinding::Reference { expr, object } => expr.evaluate(ctx, object),
        }
    }

    /// Store a new value, returning the previous one for the caller to release.
    pub fn set(&self, ctx: &ThreadContext, value: Value) -> RuntimeResult<Value> {
        match &self.binding {
            SlotBinding::Value(slot) => Ok(std::mem::replace(&mut *slot.write(), value)),
            SlotBinding::Reference { expr, object } => expr.assign(ctx, object, value),
        }
    }

    /// Consume the slot, yielding the value it owns (nothing for references).
    pub fn into_value(self) -> Value {
        match self.binding {
            SlotBinding::Value(value) => value.into_inner(),
            SlotBinding::Reference { .. } => Value::Nothing,
        }
    }
}

impl fmt::Debug for ClosureVarSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ClosureVarSlot");
        s.field("id", &self.id);
        match &self.binding {
            SlotBinding::Value(value) => s.field("value", &*value.read()),
            SlotBinding::Reference { expr, object } => s
                .field("expr", expr)
                .field("object", &object.class().name()),
        };
        s.field("skip", &self.is_skipped()).finish()
    }
}

/// LIFO stack of shared [`ClosureVarSlot`]s.
#[derive(Debug, Default)]
pub struct ClosureVariableStack {
    arena: SlotArena<Arc<ClosureVarSlot>>,
}

impl ClosureVariableStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_size(block_size: usize) -> Self {
        ClosureVariableStack {
            arena: SlotArena::with_block_size(block_size),
        }
    }

    /// Push a value-form binding.
    pub fn instantiate(&mut self, id: VarId, value: Value) -> SlotId {
        self.arena.instantiate(Arc::new(ClosureVarSlot::with_binding(
            id,
            SlotBinding::Value(RwLock::new(value)),
        )))
    }

    /// Push a binding that aliases `expr` evaluated against `object`.
    pub fn instantiate_reference(
        &mut self,
        id: VarId,
        expr: Arc<dyn ReferenceExpr>,
        object: Arc<Object>,
    ) -> SlotId {
        self.arena.instantiate(Arc::new(ClosureVarSlot::with_binding(
            id,
            SlotBinding::Reference { expr, object },
        )))
    }

    /// Pop the binding created by the matching `instantiate`, handing back
    /// the stack's reference.
    ///
    /// If no environment captured the slot, the returned `Arc` is the last
    /// owner and dropping it frees the slot.
    pub fn uninstantiate(&mut self, slot: SlotId) -> Option<Arc<ClosureVarSlot>> {
        debug_assert_eq!(
            self.arena.top(),
            Some(slot),
            "closure variable stack released out of LIFO order"
        );
        self.arena.uninstantiate()
    }

    /// Pop whatever is on top; used when a thread unwinds everything.
    #[inline]
    pub fn pop(&mut self) -> Option<Arc<ClosureVarSlot>> {
        self.arena.uninstantiate()
    }

    #[inline]
    pub fn get(&self, slot: SlotId) -> Option<&Arc<ClosureVarSlot>> {
        self.arena.get(slot)
    }

    /// Mark a binding as logically removed (or restore it).
    pub fn set_skip(&self, slot: SlotId, skip: bool) {
        if let Some(s) = self.arena.get(slot) {
            s.skip.store(skip, Ordering::Relaxed);
        }
    }

    /// Innermost visible binding of `id`.
    ///
    /// The parser only emits lookups for variables that are in scope, so a
    /// miss means the evaluator and the stack disagree.
    pub fn find(&self, id: VarId) -> Option<&Arc<ClosureVarSlot>> {
        let found = self.lookup(id);
        debug_assert!(found.is_some(), "closure variable {id:?} is not on the stack");
        found
    }

    /// Like [`find`](Self::find) but a miss is an ordinary outcome.
    pub fn lookup(&self, id: VarId) -> Option<&Arc<ClosureVarSlot>> {
        self.lookup_above(id, 0)
    }

    /// Innermost visible binding of `id` among slots at index `base` and up.
    pub fn lookup_above(&self, id: VarId, base: usize) -> Option<&Arc<ClosureVarSlot>> {
        self.arena
            .iter_rev()
            .take_while(|(slot, _)| slot.index() >= base)
            .find(|(_, s)| s.id == id && !s.is_skipped())
            .map(|(_, s)| s)
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.arena.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.arena.block_count()
    }
}
