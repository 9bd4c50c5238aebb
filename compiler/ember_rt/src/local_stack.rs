//! Per-thread stack of plain local-variable bindings.
//!
//! The evaluator brackets every declared variable with `instantiate` /
//! `uninstantiate` in strict block-scope nesting. Locals are never captured
//! (captured variables live on the closure stack), so slots are stored inline
//! in the arena.

use crate::arena::{SlotArena, SlotId};
use crate::ids::VarId;
use crate::value::Value;

/// A single local binding.
#[derive(Debug)]
pub struct LocalVarSlot {
    id: VarId,
    value: Value,
    /// Logically removed; kept in place so indices above stay stable.
    skip: bool,
}

impl LocalVarSlot {
    #[inline]
    pub fn id(&self) -> VarId {
        self.id
    }

    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[inline]
    pub fn is_skipped(&self) -> bool {
        self.skip
    }

    /// Consume the slot, yielding its value.
    #[inline]
    pub fn into_value(self) -> Value {
        self.value
    }
}

/// LIFO stack of [`LocalVarSlot`]s.
#[derive(Debug, Default)]
pub struct LocalVariableStack {
    arena: SlotArena<LocalVarSlot>,
}

impl LocalVariableStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_size(block_size: usize) -> Self {
        LocalVariableStack {
            arena: SlotArena::with_block_size(block_size),
        }
    }

    /// Push a binding for `id`.
    #[inline]
    pub fn instantiate(&mut self, id: VarId, value: Value) -> SlotId {
        self.arena.instantiate(LocalVarSlot {
            id,
            value,
            skip: false,
        })
    }

    /// Pop the binding created by the matching `instantiate`.
    ///
    /// `slot` must be the top of the stack.
    #[inline]
    pub fn uninstantiate(&mut self, slot: SlotId) -> Option<LocalVarSlot> {
        debug_assert_eq!(
            self.arena.top(),
            Some(slot),
            "local variable stack released out of LIFO order"
        );
        self.arena.uninstantiate()
    }

    /// Pop whatever is on top; used when a thread unwinds everything.
    #[inline]
    pub fn pop(&mut self) -> Option<LocalVarSlot> {
        self.arena.uninstantiate()
    }

    #[inline]
    pub fn get(&self, slot: SlotId) -> Option<&Value> {
        self.arena.get(slot).map(|s| &s.value)
    }

    /// Replace the value of a live binding, returning the previous value.
    pub fn set(&mut self, slot: SlotId, value: Value) -> Option<Value> {
        self.arena
            .get_mut(slot)
            .map(|s| std::mem::replace(&mut s.value, value))
    }

    /// Mark a binding as logically removed (or restore it).
    pub fn set_skip(&mut self, slot: SlotId, skip: bool) {
        if let Some(s) = self.arena.get_mut(slot) {
            s.skip = skip;
        }
    }

    /// Innermost visible binding of `id`.
    pub fn find(&self, id: VarId) -> Option<SlotId> {
        self.arena
            .iter_rev()
            .find(|(_, s)| s.id == id && !s.skip)
            .map(|(slot, _)| slot)
    }

    /// Number of live bindings.
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

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests can panic")]
mod tests;
