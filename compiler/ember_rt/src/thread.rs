//! Per-thread runtime state.
//!
//! A [`ThreadContext`] is what the evaluator threads through every call: the
//! current program, `self` object and code, both variable stacks, the call
//! chain and the error sink. It is owned by exactly one thread and mutated
//! without locking; only captured slots, objects and the call-stack registry
//! are shared.
//!
//! # Scoped State
//!
//! `with_program`, `with_self`, `with_code` and `with_environment` install a
//! value for the duration of a callback and restore the previous one on
//! return, whether the callback succeeded or failed.

use std::fmt;
use std::sync::Arc;

use crate::arena::SlotId;
use crate::call_stack::{CallFrameGuard, CallKind, CallNode, CallRecord, CallStack};
use crate::closure::{ClosureEnvironment, ClosureTemplate, ClosureValue};
use crate::closure_stack::{ClosureVarSlot, ClosureVariableStack, ReferenceExpr};
use crate::errors::{program_unavailable, ErrorSink, RuntimeError, RuntimeResult};
use crate::ids::{ClassId, SourceLocation, ThreadId, VarId};
use crate::local_stack::LocalVariableStack;
use crate::object::{Class, Object};
use crate::program::Program;
use crate::runtime::Runtime;
use crate::value::Value;

/// The code currently executing: a method (or hook) of a class.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CodeId {
    class: ClassId,
    name: Arc<str>,
}

impl CodeId {
    pub fn new(class: ClassId, name: impl Into<Arc<str>>) -> Self {
        CodeId {
            class,
            name: name.into(),
        }
    }

    #[inline]
    pub fn class(&self) -> ClassId {
        self.class
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An installed closure environment and the closure-stack depth at entry.
struct EnvFrame {
    env: Arc<ClosureEnvironment>,
    base: usize,
}

/// State of one attached thread.
pub struct ThreadContext {
    id: ThreadId,
    name: Arc<str>,
    runtime: Runtime,
    program: Option<Arc<Program>>,
    self_object: Option<Arc<Object>>,
    code: Option<CodeId>,
    locals: LocalVariableStack,
    closures: ClosureVariableStack,
    envs: Vec<EnvFrame>,
    call_stack: CallStack,
    sink: ErrorSink,
    finished: bool,
}

impl ThreadContext {
    pub(crate) fn new(
        id: ThreadId,
        name: Arc<str>,
        runtime: Runtime,
        call_stack: CallStack,
    ) -> Self {
        let locals = LocalVariableStack::with_block_size(runtime.config().local_block_size);
        let closures = ClosureVariableStack::with_block_size(runtime.config().closure_block_size);
        ThreadContext {
            id,
            name,
            locals,
            closures,
            runtime,
            program: None,
            self_object: None,
            code: None,
            envs: Vec::new(),
            call_stack,
            sink: ErrorSink::new(),
            finished: false,
        }
    }

    #[inline]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    // Local variables

    /// Declare a local.
    pub fn instantiate_local(&mut self, id: VarId, value: Value) -> SlotId {
        self.locals.instantiate(id, value)
    }

    /// Leave the scope of the local at `slot`, releasing its value.
    pub fn uninstantiate_local(&mut self, slot: SlotId) {
        if let Some(slot) = self.locals.uninstantiate(slot) {
            slot.into_value().release(self);
        }
    }

    /// Value of the innermost visible local `id`.
    pub fn local(&self, id: VarId) -> Option<&Value> {
        self.locals.find(id).and_then(|slot| self.locals.get(slot))
    }

    /// Assign the local at `slot`, releasing the previous value.
    pub fn set_local(&mut self, slot: SlotId, value: Value) {
        if let Some(old) = self.locals.set(slot, value) {
            old.release(self);
        }
    }

    pub fn locals(&self) -> &LocalVariableStack {
        &self.locals
    }

    pub fn locals_mut(&mut self) -> &mut LocalVariableStack {
        &mut self.locals
    }

    // Closure variables

    /// Declare a capturable variable.
    pub fn instantiate_closure_var(&mut self, id: VarId, value: Value) -> SlotId {
        self.closures.instantiate(id, value)
    }

    /// Declare a capturable variable aliasing `expr` evaluated on `object`.
    pub fn instantiate_closure_reference(
        &mut self,
        id: VarId,
        expr: Arc<dyn ReferenceExpr>,
        object: Arc<Object>,
    ) -> SlotId {
        self.closures.instantiate_reference(id, expr, object)
    }

    /// Leave the scope of the capturable variable at `slot`.
    ///
    /// If no closure captured the slot it is freed here and its value
    /// released on this thread; otherwise the last environment frees it.
    pub fn uninstantiate_closure_var(&mut self, slot: SlotId) {
        if let Some(slot) = self.closures.uninstantiate(slot) {
            self.release_closure_slot(slot);
        }
    }

    fn release_closure_slot(&mut self, slot: Arc<ClosureVarSlot>) {
        if let Some(slot) = Arc::into_inner(slot) {
            slot.into_value().release(self);
        }
    }

    /// The slot a read of closure variable `id` resolves to.
    ///
    /// Inside a closure body, slots declared by the body come first, then the
    /// closure's captured environment. Outside any closure the whole stack is
    /// searched.
    pub fn resolve_closure_var(&self, id: VarId) -> Option<Arc<ClosureVarSlot>> {
        match self.envs.last() {
            Some(frame) => self
                .closures
                .lookup_above(id, frame.base)
                .or_else(|| frame.env.get(id))
                .cloned(),
            None => self.closures.lookup(id).cloned(),
        }
    }

    /// Read closure variable `id`.
    pub fn closure_var(&self, id: VarId) -> RuntimeResult<Value> {
        let slot = self.resolve_closure_var(id);
        debug_assert!(slot.is_some(), "closure variable {id:?} is not in scope");
        match slot {
            Some(slot) => slot.get(self),
            None => {
                tracing::warn!(?id, "read of closure variable that is not in scope");
                Ok(Value::Nothing)
            }
        }
    }

    /// Assign closure variable `id`, releasing the previous value.
    pub fn assign_closure_var(&mut self, id: VarId, value: Value) -> RuntimeResult<()> {
        let slot = self.resolve_closure_var(id);
        debug_assert!(slot.is_some(), "closure variable {id:?} is not in scope");
        let Some(slot) = slot else {
            tracing::warn!(?id, "write of closure variable that is not in scope");
            return Ok(());
        };
        let old = slot.set(self, value)?;
        old.release(self);
        Ok(())
    }

    pub fn closures(&self) -> &ClosureVariableStack {
        &self.closures
    }

    pub fn closures_mut(&mut self) -> &mut ClosureVariableStack {
        &mut self.closures
    }

    /// Evaluate a closure literal in the current context.
    ///
    /// Inside a method the closure is bound to the current `self`; elsewhere
    /// it references the current program.
    pub fn create_closure(&self, template: &Arc<ClosureTemplate>) -> RuntimeResult<Arc<ClosureValue>> {
        let env = ClosureEnvironment::capture(self, template.captures());
        if let Some(object) = &self.self_object {
            return Ok(ClosureValue::bound(Arc::clone(template), env, object));
        }
        match &self.program {
            Some(program) => Ok(ClosureValue::plain(Arc::clone(template), env, program)),
            None => Err(program_unavailable(template.name())),
        }
    }

    // Scoped state

    pub fn current_program(&self) -> Option<&Arc<Program>> {
        self.program.as_ref()
    }

    pub fn current_self(&self) -> Option<&Arc<Object>> {
        self.self_object.as_ref()
    }

    pub fn current_code(&self) -> Option<&CodeId> {
        self.code.as_ref()
    }

    /// Run `f` with `program` as the current program.
    pub fn with_program<R>(&mut self, program: Arc<Program>, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = self.program.replace(program);
        let result = f(self);
        self.program = saved;
        result
    }

    /// Run `f` with `object` as the current `self`.
    pub fn with_self<R>(&mut self, object: Arc<Object>, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = self.self_object.replace(object);
        let result = f(self);
        self.self_object = saved;
        result
    }

    /// Run `f` with `code` as the current code.
    pub fn with_code<R>(&mut self, code: CodeId, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = self.code.replace(code);
        let result = f(self);
        self.code = saved;
        result
    }

    /// Run `f` with `env` installed as the innermost closure environment.
    ///
    /// Slots the body leaves on the closure stack are a LIFO violation; in
    /// release builds they are unwound here.
    pub fn with_environment<R>(
        &mut self,
        env: Arc<ClosureEnvironment>,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let base = self.closures.depth();
        self.envs.push(EnvFrame { env, base });
        let result = f(self);
        debug_assert_eq!(
            self.closures.depth(),
            base,
            "closure body left variables on the closure stack"
        );
        while self.closures.depth() > base {
            if let Some(slot) = self.closures.pop() {
                self.release_closure_slot(slot);
            }
        }
        self.envs.pop();
        result
    }

    /// Whether the current code belongs to `class` or one of its ancestors.
    pub fn is_in_class_of(&self, class: &Class) -> bool {
        self.code
            .as_ref()
            .is_some_and(|code| class.is_same_or_derived_from(code.class))
    }

    /// Whether the current code is method `name` of `class`.
    pub fn is_in_method(&self, class: ClassId, name: &str) -> bool {
        self.code
            .as_ref()
            .is_some_and(|code| code.class == class && &*code.name == name)
    }

    // Call stack

    pub fn call_stack(&self) -> &CallStack {
        &self.call_stack
    }

    /// Push a call frame; it is popped when the guard drops.
    pub fn push_call(
        &self,
        name: &str,
        kind: CallKind,
        object: Option<Arc<Object>>,
        location: SourceLocation,
    ) -> RuntimeResult<CallFrameGuard> {
        let mut node = CallNode::new(name, kind, location);
        if let Some(object) = object {
            node = node.with_object(object);
        }
        self.call_stack.push(node)
    }

    /// This thread's call chain, most recent call first.
    pub fn get_call_stack(&self) -> Vec<CallRecord> {
        self.call_stack.get_call_stack()
    }

    /// Attach this thread's call chain to `err`.
    pub fn with_backtrace(&self, err: RuntimeError) -> RuntimeError {
        err.with_backtrace(self.get_call_stack())
    }

    // Errors

    pub fn sink(&self) -> &ErrorSink {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut ErrorSink {
        &mut self.sink
    }

    // Teardown

    /// Unwind every outstanding slot and detach from the runtime.
    ///
    /// Returns the errors accumulated over the thread's life, including any
    /// raised by destructors run during the unwind.
    pub fn finish(mut self) -> Vec<RuntimeError> {
        self.teardown()
    }

    fn teardown(&mut self) -> Vec<RuntimeError> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        self.envs.clear();
        while let Some(slot) = self.locals.pop() {
            slot.into_value().release(self);
        }
        while let Some(slot) = self.closures.pop() {
            self.release_closure_slot(slot);
        }
        self.self_object = None;
        self.code = None;
        self.program = None;
        self.call_stack.unregister();
        self.runtime.detach(self.id);
        tracing::debug!(thread = %self.id, name = %self.name, "thread finished");
        self.sink.take()
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        for err in self.teardown() {
            tracing::warn!(thread = %self.id, error = %err, "unreported error at thread exit");
        }
    }
}

impl fmt::Debug for ThreadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("locals", &self.locals.depth())
            .field("closure_vars", &self.closures.depth())
            .field("code", &self.code)
            .finish_non_exhaustive()
    }
}
