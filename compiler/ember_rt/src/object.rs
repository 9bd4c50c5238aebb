//! Language-level objects: status machine, lock, members and private data.
//!
//! # Lifecycle
//!
//! `Live -> Destructing -> Destroyed`, never backwards:
//!
//! 1. Under the lock, a Live object is marked Destructing and the deleting
//!    thread is recorded. A second delete while Destructing is a catchable
//!    "double delete".
//! 2. The destructor chain runs *without* the lock so it can read and write
//!    members. Only the destructing thread gets that tolerance; every other
//!    accessor sees "object already deleted".
//! 3. Under the lock again the object is marked Destroyed and the member
//!    container and private-data list are detached; they are released after
//!    the lock is dropped.
//!
//! # References
//!
//! [`ObjectRef`] is an *external* reference: script-visible, counted, and the
//! last one released runs the destructor. A plain `Arc<Object>` keeps the
//! memory but not the logical lifetime; it is what bound closures, reference
//! slots and the thread's current `self` hold.

mod private_data;

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::call_stack::CallKind;
use crate::cycle::{CycleRef, ProgramCycle};
use crate::errors::{
    double_delete, duplicate_private_data, object_already_deleted, private_member_access,
    ErrorSink, RuntimeResult,
};
use crate::ids::{ClassId, SourceLocation, ThreadId};
use crate::program::Program;
use crate::stack::ensure_sufficient_stack;
use crate::thread::{CodeId, ThreadContext};
use crate::value::Value;

pub use private_data::{
    DuplicateKey, NativeData, PrivateDataHooks, PrivateDataList, RefHook, ReleaseHook,
};

/// Code name used while a class destructor runs.
pub const DESTRUCTOR: &str = "destructor";

/// Code name used while a class member gate runs.
pub const MEMBER_GATE: &str = "memberGate";

/// Destructor body of one class in the hierarchy.
pub type DestructorFn = Arc<dyn Fn(&mut ThreadContext, &Object) -> RuntimeResult<()> + Send + Sync>;

/// Fallback for reads of members the object does not have.
pub type MemberGateFn =
    Arc<dyn Fn(&mut ThreadContext, &Object, &str) -> RuntimeResult<Value> + Send + Sync>;

/// A class: identity, private members, and the hooks the runtime calls.
pub struct Class {
    id: ClassId,
    name: Arc<str>,
    parents: Vec<Arc<Class>>,
    private_members: FxHashSet<Arc<str>>,
    destructor: Option<DestructorFn>,
    member_gate: Option<MemberGateFn>,
}

impl Class {
    pub fn new(id: ClassId, name: impl Into<Arc<str>>) -> Self {
        Class {
            id,
            name: name.into(),
            parents: Vec::new(),
            private_members: FxHashSet::default(),
            destructor: None,
            member_gate: None,
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: Arc<Class>) -> Self {
        self.parents.push(parent);
        self
    }

    #[must_use]
    pub fn with_private_member(mut self, member: impl Into<Arc<str>>) -> Self {
        self.private_members.insert(member.into());
        self
    }

    #[must_use]
    pub fn with_destructor(
        mut self,
        destructor: impl Fn(&mut ThreadContext, &Object) -> RuntimeResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.destructor = Some(Arc::new(destructor));
        self
    }

    #[must_use]
    pub fn with_member_gate(
        mut self,
        gate: impl Fn(&mut ThreadContext, &Object, &str) -> RuntimeResult<Value> + Send + Sync + 'static,
    ) -> Self {
        self.member_gate = Some(Arc::new(gate));
        self
    }

    #[inline]
    pub fn id(&self) -> ClassId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parents(&self) -> &[Arc<Class>] {
        &self.parents
    }

    /// Whether `id` is this class or one of its ancestors.
    pub fn is_same_or_derived_from(&self, id: ClassId) -> bool {
        self.id == id || self.parents.iter().any(|p| p.is_same_or_derived_from(id))
    }

    /// Whether `member` is declared private anywhere in the hierarchy.
    pub fn is_private(&self, member: &str) -> bool {
        self.private_members.contains(member) || self.parents.iter().any(|p| p.is_private(member))
    }

    /// This class and every ancestor, most derived first, each once.
    fn hierarchy(self: &Arc<Self>) -> Vec<Arc<Class>> {
        let mut out: Vec<Arc<Class>> = Vec::new();
        let mut pending = vec![Arc::clone(self)];
        while let Some(class) = pending.pop() {
            if out.iter().any(|c| c.id == class.id) {
                continue;
            }
            pending.extend(class.parents.iter().rev().cloned());
            out.push(class);
        }
        out
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Position of an object in its lifecycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObjectStatus {
    Live,
    Destructing,
    Destroyed,
}

/// Everything guarded by the object lock.
struct ObjectState {
    status: ObjectStatus,
    destructing_thread: Option<ThreadId>,
    members: FxHashMap<Arc<str>, Value>,
    private: PrivateDataList,
}

impl ObjectState {
    /// Status check shared by every accessor.
    ///
    /// `caller` is the script thread making the access, if known. Only the
    /// thread running the destructor gets through while Destructing.
    fn check(&self, class: &Class, member: &str, caller: Option<ThreadId>) -> RuntimeResult<()> {
        match self.status {
            ObjectStatus::Live => Ok(()),
            ObjectStatus::Destructing
                if caller.is_some() && self.destructing_thread == caller =>
            {
                Ok(())
            }
            ObjectStatus::Destructing | ObjectStatus::Destroyed => {
                Err(object_already_deleted(class.name(), member))
            }
        }
    }

    /// Move to Destroyed and hand back what has to be released.
    fn detach(&mut self) -> (FxHashMap<Arc<str>, Value>, PrivateDataList) {
        self.status = ObjectStatus::Destroyed;
        self.destructing_thread = None;
        (
            std::mem::take(&mut self.members),
            std::mem::take(&mut self.private),
        )
    }
}

/// A language-level object.
pub struct Object {
    class: Arc<Class>,
    external_refs: AtomicUsize,
    state: Mutex<ObjectState>,
    program: CycleRef<Program>,
}

impl Object {
    /// Create a Live object and return its first external reference.
    ///
    /// With a program, the object takes a breakable reference on it and
    /// registers for the program's teardown.
    pub fn new(class: Arc<Class>, program: Option<&Arc<Program>>) -> ObjectRef {
        let obj = Arc::new(Object {
            class,
            external_refs: AtomicUsize::new(1),
            state: Mutex::new(ObjectState {
                status: ObjectStatus::Live,
                destructing_thread: None,
                members: FxHashMap::default(),
                private: PrivateDataList::new(),
            }),
            program: program.map_or_else(CycleRef::empty, |p| CycleRef::new(Arc::clone(p))),
        });
        if let Some(program) = program {
            let weak: Weak<dyn ProgramCycle> = Arc::downgrade(&obj) as Weak<dyn ProgramCycle>;
            program.register(weak);
        }
        ObjectRef {
            obj,
            released: false,
        }
    }

    #[inline]
    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    pub fn status(&self) -> ObjectStatus {
        self.state.lock().status
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.status() == ObjectStatus::Live
    }

    /// Number of outstanding external references.
    pub fn external_refs(&self) -> usize {
        self.external_refs.load(Ordering::Acquire)
    }

    /// The owning program, unless the edge has been broken.
    pub fn program(&self) -> Option<Arc<Program>> {
        self.program.get()
    }

    /// Fail unless the object may be accessed from `ctx`'s thread.
    pub fn ensure_accessible(&self, ctx: &ThreadContext, what: &str) -> RuntimeResult<()> {
        self.state.lock().check(&self.class, what, Some(ctx.id()))
    }

    fn check_visibility(&self, ctx: &ThreadContext, member: &str) -> RuntimeResult<()> {
        if self.class.is_private(member) && !ctx.is_in_class_of(&self.class) {
            return Err(private_member_access(self.class.name(), member));
        }
        Ok(())
    }

    // Members

    /// Read a member; missing members read as nothing.
    pub fn get_member(&self, ctx: &ThreadContext, member: &str) -> RuntimeResult<Value> {
        self.check_visibility(ctx, member)?;
        let state = self.state.lock();
        state.check(&self.class, member, Some(ctx.id()))?;
        Ok(state.members.get(member).cloned().unwrap_or_default())
    }

    /// Read a member, consulting the class member gate when it is missing.
    ///
    /// The gate is not re-entered while this thread is already running it.
    pub fn get_member_or_gate(&self, ctx: &mut ThreadContext, member: &str) -> RuntimeResult<Value> {
        self.check_visibility(ctx, member)?;
        {
            let state = self.state.lock();
            state.check(&self.class, member, Some(ctx.id()))?;
            if let Some(value) = state.members.get(member) {
                return Ok(value.clone());
            }
        }
        let Some(gate) = self.class.member_gate.clone() else {
            return Ok(Value::Nothing);
        };
        if ctx.is_in_method(self.class.id, MEMBER_GATE) {
            return Ok(Value::Nothing);
        }
        let code = CodeId::new(self.class.id, MEMBER_GATE);
        ctx.with_code(code, |ctx| gate(ctx, self, member))
    }

    /// Write a member, returning the previous value.
    pub fn set_member(
        &self,
        ctx: &ThreadContext,
        member: &str,
        value: Value,
    ) -> RuntimeResult<Value> {
        self.check_visibility(ctx, member)?;
        let mut state = self.state.lock();
        state.check(&self.class, member, Some(ctx.id()))?;
        Ok(state
            .members
            .insert(Arc::from(member), value)
            .unwrap_or_default())
    }

    /// Remove a member, returning its value.
    pub fn remove_member(&self, ctx: &ThreadContext, member: &str) -> RuntimeResult<Value> {
        self.check_visibility(ctx, member)?;
        let mut state = self.state.lock();
        state.check(&self.class, member, Some(ctx.id()))?;
        Ok(state.members.remove(member).unwrap_or_default())
    }

    /// Member names in sorted order.
    pub fn member_names(&self) -> RuntimeResult<Vec<Arc<str>>> {
        let state = self.state.lock();
        state.check(&self.class, "member list", None)?;
        let mut names: Vec<_> = state.members.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn member_count(&self) -> usize {
        self.state.lock().members.len()
    }

    // Private data

    /// Attach native state for `class` (a class in this object's hierarchy).
    ///
    /// Two classes registering under the same key is a construction error.
    pub fn set_private(
        &self,
        class: &Class,
        data: NativeData,
        hooks: PrivateDataHooks,
    ) -> RuntimeResult<()> {
        let mut state = self.state.lock();
        state.check(&self.class, "private data", None)?;
        state
            .private
            .insert(class.id(), data, hooks)
            .map_err(|_| duplicate_private_data(class.name()))
    }

    /// Take a counted reference on the native state for `key`.
    pub fn get_referenced_private_data(&self, key: ClassId) -> RuntimeResult<Option<NativeData>> {
        let state = self.state.lock();
        state.check(&self.class, "private data", None)?;
        Ok(state.private.get_referenced(key))
    }

    /// Typed [`get_referenced_private_data`](Self::get_referenced_private_data).
    pub fn get_referenced_private_data_as<T: Send + Sync + 'static>(
        &self,
        key: ClassId,
    ) -> RuntimeResult<Option<Arc<T>>> {
        Ok(self
            .get_referenced_private_data(key)?
            .and_then(|data| data.downcast::<T>().ok()))
    }

    /// Detach the native state for `key`, transferring ownership.
    ///
    /// Allowed in any status so destructors can reclaim their state.
    pub fn get_and_clear_private_data(&self, key: ClassId) -> Option<NativeData> {
        self.state.lock().private.get_and_clear(key)
    }

    /// Keys of the attached native state, in insertion order.
    pub fn private_data_keys(&self) -> Vec<ClassId> {
        self.state.lock().private.keys().collect()
    }

    // Dispatch

    /// Run `body` as method `method` of this object.
    ///
    /// The status is checked under the lock first; the body then runs with
    /// this object as current `self`, its class as current code, and a user
    /// call frame on the thread's call stack.
    pub fn dispatch<R>(
        self: &Arc<Self>,
        ctx: &mut ThreadContext,
        method: &str,
        location: SourceLocation,
        body: impl FnOnce(&mut ThreadContext) -> RuntimeResult<R>,
    ) -> RuntimeResult<R> {
        self.ensure_accessible(ctx, method)?;
        let name = format!("{}::{method}", self.class.name());
        let _frame = ctx.push_call(&name, CallKind::User, Some(Arc::clone(self)), location)?;
        let code = CodeId::new(self.class.id, method);
        ctx.with_self(Arc::clone(self), |ctx| ctx.with_code(code, body))
    }

    // Teardown

    /// Explicit `delete`: destroy the object now, whatever its reference count.
    pub fn delete(self: &Arc<Self>, ctx: &mut ThreadContext) -> RuntimeResult<()> {
        self.destruct(ctx)
    }

    fn destruct(self: &Arc<Self>, ctx: &mut ThreadContext) -> RuntimeResult<()> {
        {
            let mut state = self.state.lock();
            match state.status {
                ObjectStatus::Live => {
                    state.status = ObjectStatus::Destructing;
                    state.destructing_thread = Some(ctx.id());
                }
                ObjectStatus::Destructing => return Err(double_delete(self.class.name())),
                ObjectStatus::Destroyed => return Ok(()),
            }
        }
        tracing::debug!(class = %self.class.name(), "destructing object");

        ensure_sufficient_stack(|| {
            let result = self.run_destructors(ctx);
            let (members, mut private) = self.state.lock().detach();
            private.deref_all(ctx.sink_mut());
            for (_, value) in members {
                value.release(ctx);
            }
            self.break_program_cycle();
            result
        })
    }

    fn run_destructors(self: &Arc<Self>, ctx: &mut ThreadContext) -> RuntimeResult<()> {
        let this: &Object = self;
        let mut first_error = None;
        for class in self.class.hierarchy() {
            let Some(destructor) = class.destructor.clone() else {
                continue;
            };
            let name = format!("{}::{DESTRUCTOR}", class.name());
            let result = ctx
                .push_call(
                    &name,
                    CallKind::User,
                    Some(Arc::clone(self)),
                    SourceLocation::native(),
                )
                .and_then(|_frame| {
                    let code = CodeId::new(class.id, DESTRUCTOR);
                    ctx.with_self(Arc::clone(self), |ctx| {
                        ctx.with_code(code, |ctx| destructor(ctx, this))
                    })
                });
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Destroy without running destructors.
    ///
    /// Used when construction fails and when the last reference is dropped
    /// with no thread context at hand. Native state goes through
    /// [`PrivateDataList::deref_all`]; member values are simply dropped.
    pub fn obliterate(&self, sink: &mut ErrorSink) {
        let (members, mut private) = {
            let mut state = self.state.lock();
            if state.status == ObjectStatus::Destroyed {
                return;
            }
            state.detach()
        };
        tracing::debug!(class = %self.class.name(), "obliterating object");
        private.deref_all(sink);
        ensure_sufficient_stack(|| drop(members));
        self.break_program_cycle();
    }

    /// Break this object's program edge.
    pub fn break_program_cycle(&self) -> bool {
        let released = self.program.break_cycle();
        if released {
            tracing::trace!(class = %self.class.name(), "object released its program");
        }
        released
    }
}

impl ProgramCycle for Object {
    fn deref_program_cycle(&self) -> bool {
        self.break_program_cycle()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.class.name())
            .field("status", &self.status())
            .field("external_refs", &self.external_refs())
            .finish_non_exhaustive()
    }
}

/// Counted external reference to an [`Object`].
///
/// Release the last reference with [`ObjectRef::release`] to run the
/// destructor on a thread. Dropping the last reference instead obliterates
/// the object, since no thread context is available to run a destructor on.
pub struct ObjectRef {
    obj: Arc<Object>,
    released: bool,
}

impl ObjectRef {
    /// Take a new external reference through a memory-only handle.
    ///
    /// Fails once the external count has reached zero: the object is being
    /// or has been torn down and cannot be revived.
    pub fn from_arc(obj: &Arc<Object>) -> Option<Self> {
        obj.external_refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 0).then_some(n + 1)
            })
            .ok()?;
        Some(ObjectRef {
            obj: Arc::clone(obj),
            released: false,
        })
    }

    /// Release this reference; the last one runs the destructor on `ctx`.
    pub fn release(mut self, ctx: &mut ThreadContext) -> RuntimeResult<()> {
        self.released = true;
        if self.obj.external_refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.obj.destruct(ctx)
        } else {
            Ok(())
        }
    }

    /// Whether both references name the same object.
    #[inline]
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.obj, &other.obj)
    }

    /// A memory-only handle to the object.
    #[inline]
    pub fn as_arc(&self) -> &Arc<Object> {
        &self.obj
    }
}

impl Clone for ObjectRef {
    fn clone(&self) -> Self {
        self.obj.external_refs.fetch_add(1, Ordering::AcqRel);
        ObjectRef {
            obj: Arc::clone(&self.obj),
            released: false,
        }
    }
}

impl Drop for ObjectRef {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.obj.external_refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            let mut sink = ErrorSink::new();
            self.obj.obliterate(&mut sink);
            for err in sink.take() {
                tracing::debug!(
                    class = %self.obj.class.name(),
                    error = %err,
                    "error while obliterating dropped object"
                );
            }
        }
    }
}

impl Deref for ObjectRef {
    type Target = Arc<Object>;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.obj
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.obj, f)
    }
}
