//! Closure values and their captured environments.
//!
//! Evaluating a closure literal resolves its parse-time free-variable list
//! against the creating thread's closure stack and takes a reference on each
//! slot. The resulting [`ClosureEnvironment`] is frozen: the closure can be
//! called long after the declaring frame has unwound, from any thread.
//!
//! # Program Edge
//!
//! A closure must keep its program alive, but the program (through its
//! classes and objects) can also reach the closure. The edge is therefore
//! breakable:
//!
//! - **Plain** closures hold a [`CycleRef`] on the program.
//! - **Bound** closures hold no program reference of their own and forward
//!   the break to their object, which owns the edge for both.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use smallvec::SmallVec;

use crate::call_stack::{CallKind, CallNode};
use crate::closure_stack::ClosureVarSlot;
use crate::cycle::{CycleRef, ProgramCycle};
use crate::errors::{program_unavailable, RuntimeResult};
use crate::ids::{SourceLocation, VarId};
use crate::object::Object;
use crate::program::Program;
use crate::thread::{CodeId, ThreadContext};
use crate::value::Value;

/// Evaluator entry point for one closure literal.
pub type ClosureBody =
    Arc<dyn Fn(&mut ThreadContext, &[Value]) -> RuntimeResult<Value> + Send + Sync>;

/// Parse-time description of a closure literal.
pub struct ClosureTemplate {
    name: Arc<str>,
    captures: SmallVec<[VarId; 4]>,
    location: SourceLocation,
    body: ClosureBody,
}

impl ClosureTemplate {
    pub fn new(
        name: impl Into<Arc<str>>,
        captures: impl IntoIterator<Item = VarId>,
        location: SourceLocation,
        body: impl Fn(&mut ThreadContext, &[Value]) -> RuntimeResult<Value> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(ClosureTemplate {
            name: name.into(),
            captures: captures.into_iter().collect(),
            location,
            body: Arc::new(body),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free variables, in parse order.
    pub fn captures(&self) -> &[VarId] {
        &self.captures
    }

    pub fn location(&self) -> &SourceLocation {
        &self.location
    }
}

impl fmt::Debug for ClosureTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureTemplate")
            .field("name", &self.name)
            .field("captures", &self.captures)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

/// Captured slots of one closure, keyed by variable identity.
#[derive(Debug, Default)]
pub struct ClosureEnvironment {
    captured: SmallVec<[(VarId, Arc<ClosureVarSlot>); 4]>,
}

impl ClosureEnvironment {
    /// Take a reference on the innermost visible slot of each id.
    ///
    /// Ids are resolved the same way a variable read in the creating code
    /// would be, so a closure nested in a closure body can re-capture from
    /// its parent's environment.
    pub fn capture(ctx: &ThreadContext, ids: &[VarId]) -> Self {
        let mut captured: SmallVec<[(VarId, Arc<ClosureVarSlot>); 4]> =
            SmallVec::with_capacity(ids.len());
        for &id in ids {
            debug_assert!(
                !captured.iter().any(|(seen, _)| *seen == id),
                "closure captures {id:?} twice"
            );
            let slot = ctx.resolve_closure_var(id);
            debug_assert!(slot.is_some(), "captured variable {id:?} is not in scope");
            match slot {
                Some(slot) => captured.push((id, slot)),
                None => tracing::warn!(?id, "captured variable is not in scope"),
            }
        }
        ClosureEnvironment { captured }
    }

    /// The captured slot for `id`.
    pub fn get(&self, id: VarId) -> Option<&Arc<ClosureVarSlot>> {
        self.captured
            .iter()
            .find(|(captured, _)| *captured == id)
            .map(|(_, slot)| slot)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.captured.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.captured.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VarId, &Arc<ClosureVarSlot>)> {
        self.captured.iter().map(|(id, slot)| (*id, slot))
    }
}

enum Binding {
    Plain {
        program: CycleRef<Program>,
    },
    Bound {
        object: Arc<Object>,
        released: AtomicBool,
    },
}

/// A callable closure: template plus captured environment.
pub struct ClosureValue {
    template: Arc<ClosureTemplate>,
    env: Arc<ClosureEnvironment>,
    binding: Binding,
}

impl ClosureValue {
    /// A closure created outside any method; it references `program`.
    pub fn plain(
        template: Arc<ClosureTemplate>,
        env: ClosureEnvironment,
        program: &Arc<Program>,
    ) -> Arc<Self> {
        let closure = Arc::new(ClosureValue {
            template,
            env: Arc::new(env),
            binding: Binding::Plain {
                program: CycleRef::new(Arc::clone(program)),
            },
        });
        let weak: Weak<dyn ProgramCycle> = Arc::downgrade(&closure) as Weak<dyn ProgramCycle>;
        program.register(weak);
        closure
    }

    /// A closure created inside a method; it runs with `object` as `self`.
    pub fn bound(
        template: Arc<ClosureTemplate>,
        env: ClosureEnvironment,
        object: &Arc<Object>,
    ) -> Arc<Self> {
        let closure = Arc::new(ClosureValue {
            template,
            env: Arc::new(env),
            binding: Binding::Bound {
                object: Arc::clone(object),
                released: AtomicBool::new(false),
            },
        });
        if let Some(program) = object.program() {
            let weak: Weak<dyn ProgramCycle> = Arc::downgrade(&closure) as Weak<dyn ProgramCycle>;
            program.register(weak);
        }
        closure
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.template.name()
    }

    pub fn template(&self) -> &Arc<ClosureTemplate> {
        &self.template
    }

    pub fn environment(&self) -> &ClosureEnvironment {
        &self.env
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.binding, Binding::Bound { .. })
    }

    /// The object a bound closure runs against.
    pub fn bound_object(&self) -> Option<&Arc<Object>> {
        match &self.binding {
            Binding::Bound { object, .. } => Some(object),
            Binding::Plain { .. } => None,
        }
    }

    /// Invoke the closure on `ctx`.
    ///
    /// A user frame named after the closure is pushed and the environment is
    /// installed for the duration of the body. Plain closures run with their
    /// program as current program; bound closures with their object as
    /// current self and its class as current code.
    pub fn call(&self, ctx: &mut ThreadContext, args: &[Value]) -> RuntimeResult<Value> {
        let body = Arc::clone(&self.template.body);
        let env = Arc::clone(&self.env);
        match &self.binding {
            Binding::Plain { program } => {
                let program = program
                    .get()
                    .ok_or_else(|| program_unavailable(self.name()))?;
                let node = CallNode::new(
                    self.template.name.clone(),
                    CallKind::User,
                    self.template.location.clone(),
                );
                let _frame = ctx.call_stack().push(node)?;
                ctx.with_program(program, |ctx| {
                    ctx.with_environment(env, |ctx| body(ctx, args))
                })
            }
            Binding::Bound { object, .. } => {
                object.ensure_accessible(ctx, self.name())?;
                let node = CallNode::new(
                    self.template.name.clone(),
                    CallKind::User,
                    self.template.location.clone(),
                )
                .with_object(Arc::clone(object));
                let _frame = ctx.call_stack().push(node)?;
                let code = CodeId::new(object.class().id(), self.name());
                ctx.with_self(Arc::clone(object), |ctx| {
                    ctx.with_code(code, |ctx| {
                        ctx.with_environment(env, |ctx| body(ctx, args))
                    })
                })
            }
        }
    }

    /// Drop one owner of `closure` on `ctx`.
    ///
    /// If it was the last owner, captured slots that nothing else holds give
    /// up their values through [`Value::release`], newest capture first.
    pub(crate) fn release(closure: Arc<Self>, ctx: &mut ThreadContext) {
        let Some(closure) = Arc::into_inner(closure) else {
            return;
        };
        let Some(env) = Arc::into_inner(closure.env) else {
            return;
        };
        for (_, slot) in env.captured.into_iter().rev() {
            if let Some(slot) = Arc::into_inner(slot) {
                slot.into_value().release(ctx);
            }
        }
    }

    /// Whether the program edge has been released.
    pub fn is_cycle_broken(&self) -> bool {
        match &self.binding {
            Binding::Plain { program } => program.is_broken(),
            Binding::Bound { released, .. } => released.load(Ordering::Acquire),
        }
    }
}

impl ProgramCycle for ClosureValue {
    fn deref_program_cycle(&self) -> bool {
        let released = match &self.binding {
            Binding::Plain { program } => program.break_cycle(),
            Binding::Bound { object, released } => {
                !released.swap(true, Ordering::AcqRel) && object.break_program_cycle()
            }
        };
        if released {
            tracing::trace!(closure = %self.name(), "closure released its program");
        }
        released
    }
}

impl fmt::Debug for ClosureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureValue")
            .field("name", &self.name())
            .field("captured", &self.env.len())
            .field("bound", &self.is_bound())
            .field("cycle_broken", &self.is_cycle_broken())
            .finish()
    }
}
