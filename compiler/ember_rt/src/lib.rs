//! Ember runtime core.
//!
//! The pieces of the interpreter that outlive a single expression: variable
//! slots and their block arenas, captured closure environments, objects and
//! their teardown, per-thread context and the diagnostic call chain.
//!
//! # Module Map
//!
//! - [`arena`], [`local_stack`], [`closure_stack`]: per-thread LIFO slot storage
//! - [`closure`]: closure environments and callable closure values
//! - [`object`]: classes, objects, private native data and the lifecycle
//! - [`thread`], [`call_stack`], [`runtime`]: thread contexts and introspection
//! - [`program`], [`cycle`]: the program edge and its explicit breaking
//!
//! # Threads
//!
//! A [`ThreadContext`] is owned by one thread at a time. Contexts are created
//! through [`Runtime::attach_thread`] (any OS thread, including several on
//! one) or [`Runtime::spawn`] (a new OS thread).

pub mod arena;
pub mod call_stack;
pub mod closure;
pub mod closure_stack;
pub mod config;
pub mod cycle;
pub mod errors;
pub mod ids;
pub mod local_stack;
pub mod object;
pub mod program;
pub mod runtime;
mod stack;
pub mod thread;
pub mod value;

use std::sync::Once;

pub use arena::{SlotArena, SlotId, DEFAULT_BLOCK_SIZE};
pub use call_stack::{CallFrameGuard, CallKind, CallNode, CallRecord, CallStack, CallStackRegistry};
pub use closure::{ClosureBody, ClosureEnvironment, ClosureTemplate, ClosureValue};
pub use closure_stack::{ClosureVarSlot, ClosureVariableStack, MemberPath, ReferenceExpr};
pub use config::{RuntimeBuilder, RuntimeConfig};
pub use cycle::{CycleRef, ProgramCycle};
pub use errors::{ErrorSink, RuntimeError, RuntimeErrorKind, RuntimeResult};
pub use ids::{ClassId, SourceLocation, ThreadId, VarId};
pub use local_stack::{LocalVarSlot, LocalVariableStack};
pub use object::{
    Class, NativeData, Object, ObjectRef, ObjectStatus, PrivateDataHooks, DESTRUCTOR, MEMBER_GATE,
};
pub use program::Program;
pub use runtime::{Runtime, ThreadExit};
pub use stack::ensure_sufficient_stack;
pub use thread::{CodeId, ThreadContext};
pub use value::Value;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing output.
///
/// Safe to call multiple times. Enabled only when `EMBER_LOG` (or, failing
/// that, `RUST_LOG`) is set, e.g. `EMBER_LOG=ember_rt=debug`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        let directives = std::env::var("EMBER_LOG").or_else(|_| std::env::var("RUST_LOG"));
        if let Ok(directives) = directives {
            // A subscriber installed by the host wins.
            let _ = tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(EnvFilter::new(directives))
                .try_init();
        }
    });
}
