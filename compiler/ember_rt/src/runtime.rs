//! The process-level runtime: configuration and the live-thread table.
//!
//! Threads are identified by runtime-issued [`ThreadId`]s, so a test can
//! attach several contexts on one OS thread and drive them in any
//! interleaving it likes. [`Runtime::spawn`] is the real-thread path.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use dashmap::DashMap;

use crate::call_stack::{CallKind, CallRecord, CallStackRegistry};
use crate::config::{RuntimeBuilder, RuntimeConfig};
use crate::errors::{RuntimeError, RuntimeResult};
use crate::ids::{SourceLocation, ThreadId};
use crate::program::Program;
use crate::thread::ThreadContext;

/// Name of the entry frame pushed on spawned threads.
pub const THREAD_ENTRY: &str = "<thread>";

#[derive(Debug)]
struct RuntimeInner {
    config: RuntimeConfig,
    next_thread: AtomicU32,
    threads: DashMap<ThreadId, Arc<str>>,
    call_stacks: Arc<CallStackRegistry>,
}

/// Shared handle to a runtime.
#[derive(Clone, Debug)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

/// Outcome of a thread started with [`Runtime::spawn`].
#[derive(Debug)]
pub struct ThreadExit<R> {
    /// What the thread body returned.
    pub result: RuntimeResult<R>,
    /// Errors raised into the thread's sink, including during its unwind.
    pub errors: Vec<RuntimeError>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Runtime {
            inner: Arc::new(RuntimeInner {
                config,
                next_thread: AtomicU32::new(1),
                threads: DashMap::new(),
                call_stacks: CallStackRegistry::new(),
            }),
        }
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    #[inline]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Attach a new thread and return its context.
    ///
    /// The caller owns the context; it does not have to live on a thread of
    /// its own.
    pub fn attach_thread(&self, name: &str) -> ThreadContext {
        let id = ThreadId::new(self.inner.next_thread.fetch_add(1, Ordering::Relaxed));
        let name: Arc<str> = Arc::from(name);
        let call_stack = self
            .inner
            .call_stacks
            .register(id, self.inner.config.max_call_depth);
        self.inner.threads.insert(id, Arc::clone(&name));
        tracing::debug!(thread = %id, name = %name, "thread attached");
        ThreadContext::new(id, name, self.clone(), call_stack)
    }

    pub(crate) fn detach(&self, id: ThreadId) {
        self.inner.threads.remove(&id);
    }

    /// Attached threads, ordered by id.
    pub fn live_threads(&self) -> Vec<(ThreadId, Arc<str>)> {
        let mut threads: Vec<_> = self
            .inner
            .threads
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        threads.sort_by_key(|(id, _)| *id);
        threads
    }

    /// Every live thread's call chain, most recent call first.
    pub fn snapshot_all_stacks(&self) -> BTreeMap<ThreadId, Vec<CallRecord>> {
        self.inner.call_stacks.snapshot_all_stacks()
    }

    /// Run `body` on a new OS thread with its own context.
    ///
    /// The thread's chain starts with a new-thread frame and `program` (if
    /// any) is installed as current program. The context is finished when
    /// the body returns.
    pub fn spawn<R, F>(
        &self,
        name: &str,
        program: Option<Arc<Program>>,
        body: F,
    ) -> std::io::Result<JoinHandle<ThreadExit<R>>>
    where
        R: Send + 'static,
        F: FnOnce(&mut ThreadContext) -> RuntimeResult<R> + Send + 'static,
    {
        let runtime = self.clone();
        let thread_name = name.to_string();
        std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let mut ctx = runtime.attach_thread(&thread_name);
                let result = ctx
                    .push_call(THREAD_ENTRY, CallKind::NewThread, None, SourceLocation::native())
                    .and_then(|_entry| match program {
                        Some(program) => ctx.with_program(program, body),
                        None => body(&mut ctx),
                    });
                let errors = ctx.finish();
                ThreadExit { result, errors }
            })
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new(RuntimeConfig::default())
    }
}
