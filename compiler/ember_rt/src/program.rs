//! The owning program of closures and objects.
//!
//! A program is the far end of every closure and object program edge. It
//! keeps a weak list of those participants so that its teardown can break
//! each edge exactly once (see [`crate::cycle`]).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::cycle::ProgramCycle;

/// A loaded program.
pub struct Program {
    name: Arc<str>,
    participants: Mutex<Vec<Weak<dyn ProgramCycle>>>,
    torn_down: AtomicBool,
}

impl Program {
    pub fn new(name: impl Into<Arc<str>>) -> Arc<Self> {
        Arc::new(Program {
            name: name.into(),
            participants: Mutex::new(Vec::new()),
            torn_down: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record a closure or object that holds a breakable edge to this program.
    ///
    /// A participant arriving after teardown has its edge broken on the spot;
    /// no later teardown would reach it.
    pub(crate) fn register(&self, participant: Weak<dyn ProgramCycle>) {
        {
            // Teardown raises the flag before it takes the list lock.
            let mut participants = self.participants.lock();
            if !self.is_torn_down() {
                if participants.len() == participants.capacity() {
                    participants.retain(|p| p.strong_count() > 0);
                }
                participants.push(participant);
                return;
            }
        }
        if participant
            .upgrade()
            .is_some_and(|late| late.deref_program_cycle())
        {
            tracing::debug!(
                program = %self.name,
                "released participant registered after teardown"
            );
        }
    }

    /// Number of registered participants still alive.
    pub fn live_participants(&self) -> usize {
        self.participants
            .lock()
            .iter()
            .filter(|p| p.strong_count() > 0)
            .count()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Break the program edge of every live participant.
    ///
    /// Returns the number of edges this call released. Calling it again is a
    /// no-op.
    pub fn teardown(&self) -> usize {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return 0;
        }
        // Participants may drop their last reference to us while breaking,
        // so the list is detached before any edge is cut.
        let participants = std::mem::take(&mut *self.participants.lock());
        let released = participants
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|p| p.deref_program_cycle())
            .count();
        tracing::debug!(program = %self.name, released, "program torn down");
        released
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.name)
            .field("torn_down", &self.is_torn_down())
            .finish_non_exhaustive()
    }
}
