//! Identity types shared across the runtime.

use std::fmt;
use std::sync::Arc;

/// Lexical-variable identity assigned by the parser.
///
/// Slots are matched by identity, never by name: two variables that share a
/// name in nested scopes get distinct ids.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct VarId(u32);

impl VarId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        VarId(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarId({})", self.0)
    }
}

/// Class identity; also the key of an object's private-data entries.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[repr(transparent)]
pub struct ClassId(u32);

impl ClassId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        ClassId(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Identity of a thread attached to a [`Runtime`](crate::Runtime).
///
/// Issued by the runtime rather than the OS so tests can simulate many
/// threads on one OS thread.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[repr(transparent)]
pub struct ThreadId(u32);

impl ThreadId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        ThreadId(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source range of a call site or closure literal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file: Arc<str>,
    pub line: u32,
    pub end_line: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<Arc<str>>, line: u32, end_line: u32) -> Self {
        SourceLocation {
            file: file.into(),
            line,
            end_line,
        }
    }

    /// Location for code with no script source (native builtins, thread entry).
    pub fn native() -> Self {
        SourceLocation::new("<native>", 0, 0)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == self.end_line {
            write!(f, "{}:{}", self.file, self.line)
        } else {
            write!(f, "{}:{}-{}", self.file, self.line, self.end_line)
        }
    }
}
