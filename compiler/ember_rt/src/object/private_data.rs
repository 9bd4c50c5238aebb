//! Native state attached to an object by built-in classes.
//!
//! One object can carry independent native state for each built-in class in
//! its hierarchy, so entries are keyed by the owning class and kept in
//! insertion order. The list is always accessed under the owning object's
//! lock; it has no synchronization of its own.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::errors::ErrorSink;
use crate::ids::ClassId;

/// Opaque native state.
pub type NativeData = Arc<dyn Any + Send + Sync>;

/// Called whenever a counted reference to the state is handed out.
pub type RefHook = fn(&NativeData);

/// Called once when the owning object releases the state.
pub type ReleaseHook = fn(&NativeData, &mut ErrorSink);

/// Reference/release callbacks supplied by the class that owns the state.
#[derive(Clone, Copy)]
pub struct PrivateDataHooks {
    pub reference: RefHook,
    pub release: ReleaseHook,
}

fn no_reference(_: &NativeData) {}

fn no_release(_: &NativeData, _: &mut ErrorSink) {}

impl Default for PrivateDataHooks {
    fn default() -> Self {
        PrivateDataHooks {
            reference: no_reference,
            release: no_release,
        }
    }
}

impl fmt::Debug for PrivateDataHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateDataHooks")
    }
}

/// The key is already present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DuplicateKey(pub ClassId);

struct PrivateEntry {
    key: ClassId,
    data: NativeData,
    hooks: PrivateDataHooks,
}

/// Ordered private-data list keyed by class.
#[derive(Default)]
pub struct PrivateDataList {
    entries: SmallVec<[PrivateEntry; 2]>,
}

impl PrivateDataList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach native state for `key`.
    pub fn insert(
        &mut self,
        key: ClassId,
        data: NativeData,
        hooks: PrivateDataHooks,
    ) -> Result<(), DuplicateKey> {
        if self.position(key).is_some() {
            return Err(DuplicateKey(key));
        }
        self.entries.push(PrivateEntry { key, data, hooks });
        Ok(())
    }

    #[inline]
    fn position(&self, key: ClassId) -> Option<usize> {
        self.entries.iter().position(|e| e.key == key)
    }

    /// Borrow the state for `key` without taking a reference.
    pub fn find(&self, key: ClassId) -> Option<&NativeData> {
        self.entries.iter().find(|e| e.key == key).map(|e| &e.data)
    }

    /// Take a counted reference on the state for `key`.
    ///
    /// The class's reference hook runs first; the returned handle is the
    /// caller's increment.
    pub fn get_referenced(&self, key: ClassId) -> Option<NativeData> {
        let entry = self.entries.iter().find(|e| e.key == key)?;
        (entry.hooks.reference)(&entry.data);
        Some(Arc::clone(&entry.data))
    }

    /// Detach the state for `key` and hand its ownership to the caller.
    ///
    /// The release hook does not run; the caller now owns teardown.
    pub fn get_and_clear(&mut self, key: ClassId) -> Option<NativeData> {
        let index = self.position(key)?;
        Some(self.entries.remove(index).data)
    }

    /// Release every entry, newest first, through its class's release hook.
    pub fn deref_all(&mut self, sink: &mut ErrorSink) {
        while let Some(entry) = self.entries.pop() {
            (entry.hooks.release)(&entry.data, sink);
        }
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.entries.iter().map(|e| e.key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for PrivateDataList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static REFS: AtomicUsize = AtomicUsize::new(0);
    static RELEASES: AtomicUsize = AtomicUsize::new(0);

    fn count_ref(_: &NativeData) {
        REFS.fetch_add(1, Ordering::SeqCst);
    }

    fn count_release(_: &NativeData, _: &mut ErrorSink) {
        RELEASES.fetch_add(1, Ordering::SeqCst);
    }

    fn counting() -> PrivateDataHooks {
        PrivateDataHooks {
            reference: count_ref,
            release: count_release,
        }
    }

    fn key(n: u32) -> ClassId {
        ClassId::new(n)
    }

    #[test]
    fn insert_keeps_order() {
        let mut list = PrivateDataList::new();
        list.insert(key(3), Arc::new(1u8), PrivateDataHooks::default())
            .unwrap_or_else(|_| panic!("first insert"));
        list.insert(key(1), Arc::new(2u8), PrivateDataHooks::default())
            .unwrap_or_else(|_| panic!("second insert"));
        assert_eq!(list.keys().collect::<Vec<_>>(), vec![key(3), key(1)]);
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let mut list = PrivateDataList::new();
        assert!(list
            .insert(key(1), Arc::new(1u8), PrivateDataHooks::default())
            .is_ok());
        assert_eq!(
            list.insert(key(1), Arc::new(2u8), PrivateDataHooks::default()),
            Err(DuplicateKey(key(1)))
        );
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn hooks_fire_on_reference_and_release() {
        let mut list = PrivateDataList::new();
        let data: NativeData = Arc::new(String::from("socket"));
        assert!(list.insert(key(1), Arc::clone(&data), counting()).is_ok());
        assert!(list.insert(key(2), Arc::new(0u8), counting()).is_ok());

        let refs_before = REFS.load(Ordering::SeqCst);
        let referenced = list.get_referenced(key(1));
        assert!(referenced.is_some());
        assert_eq!(REFS.load(Ordering::SeqCst), refs_before + 1);
        assert_eq!(Arc::strong_count(&data), 3);
        drop(referenced);

        let releases_before = RELEASES.load(Ordering::SeqCst);
        let mut sink = ErrorSink::new();
        list.deref_all(&mut sink);
        assert_eq!(RELEASES.load(Ordering::SeqCst), releases_before + 2);
        assert!(list.is_empty());
        assert_eq!(Arc::strong_count(&data), 1);
    }

    #[test]
    fn get_and_clear_hands_off_without_release() {
        let mut list = PrivateDataList::new();
        assert!(list
            .insert(key(5), Arc::new(42u32), PrivateDataHooks::default())
            .is_ok());
        let taken = list.get_and_clear(key(5));
        assert_eq!(taken.and_then(|d| d.downcast_ref::<u32>().copied()), Some(42));
        assert!(list.find(key(5)).is_none());
        assert!(list.get_and_clear(key(5)).is_none());
    }
}
