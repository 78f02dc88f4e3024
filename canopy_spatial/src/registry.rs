// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Generation-checked registry mapping opaque handles to live instances.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};

/// Opaque 64-bit identifier of a registered instance.
///
/// The low 32 bits hold the slot index plus one and the high 32 bits hold
/// the slot generation, so the raw value of a live handle is never zero.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    /// The null handle. Never refers to a live instance.
    pub const NULL: Self = Self(0);

    #[allow(
        clippy::cast_possible_truncation,
        reason = "Slot indices are capped at u32::MAX - 1 by the registry."
    )]
    const fn new(index: usize, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64 + 1))
    }

    /// Reinterpret a raw value received across an API boundary.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw value handed out across an API boundary.
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    /// Whether this is [`Handle::NULL`].
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[allow(
        clippy::cast_possible_truncation,
        reason = "The low half holds a 32-bit slot index."
    )]
    const fn slot(self) -> Option<usize> {
        match self.0 & 0xffff_ffff {
            0 => None,
            low => Some(low as usize - 1),
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        reason = "The high half holds a 32-bit generation."
    )]
    const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl Debug for Handle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.slot() {
            Some(slot) => write!(f, "Handle({slot}v{})", self.generation()),
            None => write!(f, "Handle(null)"),
        }
    }
}

struct Entry<T> {
    generation: u32,
    value: Option<Arc<Mutex<T>>>,
}

struct Slots<T> {
    entries: Vec<Entry<T>>,
    free_list: Vec<usize>,
    live: usize,
}

/// Arena of instances addressed by [`Handle`].
///
/// Publication and retirement happen under a single write lock, so a
/// lookup never observes an instance that is still being built or is
/// being torn down. Each instance sits behind its own mutex; long running
/// operations hold only that mutex, never the registry lock.
pub struct Registry<T> {
    name: &'static str,
    slots: RwLock<Slots<T>>,
}

impl<T: Send> Registry<T> {
    /// Create an empty registry. `name` labels log lines.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: RwLock::new(Slots {
                entries: Vec::new(),
                free_list: Vec::new(),
                live: 0,
            }),
        }
    }

    /// Build an instance and publish it.
    ///
    /// `build` runs without holding the registry lock. When it fails no
    /// handle is issued.
    pub fn create(&self, build: impl FnOnce() -> Result<T>) -> Result<Handle> {
        let value = build()?;
        self.insert(value)
    }

    /// Publish an already built instance.
    pub fn insert(&self, value: T) -> Result<Handle> {
        let value = Arc::new(Mutex::new(value));
        let mut slots = self.slots.write();
        let index = match slots.free_list.pop() {
            Some(index) => index,
            None => {
                if slots.entries.len() >= u32::MAX as usize - 1 {
                    return Err(Error::AllocationFailure {
                        bytes: size_of::<Entry<T>>(),
                    });
                }
                slots.entries.push(Entry {
                    generation: 1,
                    value: None,
                });
                slots.entries.len() - 1
            }
        };
        let entry = &mut slots.entries[index];
        entry.value = Some(value);
        let handle = Handle::new(index, entry.generation);
        slots.live += 1;
        drop(slots);
        log::debug!("{}: created {handle:?}", self.name);
        Ok(handle)
    }

    /// Resolve a handle to its shared instance.
    pub fn lookup(&self, handle: Handle) -> Result<Arc<Mutex<T>>> {
        let slots = self.slots.read();
        handle
            .slot()
            .and_then(|index| slots.entries.get(index))
            .filter(|entry| entry.generation == handle.generation())
            .and_then(|entry| entry.value.clone())
            .ok_or(Error::InvalidHandle(handle))
    }

    /// Run `f` with exclusive access to the instance behind `handle`.
    pub fn with<R>(&self, handle: Handle, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        let instance = self.lookup(handle)?;
        let mut guard = instance.lock();
        f(&mut guard)
    }

    /// Retire a handle and release the instance.
    ///
    /// Destroying a handle twice fails with [`Error::InvalidHandle`]. An
    /// operation already running on the instance finishes first; the
    /// instance is dropped when the last reference goes away.
    pub fn destroy(&self, handle: Handle) -> Result<()> {
        let mut slots = self.slots.write();
        let index = handle.slot().ok_or(Error::InvalidHandle(handle))?;
        let entry = slots
            .entries
            .get_mut(index)
            .filter(|entry| entry.generation == handle.generation())
            .ok_or(Error::InvalidHandle(handle))?;
        let value = entry.value.take().ok_or(Error::InvalidHandle(handle))?;
        entry.generation = entry.generation.wrapping_add(1).max(1);
        slots.free_list.push(index);
        slots.live -= 1;
        drop(slots);
        drop(value);
        log::debug!("{}: destroyed {handle:?}", self.name);
        Ok(())
    }

    /// Whether `handle` refers to a live instance.
    pub fn contains(&self, handle: Handle) -> bool {
        self.lookup(handle).is_ok()
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.slots.read().live
    }

    /// Whether no instance is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Debug for Registry<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let slots = self.slots.read();
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("live", &slots.live)
            .field("slots", &slots.entries.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn null_handle_is_never_live() {
        let reg = Registry::<u32>::new("test");
        let h = reg.insert(7).unwrap();
        assert_ne!(h.to_raw(), 0);
        assert_eq!(
            reg.lookup(Handle::NULL).unwrap_err(),
            Error::InvalidHandle(Handle::NULL)
        );
        assert_eq!(format!("{:?}", Handle::NULL), "Handle(null)");
        assert_eq!(format!("{h:?}"), "Handle(0v1)");
    }

    #[test]
    fn failed_build_publishes_nothing() {
        let reg = Registry::<u32>::new("test");
        let res = reg.create(|| Err(Error::InvalidArgument("no".into())));
        assert!(res.is_err());
        assert!(reg.is_empty());
    }

    #[test]
    fn destroy_then_use_is_invalid_handle() {
        let reg = Registry::<Vec<u8>>::new("test");
        let h = reg.create(|| Ok(vec![1, 2, 3])).unwrap();
        assert_eq!(reg.with(h, |v| Ok(v.len())).unwrap(), 3);
        reg.destroy(h).unwrap();
        assert_eq!(reg.destroy(h), Err(Error::InvalidHandle(h)));
        assert_eq!(reg.with(h, |v| Ok(v.len())), Err(Error::InvalidHandle(h)));
        assert!(!reg.contains(h));
    }

    #[test]
    fn stale_handle_after_slot_reuse_is_rejected() {
        let reg = Registry::<&str>::new("test");
        let a = reg.insert("a").unwrap();
        reg.destroy(a).unwrap();
        let b = reg.insert("b").unwrap();
        assert_ne!(a, b);
        assert!(reg.lookup(a).is_err());
        assert_eq!(*reg.lookup(b).unwrap().lock(), "b");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn in_flight_instance_outlives_destroy() {
        let reg = Registry::<String>::new("test");
        let h = reg.insert("alive".to_string()).unwrap();
        let held = reg.lookup(h).unwrap();
        reg.destroy(h).unwrap();
        assert_eq!(*held.lock(), "alive");
    }

    #[test]
    fn concurrent_create_lookup_destroy() {
        let reg = Arc::new(Registry::<usize>::new("test"));
        let workers: Vec<_> = (0..8)
            .map(|t| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || {
                    for i in 0..200 {
                        let value = t * 1000 + i;
                        let h = reg.create(|| Ok(value)).unwrap();
                        assert_eq!(reg.with(h, |v| Ok(*v)).unwrap(), value);
                        reg.destroy(h).unwrap();
                        assert!(reg.lookup(h).is_err());
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert!(reg.is_empty());
    }
}
