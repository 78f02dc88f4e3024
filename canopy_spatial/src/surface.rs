// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Execution surfaces: the capability interface structures are written against.
//!
//! A [`Surface`] allocates fixed-length [`Buffer`]s, copies into them and
//! runs jobs that issue parallel-for launches through a [`Launcher`].
//! [`Host`] runs every job to completion on the calling thread. [`Device`]
//! enqueues jobs on a [`DeviceContext`] stream and returns immediately;
//! callers observe completion through [`Surface::synchronize`].

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use rayon::prelude::*;

use crate::device::{Allocation, DeviceContext};
use crate::error::{Error, Result};

/// Which side a surface executes on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    /// Synchronous execution on the calling thread.
    Host,
    /// Asynchronous execution on a device stream.
    Device,
}

/// Dispatches data-parallel kernels for a running job.
#[derive(Clone, Debug)]
pub enum Launcher {
    /// Sequential loop on the current thread.
    Serial,
    /// Parallel-for on the device's launch pool.
    Parallel(Arc<rayon::ThreadPool>),
}

impl Launcher {
    /// Write `kernel(i)` into `out[i]` for every index.
    pub fn launch<T, K>(&self, out: &mut [T], kernel: K)
    where
        T: Send,
        K: Fn(usize) -> T + Sync + Send,
    {
        match self {
            Self::Serial => {
                for (i, slot) in out.iter_mut().enumerate() {
                    *slot = kernel(i);
                }
            }
            Self::Parallel(pool) => pool.install(|| {
                out.par_iter_mut()
                    .enumerate()
                    .for_each(|(i, slot)| *slot = kernel(i));
            }),
        }
    }

    /// Like [`launch`](Self::launch) for kernels that can fail.
    ///
    /// Stops at the first error; which error is reported is unspecified for
    /// parallel launches.
    pub fn try_launch<T, K>(&self, out: &mut [T], kernel: K) -> Result<()>
    where
        T: Send,
        K: Fn(usize) -> Result<T> + Sync + Send,
    {
        match self {
            Self::Serial => out.iter_mut().enumerate().try_for_each(|(i, slot)| {
                *slot = kernel(i)?;
                Ok(())
            }),
            Self::Parallel(pool) => pool.install(|| {
                out.par_iter_mut().enumerate().try_for_each(|(i, slot)| {
                    *slot = kernel(i)?;
                    Ok(())
                })
            }),
        }
    }

    /// Fold `map(i)` for `i in 0..len` with an associative `combine`.
    pub fn map_reduce<T, M, C>(&self, len: usize, identity: T, map: M, combine: C) -> T
    where
        T: Copy + Send + Sync,
        M: Fn(usize) -> T + Sync + Send,
        C: Fn(T, T) -> T + Sync + Send,
    {
        match self {
            Self::Serial => (0..len).map(map).fold(identity, combine),
            Self::Parallel(pool) => {
                pool.install(|| (0..len).into_par_iter().map(map).reduce(|| identity, combine))
            }
        }
    }

    /// Sort keys in place.
    pub fn sort_unstable<T: Ord + Send>(&self, keys: &mut [T]) {
        match self {
            Self::Serial => keys.sort_unstable(),
            Self::Parallel(pool) => pool.install(|| keys.par_sort_unstable()),
        }
    }
}

/// Fixed-length storage owned by a surface.
///
/// Clones share the same storage, which is how a job captures the buffers
/// it works on. On a device surface the storage is charged against the
/// context's memory budget until the last clone is dropped.
pub struct Buffer<T> {
    inner: Arc<BufferInner<T>>,
}

struct BufferInner<T> {
    data: RwLock<Vec<T>>,
    len: usize,
    _allocation: Option<Allocation>,
}

impl<T> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default> Buffer<T> {
    fn new(len: usize, allocation: Option<Allocation>) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| Error::AllocationFailure {
                bytes: len.saturating_mul(size_of::<T>()),
            })?;
        data.resize_with(len, T::default);
        Ok(Self {
            inner: Arc::new(BufferInner {
                data: RwLock::new(data),
                len,
                _allocation: allocation,
            }),
        })
    }
}

impl<T> Buffer<T> {
    /// Number of elements.
    pub fn len(&self) -> usize {
        self.inner.len
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Shared view of the contents.
    pub fn read(&self) -> MappedRwLockReadGuard<'_, [T]> {
        RwLockReadGuard::map(self.inner.data.read(), Vec::as_slice)
    }

    /// Exclusive view of the contents.
    pub fn write(&self) -> MappedRwLockWriteGuard<'_, [T]> {
        RwLockWriteGuard::map(self.inner.data.write(), Vec::as_mut_slice)
    }
}

impl<T> Debug for Buffer<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.inner.len)
            .field("device", &self.inner._allocation.is_some())
            .finish_non_exhaustive()
    }
}

/// Capability interface shared by host and device execution.
pub trait Surface: Clone + Debug + Send + Sync + 'static {
    /// Which side this surface executes on.
    fn kind(&self) -> SurfaceKind;

    /// Allocate `len` default-initialized elements.
    fn alloc<T: Default + Send + Sync + 'static>(&self, len: usize) -> Result<Buffer<T>>;

    /// Run `job`, or enqueue it on a device stream.
    ///
    /// On the host the job's error is returned directly. On a device the
    /// call succeeds once the job is queued and a failure is reported by
    /// the next [`synchronize`](Self::synchronize).
    fn submit<F>(&self, label: &'static str, job: F) -> Result<()>
    where
        F: FnOnce(&Launcher) -> Result<()> + Send + 'static;

    /// Wait for submitted work and report deferred failures.
    fn synchronize(&self) -> Result<()>;

    /// Copy `src` into `dst[offset..]`.
    ///
    /// The range is validated immediately; `src` is staged so the caller may
    /// reuse it as soon as this returns.
    fn upload<T: Copy + Send + Sync + 'static>(
        &self,
        dst: &Buffer<T>,
        offset: usize,
        src: &[T],
    ) -> Result<()> {
        let end = offset
            .checked_add(src.len())
            .filter(|end| *end <= dst.len())
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "copy of {} elements at offset {offset} overflows buffer of {}",
                    src.len(),
                    dst.len()
                ))
            })?;
        let staged = src.to_vec();
        let dst = dst.clone();
        self.submit("copy", move |_| {
            dst.write()[offset..end].copy_from_slice(&staged);
            Ok(())
        })
    }

    /// Copy a buffer back to the caller after pending work completes.
    fn download<T: Clone>(&self, src: &Buffer<T>) -> Result<Vec<T>> {
        self.synchronize()?;
        Ok(src.read().to_vec())
    }
}

/// Synchronous CPU execution.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Host;

impl Surface for Host {
    fn kind(&self) -> SurfaceKind {
        SurfaceKind::Host
    }

    fn alloc<T: Default + Send + Sync + 'static>(&self, len: usize) -> Result<Buffer<T>> {
        Buffer::new(len, None)
    }

    fn submit<F>(&self, _label: &'static str, job: F) -> Result<()>
    where
        F: FnOnce(&Launcher) -> Result<()> + Send + 'static,
    {
        job(&Launcher::Serial)
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}

/// Asynchronous execution on a [`DeviceContext`].
#[derive(Clone, Debug)]
pub struct Device {
    context: DeviceContext,
}

impl Device {
    /// A surface that routes allocation and work through `context`.
    pub fn new(context: DeviceContext) -> Self {
        Self { context }
    }

    /// The underlying context.
    pub fn context(&self) -> &DeviceContext {
        &self.context
    }
}

impl Surface for Device {
    fn kind(&self) -> SurfaceKind {
        SurfaceKind::Device
    }

    fn alloc<T: Default + Send + Sync + 'static>(&self, len: usize) -> Result<Buffer<T>> {
        let bytes = len
            .checked_mul(size_of::<T>())
            .ok_or(Error::AllocationFailure { bytes: usize::MAX })?;
        let allocation = self.context.allocate(bytes)?;
        Buffer::new(len, Some(allocation))
    }

    fn submit<F>(&self, label: &'static str, job: F) -> Result<()>
    where
        F: FnOnce(&Launcher) -> Result<()> + Send + 'static,
    {
        let launcher = Launcher::Parallel(self.context.launch_pool());
        self.context.enqueue(label, move || job(&launcher))
    }

    fn synchronize(&self) -> Result<()> {
        self.context.synchronize()
    }
}
