// Copyright 2025 the Canopy Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Simulated device execution context.
//!
//! A [`DeviceContext`] stands in for an accelerator runtime: it accounts
//! device memory against a budget, owns an in-order stream that runs
//! enqueued jobs on a dedicated worker thread, and a thread pool that jobs
//! use for data-parallel launches. Enqueueing returns immediately; failures
//! inside a job are recorded and reported by the next [`DeviceContext::synchronize`].

use std::any::Any;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::config::DeviceConfig;
use crate::error::{Error, Result};

type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

enum Command {
    Run { label: &'static str, job: Job },
    Fence(Sender<()>),
}

static NEXT_ORDINAL: AtomicUsize = AtomicUsize::new(0);

/// Memory accounting shared by a context and its live allocations.
#[derive(Debug)]
struct MemoryPool {
    in_use: AtomicUsize,
    budget: Option<usize>,
}

impl MemoryPool {
    fn reserve(self: &Arc<Self>, bytes: usize) -> Result<Allocation> {
        let mut current = self.in_use.load(Ordering::Relaxed);
        loop {
            let next = current
                .checked_add(bytes)
                .filter(|next| self.budget.is_none_or(|budget| *next <= budget))
                .ok_or(Error::AllocationFailure { bytes })?;
            match self.in_use.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        Ok(Allocation {
            bytes,
            pool: Arc::clone(self),
        })
    }
}

/// A live device allocation. Dropping it returns the bytes to the context's budget.
#[derive(Debug)]
pub struct Allocation {
    bytes: usize,
    pool: Arc<MemoryPool>,
}

impl Allocation {
    /// Size of the allocation in bytes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

/// Handle to a simulated device: allocator, stream and launch pool.
///
/// Cloning is cheap and yields another reference to the same device.
#[derive(Clone)]
pub struct DeviceContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    ordinal: usize,
    memory: Arc<MemoryPool>,
    pool: Arc<rayon::ThreadPool>,
    queue: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    failure: Arc<Mutex<Option<Error>>>,
}

impl DeviceContext {
    /// Create a device with its own stream worker and launch pool.
    pub fn new(config: &DeviceConfig) -> Result<Self> {
        let ordinal = NEXT_ORDINAL.fetch_add(1, Ordering::Relaxed);
        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(move |i| format!("canopy-device{ordinal}-lane{i}"));
        if let Some(n) = config.worker_threads {
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|e| Error::DeviceExecutionFailure(format!("launch pool: {e}")))?;

        let (queue, commands) = crossbeam_channel::unbounded();
        let failure = Arc::new(Mutex::new(None));
        let worker = {
            let failure = Arc::clone(&failure);
            thread::Builder::new()
                .name(format!("canopy-device{ordinal}-stream"))
                .spawn(move || run_stream(ordinal, &commands, &failure))
                .map_err(|e| Error::DeviceExecutionFailure(format!("stream worker: {e}")))?
        };
        log::debug!(
            "device {ordinal}: created (budget {:?}, {} lanes)",
            config.memory_budget,
            pool.current_num_threads()
        );
        Ok(Self {
            inner: Arc::new(ContextInner {
                ordinal,
                memory: Arc::new(MemoryPool {
                    in_use: AtomicUsize::new(0),
                    budget: config.memory_budget,
                }),
                pool: Arc::new(pool),
                queue: Some(queue),
                worker: Some(worker),
                failure,
            }),
        })
    }

    /// Process-unique ordinal, used in logs.
    pub fn ordinal(&self) -> usize {
        self.inner.ordinal
    }

    /// Reserve `bytes` of device memory.
    pub fn allocate(&self, bytes: usize) -> Result<Allocation> {
        let allocation = self.inner.memory.reserve(bytes);
        if allocation.is_err() {
            log::warn!(
                "device {}: allocation of {bytes} bytes rejected ({} in use)",
                self.inner.ordinal,
                self.memory_in_use()
            );
        }
        allocation
    }

    /// Bytes currently held by live allocations.
    pub fn memory_in_use(&self) -> usize {
        self.inner.memory.in_use.load(Ordering::Acquire)
    }

    /// Append a job to the stream and return without waiting for it.
    ///
    /// Jobs run in enqueue order. An error (or panic) inside `job` is not
    /// reported here; it surfaces at the next [`synchronize`](Self::synchronize).
    pub fn enqueue<F>(&self, label: &'static str, job: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.send(Command::Run {
            label,
            job: Box::new(job),
        })
    }

    /// Wait for every job enqueued so far and report the first deferred failure.
    ///
    /// The failure is cleared once reported.
    pub fn synchronize(&self) -> Result<()> {
        let (done, wait) = crossbeam_channel::bounded(1);
        self.send(Command::Fence(done))?;
        wait.recv().map_err(|_| stream_closed())?;
        match self.inner.failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub(crate) fn launch_pool(&self) -> Arc<rayon::ThreadPool> {
        Arc::clone(&self.inner.pool)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.inner
            .queue
            .as_ref()
            .ok_or_else(stream_closed)?
            .send(command)
            .map_err(|_| stream_closed())
    }
}

impl Debug for DeviceContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("ordinal", &self.inner.ordinal)
            .field("memory_in_use", &self.memory_in_use())
            .field("budget", &self.inner.memory.budget)
            .finish_non_exhaustive()
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain and exit.
        self.queue.take();
        if let Some(worker) = self.worker.take()
            && worker.thread().id() != thread::current().id()
        {
            let _ = worker.join();
        }
        log::debug!("device {}: released", self.ordinal);
    }
}

fn stream_closed() -> Error {
    Error::DeviceExecutionFailure("device stream is closed".into())
}

fn run_stream(ordinal: usize, commands: &Receiver<Command>, failure: &Mutex<Option<Error>>) {
    for command in commands {
        match command {
            Command::Run { label, job } => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|payload| {
                    Err(Error::DeviceExecutionFailure(format!(
                        "{label} panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                });
                if let Err(err) = outcome {
                    log::error!("device {ordinal}: {label} failed: {err}");
                    failure.lock().get_or_insert(err);
                }
            }
            Command::Fence(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
