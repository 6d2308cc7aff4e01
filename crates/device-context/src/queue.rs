// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! In-order command queue with event fences.
//!
//! Commands are recorded when enqueued and executed, strictly in order,
//! when the queue is flushed or finished, or when an [`Event`] belonging
//! to a pending command is waited on. This mirrors the observable
//! semantics of an in-order OpenCL queue:
//!
//! - a blocking map returns a mapping whose data is ready;
//! - a non-blocking map returns a mapping that must not be read until its
//!   event completes;
//! - unmap never waits and hands back an [`Event`] fence.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use crate::{BufferBytes, ClContext, DeviceBuffer};

/// Maximum number of executed dispatches kept for inspection.
const DISPATCH_HISTORY_LEN: usize = 256;

// ── NdRange ─────────────────────────────────────────────────────

/// A 3-D work size. The null range (all zeros) means "let the driver
/// choose" when used as a local size, and "nothing to run" as a global
/// size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
pub struct NdRange([usize; 3]);

impl NdRange {
    pub const fn new(x: usize, y: usize, z: usize) -> Self {
        Self([x, y, z])
    }

    pub const fn null() -> Self {
        Self([0, 0, 0])
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0, 0, 0]
    }

    pub fn x(&self) -> usize {
        self.0[0]
    }

    pub fn y(&self) -> usize {
        self.0[1]
    }

    pub fn z(&self) -> usize {
        self.0[2]
    }

    pub fn dims(&self) -> [usize; 3] {
        self.0
    }

    /// Total number of work items.
    pub fn total(&self) -> usize {
        self.0.iter().product()
    }
}

impl fmt::Display for NdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.0[0], self.0[1], self.0[2])
    }
}

// ── Events ──────────────────────────────────────────────────────

struct EventState {
    seq: u64,
    label: String,
    complete: AtomicBool,
}

/// Completion fence for an enqueued command.
#[derive(Clone)]
pub struct Event {
    state: Arc<EventState>,
    queue: Weak<QueueInner>,
}

impl Event {
    /// An event that is already complete.
    pub fn completed(label: &str) -> Self {
        Self {
            state: Arc::new(EventState {
                seq: 0,
                label: label.to_string(),
                complete: AtomicBool::new(true),
            }),
            queue: Weak::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state.complete.load(Ordering::Acquire)
    }

    /// Blocks until the command completes, executing the queue up to it.
    pub fn wait(&self) {
        if self.is_complete() {
            return;
        }
        if let Some(queue) = self.queue.upgrade() {
            queue.run_until(self.state.seq);
        }
        debug_assert!(self.is_complete(), "event '{}' did not complete", self.state.label);
    }

    /// Name of the command this event fences.
    pub fn label(&self) -> &str {
        &self.state.label
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("label", &self.state.label)
            .field("complete", &self.is_complete())
            .finish()
    }
}

// ── Host mappings ───────────────────────────────────────────────

/// Host view of a mapped device buffer.
///
/// Reading or writing through the mapping before its map event has
/// completed is a contract violation and panics.
pub struct HostMapping {
    buffer: DeviceBuffer,
    event: Event,
}

impl HostMapping {
    pub fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Returns `true` once the mapped data may be accessed.
    pub fn is_ready(&self) -> bool {
        self.event.is_complete()
    }

    pub fn len(&self) -> usize {
        self.buffer.size()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.size() == 0
    }

    /// Locks the mapped bytes for host access.
    ///
    /// # Panics
    /// Panics if the map command has not completed yet.
    pub fn bytes(&self) -> BufferBytes<'_> {
        assert!(
            self.event.is_complete(),
            "host mapping accessed before its map event completed; finish the queue first"
        );
        self.buffer.bytes()
    }
}

impl fmt::Debug for HostMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostMapping")
            .field("buffer", &self.buffer)
            .field("ready", &self.is_ready())
            .finish()
    }
}

// ── Queue ───────────────────────────────────────────────────────

/// A kernel dispatch that has executed on the queue.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DispatchRecord {
    pub name: String,
    pub gws: NdRange,
    /// `None` when the driver was left to pick the local size.
    pub lws: Option<NdRange>,
    pub duration: Duration,
}

type Work = Box<dyn FnOnce() + Send>;

struct Command {
    event: Arc<EventState>,
    dispatch: Option<(NdRange, Option<NdRange>)>,
    work: Option<Work>,
}

struct QueueInner {
    context: ClContext,
    pending: Mutex<VecDeque<Command>>,
    history: Mutex<VecDeque<DispatchRecord>>,
    next_seq: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl QueueInner {
    /// Executes pending commands in order until the one with sequence
    /// number `seq` has run (or the queue is empty).
    fn run_until(&self, seq: u64) {
        loop {
            let Some(cmd) = lock(&self.pending).pop_front() else {
                break;
            };
            let done = cmd.event.seq;
            self.execute(cmd);
            if done >= seq {
                break;
            }
        }
    }

    fn execute(&self, cmd: Command) {
        let start = Instant::now();
        if let Some(work) = cmd.work {
            work();
        }
        cmd.event.complete.store(true, Ordering::Release);

        if let Some((gws, lws)) = cmd.dispatch {
            let mut history = lock(&self.history);
            if history.len() == DISPATCH_HISTORY_LEN {
                history.pop_front();
            }
            history.push_back(DispatchRecord {
                name: cmd.event.label.clone(),
                gws,
                lws,
                duration: start.elapsed(),
            });
        }
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        let pending: Vec<Command> = lock(&self.pending).drain(..).collect();
        for cmd in pending {
            self.execute(cmd);
        }
    }
}

/// Handle to an in-order command queue.
///
/// Clones share the same queue.
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<QueueInner>,
}

impl CommandQueue {
    pub fn new(context: ClContext) -> Self {
        tracing::debug!(device = %context.options().name, "created command queue");
        Self {
            inner: Arc::new(QueueInner {
                context,
                pending: Mutex::new(VecDeque::new()),
                history: Mutex::new(VecDeque::new()),
                next_seq: AtomicU64::new(1),
            }),
        }
    }

    pub fn context(&self) -> &ClContext {
        &self.inner.context
    }

    fn push(
        &self,
        label: &str,
        dispatch: Option<(NdRange, Option<NdRange>)>,
        work: Option<Work>,
    ) -> Event {
        let state = Arc::new(EventState {
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
            label: label.to_string(),
            complete: AtomicBool::new(false),
        });
        lock(&self.inner.pending).push_back(Command {
            event: Arc::clone(&state),
            dispatch,
            work,
        });
        Event {
            state,
            queue: Arc::downgrade(&self.inner),
        }
    }

    /// Maps `buffer` for host access.
    ///
    /// With `blocking`, the queue is executed up to the map command before
    /// returning. Otherwise the mapping must not be accessed until
    /// [`HostMapping::event`] completes.
    pub fn enqueue_map(&self, buffer: &DeviceBuffer, blocking: bool) -> HostMapping {
        let event = self.push("map", None, None);
        if blocking {
            event.wait();
        }
        tracing::debug!(?buffer, blocking, "enqueued map");
        HostMapping {
            buffer: buffer.clone(),
            event,
        }
    }

    /// Unmaps a previously mapped buffer. Never waits.
    pub fn enqueue_unmap(&self, mapping: HostMapping) -> Event {
        tracing::debug!(buffer = ?mapping.buffer, "enqueued unmap");
        let HostMapping { buffer, .. } = mapping;
        self.push("unmap", None, Some(Box::new(move || drop(buffer))))
    }

    /// Enqueues a kernel dispatch over `gws` work items.
    pub fn enqueue_ndrange<F>(&self, name: &str, gws: NdRange, lws: Option<NdRange>, work: F) -> Event
    where
        F: FnOnce() + Send + 'static,
    {
        tracing::debug!(kernel = name, %gws, lws = ?lws, "enqueued ndrange");
        self.push(name, Some((gws, lws)), Some(Box::new(work)))
    }

    /// A marker that completes once every earlier command has completed.
    pub fn enqueue_barrier(&self) -> Event {
        self.push("barrier", None, None)
    }

    /// Submits all pending commands for execution.
    pub fn flush(&self) {
        self.inner.run_until(u64::MAX);
    }

    /// Submits all pending commands and waits for them to complete.
    pub fn finish(&self) {
        self.inner.run_until(u64::MAX);
    }

    /// Number of commands not yet executed.
    pub fn pending_commands(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// The most recent executed kernel dispatches, oldest first.
    pub fn dispatch_history(&self) -> Vec<DispatchRecord> {
        lock(&self.inner.history).iter().cloned().collect()
    }

    /// Removes and returns the recorded dispatches.
    pub fn take_dispatch_history(&self) -> Vec<DispatchRecord> {
        lock(&self.inner.history).drain(..).collect()
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("pending", &self.pending_commands())
            .finish()
    }
}
