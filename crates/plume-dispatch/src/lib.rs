//! Plume Dispatch -- single-consumer action queue for cross-thread event hand-off.
//!
//! Native simulation engines report events through a C callback that may fire
//! on any thread, at any time, including while the main context is in the
//! middle of a native call. Those callbacks must never touch main-context
//! state directly. Instead they enqueue an [`Action`] through a
//! [`DispatchHandle`], and the owning context runs the queued actions once per
//! frame with [`Dispatcher::drain`].
//!
//! # Guarantees
//!
//! - Enqueue never blocks and may be called from any thread, including from
//!   inside an action that is currently being drained.
//! - Actions from one producer run in submission order. No ordering is
//!   promised between different producer threads.
//! - A failing action (returned `Err` or panicked) is logged and counted; the
//!   rest of the batch still runs.
//!
//! # Example
//!
//! ```
//! use plume_dispatch::Dispatcher;
//!
//! let mut dispatcher = Dispatcher::new();
//! let handle = dispatcher.handle();
//!
//! std::thread::spawn(move || {
//!     handle.enqueue(|| {
//!         println!("runs on the draining thread");
//!         Ok(())
//!     });
//! })
//! .join()
//! .unwrap();
//!
//! let report = dispatcher.drain();
//! assert_eq!(report.executed, 1);
//! ```

#![deny(unsafe_code)]

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

use crossbeam_channel::{unbounded, Receiver, Sender};

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// A deferred unit of work executed on the draining context.
pub type Action = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// What a queued action touches.
///
/// Used at teardown to discard work aimed at a resource that is about to be
/// destroyed. The key is opaque to the dispatcher; callers pick their own
/// scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionTarget {
    /// Not bound to any particular resource.
    Global,
    /// Bound to the resource with this caller-defined key.
    Resource(u64),
}

struct Queued {
    target: ActionTarget,
    action: Action,
}

// ---------------------------------------------------------------------------
// DispatchHandle
// ---------------------------------------------------------------------------

/// Producer end of the queue. Cheap to clone, `Send + Sync`.
#[derive(Clone)]
pub struct DispatchHandle {
    sender: Sender<Queued>,
}

impl DispatchHandle {
    /// Queue an action with no resource target.
    ///
    /// Returns `false` if the consumer has been dropped, in which case the
    /// action is discarded without running.
    pub fn enqueue<F>(&self, action: F) -> bool
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.enqueue_for(ActionTarget::Global, action)
    }

    /// Queue an action bound to `target`.
    pub fn enqueue_for<F>(&self, target: ActionTarget, action: F) -> bool
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let queued = Queued {
            target,
            action: Box::new(action),
        };
        match self.sender.send(queued) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(?target, "dispatcher dropped; action discarded");
                false
            }
        }
    }
}

impl std::fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchHandle")
            .field("queued", &self.sender.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// DrainReport
// ---------------------------------------------------------------------------

/// Outcome of one [`Dispatcher::drain`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Actions that were run (successful or not).
    pub executed: usize,
    /// Subset of `executed` that returned an error or panicked.
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Consumer end of the queue, owned by the main execution context.
///
/// Not `Clone`: exactly one context drains. Actions pulled from the channel
/// but not yet run are kept in a local backlog that only the consumer sees,
/// which is what lets [`discard_targeting`](Self::discard_targeting) filter
/// without blocking producers.
pub struct Dispatcher {
    sender: Sender<Queued>,
    receiver: Receiver<Queued>,
    backlog: VecDeque<Queued>,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            backlog: VecDeque::new(),
        }
    }

    /// A new producer handle for this queue.
    pub fn handle(&self) -> DispatchHandle {
        DispatchHandle {
            sender: self.sender.clone(),
        }
    }

    /// Number of actions waiting to run.
    pub fn pending(&self) -> usize {
        self.backlog.len() + self.receiver.len()
    }

    /// Run every action that was queued when this call started, in FIFO order.
    ///
    /// Actions enqueued while draining (for example by an action itself) are
    /// left for the next call, so a self-rescheduling action cannot starve
    /// the frame.
    pub fn drain(&mut self) -> DrainReport {
        self.pull();
        let batch = self.backlog.len();
        let mut report = DrainReport::default();

        for _ in 0..batch {
            let Some(queued) = self.backlog.pop_front() else {
                break;
            };
            let target = queued.target;
            let action = queued.action;
            report.executed += 1;

            match panic::catch_unwind(AssertUnwindSafe(action)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::error!(error = %e, ?target, "dispatched action failed");
                }
                Err(payload) => {
                    report.failed += 1;
                    tracing::error!(
                        panic = %panic_message(payload.as_ref()),
                        ?target,
                        "dispatched action panicked"
                    );
                }
            }
        }

        if report.executed > 0 {
            tracing::trace!(
                executed = report.executed,
                failed = report.failed,
                "dispatcher drained"
            );
        }
        report
    }

    /// Drop, without running, every pending action bound to `target`.
    ///
    /// Returns the number of actions discarded.
    pub fn discard_targeting(&mut self, target: ActionTarget) -> usize {
        self.pull();
        let before = self.backlog.len();
        self.backlog.retain(|queued| queued.target != target);
        let discarded = before - self.backlog.len();
        if discarded > 0 {
            tracing::debug!(?target, discarded, "discarded pending actions");
        }
        discarded
    }

    /// Drop every pending action without running it.
    pub fn discard_pending(&mut self) -> usize {
        self.pull();
        let discarded = self.backlog.len();
        self.backlog.clear();
        if discarded > 0 {
            tracing::debug!(discarded, "discarded all pending actions");
        }
        discarded
    }

    /// Move whatever is currently in the channel into the local backlog.
    ///
    /// Bounded by the length observed on entry so a producer that keeps
    /// sending cannot keep us here.
    fn pull(&mut self) {
        let available = self.receiver.len();
        for _ in 0..available {
            match self.receiver.try_recv() {
                Ok(queued) => self.backlog.push_back(queued),
                Err(_) => break,
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending", &self.pending())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
