//! The fetch-request queue.
//!
//! Mediates between producers (tasks that hit a missing host entry) and the
//! single consumer (the helper). A producer queues the node it needs, wakes
//! the helper, and sleeps; the helper claims requests in strict FIFO order
//! and signals completion by closing the request handle, which wakes every
//! sleeper for that node. Producers for the same node coalesce onto one
//! queue membership.
//!
//! One fetch lock guards the pending list, the fetching set and the helper
//! slot. It is held only across small critical sections; wait-set wakeups
//! happen after it is released, and condition-variable waits release it
//! atomically, so no lock is ever held across a suspend.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use log::debug;
use parking_lot::Condvar;
use parking_lot::Mutex;

use crate::Error;
use crate::NodeId;
use crate::Result;

/// One queued fetch: the node to materialise and the uid of the producer
/// that performed the enqueue (reported to the helper).
pub(crate) struct PendingFetch {
    pub(crate) node: NodeId,
    pub(crate) uid: u32,
}

/// Outcome of a producer's attempt to start a fetch.
pub(crate) enum Enqueue {
    /// This producer queued the node and woke the helper.
    Queued,
    /// Another producer already queued it; join the sleepers.
    Joined,
    /// No helper is bound; the fetch cannot be started.
    NoHelper,
}

#[derive(Default)]
struct FetchState {
    pending: VecDeque<PendingFetch>,
    /// Nodes between enqueue and completion, whether still pending or
    /// already claimed by the helper.
    fetching: HashSet<NodeId>,
    helper_bound: bool,
    helper_sleeping: bool,
}

pub(crate) struct FetchQueue {
    state: Mutex<FetchState>,
    sleepers: Condvar,
    helper_waiters: Condvar,
}

impl FetchQueue {
    pub(crate) fn new() -> FetchQueue {
        FetchQueue {
            state: Mutex::new(FetchState::default()),
            sleepers: Condvar::new(),
            helper_waiters: Condvar::new(),
        }
    }

    /// Bind the helper slot. At most one helper at a time.
    pub(crate) fn bind_helper(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.helper_bound {
            return Err(Error::Busy);
        }
        state.helper_bound = true;
        Ok(())
    }

    /// Unbind the helper slot and drain every request still pending. The
    /// drained entries are returned so the caller can drop the node
    /// references the queue held; their sleepers are woken here and will
    /// observe the missing helper on retry.
    pub(crate) fn unbind_helper(&self) -> Vec<PendingFetch> {
        let drained = {
            let mut state = self.state.lock();
            state.helper_bound = false;
            let drained: Vec<PendingFetch> = state.pending.drain(..).collect();
            for entry in &drained {
                state.fetching.remove(&entry.node);
            }
            drained
        };
        self.sleepers.notify_all();
        drained
    }

    pub(crate) fn helper_bound(&self) -> bool {
        self.state.lock().helper_bound
    }

    /// Start a fetch for `node`, or join one already underway. The caller
    /// must hold a node reference before calling; on [`Enqueue::Queued`]
    /// that reference is owned by the queue until completion or drain.
    pub(crate) fn enqueue_or_join(&self, node: NodeId, uid: u32) -> Enqueue {
        {
            let mut state = self.state.lock();
            if !state.helper_bound {
                return Enqueue::NoHelper;
            }
            if !state.fetching.insert(node) {
                return Enqueue::Joined;
            }
            state.pending.push_back(PendingFetch { node, uid });
        }
        self.helper_waiters.notify_one();
        Enqueue::Queued
    }

    /// Sleep until the fetch for `node` completes or is drained. Returns
    /// [`Error::Interrupted`] if the task is cancelled while sleeping; the
    /// request stays queued for the remaining sleepers.
    pub(crate) fn wait_fetch(&self, node: NodeId, interrupt: &Interrupt) -> Result<()> {
        let mut state = self.state.lock();
        while state.fetching.contains(&node) {
            if interrupt.is_raised() {
                return Err(Error::Interrupted);
            }
            self.sleepers.wait(&mut state);
        }
        Ok(())
    }

    /// Claim the oldest pending request, sleeping until one arrives. Only
    /// the bound helper calls this; the helper wait-set has capacity 1.
    pub(crate) fn next_request(&self, interrupt: &Interrupt) -> Result<PendingFetch> {
        let mut state = self.state.lock();
        loop {
            if let Some(entry) = state.pending.pop_front() {
                debug_assert!(state.fetching.contains(&entry.node));
                return Ok(entry);
            }
            if interrupt.is_raised() {
                return Err(Error::Interrupted);
            }
            assert!(!state.helper_sleeping, "helper wait-set has capacity 1");
            state.helper_sleeping = true;
            self.helper_waiters.wait(&mut state);
            state.helper_sleeping = false;
        }
    }

    /// Put a claimed request back at the head of the queue, e.g. when the
    /// helper's read buffer cannot take the message for it.
    pub(crate) fn requeue_front(&self, entry: PendingFetch) {
        {
            let mut state = self.state.lock();
            debug_assert!(state.fetching.contains(&entry.node));
            state.pending.push_front(entry);
        }
        self.helper_waiters.notify_one();
    }

    /// Complete the fetch for `node`, waking every sleeper. Returns whether
    /// the node was actually fetching.
    pub(crate) fn complete(&self, node: NodeId) -> bool {
        let was_fetching = {
            let mut state = self.state.lock();
            state.fetching.remove(&node)
        };
        if was_fetching {
            self.sleepers.notify_all();
        } else {
            debug!("completion for node {node} that was not fetching");
        }
        was_fetching
    }

    #[cfg(test)]
    pub(crate) fn is_fetching(&self, node: NodeId) -> bool {
        self.state.lock().fetching.contains(&node)
    }

    /// Wake both wait-sets so parked tasks re-check their predicates and
    /// observe a raised interrupt.
    fn kick(&self) {
        drop(self.state.lock());
        self.sleepers.notify_all();
        self.helper_waiters.notify_all();
    }
}

impl fmt::Debug for FetchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FetchQueue")
            .field("pending", &state.pending.len())
            .field("fetching", &state.fetching.len())
            .field("helper_bound", &state.helper_bound)
            .finish()
    }
}

struct InterruptShared {
    raised: AtomicBool,
    queue: Arc<FetchQueue>,
}

/// Cancellation token for a task sleeping inside the filesystem.
///
/// Raising it from another thread wakes every sleeper on the mount so the
/// flagged task can observe the flag and return
/// [`Error::Interrupted`](crate::Error::Interrupted) without altering any
/// queue state.
#[derive(Clone)]
pub struct Interrupt {
    shared: Arc<InterruptShared>,
}

impl Interrupt {
    pub(crate) fn new(queue: Arc<FetchQueue>) -> Interrupt {
        Interrupt {
            shared: Arc::new(InterruptShared {
                raised: AtomicBool::new(false),
                queue,
            }),
        }
    }

    /// Cancel whatever sleep the owning task is in.
    pub fn raise(&self) {
        self.shared.raised.store(true, Ordering::SeqCst);
        self.shared.queue.kick();
    }

    /// Whether the token has been raised.
    pub fn is_raised(&self) -> bool {
        self.shared.raised.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupt")
            .field("raised", &self.is_raised())
            .finish()
    }
}
