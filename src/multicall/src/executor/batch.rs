//! Batch lifecycle.
//!
//! A batch goes `Open -> Closing -> Dispatched -> Resolved`, or
//! `Open -> Cancelled`. Each stage has its own owning type ([`OpenBatch`],
//! [`ClosedBatch`], [`DispatchedBatch`]) and moving to the next stage consumes
//! the previous one, so calls can only be appended while the batch is open.
//! The shared [`BatchState`] mirrors the stage for the futures waiting on it.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::future::CallFuture;
use crate::aggregate::CallResult;
use crate::call::Call;
use crate::error::{MulticallError, Result};

/// Per-call results of a successful batch, or the failure shared by all its calls.
pub(crate) type BatchOutcome = Result<Arc<Vec<CallResult>>>;

pub(crate) enum BatchState {
    Open,
    Closing,
    Dispatched,
    Resolved(BatchOutcome),
    Cancelled,
}

impl BatchState {
    fn name(&self) -> &'static str {
        match self {
            BatchState::Open => "open",
            BatchState::Closing => "closing",
            BatchState::Dispatched => "dispatched",
            BatchState::Resolved(_) => "resolved",
            BatchState::Cancelled => "cancelled",
        }
    }

    pub(crate) fn is_settled(&self) -> bool {
        matches!(self, BatchState::Resolved(_) | BatchState::Cancelled)
    }

    fn can_advance_to(&self, next: &BatchState) -> bool {
        matches!(
            (self, next),
            (BatchState::Open, BatchState::Closing)
                | (BatchState::Open, BatchState::Cancelled)
                | (BatchState::Closing, BatchState::Dispatched)
                | (BatchState::Dispatched, BatchState::Resolved(_))
        )
    }

    /// Result of the call at `index` once the batch is settled.
    pub(crate) fn result_at(&self, index: usize) -> Result<ethers_core::abi::Token> {
        match self {
            BatchState::Resolved(Ok(results)) => results
                .get(index)
                .cloned()
                .unwrap_or_else(|| Err(MulticallError::ResultIndexMissing(index))),
            BatchState::Resolved(Err(err)) => Err(err.clone()),
            BatchState::Cancelled => Err(MulticallError::Cancelled),
            pending => unreachable!("result requested from a {} batch", pending.name()),
        }
    }
}

/// State shared between the executor, the worker and every future of a batch.
pub(crate) struct BatchShared {
    id: u64,
    state: Mutex<BatchState>,
    settled: Condvar,
}

impl BatchShared {
    fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: Mutex::new(BatchState::Open),
            settled: Condvar::new(),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn phase(&self) -> &'static str {
        self.state.lock().name()
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.state.lock().is_settled()
    }

    fn advance(&self, next: BatchState) {
        let mut state = self.state.lock();
        let legal = state.can_advance_to(&next);
        debug_assert!(
            legal,
            "batch #{}: illegal transition {} -> {}",
            self.id,
            state.name(),
            next.name()
        );
        if !legal {
            log::error!(
                "batch #{}: ignoring illegal transition {} -> {}",
                self.id,
                state.name(),
                next.name()
            );
            return;
        }

        let settled = next.is_settled();
        *state = next;
        if settled {
            self.settled.notify_all();
        }
    }

    /// Blocks until the batch is resolved or cancelled.
    pub(crate) fn wait(&self) -> MutexGuard<'_, BatchState> {
        let mut state = self.state.lock();
        while !state.is_settled() {
            self.settled.wait(&mut state);
        }
        state
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    ///
    /// A timeout too large to be represented as a deadline waits forever.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Option<MutexGuard<'_, BatchState>> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.wait());
        };
        let mut state = self.state.lock();
        while !state.is_settled() {
            if self.settled.wait_until(&mut state, deadline).timed_out() {
                return state.is_settled().then_some(state);
            }
        }
        Some(state)
    }
}

/// The batch currently accepting calls.
pub(crate) struct OpenBatch {
    shared: Arc<BatchShared>,
    created_at: Instant,
    calls: Vec<Call>,
}

impl OpenBatch {
    pub(crate) fn new(id: u64, created_at: Instant) -> Self {
        Self {
            shared: BatchShared::new(id),
            created_at,
            calls: Vec::new(),
        }
    }

    /// Appends a call; its sequence number is its position in the batch.
    pub(crate) fn push(&mut self, call: Call) -> CallFuture {
        let index = self.calls.len();
        self.calls.push(call);
        CallFuture::new(self.shared.clone(), index)
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }

    pub(crate) fn is_due(&self, now: Instant, max_size: usize, window: Duration) -> bool {
        self.calls.len() >= max_size || now.saturating_duration_since(self.created_at) >= window
    }

    pub(crate) fn close(self) -> ClosedBatch {
        self.shared.advance(BatchState::Closing);
        ClosedBatch {
            shared: self.shared,
            created_at: self.created_at,
            calls: self.calls,
        }
    }

    /// Drops the batch without executing it. Returns the number of discarded calls.
    pub(crate) fn cancel(self) -> usize {
        self.shared.advance(BatchState::Cancelled);
        self.calls.len()
    }
}

impl fmt::Display for OpenBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch #{} ({} calls)", self.shared.id, self.calls.len())
    }
}

/// A batch that no longer accepts calls and waits to be handed to a worker.
pub(crate) struct ClosedBatch {
    shared: Arc<BatchShared>,
    created_at: Instant,
    calls: Vec<Call>,
}

impl ClosedBatch {
    pub(crate) fn dispatch(self) -> DispatchedBatch {
        self.shared.advance(BatchState::Dispatched);
        DispatchedBatch {
            shared: self.shared,
            created_at: self.created_at,
            calls: self.calls,
        }
    }
}

/// A batch owned by a worker.
pub(crate) struct DispatchedBatch {
    shared: Arc<BatchShared>,
    created_at: Instant,
    calls: Vec<Call>,
}

impl DispatchedBatch {
    /// Age of the batch, from its first call.
    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Splits the batch into its calls and the one-shot resolver of its futures.
    pub(crate) fn into_parts(self) -> (Vec<Call>, BatchResolver) {
        (
            self.calls,
            BatchResolver {
                shared: Some(self.shared),
            },
        )
    }
}

impl fmt::Display for DispatchedBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch #{} ({} calls)", self.shared.id, self.calls.len())
    }
}

/// Resolves a dispatched batch exactly once.
///
/// Dropped without [`resolve`](Self::resolve), e.g. while a worker unwinds,
/// it fails the batch so no future waits forever.
pub(crate) struct BatchResolver {
    shared: Option<Arc<BatchShared>>,
}

impl BatchResolver {
    pub(crate) fn resolve(mut self, outcome: BatchOutcome) {
        if let Some(shared) = self.shared.take() {
            shared.advance(BatchState::Resolved(outcome));
        }
    }
}

impl Drop for BatchResolver {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            log::error!("batch #{} was dropped before being resolved", shared.id);
            shared.advance(BatchState::Resolved(Err(MulticallError::transport(
                anyhow::anyhow!("batch execution was aborted"),
            ))));
        }
    }
}
