//! Request accounting for a running array.
//!
//! The controller reports every member transfer (one request to one worker)
//! and every logical operation to an optional process-wide sink. [`Tally`]
//! is the stock sink: running per-slot counters that can be logged on demand.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use tracing::{info, trace};

use crate::config::ParityMode;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Transfer {
    Read,
    Write,
}

/// MemberOp is one READ or WRITE request sent to the worker in `slot`.
#[derive(Copy, Clone, Debug)]
pub struct MemberOp {
    pub slot: usize,
    pub stripe: usize,
    pub transfer: Transfer,
    pub latency: Duration,
    pub failed: bool,
}

/// ArrayOp is one logical block read or write, parity upkeep included.
/// `parity` is the update strategy used by writes and `None` for reads.
#[derive(Copy, Clone, Debug)]
pub struct ArrayOp {
    pub logical_block: i64,
    pub transfer: Transfer,
    pub parity: Option<ParityMode>,
    pub latency: Duration,
    pub failed: bool,
}

pub trait MetricsSink: Send + Sync + 'static {
    fn member_op(&self, op: &MemberOp);
    fn array_op(&self, op: &ArrayOp);
}

static METRICS_SINK: OnceLock<Arc<dyn MetricsSink>> = OnceLock::new();

/// Returns false if a sink was already installed.
pub fn install_metrics_sink(sink: Arc<dyn MetricsSink>) -> bool {
    METRICS_SINK.set(sink).is_ok()
}

pub fn is_enabled() -> bool {
    METRICS_SINK.get().is_some()
}

pub(crate) fn record_member(op: &MemberOp) {
    if let Some(sink) = METRICS_SINK.get() {
        sink.member_op(op);
    }
}

pub(crate) fn record_array(op: &ArrayOp) {
    if let Some(sink) = METRICS_SINK.get() {
        sink.array_op(op);
    }
}

/// SlotCounters accumulates the requests served by one slot.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SlotCounters {
    pub reads: u64,
    pub writes: u64,
    pub failures: u64,
    pub busy: Duration,
}

impl SlotCounters {
    #[must_use]
    pub const fn requests(&self) -> u64 {
        self.reads + self.writes
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TallySnapshot {
    pub slots: Vec<SlotCounters>,
    pub reads: u64,
    pub writes: u64,
    pub failures: u64,
}

impl TallySnapshot {
    /// Member requests across every slot.
    #[must_use]
    pub fn member_requests(&self) -> u64 {
        self.slots.iter().map(SlotCounters::requests).sum()
    }

    #[must_use]
    pub fn slot(&self, slot: usize) -> SlotCounters {
        self.slots.get(slot).copied().unwrap_or_default()
    }
}

/// Tally keeps running counters per slot and for the array as a whole.
#[derive(Debug, Default)]
pub struct Tally {
    inner: Mutex<TallySnapshot>,
}

impl Tally {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> TallySnapshot {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// `reset` zeroes every counter and returns what they held.
    pub fn reset(&self) -> TallySnapshot {
        std::mem::take(&mut *self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// `log_summary` emits one `info` event per slot that served a request,
    /// then an array-wide total.
    pub fn log_summary(&self) {
        let snap = self.snapshot();
        for (slot, c) in snap.slots.iter().enumerate().filter(|(_, c)| c.requests() > 0) {
            let mean_us = c.busy.as_micros() / u128::from(c.requests());
            info!(
                slot,
                reads = c.reads,
                writes = c.writes,
                failures = c.failures,
                mean_us,
                "slot traffic"
            );
        }
        info!(
            reads = snap.reads,
            writes = snap.writes,
            failures = snap.failures,
            member_requests = snap.member_requests(),
            "array traffic"
        );
    }
}

impl MetricsSink for Tally {
    fn member_op(&self, op: &MemberOp) {
        trace!(slot = op.slot, stripe = op.stripe, transfer = ?op.transfer, failed = op.failed, "member op");
        let mut snap = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if snap.slots.len() <= op.slot {
            snap.slots.resize(op.slot + 1, SlotCounters::default());
        }
        let c = &mut snap.slots[op.slot];
        match op.transfer {
            Transfer::Read => c.reads += 1,
            Transfer::Write => c.writes += 1,
        }
        if op.failed {
            c.failures += 1;
        }
        c.busy += op.latency;
    }

    fn array_op(&self, op: &ArrayOp) {
        let mut snap = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match op.transfer {
            Transfer::Read => snap.reads += 1,
            Transfer::Write => snap.writes += 1,
        }
        if op.failed {
            snap.failures += 1;
        }
    }
}
