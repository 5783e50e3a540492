//! Tiered periodic scheduler (C4): five FIFO queues dispatching polled
//! tests into a worker pool, plus an immediate path for RCI-driven
//! re-runs.

use crate::instance::InstanceId;
use std::collections::VecDeque;

/// Which of the five scheduler queues an entry lives on.
///
/// Ordering matters: across queues, the one with the smallest next
/// due time wins; ties break in declaration order
/// (`Immediate < Fast < Normal < Slow < User`), which is exactly the
/// derived [`Ord`] for this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueueKind {
    /// Runs on the very next dispatch, ahead of every periodic tier.
    Immediate,
    /// Short, high-frequency period (seconds).
    Fast,
    /// Medium period (about a minute).
    Normal,
    /// Long period (about an hour).
    Slow,
    /// Arbitrary caller-supplied period.
    User,
}

/// One scheduled test instance awaiting dispatch.
#[derive(Debug, Clone, Copy)]
pub struct SchedEntry {
    /// The test instance to run.
    pub instance: InstanceId,
    /// Queue this entry is currently parked on.
    pub queue: QueueKind,
    /// Monotonic milliseconds at which this entry becomes due.
    pub next_time_ms: u64,
    /// Period to re-arm with after dispatch, in milliseconds.
    pub period_ms: u64,
}

/// Five tiered FIFOs plus immediate dispatch.
#[derive(Default)]
pub struct Scheduler {
    immediate: VecDeque<SchedEntry>,
    fast: VecDeque<SchedEntry>,
    normal: VecDeque<SchedEntry>,
    slow: VecDeque<SchedEntry>,
    user: VecDeque<SchedEntry>,
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_mut(&mut self, kind: QueueKind) -> &mut VecDeque<SchedEntry> {
        match kind {
            QueueKind::Immediate => &mut self.immediate,
            QueueKind::Fast => &mut self.fast,
            QueueKind::Normal => &mut self.normal,
            QueueKind::Slow => &mut self.slow,
            QueueKind::User => &mut self.user,
        }
    }

    fn queue(&self, kind: QueueKind) -> &VecDeque<SchedEntry> {
        match kind {
            QueueKind::Immediate => &self.immediate,
            QueueKind::Fast => &self.fast,
            QueueKind::Normal => &self.normal,
            QueueKind::Slow => &self.slow,
            QueueKind::User => &self.user,
        }
    }

    fn find_queue(&self, instance: InstanceId) -> Option<QueueKind> {
        [
            QueueKind::Immediate,
            QueueKind::Fast,
            QueueKind::Normal,
            QueueKind::Slow,
            QueueKind::User,
        ]
        .into_iter()
        .find(|&kind| self.queue(kind).iter().any(|e| e.instance == instance))
    }

    /// Queue a polled test instance. If it is already queued on the
    /// same queue, it is left alone unless `force`, which removes and
    /// re-adds it with a fresh `next_time = now + period`.
    pub fn add(&mut self, instance: InstanceId, queue: QueueKind, period_ms: u64, now_ms: u64, force: bool) {
        if let Some(current) = self.find_queue(instance) {
            if current == queue && !force {
                return;
            }
            self.remove(instance);
        }
        self.queue_mut(queue).push_back(SchedEntry {
            instance,
            queue,
            next_time_ms: now_ms + period_ms,
            period_ms,
        });
    }

    /// Remove an instance from whichever queue it occupies.
    pub fn remove(&mut self, instance: InstanceId) -> Option<SchedEntry> {
        let kind = self.find_queue(instance)?;
        let queue = self.queue_mut(kind);
        let pos = queue.iter().position(|e| e.instance == instance)?;
        queue.remove(pos)
    }

    /// Enqueue an instance on `Immediate`, to run on the very next
    /// dispatch ahead of every periodic tier.
    pub fn schedule_immediate(&mut self, instance: InstanceId) {
        self.remove(instance);
        self.immediate.push_back(SchedEntry {
            instance,
            queue: QueueKind::Immediate,
            next_time_ms: 0,
            period_ms: 0,
        });
    }

    /// The smallest `next_time_ms` across all non-empty queues,
    /// i.e. when the dispatch loop should next wake.
    pub fn next_due_ms(&self) -> Option<u64> {
        [
            &self.immediate,
            &self.fast,
            &self.normal,
            &self.slow,
            &self.user,
        ]
        .into_iter()
        .filter_map(|q| q.front().map(|e| e.next_time_ms))
        .min()
    }

    /// Pop the single most-due entry across all queues. Ties break by
    /// queue priority (`Immediate < Fast < Normal < Slow < User`).
    ///
    /// `now_ms` is the caller's current time; an entry is only
    /// returned if it is actually due (`next_time_ms <= now_ms`),
    /// except `Immediate` entries, which are always due.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<SchedEntry> {
        let mut best: Option<QueueKind> = None;
        let mut best_time = u64::MAX;
        for kind in [
            QueueKind::Immediate,
            QueueKind::Fast,
            QueueKind::Normal,
            QueueKind::Slow,
            QueueKind::User,
        ] {
            if let Some(front) = self.queue(kind).front() {
                let due = kind == QueueKind::Immediate || front.next_time_ms <= now_ms;
                if due && front.next_time_ms < best_time {
                    best_time = front.next_time_ms;
                    best = Some(kind);
                }
            }
        }
        let kind = best?;
        self.queue_mut(kind).pop_front()
    }

    /// Re-insert a polled entry after dispatch, with
    /// `next_time = now + period`.
    pub fn requeue_after_dispatch(&mut self, mut entry: SchedEntry, now_ms: u64) {
        entry.next_time_ms = now_ms + entry.period_ms;
        self.queue_mut(entry.queue).push_back(entry);
    }

    /// Total entries queued, across every tier.
    pub fn len(&self) -> usize {
        self.immediate.len() + self.fast.len() + self.normal.len() + self.slow.len() + self.user.len()
    }

    /// Whether every queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
