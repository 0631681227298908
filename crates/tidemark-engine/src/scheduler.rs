//! Lane task scheduling with debounce.
//!
//! When a local mutation occurs, we schedule a push after a delay; another
//! mutation before the timer fires reschedules, batching rapid edits into a
//! single upsert. The same scheduler drives periodic pulls and fixed-delay
//! retries.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum LaneTask {
    Pull,
    Push,
}

pub(crate) struct TaskScheduler {
    /// Pending tasks: task -> scheduled fire time.
    pending: HashMap<LaneTask, Instant>,

    /// Heap of (fire_at, task) for fast "next deadline" lookup.
    ///
    /// We may push multiple entries for the same task; stale entries are
    /// discarded by checking against `pending`.
    heap: BinaryHeap<Reverse<(Instant, LaneTask)>>,
}

impl TaskScheduler {
    pub(crate) fn new() -> Self {
        TaskScheduler {
            pending: HashMap::new(),
            heap: BinaryHeap::new(),
        }
    }

    /// Schedule a task after a delay. Debounce semantics: rescheduling an
    /// already-pending task pushes the deadline out, never pulls it in.
    pub(crate) fn schedule_after(&mut self, task: LaneTask, delay: Duration) {
        self.schedule_after_at(task, delay, Instant::now());
    }

    /// Schedule a task to fire immediately, overriding any pending deadline.
    pub(crate) fn schedule_now(&mut self, task: LaneTask) {
        self.pending.remove(&task);
        self.schedule_after(task, Duration::ZERO);
    }

    fn schedule_after_at(&mut self, task: LaneTask, delay: Duration, now: Instant) {
        let candidate = now + delay;
        let fire_at = self
            .pending
            .get(&task)
            .copied()
            .map(|existing| existing.max(candidate))
            .unwrap_or(candidate);

        if self.pending.get(&task).copied() == Some(fire_at) {
            return;
        }

        self.pending.insert(task, fire_at);
        self.heap.push(Reverse((fire_at, task)));
    }

    /// Get the next scheduled deadline across all tasks, if any.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        self.pop_stale();
        self.heap.peek().map(|Reverse((t, _))| *t)
    }

    /// Drain all tasks whose deadline is due at `now`.
    pub(crate) fn drain_due(&mut self, now: Instant) -> Vec<LaneTask> {
        let mut due = Vec::new();
        loop {
            self.pop_stale();
            let Some(Reverse((fire_at, task))) = self.heap.peek().copied() else {
                break;
            };
            if fire_at > now {
                break;
            }
            let _ = self.heap.pop();
            if self.pending.get(&task).copied() == Some(fire_at) {
                self.pending.remove(&task);
                due.push(task);
            }
        }
        due
    }

    pub(crate) fn cancel(&mut self, task: LaneTask) {
        self.pending.remove(&task);
    }

    pub(crate) fn is_pending(&self, task: LaneTask) -> bool {
        self.pending.contains_key(&task)
    }

    fn pop_stale(&mut self) {
        while let Some(Reverse((fire_at, task))) = self.heap.peek() {
            match self.pending.get(task).copied() {
                Some(current) if current == *fire_at => break,
                _ => {
                    let _ = self.heap.pop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_and_drain_due() {
        let mut scheduler = TaskScheduler::new();
        let base = Instant::now();
        scheduler.schedule_after_at(LaneTask::Push, Duration::from_millis(10), base);

        assert!(scheduler.is_pending(LaneTask::Push));
        assert_eq!(
            scheduler.next_deadline(),
            Some(base + Duration::from_millis(10))
        );

        let due = scheduler.drain_due(base + Duration::from_millis(9));
        assert!(due.is_empty());

        let due = scheduler.drain_due(base + Duration::from_millis(10));
        assert_eq!(due, vec![LaneTask::Push]);
        assert!(!scheduler.is_pending(LaneTask::Push));
    }

    #[test]
    fn reschedule_debounces_later() {
        let mut scheduler = TaskScheduler::new();
        let base = Instant::now();

        scheduler.schedule_after_at(LaneTask::Push, Duration::from_millis(10), base);
        scheduler.schedule_after_at(
            LaneTask::Push,
            Duration::from_millis(10),
            base + Duration::from_millis(5),
        );

        // Debounce pushes the deadline out to (last_schedule + delay).
        assert_eq!(
            scheduler.next_deadline(),
            Some(base + Duration::from_millis(15))
        );
    }

    #[test]
    fn schedule_now_overrides_debounce() {
        let mut scheduler = TaskScheduler::new();
        let base = Instant::now();

        scheduler.schedule_after_at(LaneTask::Pull, Duration::from_secs(30), base);
        scheduler.schedule_now(LaneTask::Pull);

        let due = scheduler.drain_due(Instant::now());
        assert_eq!(due, vec![LaneTask::Pull]);
    }

    #[test]
    fn tasks_are_independent() {
        let mut scheduler = TaskScheduler::new();
        let base = Instant::now();

        scheduler.schedule_after_at(LaneTask::Pull, Duration::from_millis(5), base);
        scheduler.schedule_after_at(LaneTask::Push, Duration::from_millis(50), base);

        let due = scheduler.drain_due(base + Duration::from_millis(5));
        assert_eq!(due, vec![LaneTask::Pull]);
        assert!(scheduler.is_pending(LaneTask::Push));
    }

    #[test]
    fn cancel() {
        let mut scheduler = TaskScheduler::new();
        scheduler.schedule_after(LaneTask::Push, Duration::from_secs(1));
        assert!(scheduler.is_pending(LaneTask::Push));

        scheduler.cancel(LaneTask::Push);
        assert!(!scheduler.is_pending(LaneTask::Push));
        assert!(scheduler.next_deadline().is_none());
    }

    #[test]
    fn stress_reschedules_do_not_accumulate_due_fires() {
        let mut scheduler = TaskScheduler::new();
        let base = Instant::now();

        for i in 0..1000u64 {
            scheduler.schedule_after_at(
                LaneTask::Push,
                Duration::from_millis(10),
                base + Duration::from_millis(i),
            );
        }

        let due = scheduler.drain_due(base + Duration::from_millis(1010));
        assert_eq!(due, vec![LaneTask::Push]);
        assert!(scheduler.next_deadline().is_none());
    }
}
