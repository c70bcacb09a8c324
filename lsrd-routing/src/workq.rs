//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::VecDeque;
use std::time::Duration;

use ipnetwork::Ipv4Network;
use lsrd_utils::task::TimeoutTask;
use lsrd_utils::{UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc;
use tokio::time::Instant;

// Kernel synchronization work queue.
//
// Jobs are drained in FIFO order, one per tick. The first tick happens
// `hold_time` after the queue becomes non-empty, so that bursts of route
// changes are coalesced. Later ticks are spaced by the configured inter-item
// delay. Failed jobs wait in the queue until their ready time.
#[derive(Debug)]
pub struct WorkQueue {
    items: VecDeque<WorkItem>,
    timer: Option<TimeoutTask>,
    tick_tx: UnboundedSender<()>,
    pub(crate) tick_rx: UnboundedReceiver<()>,
}

#[derive(Debug)]
pub struct WorkItem {
    pub job: Job,
    // Number of failed attempts so far.
    pub retries: u32,
    pub ready_at: Instant,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Job {
    // Reconcile the selected route of a prefix with the kernel.
    Reconcile(Ipv4Network),
    // Revalidate every prefix.
    Sweep,
}

// ===== impl WorkQueue =====

impl WorkQueue {
    // Enqueues a job, merging it with an identical pending one. Either way
    // the queue ticks no later than `hold_time` from now.
    pub(crate) fn push(&mut self, job: Job, hold_time: Duration) {
        let now = Instant::now();
        match self.items.iter_mut().find(|item| item.job == job) {
            // A new submission supersedes a job backing off after failures,
            // and gets a full retry budget.
            Some(item) => {
                item.retries = 0;
                item.ready_at = item.ready_at.min(now);
            }
            None => self.items.push_back(WorkItem {
                job,
                retries: 0,
                ready_at: now,
            }),
        }

        if self
            .timer
            .as_ref()
            .is_none_or(|timer| timer.remaining() > hold_time)
        {
            self.schedule(hold_time);
        }
    }

    // Puts back a failed job, to be retried once `delay` has elapsed.
    pub(crate) fn requeue(&mut self, mut item: WorkItem, delay: Duration) {
        item.ready_at = Instant::now() + delay;
        self.items.push_back(item);
    }

    // Removes the first job that is ready to run.
    pub(crate) fn pop_ready(&mut self) -> Option<WorkItem> {
        let now = Instant::now();
        let pos = self.items.iter().position(|item| item.ready_at <= now)?;
        self.items.remove(pos)
    }

    // Called on every tick, before processing. The timer has fired and
    // must be rearmed by `reschedule`.
    pub(crate) fn tick(&mut self) {
        self.timer = None;
    }

    // Arms the timer for the next tick, if there's pending work.
    pub(crate) fn reschedule(&mut self, inter_item_delay: Duration) {
        let now = Instant::now();
        let Some(ready_at) = self.items.iter().map(|item| item.ready_at).min()
        else {
            self.timer = None;
            return;
        };
        let delay = ready_at.saturating_duration_since(now).max(inter_item_delay);
        self.schedule(delay);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn schedule(&mut self, delay: Duration) {
        let tick_tx = self.tick_tx.clone();
        self.timer = Some(TimeoutTask::new(delay, move || async move {
            let _ = tick_tx.send(());
        }));
    }
}

impl Default for WorkQueue {
    fn default() -> WorkQueue {
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        WorkQueue {
            items: Default::default(),
            timer: None,
            tick_tx,
            tick_rx,
        }
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn prefix(s: &str) -> Ipv4Network {
        Ipv4Network::from_str(s).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn hold_time_and_coalescing() {
        let mut workq = WorkQueue::default();
        let hold_time = Duration::from_millis(50);
        workq.push(Job::Reconcile(prefix("10.0.1.0/24")), hold_time);
        workq.push(Job::Reconcile(prefix("10.0.2.0/24")), hold_time);
        workq.push(Job::Reconcile(prefix("10.0.1.0/24")), hold_time);
        assert_eq!(workq.len(), 2);

        // Nothing is drained before the hold time expires.
        tokio::time::advance(Duration::from_millis(40)).await;
        assert!(workq.tick_rx.try_recv().is_err());
        workq.tick_rx.recv().await.unwrap();

        // FIFO order.
        workq.tick();
        let item = workq.pop_ready().unwrap();
        assert_eq!(item.job, Job::Reconcile(prefix("10.0.1.0/24")));
        let item = workq.pop_ready().unwrap();
        assert_eq!(item.job, Job::Reconcile(prefix("10.0.2.0/24")));
        assert!(workq.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn requeued_job_waits_for_backoff() {
        let mut workq = WorkQueue::default();
        workq.push(Job::Sweep, Duration::ZERO);
        workq.tick_rx.recv().await.unwrap();
        workq.tick();

        let mut item = workq.pop_ready().unwrap();
        item.retries += 1;
        workq.requeue(item, Duration::from_millis(100));
        assert!(workq.pop_ready().is_none());

        workq.reschedule(Duration::ZERO);
        let start = Instant::now();
        workq.tick_rx.recv().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
        workq.tick();
        let item = workq.pop_ready().unwrap();
        assert_eq!(item.retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resubmission_resets_backoff() {
        let mut workq = WorkQueue::default();
        let hold_time = Duration::from_millis(50);
        let job = Job::Reconcile(prefix("10.0.1.0/24"));
        workq.push(job, Duration::ZERO);
        workq.tick_rx.recv().await.unwrap();
        workq.tick();

        // Third failure, long backoff.
        let mut item = workq.pop_ready().unwrap();
        item.retries = 3;
        workq.requeue(item, Duration::from_secs(10));
        workq.reschedule(Duration::ZERO);

        // The route changes again while the job is backing off.
        workq.push(job, hold_time);
        assert_eq!(workq.len(), 1);

        let start = Instant::now();
        workq.tick_rx.recv().await.unwrap();
        assert!(start.elapsed() >= hold_time);
        assert!(start.elapsed() < Duration::from_secs(1));
        workq.tick();
        let item = workq.pop_ready().unwrap();
        assert_eq!(item.job, job);
        assert_eq!(item.retries, 0);
    }
}
