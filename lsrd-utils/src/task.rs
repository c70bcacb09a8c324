//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio::{task, time};
use tracing::{Instrument, error};

/// A handle which can be used to manipulate the task created by the
/// [`Task::spawn`] and [`Task::spawn_supervised`] functions.
///
/// By default, dropping this handle cancels the task (unless [`Task::detach`]
/// is used).
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
    detached: bool,
}

/// A handle which can be used to manipulate the timeout task created by the
/// [`TimeoutTask::new`] function.
///
/// Dropping this handle cancels the timeout task.
#[derive(Debug)]
pub struct TimeoutTask {
    timer: TimerHandle,
}

/// A handle which can be used to manipulate the interval task created by the
/// [`IntervalTask::new`] function.
///
/// Dropping this handle cancels the interval task.
#[derive(Debug)]
pub struct IntervalTask {
    timer: TimerHandle,
}

// State shared by both timer flavors.
#[derive(Debug)]
struct TimerHandle {
    _task: Task<()>,
    control: mpsc::UnboundedSender<Reset>,
    next: watch::Receiver<Instant>,
}

// Timer reset request. `None` reuses the last configured duration.
#[derive(Debug)]
struct Reset(Option<Duration>);

// ===== impl Task =====

impl<T> Task<T> {
    /// Spawns a new asynchronous task, returning a handle for it.
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future),
            detached: false,
        }
    }

    /// Spawns a supervised task that is restarted if it panics.
    ///
    /// Used for network receive loops, where a malformed packet should cost
    /// the packet and not the whole instance.
    pub fn spawn_supervised<F, Fut>(spawn_fn: F) -> Task<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let join_handle = tokio::spawn(
            async move {
                loop {
                    let worker_task = Task::spawn(spawn_fn());
                    match worker_task.await {
                        Ok(_) => break,
                        Err(error) if error.is_panic() => {
                            error!("task panicked, restarting...");
                        }
                        Err(error) => {
                            error!(%error, "task failed");
                            break;
                        }
                    }
                }
            }
            .in_current_span(),
        );
        Task {
            join_handle,
            detached: false,
        }
    }

    /// Detach the task, meaning it will no longer be canceled if its handle is
    /// dropped.
    pub fn detach(&mut self) {
        self.detached = true;
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, task::JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.join_handle).poll(cx)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

// ===== impl TimeoutTask =====

impl TimeoutTask {
    /// Spawns a new task that will call the provided async closure when the
    /// specified timeout expires.
    ///
    /// Returns a handler that can be used to manipulate the timeout task.
    pub fn new<F, Fut>(timeout: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let (next_tx, next_rx) = watch::channel(Instant::now() + timeout);

        let task = Task::spawn(
            async move {
                let mut timeout = timeout;
                let sleep = time::sleep(timeout);
                tokio::pin!(sleep);

                loop {
                    tokio::select! {
                        _ = &mut sleep => {
                            (cb)().await;
                            break;
                        }
                        message = control_rx.recv() => {
                            let Some(Reset(new_timeout)) = message else {
                                // All handles are gone.
                                break;
                            };
                            if let Some(new_timeout) = new_timeout {
                                timeout = new_timeout;
                            }
                            let next = Instant::now() + timeout;
                            sleep.as_mut().reset(next);
                            next_tx.send_replace(next);
                        }
                    }
                }
            }
            .in_current_span(),
        );

        TimeoutTask {
            timer: TimerHandle {
                _task: task,
                control: control_tx,
                next: next_rx,
            },
        }
    }

    /// Resets the timeout, regardless if it has already expired or not.
    ///
    /// If a new timeout value isn't specified, the last value will be reused.
    pub fn reset(&mut self, timeout: Option<Duration>) {
        self.timer.reset(timeout, "failed to reset timeout");
    }

    /// Returns the remaining time before the timeout expires.
    pub fn remaining(&self) -> Duration {
        self.timer.remaining()
    }
}

// ===== impl IntervalTask =====

impl IntervalTask {
    /// Spawns a new task that will call the provided async closure whenever the
    /// specified interval timer ticks.
    ///
    /// Returns a handler that can be used to manipulate the interval task.
    pub fn new<F, Fut>(
        interval: Duration,
        tick_on_start: bool,
        mut cb: F,
    ) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let first = match tick_on_start {
            true => Instant::now(),
            false => Instant::now() + interval,
        };
        let (next_tx, next_rx) = watch::channel(first);

        let task = Task::spawn(
            async move {
                let mut interval = interval;
                let mut ticker = time::interval_at(first, interval);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            next_tx.send_replace(Instant::now() + interval);
                            (cb)().await;
                        }
                        message = control_rx.recv() => {
                            let Some(Reset(new_interval)) = message else {
                                // All handles are gone.
                                break;
                            };
                            if let Some(new_interval) = new_interval {
                                interval = new_interval;
                            }
                            let next = Instant::now() + interval;
                            ticker = time::interval_at(next, interval);
                            next_tx.send_replace(next);
                        }
                    }
                }
            }
            .in_current_span(),
        );

        IntervalTask {
            timer: TimerHandle {
                _task: task,
                control: control_tx,
                next: next_rx,
            },
        }
    }

    /// Resets the interval, restarting the countdown to the next tick.
    ///
    /// If a new interval value isn't specified, the last value will be reused.
    pub fn reset(&mut self, interval: Option<Duration>) {
        self.timer.reset(interval, "failed to reset interval");
    }

    /// Returns the remaining time before the next interval tick.
    pub fn remaining(&self) -> Duration {
        self.timer.remaining()
    }
}

// ===== impl TimerHandle =====

impl TimerHandle {
    fn reset(&self, duration: Option<Duration>, errmsg: &'static str) {
        if self.control.send(Reset(duration)).is_err() {
            error!("{}", errmsg);
        }
    }

    fn remaining(&self) -> Duration {
        self.next.borrow().saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_child = count.clone();
        let _timeout = TimeoutTask::new(Duration::from_secs(5), move || {
            async move {
                count_child.fetch_add(1, Ordering::SeqCst);
            }
        });

        settle().await;
        time::advance(Duration::from_secs(4)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_interval_never_fires() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_child = count.clone();
        let interval =
            IntervalTask::new(Duration::from_secs(5), false, move || {
                let count = count_child.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            });

        settle().await;
        time::advance(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        drop(interval);
        time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
