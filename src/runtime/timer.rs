use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::error;

use super::{Scheduler, TaskHandle};
use crate::sync::lock;

enum TimerTask {
    Once(Box<dyn FnOnce() + Send>),
    FixedRate {
        period: Duration,
        task: Arc<dyn Fn() + Send + Sync>,
    },
}

struct TimerEntry {
    fire_at: Instant,
    sequence: u64,
    cancelled: Arc<AtomicBool>,
    task: TimerTask,
}

// ordering is on (fire_at, sequence) only; BinaryHeap is a max-heap so
// the comparison is reversed to pop the earliest deadline first
impl Ord for TimerEntry {
    fn cmp(&self, other: &TimerEntry) -> CmpOrdering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &TimerEntry) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &TimerEntry) -> bool {
        self.fire_at == other.fire_at && self.sequence == other.sequence
    }
}

impl Eq for TimerEntry {}

struct TimerInner {
    queue: Mutex<BinaryHeap<TimerEntry>>,
    wakeup: Condvar,
    shutdown: AtomicBool,
    sequence: AtomicU64,
}

/// A [`Scheduler`] driven by a single timer thread.
///
/// One-shot tasks run once at their deadline; fixed-rate tasks are
/// rescheduled at `fire_at + period` so the rate does not drift with
/// task duration.  Cancellation flips an atomic flag checked before
/// each run.
pub struct TimerScheduler {
    inner: Arc<TimerInner>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TimerScheduler {
    pub fn new() -> TimerScheduler {
        let inner = Arc::new(TimerInner {
            queue: Mutex::new(BinaryHeap::new()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        });

        let worker = {
            let inner = inner.clone();
            thread::Builder::new()
                .name("rtmp-timer".to_string())
                .spawn(move || run_loop(inner))
        };

        TimerScheduler {
            inner,
            worker: Mutex::new(match worker {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!("Failed to spawn timer thread: {}", e);
                    None
                }
            }),
        }
    }

    fn submit(&self, fire_at: Instant, task: TimerTask) -> Box<dyn TaskHandle> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let entry = TimerEntry {
            fire_at,
            sequence: self.inner.sequence.fetch_add(1, Ordering::SeqCst),
            cancelled: cancelled.clone(),
            task,
        };
        lock(&self.inner.queue).push(entry);
        self.inner.wakeup.notify_all();
        Box::new(TimerTaskHandle { cancelled })
    }
}

impl Default for TimerScheduler {
    fn default() -> TimerScheduler {
        TimerScheduler::new()
    }
}

impl Scheduler for TimerScheduler {
    fn schedule_once(
        &self,
        delay: Duration,
        task: Box<dyn FnOnce() + Send>,
    ) -> Box<dyn TaskHandle> {
        self.submit(Instant::now() + delay, TimerTask::Once(task))
    }

    fn schedule_at_fixed_rate(
        &self,
        period: Duration,
        task: Box<dyn Fn() + Send + Sync>,
    ) -> Box<dyn TaskHandle> {
        self.submit(
            Instant::now() + period,
            TimerTask::FixedRate {
                period,
                task: Arc::from(task),
            },
        )
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.wakeup.notify_all();
        if let Some(worker) = lock(&self.worker).take() {
            if worker.join().is_err() {
                error!("The timer thread panicked during shutdown");
            }
        }
    }
}

struct TimerTaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle for TimerTaskHandle {
    fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }
}

fn run_loop(inner: Arc<TimerInner>) {
    let mut queue = lock(&inner.queue);
    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            return;
        }

        let now = Instant::now();
        let next_fire = queue.peek().map(|entry| entry.fire_at);
        match next_fire {
            None => {
                queue = match inner.wakeup.wait(queue) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
            Some(fire_at) if fire_at > now => {
                queue = match inner.wakeup.wait_timeout(queue, fire_at - now) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }
            Some(_) => {
                if let Some(entry) = queue.pop() {
                    drop(queue);
                    if !entry.cancelled.load(Ordering::SeqCst) {
                        match entry.task {
                            TimerTask::Once(task) => task(),
                            TimerTask::FixedRate { period, task } => {
                                task();
                                lock(&inner.queue).push(TimerEntry {
                                    fire_at: entry.fire_at + period,
                                    sequence: inner.sequence.fetch_add(1, Ordering::SeqCst),
                                    cancelled: entry.cancelled,
                                    task: TimerTask::FixedRate { period, task },
                                });
                            }
                        }
                    }
                    queue = lock(&inner.queue);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn one_shot_task_fires_after_delay() {
        let scheduler = TimerScheduler::new();
        let (tx, rx) = mpsc::channel();

        scheduler.schedule_once(
            Duration::from_millis(10),
            Box::new(move || {
                tx.send(()).unwrap();
            }),
        );

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn cancelled_task_does_not_fire() {
        let scheduler = TimerScheduler::new();
        let (tx, rx) = mpsc::channel();

        let handle = scheduler.schedule_once(
            Duration::from_millis(100),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        assert!(handle.cancel());
        assert!(!handle.cancel(), "second cancel should report no-op");

        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
    }

    #[test]
    fn fixed_rate_task_repeats_until_cancelled() {
        let scheduler = TimerScheduler::new();
        let (tx, rx) = mpsc::channel();

        let handle = scheduler.schedule_at_fixed_rate(
            Duration::from_millis(5),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.cancel();
    }
}
