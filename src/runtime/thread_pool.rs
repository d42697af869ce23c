use std::sync::Mutex;
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use log::error;

use super::{MessageExecutor, TaskRejected};
use crate::sync::lock;

type Job = Box<dyn FnOnce() + Send>;

/// A fixed-size worker pool fed through a crossbeam channel.
///
/// With a bounded queue, submissions beyond the queue capacity are
/// rejected instead of blocking the transport thread.  Dropping the
/// pool closes the channel and joins the workers after they finish the
/// jobs already queued.
pub struct ThreadPoolExecutor {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl ThreadPoolExecutor {
    /// A pool with an unbounded submission queue.
    pub fn new(threads: usize) -> ThreadPoolExecutor {
        let (sender, receiver) = unbounded();
        ThreadPoolExecutor {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(Self::spawn_workers(threads, receiver)),
        }
    }

    /// A pool that rejects submissions once `queue_capacity` jobs are
    /// waiting.
    pub fn with_queue_capacity(threads: usize, queue_capacity: usize) -> ThreadPoolExecutor {
        let (sender, receiver) = bounded(queue_capacity);
        ThreadPoolExecutor {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(Self::spawn_workers(threads, receiver)),
        }
    }

    fn spawn_workers(threads: usize, receiver: Receiver<Job>) -> Vec<thread::JoinHandle<()>> {
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver = receiver.clone();
            let builder = thread::Builder::new().name(format!("rtmp-worker-{}", index));
            match builder.spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
            }) {
                Ok(handle) => workers.push(handle),
                Err(e) => error!("Failed to spawn worker thread {}: {}", index, e),
            }
        }
        workers
    }
}

impl MessageExecutor for ThreadPoolExecutor {
    fn execute(&self, task: Job) -> Result<(), TaskRejected> {
        let sender = lock(&self.sender);
        match sender.as_ref() {
            Some(sender) => sender.try_send(task).map_err(|e| {
                let reason = match e {
                    TrySendError::Full(_) => "submission queue is full",
                    TrySendError::Disconnected(_) => "executor has shut down",
                };
                TaskRejected {
                    reason: reason.to_string(),
                }
            }),
            None => Err(TaskRejected {
                reason: "executor has shut down".to_string(),
            }),
        }
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        lock(&self.sender).take();
        for worker in lock(&self.workers).drain(..) {
            if worker.join().is_err() {
                error!("A worker thread panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn submitted_jobs_run() {
        let pool = ThreadPoolExecutor::new(2);
        let (tx, rx) = mpsc::channel();

        for index in 0..4 {
            let tx = tx.clone();
            pool.execute(Box::new(move || {
                tx.send(index).unwrap();
            }))
            .unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn bounded_pool_rejects_when_queue_is_full() {
        let pool = ThreadPoolExecutor::with_queue_capacity(1, 1);
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel();

        // occupy the single worker until the gate opens
        pool.execute(Box::new(move || {
            started_tx.send(()).unwrap();
            let _ = gate_rx.recv_timeout(Duration::from_secs(5));
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // one job fits in the queue, the next must be rejected
        pool.execute(Box::new(|| {})).unwrap();
        let rejected = pool.execute(Box::new(|| {}));
        assert!(rejected.is_err(), "expected a rejection from a full queue");

        gate_tx.send(()).unwrap();
    }
}
