//! Scheduling and worker-pool seams.
//!
//! The connection never owns threads.  A shared [`Scheduler`] drives
//! the handshake-wait and keep-alive tasks, and a shared
//! [`MessageExecutor`] runs the non-control packet handlers.  Both are
//! injected so that embedders can supply their own runtime; the bundled
//! [`ThreadPoolExecutor`] and [`TimerScheduler`] are usable defaults.

mod thread_pool;
mod timer;

pub use self::thread_pool::ThreadPoolExecutor;
pub use self::timer::TimerScheduler;

use std::time::Duration;

use failure::Fail;

/// Cancellation handle for a scheduled task.  Cancellation is
/// best-effort: a task already running completes on its own thread.
pub trait TaskHandle: Send + Sync {
    /// Requests cancellation.  Returns `false` when the task had
    /// already been cancelled.
    fn cancel(&self) -> bool;
}

/// Timer facility for one-shot and fixed-rate background tasks.
pub trait Scheduler: Send + Sync {
    fn schedule_once(
        &self,
        delay: Duration,
        task: Box<dyn FnOnce() + Send>,
    ) -> Box<dyn TaskHandle>;

    fn schedule_at_fixed_rate(
        &self,
        period: Duration,
        task: Box<dyn Fn() + Send + Sync>,
    ) -> Box<dyn TaskHandle>;
}

/// Worker pool for inbound message handling.  Submission is
/// non-blocking; a saturated pool answers with [`TaskRejected`] and the
/// packet is dropped by the caller.
pub trait MessageExecutor: Send + Sync {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) -> Result<(), TaskRejected>;
}

/// The worker pool could not accept a submission.
#[derive(Debug, Fail)]
#[fail(display = "The worker pool rejected the task: {}", reason)]
pub struct TaskRejected {
    pub reason: String,
}
