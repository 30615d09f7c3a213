//! Bounded pipeline shutdown
//!
//! Stopping a pipeline is a two-phase drain with a deadline:
//!
//! ```text
//! Draining --queue empty--> Drained --worker exits--> Completed
//!    |                         \--grace expires----> ForceStopped
//!    \--deadline passes--> DeadlineExceeded --------> ForceStopped
//! ```
//!
//! The deadline is checked against tokio's monotonic clock so the machine
//! behaves the same under paused test time.

use crate::recorder::queue::FrameSender;
use crate::utils::error::AppError;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Phase of a drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainPhase {
    Draining,
    Drained,
    DeadlineExceeded,
    ForceStopped,
}

/// Drain state machine for one queue
#[derive(Debug)]
pub struct Drain {
    phase: DrainPhase,
    deadline: Instant,
}

impl Drain {
    pub fn new(timeout: Duration) -> Self {
        Self {
            phase: DrainPhase::Draining,
            deadline: Instant::now() + timeout,
        }
    }

    pub fn phase(&self) -> DrainPhase {
        self.phase
    }

    /// Advance with the current queue length. Terminal phases are sticky.
    pub fn observe(&mut self, queue_len: usize) -> DrainPhase {
        if self.phase == DrainPhase::Draining {
            if queue_len == 0 {
                self.phase = DrainPhase::Drained;
            } else if Instant::now() >= self.deadline {
                self.phase = DrainPhase::DeadlineExceeded;
            }
        }
        self.phase
    }

    pub fn force_stop(&mut self) {
        self.phase = DrainPhase::ForceStopped;
    }

    /// Poll the queue until it empties or the deadline passes
    pub async fn run<F>(&mut self, queue_len: F, poll: Duration) -> DrainPhase
    where
        F: Fn() -> usize,
    {
        loop {
            match self.observe(queue_len()) {
                DrainPhase::Draining => tokio::time::sleep(poll).await,
                phase => return phase,
            }
        }
    }
}

/// How a worker ended
#[derive(Debug)]
pub enum StopOutcome<T> {
    /// Worker returned normally
    Completed(T),
    /// Worker returned an error or panicked
    Failed(AppError),
    /// Worker was aborted after the deadline or grace period
    ForceStopped,
}

/// Timing for [`stop_worker`]
#[derive(Debug, Clone, Copy)]
pub struct StopTimeouts {
    /// Deadline for the queue to empty
    pub drain: Duration,
    /// Extra time for the worker to exit after the queue empties
    pub grace: Duration,
    /// Poll interval while draining
    pub poll: Duration,
}

/// Wait for a worker's queue to drain, then for the worker to exit,
/// aborting it when either bound is exceeded.
///
/// `queue` must be the last live sender: it is dropped once the queue is
/// empty so the worker sees the channel close.
pub async fn stop_worker<T, Q>(
    label: &str,
    mut handle: JoinHandle<Result<T, AppError>>,
    queue: FrameSender<Q>,
    timeouts: StopTimeouts,
) -> StopOutcome<T> {
    let mut drain = Drain::new(timeouts.drain);
    let phase = drain.run(|| queue.len(), timeouts.poll).await;
    drop(queue);
    if phase == DrainPhase::DeadlineExceeded {
        tracing::warn!(
            "Timed out waiting for {} queue to drain, cancelling worker",
            label
        );
        handle.abort();
        drain.force_stop();
        return StopOutcome::ForceStopped;
    }

    match tokio::time::timeout(timeouts.grace, &mut handle).await {
        Ok(Ok(Ok(value))) => StopOutcome::Completed(value),
        Ok(Ok(Err(e))) => {
            tracing::error!("{} worker failed: {}", label, e);
            StopOutcome::Failed(e)
        }
        Ok(Err(join_error)) => {
            tracing::error!("{} worker did not complete: {}", label, join_error);
            StopOutcome::Failed(AppError::from(join_error))
        }
        Err(_) => {
            tracing::warn!("{} worker shutdown timed out, cancelling", label);
            handle.abort();
            drain.force_stop();
            StopOutcome::ForceStopped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::queue::frame_queue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn timeouts() -> StopTimeouts {
        StopTimeouts {
            drain: Duration::from_secs(5),
            grace: Duration::from_secs(2),
            poll: Duration::from_millis(100),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_reaches_drained() {
        let remaining = Arc::new(AtomicUsize::new(3));
        let counter = remaining.clone();
        tokio::spawn(async move {
            while counter.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
            }
        });

        let mut drain = Drain::new(Duration::from_secs(1));
        let phase = drain
            .run(|| remaining.load(Ordering::SeqCst), Duration::from_millis(10))
            .await;
        assert_eq!(phase, DrainPhase::Drained);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_deadline_exceeded() {
        let mut drain = Drain::new(Duration::from_secs(1));
        let started = Instant::now();
        let phase = drain.run(|| 4, Duration::from_millis(100)).await;
        assert_eq!(phase, DrainPhase::DeadlineExceeded);
        assert!(started.elapsed() >= Duration::from_secs(1));
        // Terminal phases do not move on
        assert_eq!(drain.observe(0), DrainPhase::DeadlineExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_worker_completes() {
        let (tx, _rx) = frame_queue::<u8>(4);
        let handle = tokio::spawn(async { Ok::<_, AppError>(42u64) });
        match stop_worker("test", handle, tx, timeouts()).await {
            StopOutcome::Completed(v) => assert_eq!(v, 42),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_worker_force_stops_stuck_worker() {
        let handle = tokio::spawn(async {
            std::future::pending::<()>().await;
            Ok::<_, AppError>(())
        });
        let (tx, _rx) = frame_queue::<u8>(4);
        let started = Instant::now();
        let outcome = stop_worker("stuck", handle, tx, timeouts()).await;
        assert!(matches!(outcome, StopOutcome::ForceStopped));
        assert!(started.elapsed() <= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_worker_aborts_when_queue_never_drains() {
        let (tx, _rx) = frame_queue::<u8>(4);
        tx.try_push(1);
        let handle = tokio::spawn(async {
            std::future::pending::<()>().await;
            Ok::<_, AppError>(())
        });
        let started = Instant::now();
        let outcome = stop_worker("backlogged", handle, tx, timeouts()).await;
        assert!(matches!(outcome, StopOutcome::ForceStopped));
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_worker_reports_failure() {
        let handle =
            tokio::spawn(async { Err::<(), _>(AppError::Encoding("disk full".to_string())) });
        let (tx, _rx) = frame_queue::<u8>(4);
        let outcome = stop_worker("failing", handle, tx, timeouts()).await;
        assert!(matches!(outcome, StopOutcome::Failed(AppError::Encoding(_))));
    }
}
