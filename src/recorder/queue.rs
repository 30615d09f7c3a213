//! Bounded frame queues
//!
//! Thin wrapper over a tokio bounded channel. Producers never wait: a full
//! queue rejects the newest item and the caller counts the drop. Consumers
//! get blocking, timed and non-blocking reads.

use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

/// Result of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Accepted; `depth` is the queue length right after the push
    Queued { depth: usize },
    /// Queue at capacity, item dropped
    Full,
    /// Consumer gone, item dropped
    Closed,
}

/// Result of a timed read
#[derive(Debug)]
pub enum RecvTimeout<T> {
    Item(T),
    Timeout,
    Closed,
}

/// Create a bounded queue with room for `capacity` items
pub fn frame_queue<T>(capacity: usize) -> (FrameSender<T>, FrameReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FrameSender { tx }, FrameReceiver { rx })
}

/// Producer side
#[derive(Debug)]
pub struct FrameSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for FrameSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> FrameSender<T> {
    pub fn try_push(&self, item: T) -> PushOutcome {
        match self.tx.try_send(item) {
            Ok(()) => PushOutcome::Queued { depth: self.len() },
            Err(TrySendError::Full(_)) => PushOutcome::Full,
            Err(TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }

    /// Items currently buffered
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Fraction of the capacity in use, 0.0..=1.0
    pub fn usage(&self) -> f64 {
        self.len() as f64 / self.capacity() as f64
    }
}

/// Consumer side
#[derive(Debug)]
pub struct FrameReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> FrameReceiver<T> {
    /// Wait for the next item; `None` once every sender is dropped and the
    /// queue is empty.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> RecvTimeout<T> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(item)) => RecvTimeout::Item(item),
            Ok(None) => RecvTimeout::Closed,
            Err(_) => RecvTimeout::Timeout,
        }
    }

    pub fn try_recv(&mut self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Pop up to `max` items without waiting
    pub fn drain_batch(&mut self, max: usize) -> Vec<T> {
        let mut batch = Vec::new();
        while batch.len() < max {
            match self.try_recv() {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        batch
    }

    /// Discard everything currently buffered, returning how many items went
    pub fn clear(&mut self) -> usize {
        let mut discarded = 0;
        while self.try_recv().is_some() {
            discarded += 1;
        }
        discarded
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_queue_drops_newest() {
        let (tx, mut rx) = frame_queue::<u32>(2);
        assert_eq!(tx.try_push(1), PushOutcome::Queued { depth: 1 });
        assert_eq!(tx.try_push(2), PushOutcome::Queued { depth: 2 });
        assert_eq!(tx.try_push(3), PushOutcome::Full);
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn test_len_tracks_both_sides() {
        let (tx, mut rx) = frame_queue::<u32>(4);
        tx.try_push(1);
        tx.try_push(2);
        assert_eq!(tx.len(), 2);
        assert_eq!(rx.len(), 2);
        assert!((tx.usage() - 0.5).abs() < f64::EPSILON);
        rx.try_recv();
        assert_eq!(tx.len(), 1);
    }

    #[tokio::test]
    async fn test_drain_batch_stops_when_empty() {
        let (tx, mut rx) = frame_queue::<u32>(8);
        for i in 0..3 {
            tx.try_push(i);
        }
        assert_eq!(rx.drain_batch(10), vec![0, 1, 2]);
        assert!(rx.drain_batch(10).is_empty());
    }

    #[tokio::test]
    async fn test_closed_and_timeout() {
        let (tx, mut rx) = frame_queue::<u32>(1);
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(5)).await,
            RecvTimeout::Timeout
        ));
        drop(tx);
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(5)).await,
            RecvTimeout::Closed
        ));

        let (tx, rx) = frame_queue::<u32>(1);
        drop(rx);
        assert_eq!(tx.try_push(1), PushOutcome::Closed);
    }
}
