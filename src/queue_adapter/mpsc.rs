//! Bounded in-memory queue adapter over Tokio MPSC channels.
//!
//! This is the queue backing both pipeline stages. It is bounded, so a full
//! queue blocks producers (backpressure against the ingestion side), and it
//! reports an approximate depth for the backlog gauges. Items do not survive
//! a restart, matching the rest of the pipeline's in-memory semantics.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

use super::QueueAdapter;
use crate::errors::QueueError;

/// MPSC channel-based queue adapter.
///
/// The receiver is wrapped in an `Arc<Mutex>` so several workers can pull
/// from the same queue; the sender side is cloned freely.
pub struct MpscQueueAdapter<T>
where
    T: Send + Sync + 'static,
{
    receiver: Arc<Mutex<mpsc::Receiver<T>>>,
    sender: mpsc::Sender<T>,
}

impl<T> MpscQueueAdapter<T>
where
    T: Send + Sync + 'static,
{
    /// Create a queue holding at most `buffer` items. Producers pushing into
    /// a full queue wait until a worker drains an item.
    pub fn new(buffer: usize) -> Self {
        let (sender, receiver) = mpsc::channel(buffer);
        Self {
            receiver: Arc::new(Mutex::new(receiver)),
            sender,
        }
    }

    /// Maximum number of items the queue can hold.
    pub fn max_capacity(&self) -> usize {
        self.sender.max_capacity()
    }
}

#[async_trait]
impl<T> QueueAdapter<T> for MpscQueueAdapter<T>
where
    T: Send + Sync + 'static,
{
    async fn pull(&self) -> Option<T> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await
    }

    async fn push(&self, work: T) -> Result<()> {
        self.sender
            .send(work)
            .await
            .map_err(|e| QueueError::MpscOperationFailed {
                operation: "send".to_string(),
                details: e.to_string(),
            })?;
        Ok(())
    }

    async fn depth(&self) -> Option<usize> {
        // Approximate: the channel does not expose an exact length
        Some(self.sender.max_capacity() - self.sender.capacity())
    }

    async fn is_healthy(&self) -> bool {
        !self.sender.is_closed()
    }
}

impl<T> Clone for MpscQueueAdapter<T>
where
    T: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
            sender: self.sender.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_push_pull_fifo() {
        let adapter = MpscQueueAdapter::<i32>::new(10);

        for i in 0..5 {
            adapter.push(i).await.unwrap();
        }
        for expected in 0..5 {
            assert_eq!(adapter.pull().await, Some(expected));
        }
    }

    #[tokio::test]
    async fn test_concurrent_producers() {
        let adapter = Arc::new(MpscQueueAdapter::<i32>::new(100));
        let mut handles = vec![];

        for i in 0..10 {
            let queue = adapter.clone();
            handles.push(tokio::spawn(async move {
                queue.push(i).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut items = vec![];
        for _ in 0..10 {
            items.push(adapter.pull().await.unwrap());
        }
        items.sort();
        assert_eq!(items, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_depth_tracking() {
        let adapter = MpscQueueAdapter::<i32>::new(10);

        assert_eq!(adapter.depth().await, Some(0));
        for i in 0..5 {
            adapter.push(i).await.unwrap();
        }
        assert_eq!(adapter.depth().await, Some(5));

        adapter.pull().await;
        assert_eq!(adapter.depth().await, Some(4));
    }

    #[tokio::test]
    async fn test_full_queue_blocks_producer() {
        let adapter = Arc::new(MpscQueueAdapter::<i32>::new(2));

        adapter.push(1).await.unwrap();
        adapter.push(2).await.unwrap();

        let producer = adapter.clone();
        let mut blocked = tokio::spawn(async move { producer.push(3).await });

        // The third push must wait while the queue is at capacity
        let poll = tokio::time::timeout(Duration::from_millis(100), &mut blocked).await;
        assert!(poll.is_err(), "push into a full queue should block");

        // Draining one item releases the producer
        assert_eq!(adapter.pull().await, Some(1));
        blocked.await.unwrap().unwrap();
        assert_eq!(adapter.depth().await, Some(2));
    }

    #[tokio::test]
    async fn test_pull_waits_for_item() {
        let adapter = Arc::new(MpscQueueAdapter::<i32>::new(10));

        let consumer = adapter.clone();
        let pull_handle = tokio::spawn(async move { consumer.pull().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        adapter.push(42).await.unwrap();

        assert_eq!(pull_handle.await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_health_check() {
        let adapter = MpscQueueAdapter::<i32>::new(10);
        assert!(adapter.is_healthy().await);
    }
}
