//! Generic queue adapter system for the pipeline work queues.
//!
//! Both bounded queues in the pipeline — embed-info lists awaiting the
//! checker pool and moderation decisions awaiting the action router — are
//! expressed against the `QueueAdapter` trait so their workers do not care
//! which backend carries the items. The in-memory MPSC implementation is the
//! only backend here: the queues are process-local by design (nothing in
//! the pipeline persists across restarts).
//!
//! Producers block when a queue is full; that backpressure is the contract,
//! not an accident. Queue depth is observable for the backlog gauges.

use anyhow::Result;
use async_trait::async_trait;

mod mpsc;

pub use mpsc::MpscQueueAdapter;

/// Common interface for bounded work queues.
///
/// Implementations must be thread-safe; one adapter instance is shared by
/// every producer and every worker of a pipeline stage.
#[async_trait]
pub trait QueueAdapter<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Pull the next work item, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed and drained; workers use
    /// that as their exit signal.
    async fn pull(&self) -> Option<T>;

    /// Push a work item, waiting while the queue is at capacity.
    async fn push(&self, work: T) -> Result<()>;

    /// Current number of queued items, if the backend can report it.
    async fn depth(&self) -> Option<usize> {
        None
    }

    /// Whether the queue is still operational.
    async fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// The trait must stay object-safe; workers hold `Arc<dyn QueueAdapter>`.
    #[test]
    fn test_trait_object_safety() {
        fn _assert_object_safe(_: &dyn QueueAdapter<String>) {}
        fn _assert_sendable(_: Arc<dyn QueueAdapter<String>>) {}
    }
}
