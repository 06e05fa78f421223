//! Hand-off of accepted usage to the asynchronous recording job.

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use tollgate_core::ReportJob;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The consumer side has shut down.
    #[error("report queue is closed")]
    Closed,

    #[error("report queue backend error: {0}")]
    Backend(String),
}

/// Destination for report jobs. Enqueueing must not wait for the job to run.
#[async_trait]
pub trait ReportQueue: Send + Sync {
    async fn enqueue(&self, job: ReportJob) -> Result<(), QueueError>;
}

/// Queue backed by an unbounded channel; never blocks the caller.
#[derive(Debug, Clone)]
pub struct ChannelReportQueue {
    tx: mpsc::UnboundedSender<ReportJob>,
}

impl ChannelReportQueue {
    /// Create a queue and the receiver a recorder drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ReportJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ReportQueue for ChannelReportQueue {
    async fn enqueue(&self, job: ReportJob) -> Result<(), QueueError> {
        self.tx.send(job).map_err(|_| QueueError::Closed)
    }
}

/// Queue that keeps every job in memory, for inspection.
#[derive(Debug, Default)]
pub struct MemoryReportQueue {
    jobs: Mutex<Vec<ReportJob>>,
}

impl MemoryReportQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<ReportJob> {
        self.jobs.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Remove and return every queued job.
    pub fn drain(&self) -> Vec<ReportJob> {
        std::mem::take(&mut *self.jobs.lock())
    }
}

#[async_trait]
impl ReportQueue for MemoryReportQueue {
    async fn enqueue(&self, job: ReportJob) -> Result<(), QueueError> {
        self.jobs.lock().push(job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tollgate_core::ServiceId;

    use super::*;

    fn job() -> ReportJob {
        ReportJob::new(ServiceId::new("1"), Vec::new(), HashMap::new())
    }

    #[tokio::test]
    async fn channel_delivers_in_order() {
        let (queue, mut rx) = ChannelReportQueue::channel();
        queue.enqueue(job()).await.unwrap();
        let mut second = job();
        second.service_id = ServiceId::new("2");
        queue.enqueue(second).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().service_id.as_str(), "1");
        assert_eq!(rx.recv().await.unwrap().service_id.as_str(), "2");
    }

    #[tokio::test]
    async fn closed_channel_is_an_error() {
        let (queue, rx) = ChannelReportQueue::channel();
        drop(rx);
        assert!(matches!(queue.enqueue(job()).await, Err(QueueError::Closed)));
    }

    #[tokio::test]
    async fn memory_queue_records_and_drains() {
        let queue = MemoryReportQueue::new();
        queue.enqueue(job()).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain().len(), 1);
        assert!(queue.is_empty());
    }
}
