use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use vagon_core::AppError;

use crate::pipeline::{Pipeline, ProcessingJob};

/// Bounded queue of video jobs served by a fixed-size worker pool.
#[derive(Clone)]
pub struct ProcessingQueue {
    tx: mpsc::Sender<ProcessingJob>,
}

impl ProcessingQueue {
    /// Start the worker pool.
    ///
    /// At most `queue_size` jobs wait; at most `max_concurrent` run at once.
    /// When the queue is full, `submit()` rejects the job.
    pub fn start(pipeline: Pipeline, queue_size: usize, max_concurrent: usize) -> Self {
        let queue_size = queue_size.max(1);
        let max_concurrent = max_concurrent.max(1);
        let (tx, rx) = mpsc::channel(queue_size);

        tokio::spawn(async move {
            Self::worker_pool(rx, pipeline, max_concurrent).await;
        });

        tracing::info!(
            queue_size = queue_size,
            max_concurrent = max_concurrent,
            "Processing job queue initialized with bounded channel"
        );

        Self { tx }
    }

    /// Whether a job submitted now would fit.
    pub fn has_capacity(&self) -> bool {
        self.tx.capacity() > 0
    }

    #[tracing::instrument(skip(self, job), fields(processing_id = %job.processing_id))]
    pub fn submit(&self, job: ProcessingJob) -> Result<(), AppError> {
        tracing::info!(file_id = %job.file_id, "Enqueuing video processing job");
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!("Processing queue is full, rejecting job");
                AppError::QueueFull(
                    "Processing queue is full, please try again later".to_string(),
                )
            }
            mpsc::error::TrySendError::Closed(_) => {
                AppError::Internal("Processing queue is closed".to_string())
            }
        })
    }

    async fn worker_pool(
        mut rx: mpsc::Receiver<ProcessingJob>,
        pipeline: Pipeline,
        max_concurrent: usize,
    ) {
        let semaphore = Arc::new(Semaphore::new(max_concurrent));

        while let Some(job) = rx.recv().await {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let pipeline = pipeline.clone();

            tokio::spawn(async move {
                let _permit = permit;
                pipeline.run_video(job).await;
            });
        }

        tracing::debug!("Processing queue closed, worker pool exiting");
    }
}
