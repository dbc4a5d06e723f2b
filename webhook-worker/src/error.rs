use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("store error: {0}")]
    Store(#[from] mailer_common::error::StoreError),
    #[error("queue error: {0}")]
    Queue(#[from] mailer_common::error::QueueError),
}
