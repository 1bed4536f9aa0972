//! Move a batch from a source queue to a work queue, upload it, commit or
//! leave it in place (§4.3).

use crate::error::UploadFailure;
use crate::store::QueueStore;
use crate::uploader::Uploader;
use tracing::{debug, instrument};

/// Result of one `upload_batch[_continuing]` call.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub count: usize,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct BatchEngine<S, U> {
    store: S,
    uploader: U,
    batch_size: usize,
}

impl<S: QueueStore, U: Uploader> BatchEngine<S, U> {
    pub fn new(store: S, uploader: U, batch_size: usize) -> Self {
        Self {
            store,
            uploader,
            batch_size,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Move up to `batch_size` entries from `source` into `work` and upload
    /// them once.
    #[instrument(skip(self), fields(source, work))]
    pub async fn upload_batch(&self, source: &str, work: &str) -> Result<BatchOutcome, UploadFailure> {
        let batch = self
            .store
            .dequeue_batch(source, work, self.batch_size)
            .await
            .map_err(|err| UploadFailure::Transport(err.to_string()))?;

        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }

        match self.uploader.upload(&batch, 1).await {
            Ok(()) => {
                self.store
                    .delete(work)
                    .await
                    .map_err(|err| UploadFailure::Transport(err.to_string()))?;
                debug!(count = batch.len(), "batch uploaded");
                Ok(BatchOutcome {
                    count: batch.len(),
                    error: None,
                })
            }
            Err(err @ UploadFailure::Transport(_)) => Ok(BatchOutcome {
                count: batch.len(),
                error: Some(err.to_string()),
            }),
            Err(err @ UploadFailure::Server { .. }) => Err(err),
        }
    }

    /// Drain `source` into `work`, one `batch_size`-sized batch at a time,
    /// until a batch comes back smaller than `batch_size` (source exhausted)
    /// or an error occurs.
    pub async fn upload_batch_continuing(
        &self,
        source: &str,
        work: &str,
    ) -> Result<BatchOutcome, (BatchOutcome, UploadFailure)> {
        let mut total = BatchOutcome::default();
        loop {
            let outcome = match self.upload_batch(source, work).await {
                Ok(outcome) => outcome,
                Err(err) => return Err((total, err)),
            };
            total.count += outcome.count;
            if outcome.error.is_some() {
                total.error = outcome.error;
                return Ok(total);
            }
            if outcome.count < self.batch_size {
                return Ok(total);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::{PENDING_QUEUE, PENDING_WORK_QUEUE};
    use crate::store::FakeQueueStore;
    use crate::uploader::{FakeUploader, ScriptedResponse};

    #[tokio::test]
    async fn empty_source_is_a_no_op() {
        let store = FakeQueueStore::new();
        let engine = BatchEngine::new(store, FakeUploader::new(), 100);
        let outcome = engine
            .upload_batch(PENDING_QUEUE, PENDING_WORK_QUEUE)
            .await
            .unwrap();
        assert_eq!(outcome.count, 0);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn transport_failure_leaves_work_queue_intact() {
        let store = FakeQueueStore::new();
        store.seed(PENDING_QUEUE, ["A".to_string()]);
        let uploader = FakeUploader::new();
        uploader.script(ScriptedResponse::Transport("unreachable".to_string()));
        let engine = BatchEngine::new(store, uploader, 100);
        let outcome = engine
            .upload_batch(PENDING_QUEUE, PENDING_WORK_QUEUE)
            .await
            .unwrap();
        assert_eq!(outcome.count, 1);
        assert!(outcome.error.is_some());
        assert_eq!(engine.store().snapshot(PENDING_WORK_QUEUE), vec!["A"]);
    }

    #[tokio::test]
    async fn happy_path_uploads_in_destination_order_and_clears_queues() {
        let store = FakeQueueStore::new();
        store.seed(
            PENDING_QUEUE,
            ["A".to_string(), "B".to_string(), "C".to_string()],
        );
        let uploader = FakeUploader::new();
        let engine = BatchEngine::new(store, uploader.clone(), 100);

        let outcome = engine
            .upload_batch(PENDING_QUEUE, PENDING_WORK_QUEUE)
            .await
            .unwrap();

        assert_eq!(outcome.count, 3);
        assert!(outcome.error.is_none());
        assert!(engine.store().snapshot(PENDING_QUEUE).is_empty());
        assert!(engine.store().snapshot(PENDING_WORK_QUEUE).is_empty());
        assert_eq!(uploader.calls().len(), 1);
        assert_eq!(uploader.calls()[0].entries, vec!["C", "B", "A"]);
    }

    #[tokio::test]
    async fn server_error_propagates_and_leaves_work_queue_for_retry_creation() {
        let store = FakeQueueStore::new();
        store.seed(PENDING_QUEUE, ["A".to_string()]);
        let uploader = FakeUploader::new();
        uploader.script(ScriptedResponse::Server {
            status: 500,
            body: "nope".to_string(),
        });
        let engine = BatchEngine::new(store, uploader, 100);

        let err = engine
            .upload_batch(PENDING_QUEUE, PENDING_WORK_QUEUE)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadFailure::Server { status: 500, .. }));
        assert_eq!(engine.store().snapshot(PENDING_WORK_QUEUE), vec!["A"]);
    }
}
