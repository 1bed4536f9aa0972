//! Top-level drive entry points: `upload_pending`, `upload_retrying`,
//! `upload_failing` (§4.5), plus the producer-facing `enqueue`.

use crate::config::CacheConfig;
use crate::engine::BatchEngine;
use crate::error::{CacheError, UploadFailure};
use crate::names::{self, FAIL_WORK_QUEUE, PENDING_QUEUE, PENDING_WORK_QUEUE};
use crate::retry::RetryManager;
use crate::store::QueueStore;
use crate::uploader::{HttpUploader, Uploader};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::instrument;

/// Summary returned by every drive operation (§4.5, §8 R2).
#[derive(Debug, Clone, Default)]
pub struct DriveSummary {
    pub total: usize,
    pub errors: Vec<String>,
    pub is_overrun: Option<bool>,
}

/// Owns the store/uploader handles and the single-worker lock that keeps
/// drive passes from overlapping with themselves or each other.
pub struct Orchestrator<S, U> {
    engine: BatchEngine<S, U>,
    retry: RetryManager<S, U>,
    drive_lock: Mutex<()>,
}

impl<S: QueueStore + Clone> Orchestrator<S, HttpUploader> {
    /// Build an orchestrator that uploads over HTTPS to `config.endpoint`.
    pub fn new(store: S, config: &CacheConfig) -> Result<Self, CacheError> {
        let uploader = HttpUploader::new(
            config.endpoint.clone(),
            config.upload_splay,
            config.request_timeout,
        )
        .map_err(|err| CacheError::Upload(UploadFailure::Transport(err.to_string())))?;

        Ok(Self::with_uploader(store, uploader, config))
    }
}

impl<S: QueueStore + Clone, U: Uploader> Orchestrator<S, U> {
    /// Build an orchestrator against an arbitrary [`Uploader`], e.g. a
    /// [`crate::uploader::FakeUploader`] in tests.
    pub fn with_uploader(store: S, uploader: U, config: &CacheConfig) -> Self {
        Self {
            engine: BatchEngine::new(store.clone(), uploader.clone(), config.batch_size),
            retry: RetryManager::new(
                store,
                uploader,
                config.max_retry,
                config.retry_queue_limit,
                config.fail_ttl,
            ),
            drive_lock: Mutex::new(()),
        }
    }

    /// Append one already-serialized JSON record to `pend`.
    pub async fn enqueue_raw(&self, json: String) -> Result<(), CacheError> {
        self.engine.store().append_head(PENDING_QUEUE, json).await
    }

    /// Serialize `record` as compact JSON and append it to `pend`.
    pub async fn enqueue<T: Serialize>(&self, record: &T) -> Result<(), CacheError> {
        let json = serde_json::to_string(record)?;
        self.enqueue_raw(json).await
    }

    /// Drain `pend` into the endpoint, creating a retry queue on server
    /// rejection.
    #[instrument(skip(self))]
    pub async fn upload_pending(&self) -> Result<DriveSummary, CacheError> {
        let _guard = self.drive_lock.lock().await;

        match self
            .engine
            .upload_batch_continuing(PENDING_QUEUE, PENDING_WORK_QUEUE)
            .await
        {
            Ok(outcome) => Ok(DriveSummary {
                total: outcome.count,
                errors: outcome.error.into_iter().collect(),
                is_overrun: None,
            }),
            Err((outcome, UploadFailure::Server { status, body })) => {
                self.retry.create_retry_queue(PENDING_WORK_QUEUE).await?;
                Ok(DriveSummary {
                    total: outcome.count,
                    errors: vec![format!("{status}: {body}")],
                    is_overrun: None,
                })
            }
            Err((outcome, UploadFailure::Transport(msg))) => Ok(DriveSummary {
                total: outcome.count,
                errors: vec![msg],
                is_overrun: None,
            }),
        }
    }

    /// Run one pass over the `retr_*` family (§4.4).
    #[instrument(skip(self))]
    pub async fn upload_retrying(&self) -> Result<DriveSummary, CacheError> {
        let _guard = self.drive_lock.lock().await;

        let result = self.retry.retry_all().await?;
        Ok(DriveSummary {
            total: result.total,
            errors: result.errors,
            is_overrun: Some(result.is_overrun),
        })
    }

    /// Drain each `fail_*` queue once, oldest date first; stop at the first
    /// error.
    #[instrument(skip(self))]
    pub async fn upload_failing(&self) -> Result<DriveSummary, CacheError> {
        let _guard = self.drive_lock.lock().await;

        let mut queues = self.engine.store().list("fail_*").await?;
        queues.retain(|q| names::is_fail_queue(q));
        queues.sort();

        let mut total = 0usize;
        let mut errors = Vec::new();

        for queue in queues {
            match self
                .engine
                .upload_batch_continuing(&queue, FAIL_WORK_QUEUE)
                .await
            {
                Ok(outcome) => {
                    total += outcome.count;
                    if let Some(err) = outcome.error {
                        errors.push(err);
                        break;
                    }
                }
                Err((outcome, err)) => {
                    total += outcome.count;
                    errors.push(err.to_string());
                    break;
                }
            }
        }

        Ok(DriveSummary {
            total,
            errors,
            is_overrun: None,
        })
    }
}
