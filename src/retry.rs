//! Manage the `retr_*` queue family: attempt counters, promotion to fail,
//! splay pacing (§4.4).

use crate::error::{CacheError, UploadFailure};
use crate::names;
use crate::store::QueueStore;
use crate::uploader::Uploader;
use chrono::Utc;
use tracing::{debug, error, instrument, warn};

/// Result of one pass over the retry queue family.
#[derive(Debug, Clone, Default)]
pub struct RetryPassResult {
    pub total: usize,
    pub errors: Vec<String>,
    pub is_overrun: bool,
}

#[derive(Clone)]
pub struct RetryManager<S, U> {
    store: S,
    uploader: U,
    max_retry: u32,
    retry_queue_limit: usize,
    fail_ttl: u64,
}

impl<S: QueueStore, U: Uploader> RetryManager<S, U> {
    pub fn new(
        store: S,
        uploader: U,
        max_retry: u32,
        retry_queue_limit: usize,
        fail_ttl: u64,
    ) -> Self {
        Self {
            store,
            uploader,
            max_retry,
            retry_queue_limit,
            fail_ttl,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Rename a just-failed work queue into a fresh `retr_{now}_#0` queue.
    #[instrument(skip(self))]
    pub async fn create_retry_queue(&self, work_queue: &str) -> Result<bool, CacheError> {
        let name = names::retry_queue_name(Utc::now(), 0);
        let renamed = self.store.rename_if_absent(work_queue, &name).await?;
        if renamed {
            debug!(%name, "created retry queue");
        } else {
            warn!(%name, "retry queue name collision, leaving work queue in place");
        }
        Ok(renamed)
    }

    /// Process every `retr_*` queue once, oldest first.
    #[instrument(skip(self))]
    pub async fn retry_all(&self) -> Result<RetryPassResult, CacheError> {
        let mut queues = self.store.list("retr_*").await?;
        queues.sort();

        let is_overrun = queues.len() >= self.retry_queue_limit;
        let mut remaining = queues.len() as u64;
        let mut total = 0usize;
        let mut errors = Vec::new();

        for queue in queues {
            let Some((_, attempt)) = names::parse_retry_queue(&queue) else {
                error!(%queue, "retry queue name failed to parse, skipping");
                continue;
            };

            let entries = self.store.range(&queue, 0, -1).await?;

            match self.uploader.upload(&entries, remaining).await {
                Ok(()) => {
                    self.store.delete(&queue).await?;
                    total += entries.len();
                    remaining = remaining.saturating_sub(1);
                    debug!(%queue, count = entries.len(), "retry queue uploaded");
                }
                Err(UploadFailure::Transport(msg)) => {
                    warn!(%queue, error = %msg, "transport failure, stopping retry pass");
                    errors.push(msg);
                    break;
                }
                Err(UploadFailure::Server { status, body }) => {
                    errors.push(format!("{status}: {body}"));
                    self.demote_or_promote(&queue, attempt, &entries).await?;
                }
            }
        }

        Ok(RetryPassResult {
            total,
            errors,
            is_overrun,
        })
    }

    async fn demote_or_promote(
        &self,
        queue: &str,
        attempt: u32,
        entries: &[String],
    ) -> Result<(), CacheError> {
        let new_attempt = attempt + 1;
        if new_attempt >= self.max_retry {
            let fail_queue = names::fail_queue_name(Utc::now());
            self.store
                .atomic_push_expire_delete(&fail_queue, entries, self.fail_ttl, queue)
                .await?;
            error!(%queue, %fail_queue, "retry queue exhausted max_retry, promoted to fail queue");
            return Ok(());
        }

        let Some(renamed_to) = names::retry_queue_with_attempt(queue, new_attempt) else {
            error!(%queue, "retry queue name failed to parse during promotion, skipping");
            return Ok(());
        };

        if self.store.rename_if_absent(queue, &renamed_to).await? {
            debug!(%queue, renamed_to, "retry queue attempt incremented");
        } else {
            warn!(%queue, renamed_to, "rename collision incrementing attempt");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FakeQueueStore;
    use crate::uploader::{FakeUploader, ScriptedResponse};

    #[tokio::test]
    async fn unparseable_queue_is_skipped_not_deleted() {
        let store = FakeQueueStore::new();
        store.seed("retr_not_a_timestamp", ["A".to_string()]);
        let manager = RetryManager::new(store, FakeUploader::new(), 10, 10, 604_800);
        let result = manager.retry_all().await.unwrap();
        assert_eq!(result.total, 0);
        assert_eq!(manager.store().snapshot("retr_not_a_timestamp"), vec!["A"]);
    }

    #[tokio::test]
    async fn create_retry_queue_rejects_collision() {
        let store = FakeQueueStore::new();
        store.seed("pend.work", ["A".to_string()]);
        let manager = RetryManager::new(store, FakeUploader::new(), 10, 10, 604_800);
        let name = names::retry_queue_name(Utc::now(), 0);
        manager.store().seed(&name, ["existing".to_string()]);
        let created = manager.create_retry_queue("pend.work").await.unwrap();
        assert!(!created);
        assert_eq!(manager.store().snapshot("pend.work"), vec!["A"]);
    }

    #[tokio::test]
    async fn server_error_promotes_queue_to_fail_at_max_retry() {
        let store = FakeQueueStore::new();
        let ts = Utc::now();
        let queue = names::retry_queue_name(ts, 9);
        store.seed(&queue, ["A".to_string()]);
        let uploader = FakeUploader::new();
        uploader.script(ScriptedResponse::Server {
            status: 500,
            body: "still down".to_string(),
        });
        let manager = RetryManager::new(store, uploader, 10, 10, 604_800);

        let result = manager.retry_all().await.unwrap();
        assert_eq!(result.errors.len(), 1);
        assert!(manager.store().snapshot(&queue).is_empty());

        let fail_queue = names::fail_queue_name(Utc::now());
        assert_eq!(manager.store().snapshot(&fail_queue), vec!["A"]);
    }

    #[tokio::test]
    async fn server_error_below_max_retry_bumps_attempt_suffix() {
        let store = FakeQueueStore::new();
        let ts = Utc::now();
        let queue = names::retry_queue_name(ts, 0);
        store.seed(&queue, ["A".to_string()]);
        let uploader = FakeUploader::new();
        uploader.script(ScriptedResponse::Server {
            status: 500,
            body: "down".to_string(),
        });
        let manager = RetryManager::new(store, uploader, 10, 10, 604_800);

        manager.retry_all().await.unwrap();

        assert!(manager.store().snapshot(&queue).is_empty());
        let (_, attempt) = names::parse_retry_queue(&names::retry_queue_with_attempt(&queue, 1).unwrap())
            .unwrap();
        assert_eq!(attempt, 1);
    }

    #[tokio::test]
    async fn transport_failure_stops_pass_leaving_later_queues_untouched() {
        let store = FakeQueueStore::new();
        let ts = Utc::now();
        let first = names::retry_queue_name(ts, 0);
        let second = names::retry_queue_name(ts + chrono::Duration::seconds(1), 0);
        store.seed(&first, ["A".to_string()]);
        store.seed(&second, ["B".to_string()]);
        let uploader = FakeUploader::new();
        uploader.script(ScriptedResponse::Transport("unreachable".to_string()));
        let manager = RetryManager::new(store, uploader, 10, 10, 604_800);

        let result = manager.retry_all().await.unwrap();
        assert_eq!(result.total, 0);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(manager.store().snapshot(&first), vec!["A"]);
        assert_eq!(manager.store().snapshot(&second), vec!["B"]);
    }

    #[tokio::test]
    async fn splay_factor_decreases_across_successful_queues() {
        let store = FakeQueueStore::new();
        let ts = Utc::now();
        for (i, entry) in ["A", "B", "C"].iter().enumerate() {
            let name = names::retry_queue_name(ts + chrono::Duration::seconds(i as i64), 0);
            store.seed(&name, [entry.to_string()]);
        }
        let uploader = FakeUploader::new();
        let manager = RetryManager::new(store, uploader.clone(), 10, 10, 604_800);

        manager.retry_all().await.unwrap();

        let splay_factors: Vec<u64> = uploader.calls().iter().map(|c| c.splay_factor).collect();
        assert_eq!(splay_factors, vec![3, 2, 1]);
    }
}
