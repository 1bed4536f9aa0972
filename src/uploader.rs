//! POST a batch of entries to the cloud endpoint; pacing and response
//! classification (§4.2).

use crate::config::EndpointConfig;
use crate::error::UploadFailure;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Ships a batch of entries somewhere and reports how it went.
///
/// Abstracted so `engine`/`retry`/`orchestrator` can be tested against a
/// scripted [`FakeUploader`] instead of a live endpoint, the same way they're
/// tested against a [`crate::store::FakeQueueStore`] instead of live Redis.
pub trait Uploader: Clone + Send + Sync {
    fn upload(
        &self,
        entries: &[String],
        splay_factor: u64,
    ) -> impl Future<Output = Result<(), UploadFailure>> + Send;
}

/// Uploads batches to a single configured HTTPS endpoint.
///
/// Cheap to clone: the `reqwest::Client` and the shared pacing timestamp are
/// both behind `Arc`, so producer-side and worker-side handles can each hold
/// their own handle without duplicating connections.
#[derive(Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    endpoint: Option<Arc<EndpointConfig>>,
    upload_splay: u64,
    last_upload: Arc<Mutex<Option<Instant>>>,
}

impl HttpUploader {
    pub fn new(
        endpoint: Option<EndpointConfig>,
        upload_splay: u64,
        request_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.map(Arc::new),
            upload_splay,
            last_upload: Arc::new(Mutex::new(None)),
        })
    }

    async fn pace(&self, splay_factor: u64) {
        if self.upload_splay == 0 {
            return;
        }
        let delay_secs = rand::thread_rng().gen_range(0..=self.upload_splay) * splay_factor;
        if delay_secs == 0 {
            return;
        }
        let delay = Duration::from_secs(delay_secs);

        let elapsed_since_last = self.last_upload.lock().as_ref().map(|t| t.elapsed());
        if let Some(elapsed) = elapsed_since_last {
            if elapsed < delay {
                debug!(?delay, "pacing before upload");
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn do_upload(
        &self,
        endpoint: &EndpointConfig,
        entries: &[String],
    ) -> Result<(), UploadFailure> {
        let body = format!("[{}]", entries.join(", "));

        let resp = self
            .client
            .post(&endpoint.url)
            .header("authorization", format!("token {}", endpoint.auth_token))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| UploadFailure::Transport(err.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            debug!(%status, "upload succeeded");
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        warn!(%status, "upload rejected by server");
        Err(UploadFailure::Server {
            status: status.as_u16(),
            body,
        })
    }
}

impl Uploader for HttpUploader {
    /// Upload `entries`, pacing the request by `splay_factor × uniform(0, upload_splay)`.
    ///
    /// The pacing timestamp is updated unconditionally before returning, even
    /// on failure, so a hammering caller still gets spread out.
    #[instrument(skip(self, entries), fields(count = entries.len(), splay_factor))]
    async fn upload(&self, entries: &[String], splay_factor: u64) -> Result<(), UploadFailure> {
        let Some(endpoint) = self.endpoint.clone() else {
            return Err(UploadFailure::Transport("no endpoint configured".into()));
        };

        self.pace(splay_factor).await;
        let result = self.do_upload(&endpoint, entries).await;
        *self.last_upload.lock() = Some(Instant::now());
        result
    }
}

/// Scripted outcome for one [`FakeUploader::upload`] call.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Success,
    Transport(String),
    Server { status: u16, body: String },
}

/// A recorded `upload` invocation, for scenario tests that assert on
/// `splay_factor` (§8 scenario 5) or on exact batch contents (§8 scenario 1).
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub entries: Vec<String>,
    pub splay_factor: u64,
}

/// Scripted `Uploader` used by the test suite (§8). Responses are consumed
/// in order; once exhausted, further calls succeed.
#[derive(Clone, Default)]
pub struct FakeUploader {
    responses: Arc<Mutex<VecDeque<ScriptedResponse>>>,
    calls: Arc<Mutex<Vec<RecordedUpload>>>,
}

impl FakeUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, response: ScriptedResponse) {
        self.responses.lock().push_back(response);
    }

    pub fn calls(&self) -> Vec<RecordedUpload> {
        self.calls.lock().clone()
    }
}

impl Uploader for FakeUploader {
    async fn upload(&self, entries: &[String], splay_factor: u64) -> Result<(), UploadFailure> {
        self.calls.lock().push(RecordedUpload {
            entries: entries.to_vec(),
            splay_factor,
        });

        match self.responses.lock().pop_front() {
            Some(ScriptedResponse::Success) | None => Ok(()),
            Some(ScriptedResponse::Transport(msg)) => Err(UploadFailure::Transport(msg)),
            Some(ScriptedResponse::Server { status, body }) => {
                Err(UploadFailure::Server { status, body })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> EndpointConfig {
        EndpointConfig {
            url: "http://127.0.0.1:9/unreachable".to_string(),
            auth_token: "secret".to_string(),
        }
    }

    #[tokio::test]
    async fn no_endpoint_is_transport_failure_without_network_attempt() {
        let uploader = HttpUploader::new(None, 0, Duration::from_secs(1)).unwrap();
        let err = uploader.upload(&["A".to_string()], 1).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_failure() {
        let uploader = HttpUploader::new(Some(endpoint()), 0, Duration::from_millis(200)).unwrap();
        let err = uploader.upload(&["A".to_string()], 1).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn fake_uploader_replays_scripted_responses_in_order() {
        let uploader = FakeUploader::new();
        uploader.script(ScriptedResponse::Server {
            status: 500,
            body: "oops".to_string(),
        });
        uploader.script(ScriptedResponse::Success);

        let first = uploader.upload(&["A".to_string()], 1).await;
        assert!(matches!(first, Err(UploadFailure::Server { status: 500, .. })));

        let second = uploader.upload(&["A".to_string()], 1).await;
        assert!(second.is_ok());

        assert_eq!(uploader.calls().len(), 2);
    }
}
