//! Cloud upload buffer: a store-and-forward queue for telemetry entries
//! produced on a device with intermittent connectivity.
//!
//! Entries are appended to a durable queue and later drained in batches by a
//! background worker, which uploads them over HTTPS and, on failure, moves
//! them through a family of retry queues before giving up into a dated fail
//! queue. See [`Orchestrator`] for the three drive entry points and
//! [`CacheConfig`] for tunables.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use cloud_cache::{CacheConfig, Orchestrator, RedisQueueStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CacheConfig::builder()
//!         .endpoint("https://ingest.example.com/batch", "secret-token")
//!         .build()?;
//!
//!     let store = RedisQueueStore::connect(&config.redis_url).await?;
//!     let orchestrator = Orchestrator::new(store, &config)?;
//!
//!     orchestrator.enqueue_raw(r#"{"reading":42}"#.to_string()).await?;
//!     orchestrator.upload_pending().await?;
//!
//!     Ok(())
//! }
//! ```

mod config;
mod engine;
mod error;
mod names;
mod orchestrator;
mod retry;
mod store;
mod uploader;

pub use config::{CacheConfig, CacheConfigBuilder, EndpointConfig};
pub use engine::{BatchEngine, BatchOutcome};
pub use error::{CacheError, UploadFailure};
pub use names::{
    fail_queue_name, is_fail_queue, is_retry_queue, parse_fail_queue_date, parse_retry_queue,
    retry_queue_name, retry_queue_with_attempt, FAIL_WORK_QUEUE, PENDING_QUEUE,
    PENDING_WORK_QUEUE,
};
pub use orchestrator::{DriveSummary, Orchestrator};
pub use retry::{RetryManager, RetryPassResult};
pub use store::{FakeQueueStore, QueueStore, RedisQueueStore};
pub use uploader::{FakeUploader, HttpUploader, RecordedUpload, ScriptedResponse, Uploader};
