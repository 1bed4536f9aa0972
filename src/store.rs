//! Durable list primitives + the atomic batched move (§4.1).

use crate::error::CacheError;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Lua script backing [`QueueStore::dequeue_batch`] (§4.1.1).
///
/// Based on `cloud_cache.py`'s `DEQUEUE_BATCH_LUA`: if the destination
/// already holds a batch (crash recovery), return it untouched; otherwise
/// move up to `n` entries tail-to-head from source to destination one at a
/// time, so a crash mid-loop leaves every entry in either queue, never
/// neither. Both branches return the destination's contents via a final
/// `LRANGE` rather than the move loop's own accumulator, so a fresh move and
/// a resumed one are read back identically.
const DEQUEUE_BATCH_LUA: &str = r#"
if redis.call('EXISTS', KEYS[2]) == 0 and redis.call('EXISTS', KEYS[1]) == 1 then
    for i = 1, tonumber(ARGV[1]) do
        local val = redis.call('RPOPLPUSH', KEYS[1], KEYS[2])
        if not val then
            break
        end
    end
end
return redis.call('LRANGE', KEYS[2], 0, -1)
"#;

/// Durable list primitives the worker needs, abstracted over the backing
/// store so the queue-state-machine logic in `engine`/`retry`/`orchestrator`
/// can be tested against an in-memory fake.
pub trait QueueStore: Send + Sync {
    fn append_head(
        &self,
        queue: &str,
        entry: String,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn range(
        &self,
        queue: &str,
        start: isize,
        stop: isize,
    ) -> impl Future<Output = Result<Vec<String>, CacheError>> + Send;

    fn delete(&self, queue: &str) -> impl Future<Output = Result<bool, CacheError>> + Send;

    /// List queue names matching a glob `pattern`, sorted ascending.
    fn list(&self, pattern: &str) -> impl Future<Output = Result<Vec<String>, CacheError>> + Send;

    /// Atomic rename; succeeds only if `dst` doesn't already exist.
    fn rename_if_absent(
        &self,
        src: &str,
        dst: &str,
    ) -> impl Future<Output = Result<bool, CacheError>> + Send;

    /// Prepend `entries` to `fail_queue`, set its TTL, delete `retry_queue` —
    /// all in one atomic unit.
    fn atomic_push_expire_delete(
        &self,
        fail_queue: &str,
        entries: &[String],
        ttl: u64,
        retry_queue: &str,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// The critical primitive (§4.1.1).
    fn dequeue_batch(
        &self,
        source: &str,
        destination: &str,
        n: usize,
    ) -> impl Future<Output = Result<Vec<String>, CacheError>> + Send;
}

/// Redis-backed [`QueueStore`].
///
/// Holds a multiplexed async connection, which is cheap to clone and safe
/// to share across the producer side (`enqueue`) and the worker, since the
/// `redis` crate pipelines concurrent callers over the same connection.
#[derive(Clone)]
pub struct RedisQueueStore {
    conn: MultiplexedConnection,
    dequeue_batch_script: Script,
}

impl RedisQueueStore {
    /// Connect and register the `dequeue_batch` Lua script.
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url).map_err(CacheError::Store)?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(CacheError::Store)?;

        debug!("connected to redis and loaded dequeue_batch script");

        Ok(Self {
            conn,
            dequeue_batch_script: Script::new(DEQUEUE_BATCH_LUA),
        })
    }
}

impl QueueStore for RedisQueueStore {
    async fn append_head(&self, queue: &str, entry: String) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(queue, entry).await.map_err(CacheError::Store)?;
        Ok(())
    }

    async fn range(&self, queue: &str, start: isize, stop: isize) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let entries: Vec<String> = conn
            .lrange(queue, start as isize, stop as isize)
            .await
            .map_err(CacheError::Store)?;
        Ok(entries)
    }

    async fn delete(&self, queue: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let existed: i64 = conn.del(queue).await.map_err(CacheError::Store)?;
        Ok(existed > 0)
    }

    async fn list(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let mut names: Vec<String> = conn.keys(pattern).await.map_err(CacheError::Store)?;
        names.sort();
        Ok(names)
    }

    async fn rename_if_absent(&self, src: &str, dst: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let renamed: bool = conn.rename_nx(src, dst).await.map_err(CacheError::Store)?;
        Ok(renamed)
    }

    async fn atomic_push_expire_delete(
        &self,
        fail_queue: &str,
        entries: &[String],
        ttl: u64,
        retry_queue: &str,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .lpush(fail_queue, entries)
            .ignore()
            .expire(fail_queue, ttl as i64)
            .ignore()
            .del(retry_queue)
            .ignore();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(CacheError::Store)?;
        Ok(())
    }

    async fn dequeue_batch(
        &self,
        source: &str,
        destination: &str,
        n: usize,
    ) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let entries: Vec<String> = self
            .dequeue_batch_script
            .key(source)
            .key(destination)
            .arg(n)
            .invoke_async(&mut conn)
            .await
            .map_err(CacheError::Store)?;
        Ok(entries)
    }
}

/// In-memory fake used by the test suite (§8). Single `Mutex`-guarded map of
/// `VecDeque`s, since the worker is single-threaded by contract (§5) — no
/// need for the sharded-map concurrency of a real multi-writer store.
///
/// The map lives behind an `Arc` so cloning a handle (as `Orchestrator` does
/// for its `BatchEngine`/`RetryManager` collaborators) shares one backing
/// store, the same way cloning a `RedisQueueStore` shares one connection.
#[derive(Clone, Default)]
pub struct FakeQueueStore {
    queues: Arc<Mutex<HashMap<String, VecDeque<String>>>>,
}

impl FakeQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: current contents of `queue`, head to tail.
    pub fn snapshot(&self, queue: &str) -> Vec<String> {
        self.queues
            .lock()
            .unwrap()
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Test helper: seed a queue as if `entries` had been `append_head`ed in
    /// that order (each one pushed to the head, so the first entry ends up
    /// at the tail).
    pub fn seed(&self, queue: &str, entries: impl IntoIterator<Item = String>) {
        let mut guard = self.queues.lock().unwrap();
        let q = guard.entry(queue.to_string()).or_default();
        for entry in entries {
            q.push_front(entry);
        }
    }
}

impl QueueStore for FakeQueueStore {
    async fn append_head(&self, queue: &str, entry: String) -> Result<(), CacheError> {
        self.queues
            .lock()
            .unwrap()
            .entry(queue.to_string())
            .or_default()
            .push_front(entry);
        Ok(())
    }

    async fn range(&self, queue: &str, start: isize, stop: isize) -> Result<Vec<String>, CacheError> {
        let guard = self.queues.lock().unwrap();
        let Some(q) = guard.get(queue) else {
            return Ok(Vec::new());
        };
        let len = q.len() as isize;
        let resolve = |idx: isize| -> isize {
            if idx < 0 {
                (len + idx).max(0)
            } else {
                idx.min(len)
            }
        };
        let start = resolve(start);
        let stop = if stop < 0 { (len + stop).max(-1) } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Ok(Vec::new());
        }
        Ok(q.iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    async fn delete(&self, queue: &str) -> Result<bool, CacheError> {
        Ok(self.queues.lock().unwrap().remove(queue).is_some())
    }

    async fn list(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let guard = self.queues.lock().unwrap();
        let mut names: Vec<String> = guard
            .iter()
            .filter(|(name, contents)| !contents.is_empty() && glob_match(pattern, name))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn rename_if_absent(&self, src: &str, dst: &str) -> Result<bool, CacheError> {
        let mut guard = self.queues.lock().unwrap();
        if guard.contains_key(dst) {
            return Ok(false);
        }
        if let Some(contents) = guard.remove(src) {
            guard.insert(dst.to_string(), contents);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn atomic_push_expire_delete(
        &self,
        fail_queue: &str,
        entries: &[String],
        _ttl: u64,
        retry_queue: &str,
    ) -> Result<(), CacheError> {
        let mut guard = self.queues.lock().unwrap();
        let fail = guard.entry(fail_queue.to_string()).or_default();
        for entry in entries {
            fail.push_front(entry.clone());
        }
        guard.remove(retry_queue);
        Ok(())
    }

    async fn dequeue_batch(
        &self,
        source: &str,
        destination: &str,
        n: usize,
    ) -> Result<Vec<String>, CacheError> {
        let mut guard = self.queues.lock().unwrap();

        let destination_is_empty = guard.get(destination).map(|q| q.is_empty()).unwrap_or(true);
        if destination_is_empty {
            if let Some(src) = guard.get_mut(source) {
                let mut moved = Vec::with_capacity(n);
                for _ in 0..n {
                    let Some(entry) = src.pop_back() else {
                        break;
                    };
                    moved.push(entry);
                }
                if src.is_empty() {
                    guard.remove(source);
                }
                let dest = guard.entry(destination.to_string()).or_default();
                for entry in moved {
                    dest.push_front(entry);
                }
            }
        }

        Ok(guard
            .get(destination)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default())
    }
}

/// Minimal glob matcher supporting a single trailing `*`, which is all the
/// name grammar in §3 needs (`retr_*`, `fail_*`).
fn glob_match(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => candidate.starts_with(prefix),
        None => candidate == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dequeue_batch_moves_tail_to_head() {
        let store = FakeQueueStore::new();
        // Simulates append_head("A") then append_head("B") then append_head("C"):
        // head is C, tail is A.
        store.seed("pend", ["A".to_string(), "B".to_string(), "C".to_string()]);
        let batch = store.dequeue_batch("pend", "pend.work", 100).await.unwrap();
        assert_eq!(batch, vec!["C", "B", "A"]);
        assert!(store.snapshot("pend").is_empty());
        assert_eq!(store.snapshot("pend.work"), vec!["C", "B", "A"]);
    }

    #[tokio::test]
    async fn dequeue_batch_resumes_from_existing_work_queue() {
        let store = FakeQueueStore::new();
        store.seed("pend", ["new".to_string()]);
        store.seed("pend.work", ["stale".to_string()]);
        let batch = store.dequeue_batch("pend", "pend.work", 100).await.unwrap();
        assert_eq!(batch, vec!["stale"]);
        // source untouched
        assert_eq!(store.snapshot("pend"), vec!["new"]);
    }

    #[tokio::test]
    async fn dequeue_batch_respects_n() {
        let store = FakeQueueStore::new();
        store.seed("pend", ["A".to_string(), "B".to_string(), "C".to_string()]);
        let batch = store.dequeue_batch("pend", "pend.work", 2).await.unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn rename_if_absent_fails_on_collision() {
        let store = FakeQueueStore::new();
        store.seed("a", ["x".to_string()]);
        store.seed("b", ["y".to_string()]);
        assert!(!store.rename_if_absent("a", "b").await.unwrap());
        assert_eq!(store.snapshot("a"), vec!["x"]);
    }

    #[tokio::test]
    async fn list_matches_glob_prefix() {
        let store = FakeQueueStore::new();
        store.seed("retr_1_#0", ["x".to_string()]);
        store.seed("retr_2_#0", ["y".to_string()]);
        store.seed("pend", ["z".to_string()]);
        let mut names = store.list("retr_*").await.unwrap();
        names.sort();
        assert_eq!(names, vec!["retr_1_#0", "retr_2_#0"]);
    }
}
