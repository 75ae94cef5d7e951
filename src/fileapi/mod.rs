//! File API abstraction
//!
//! Uniform stat/get/put/delete/list/delta/mkdir operations over one remote
//! backend. Every call goes through a retry wrapper with bounded, increasing
//! backoff; target rejection and fail-safe aborts are never retried because
//! repeating them cannot change the outcome.

pub mod delta;
mod driver;
mod local_fs;
mod memory;
mod time_drift;

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

pub use delta::{basic_delta, DeltaContext, DeltaOptions, DeltaPage};
pub use driver::{FileApiDriver, RemoteObject};
pub use local_fs::LocalFsDriver;
pub use memory::MemoryDriver;
pub use time_drift::TimeDrift;

use crate::error::{CarnetError, Result};
use crate::types::{new_item_id, ItemId};

/// Remote work directory for temp uploads and probe objects
pub const SYNC_DIR: &str = ".sync";

/// Bounded increasing backoff for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts, for tests
    pub fn immediate() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn delay_for(&self, attempt: u32, error: &CarnetError) -> Duration {
        if let CarnetError::RateLimited(seconds) = error {
            return Duration::from_secs(*seconds).min(self.max_delay);
        }
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(10));
        let jitter_ms = if self.base_delay.is_zero() {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.base_delay.as_millis() as u64 / 2)
        };
        (exp + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

/// Backend-agnostic file operations for one sync target
pub struct FileApi {
    base_dir: String,
    driver: Arc<dyn FileApiDriver>,
    retry: RetryPolicy,
}

impl FileApi {
    pub fn new(driver: Arc<dyn FileApiDriver>, base_dir: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            driver,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn driver(&self) -> &Arc<dyn FileApiDriver> {
        &self.driver
    }

    fn full_path(&self, path: &str) -> String {
        if self.base_dir.is_empty() {
            path.to_string()
        } else if path.is_empty() {
            self.base_dir.clone()
        } else {
            format!("{}/{}", self.base_dir, path)
        }
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        let mut auth_refreshed = false;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(CarnetError::AuthExpired) if !auth_refreshed => {
                    tracing::warn!(op, "authentication expired, refreshing credentials");
                    self.driver.refresh_auth().await?;
                    auth_refreshed = true;
                }
                Err(err) if err.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt, &err);
                    tracing::warn!(
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Metadata for one object; `None` when it does not exist
    pub async fn stat(&self, path: &str) -> Result<Option<RemoteObject>> {
        let full = self.full_path(path);
        tracing::debug!(path = %full, "stat");
        let stat = self.with_retry("stat", || self.driver.stat(&full)).await?;
        // Callers work in target-relative paths
        Ok(stat.map(|mut s| {
            s.path = path.to_string();
            s
        }))
    }

    /// Object content; `None` when it does not exist
    pub async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let full = self.full_path(path);
        tracing::debug!(path = %full, "get");
        self.with_retry("get", || self.driver.get(&full)).await
    }

    pub async fn put(&self, path: &str, content: &[u8]) -> Result<()> {
        let full = self.full_path(path);
        tracing::debug!(path = %full, bytes = content.len(), "put");
        self.with_retry("put", || self.driver.put(&full, content))
            .await
    }

    /// Two-phase write: temp object, stamp it, then atomically move it over
    /// the real path. No reader ever observes a half-written object with a
    /// wrong timestamp.
    pub async fn put_atomic(&self, path: &str, content: &[u8], timestamp_ms: i64) -> Result<()> {
        let temp_path = format!("{SYNC_DIR}/upload_{}", new_item_id());
        self.put(&temp_path, content).await?;

        let staged = match self.set_timestamp(&temp_path, timestamp_ms).await {
            Ok(()) => self.move_file(&temp_path, path).await,
            Err(err) => Err(err),
        };
        if let Err(err) = staged {
            // Abandoned temp objects would pile up in the work directory
            if let Err(cleanup) = self.delete(&temp_path).await {
                tracing::warn!(path = %temp_path, error = %cleanup, "failed to remove stale upload");
            }
            return Err(err);
        }
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let full = self.full_path(path);
        tracing::debug!(path = %full, "delete");
        self.with_retry("delete", || self.driver.delete(&full))
            .await
    }

    /// Entries directly under `path`, hidden (dot-prefixed) names excluded
    pub async fn list(&self, path: &str) -> Result<Vec<RemoteObject>> {
        let full = self.full_path(path);
        tracing::debug!(path = %full, "list");
        let mut items = self.with_retry("list", || self.driver.list(&full)).await?;
        items.retain(|item| !item.path.starts_with('.'));
        Ok(items)
    }

    pub async fn mkdir(&self, path: &str) -> Result<()> {
        let full = self.full_path(path);
        tracing::debug!(path = %full, "mkdir");
        self.with_retry("mkdir", || self.driver.mkdir(&full)).await
    }

    pub async fn move_file(&self, old_path: &str, new_path: &str) -> Result<()> {
        let old_full = self.full_path(old_path);
        let new_full = self.full_path(new_path);
        tracing::debug!(from = %old_full, to = %new_full, "move");
        self.with_retry("move", || self.driver.move_file(&old_full, &new_full))
            .await
    }

    pub async fn set_timestamp(&self, path: &str, timestamp_ms: i64) -> Result<()> {
        let full = self.full_path(path);
        tracing::debug!(path = %full, timestamp_ms, "set_timestamp");
        self.with_retry("set_timestamp", || {
            self.driver.set_timestamp(&full, timestamp_ms)
        })
        .await
    }

    /// One page of changes since the context's checkpoint. Uses the native
    /// feed when the driver has one, else the basic delta algorithm over
    /// `list` and the caller-supplied known id set.
    pub async fn delta(
        &self,
        path: &str,
        context: Option<DeltaContext>,
        known_item_ids: &HashSet<ItemId>,
        options: &DeltaOptions,
    ) -> Result<DeltaPage> {
        tracing::debug!(path = %self.full_path(path), "delta");
        if self.driver.supports_delta() {
            let full = self.full_path(path);
            return self
                .with_retry("delta", || {
                    self.driver.delta(&full, context.clone(), known_item_ids)
                })
                .await;
        }

        let mut ctx = context.unwrap_or_default();
        if ctx.needs_listing() {
            ctx.prime(self.list(path).await?);
        }
        basic_delta(ctx, known_item_ids, options)
    }
}
