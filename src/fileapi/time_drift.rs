//! Remote clock offset estimation
//!
//! Conflict detection compares local clocks to timestamps stored remotely.
//! Writing a probe object and comparing its server-assigned timestamp to the
//! local send window gives a rough offset estimate. Best effort only; it
//! reduces spurious conflicts from drift but is not required for
//! correctness.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{FileApi, SYNC_DIR};
use crate::error::Result;
use crate::types::{new_item_id, now_ms};

const CACHE_TTL: Duration = Duration::from_secs(10 * 60);

/// Cached estimate of `remote_clock - local_clock` in milliseconds
pub struct TimeDrift {
    api: Arc<FileApi>,
    cached: Mutex<Option<(Instant, i64)>>,
}

impl TimeDrift {
    pub fn new(api: Arc<FileApi>) -> Self {
        Self {
            api,
            cached: Mutex::new(None),
        }
    }

    /// Offset estimate, refreshed when the cached value is stale
    pub async fn offset_ms(&self) -> Result<i64> {
        if let Some((measured_at, offset)) = *self.cached.lock() {
            if measured_at.elapsed() < CACHE_TTL {
                return Ok(offset);
            }
        }

        let probe_path = format!("{SYNC_DIR}/time_probe_{}", new_item_id());
        let sent_at = now_ms();
        self.api.put(&probe_path, b"").await?;
        let acked_at = now_ms();

        let stat = self.api.stat(&probe_path).await?;
        self.api.delete(&probe_path).await?;

        let offset = match stat {
            Some(stat) if stat.updated_time > 0 => stat.updated_time - (sent_at + acked_at) / 2,
            // Backend assigns no usable timestamp: assume no drift
            _ => 0,
        };

        *self.cached.lock() = Some((Instant::now(), offset));
        Ok(offset)
    }
}
