//! In-memory driver
//!
//! Backs tests and acts as the reference driver implementation. Supports
//! injecting transient failures and put rejections to exercise the retry
//! wrapper and the sync-disabled flow.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::delta::{DeltaContext, DeltaPage};
use super::driver::{FileApiDriver, RemoteObject};
use crate::error::{CarnetError, Result};
use crate::types::{now_ms, ItemId};

#[derive(Debug, Clone)]
struct MemoryFile {
    content: Vec<u8>,
    updated_time: i64,
}

#[derive(Default)]
struct MemoryState {
    files: HashMap<String, MemoryFile>,
    dirs: HashSet<String>,
    /// Issued timestamps are strictly increasing so two writes in the same
    /// millisecond still order deterministically
    clock: i64,
    transient_failures: u32,
    timestamp_failures: u32,
    reject_put_markers: Vec<String>,
    auth_expired: bool,
    deny_auth_refresh: bool,
    delta_cursor_invalid: bool,
}

impl MemoryState {
    fn touch(&mut self) -> i64 {
        self.clock = now_ms().max(self.clock + 1);
        self.clock
    }
}

/// In-memory backend
#[derive(Default)]
pub struct MemoryDriver {
    state: Mutex<MemoryState>,
    put_attempts: AtomicU64,
    auth_refreshes: AtomicU64,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` operations with a transient error
    pub fn inject_transient_failures(&self, n: u32) {
        self.state.lock().transient_failures = n;
    }

    /// Reject any put whose path or content contains the marker
    pub fn reject_puts_containing(&self, marker: &str) {
        self.state.lock().reject_put_markers.push(marker.to_string());
    }

    pub fn clear_put_rejections(&self) {
        self.state.lock().reject_put_markers.clear();
    }

    /// Fail the next `n` set_timestamp calls with a transient error
    pub fn inject_timestamp_failures(&self, n: u32) {
        self.state.lock().timestamp_failures = n;
    }

    /// Every operation fails with an auth error until credentials are
    /// refreshed
    pub fn expire_auth(&self) {
        self.state.lock().auth_expired = true;
    }

    /// Make credential refresh itself fail
    pub fn deny_auth_refresh(&self) {
        self.state.lock().deny_auth_refresh = true;
    }

    /// Number of successful credential refreshes
    pub fn auth_refreshes(&self) -> u64 {
        self.auth_refreshes.load(Ordering::Relaxed)
    }

    /// The next delta call reports its continuation token as invalid,
    /// the way backends do after pruning their change history
    pub fn invalidate_delta_cursor(&self) {
        self.state.lock().delta_cursor_invalid = true;
    }

    /// Number of put calls made, including rejected ones
    pub fn put_attempts(&self) -> u64 {
        self.put_attempts.load(Ordering::Relaxed)
    }

    /// Number of stored files, for assertions
    pub fn file_count(&self) -> usize {
        self.state.lock().files.len()
    }

    fn maybe_fail(state: &mut MemoryState) -> Result<()> {
        if state.auth_expired {
            return Err(CarnetError::AuthExpired);
        }
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(CarnetError::Transient(
                "injected transient failure".to_string(),
            ));
        }
        Ok(())
    }

    fn children<'a>(
        keys: impl Iterator<Item = &'a String>,
        dir: &str,
    ) -> Vec<(&'a String, String)> {
        keys.filter_map(|key| {
            let relative = if dir.is_empty() {
                key.as_str()
            } else {
                key.strip_prefix(dir)?.strip_prefix('/')?
            };
            if relative.is_empty() || relative.contains('/') {
                None
            } else {
                Some((key, relative.to_string()))
            }
        })
        .collect()
    }
}

#[async_trait]
impl FileApiDriver for MemoryDriver {
    async fn stat(&self, path: &str) -> Result<Option<RemoteObject>> {
        let mut state = self.state.lock();
        Self::maybe_fail(&mut state)?;
        if let Some(file) = state.files.get(path) {
            return Ok(Some(RemoteObject::file(path, file.updated_time)));
        }
        if state.dirs.contains(path) {
            return Ok(Some(RemoteObject {
                path: path.to_string(),
                updated_time: 0,
                is_dir: true,
                is_deleted: false,
            }));
        }
        Ok(None)
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock();
        Self::maybe_fail(&mut state)?;
        Ok(state.files.get(path).map(|file| file.content.clone()))
    }

    async fn put(&self, path: &str, content: &[u8]) -> Result<()> {
        self.put_attempts.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        Self::maybe_fail(&mut state)?;
        if state.reject_put_markers.iter().any(|marker| {
            path.contains(marker.as_str())
                || content
                    .windows(marker.len())
                    .any(|window| window == marker.as_bytes())
        }) {
            return Err(CarnetError::RejectedByTarget {
                path: path.to_string(),
                reason: "content rejected by target".to_string(),
            });
        }
        let updated_time = state.touch();
        state.files.insert(
            path.to_string(),
            MemoryFile {
                content: content.to_vec(),
                updated_time,
            },
        );
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::maybe_fail(&mut state)?;
        state.files.remove(path);
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<RemoteObject>> {
        let mut state = self.state.lock();
        Self::maybe_fail(&mut state)?;

        let mut items: Vec<RemoteObject> = Self::children(state.files.keys(), path)
            .into_iter()
            .map(|(key, relative)| RemoteObject::file(relative, state.files[key].updated_time))
            .collect();
        items.extend(
            Self::children(state.dirs.iter(), path)
                .into_iter()
                .map(|(_, relative)| RemoteObject {
                    path: relative,
                    updated_time: 0,
                    is_dir: true,
                    is_deleted: false,
                }),
        );
        Ok(items)
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::maybe_fail(&mut state)?;
        if !path.is_empty() {
            state.dirs.insert(path.to_string());
        }
        Ok(())
    }

    async fn move_file(&self, old_path: &str, new_path: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::maybe_fail(&mut state)?;
        match state.files.remove(old_path) {
            Some(file) => {
                state.files.insert(new_path.to_string(), file);
                Ok(())
            }
            None => Err(CarnetError::Sync(format!(
                "move: no such file: {old_path}"
            ))),
        }
    }

    async fn set_timestamp(&self, path: &str, timestamp_ms: i64) -> Result<()> {
        let mut state = self.state.lock();
        Self::maybe_fail(&mut state)?;
        if state.timestamp_failures > 0 {
            state.timestamp_failures -= 1;
            return Err(CarnetError::Transient(
                "injected timestamp failure".to_string(),
            ));
        }
        match state.files.get_mut(path) {
            Some(file) => {
                file.updated_time = timestamp_ms;
                Ok(())
            }
            None => Err(CarnetError::Sync(format!(
                "set_timestamp: no such file: {path}"
            ))),
        }
    }

    fn supports_delta(&self) -> bool {
        // Only claimed while an invalidated cursor is staged, to exercise
        // the resync path; otherwise the basic algorithm drives pulls
        self.state.lock().delta_cursor_invalid
    }

    async fn delta(
        &self,
        _path: &str,
        _context: Option<DeltaContext>,
        _known_item_ids: &HashSet<ItemId>,
    ) -> Result<DeltaPage> {
        let mut state = self.state.lock();
        if state.delta_cursor_invalid {
            state.delta_cursor_invalid = false;
            return Err(CarnetError::ResyncRequired(
                "continuation token is no longer valid".to_string(),
            ));
        }
        Err(CarnetError::Sync("no native delta feed".to_string()))
    }

    async fn refresh_auth(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.deny_auth_refresh {
            return Err(CarnetError::AuthExpired);
        }
        state.auth_expired = false;
        self.auth_refreshes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timestamps_strictly_increase() {
        let driver = MemoryDriver::new();
        driver.put("a", b"1").await.unwrap();
        driver.put("b", b"2").await.unwrap();
        let a = driver.stat("a").await.unwrap().unwrap();
        let b = driver.stat("b").await.unwrap().unwrap();
        assert!(b.updated_time > a.updated_time);
    }

    #[tokio::test]
    async fn list_is_not_recursive() {
        let driver = MemoryDriver::new();
        driver.mkdir("sub").await.unwrap();
        driver.put("top.json", b"").await.unwrap();
        driver.put("sub/inner.json", b"").await.unwrap();

        let root = driver.list("").await.unwrap();
        let names: Vec<&str> = root.iter().map(|o| o.path.as_str()).collect();
        assert!(names.contains(&"top.json"));
        assert!(names.contains(&"sub"));
        assert!(!names.contains(&"sub/inner.json"));

        let sub = driver.list("sub").await.unwrap();
        assert_eq!(sub.len(), 1);
        assert_eq!(sub[0].path, "inner.json");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let driver = MemoryDriver::new();
        driver.delete("ghost").await.unwrap();
    }
}
