//! Local filesystem driver
//!
//! Treats a directory tree as the sync target. Useful on its own (sync to a
//! mounted network share) and as the reference for cloud driver authors.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use filetime::FileTime;

use super::driver::{FileApiDriver, RemoteObject};
use crate::error::{CarnetError, Result};

/// Filesystem-backed sync target rooted at a directory
pub struct LocalFsDriver {
    root: PathBuf,
}

impl LocalFsDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }
}

fn mtime_ms(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

fn stat_object(path: &str, metadata: &std::fs::Metadata) -> RemoteObject {
    RemoteObject {
        path: path.to_string(),
        updated_time: mtime_ms(metadata),
        is_dir: metadata.is_dir(),
        is_deleted: false,
    }
}

#[async_trait]
impl FileApiDriver for LocalFsDriver {
    async fn stat(&self, path: &str) -> Result<Option<RemoteObject>> {
        match tokio::fs::metadata(self.resolve(path)).await {
            Ok(metadata) => Ok(Some(stat_object(path, &metadata))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.resolve(path)).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, path: &str, content: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(full, content).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match tokio::fs::remove_file(self.resolve(path)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<RemoteObject>> {
        let dir = self.resolve(path);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let metadata = entry.metadata().await?;
            items.push(stat_object(&name, &metadata));
        }
        Ok(items)
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.resolve(path)).await?;
        Ok(())
    }

    async fn move_file(&self, old_path: &str, new_path: &str) -> Result<()> {
        tokio::fs::rename(self.resolve(old_path), self.resolve(new_path)).await?;
        Ok(())
    }

    async fn set_timestamp(&self, path: &str, timestamp_ms: i64) -> Result<()> {
        let full = self.resolve(path);
        let mtime = FileTime::from_unix_time(
            timestamp_ms.div_euclid(1000),
            (timestamp_ms.rem_euclid(1000) * 1_000_000) as u32,
        );
        tokio::task::spawn_blocking(move || filetime::set_file_mtime(&full, mtime))
            .await
            .map_err(|err| CarnetError::Sync(format!("set_timestamp task failed: {err}")))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_with_timestamp() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = LocalFsDriver::new(tmp.path());

        driver.put("a.json", b"{}").await.unwrap();
        driver.set_timestamp("a.json", 1_500_000_000_123).await.unwrap();

        let stat = driver.stat("a.json").await.unwrap().unwrap();
        assert!(!stat.is_dir);
        assert_eq!(stat.updated_time, 1_500_000_000_123);
        assert_eq!(driver.get("a.json").await.unwrap().unwrap(), b"{}");
    }

    #[tokio::test]
    async fn missing_paths_are_none() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = LocalFsDriver::new(tmp.path());
        assert!(driver.stat("nope").await.unwrap().is_none());
        assert!(driver.get("nope").await.unwrap().is_none());
        driver.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn rename_preserves_timestamp() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = LocalFsDriver::new(tmp.path());

        driver.mkdir(".sync").await.unwrap();
        driver.put(".sync/tmp", b"x").await.unwrap();
        driver.set_timestamp(".sync/tmp", 42_000).await.unwrap();
        driver.move_file(".sync/tmp", "final.json").await.unwrap();

        let stat = driver.stat("final.json").await.unwrap().unwrap();
        assert_eq!(stat.updated_time, 42_000);
    }
}
