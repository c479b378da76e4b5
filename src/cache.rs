//! On-disk cache for catalog lookups: a write-then-rename, naively
//! file-named key/value store. Not on the critical path — a hint only.
//!
//! Each entry is a file named `{expire_epoch}~{stream_id}` holding a JSON
//! object `{"info": ..., "streams": [...]}`. A file is valid as long as
//! `now < expire_epoch`.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use fs_err as fs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::VideoInfo;
use crate::error::{RewindError, Result};
use crate::representation::Representation;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheItem {
    pub info: VideoInfo,
    pub streams: Vec<Representation>,
}

fn now_epoch() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn find_cached_item_paths(key: &str, cache_directory: &Path) -> Result<Vec<PathBuf>> {
    if !cache_directory.exists() {
        return Ok(Vec::new());
    }
    let suffix = format!("~{key}");
    let mut paths: Vec<PathBuf> = fs::read_dir(cache_directory)
        .map_err(|e| RewindError::io(e, cache_directory))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(&suffix))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

fn expire_epoch_of(path: &Path) -> Option<u64> {
    path.file_name()?.to_str()?.split('~').next()?.parse().ok()
}

fn is_expired(path: &Path) -> bool {
    match expire_epoch_of(path) {
        Some(expires_at) => now_epoch() >= expires_at,
        None => true,
    }
}

/// Reads the freshest cache entry for `key`, deleting any stale duplicates
/// found along the way and the entry itself if it has expired.
#[tracing::instrument(level = "debug", skip(cache_directory))]
pub fn read_from_cache(key: &str, cache_directory: &Path) -> Result<Option<CacheItem>> {
    let mut paths = find_cached_item_paths(key, cache_directory)?;
    let Some(latest) = paths.pop() else {
        return Ok(None);
    };
    for stale in paths {
        let _ = fs::remove_file(&stale);
    }

    if is_expired(&latest) {
        debug!(?latest, "found expired cached item");
        let _ = fs::remove_file(&latest);
        return Ok(None);
    }

    let content = fs::read_to_string(&latest).map_err(|e| RewindError::io(e, &latest))?;
    let item: CacheItem = serde_json::from_str(&content)
        .map_err(|e| RewindError::Protocol(format!("corrupt cache entry {}: {e}", latest.display())))?;
    debug!(?latest, "found unexpired cached item");
    Ok(Some(item))
}

/// Writes `item` under `key`, expiring at `expires_at` (UNIX epoch seconds).
/// Existing entries for `key` (expired or not) are removed first. The write
/// itself is atomic: a temp file is written, then renamed into place.
#[tracing::instrument(level = "debug", skip(item, cache_directory))]
pub fn write_to_cache(key: &str, expires_at: u64, item: &CacheItem, cache_directory: &Path) -> Result<()> {
    fs::create_dir_all(cache_directory).map_err(|e| RewindError::io(e, cache_directory))?;
    for old in find_cached_item_paths(key, cache_directory)? {
        let _ = fs::remove_file(&old);
    }
    let final_path = cache_directory.join(format!("{expires_at}~{key}"));
    let tmp_path = cache_directory.join(format!(".{expires_at}~{key}.tmp"));
    let serialized = serde_json::to_string(item)
        .map_err(|e| RewindError::Protocol(format!("failed to serialize cache entry: {e}")))?;
    fs::write(&tmp_path, serialized).map_err(|e| RewindError::io(e, &tmp_path))?;
    fs::rename(&tmp_path, &final_path).map_err(|e| RewindError::io(e, &final_path))?;
    debug!(path = %final_path.display(), "new cache item has been created");
    Ok(())
}

/// Garbage-collects expired entries across all keys. Entries are visited in
/// filename order (ascending expiry), so the scan stops at the first
/// unexpired entry.
#[tracing::instrument(level = "debug", skip(cache_directory))]
pub fn remove_expired_cache_items(cache_directory: &Path) -> Result<()> {
    if !cache_directory.exists() {
        return Ok(());
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(cache_directory)
        .map_err(|e| RewindError::io(e, cache_directory))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.contains('~') && !n.starts_with('.'))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    for path in paths {
        if is_expired(&path) {
            let _ = fs::remove_file(&path);
        } else {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::BroadcastStatus;

    fn sample_item() -> CacheItem {
        CacheItem {
            info: VideoInfo {
                url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".into(),
                title: "title".into(),
                author: "author".into(),
                status: BroadcastStatus::Active,
                dash_manifest_url: None,
            },
            streams: Vec::new(),
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let far_future = now_epoch() + 3600;
        write_to_cache("dQw4w9WgXcQ", far_future, &sample_item(), dir.path()).unwrap();
        let read = read_from_cache("dQw4w9WgXcQ", dir.path()).unwrap();
        assert!(read.is_some());
        assert_eq!(read.unwrap().info.title, "title");
    }

    #[test]
    fn expired_entry_is_not_returned_and_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        write_to_cache("dQw4w9WgXcQ", 1, &sample_item(), dir.path()).unwrap();
        let read = read_from_cache("dQw4w9WgXcQ", dir.path()).unwrap();
        assert!(read.is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_key_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_from_cache("nonexistent", dir.path()).unwrap().is_none());
    }

    #[test]
    fn write_removes_prior_entries_for_same_key() {
        let dir = tempfile::tempdir().unwrap();
        write_to_cache("dQw4w9WgXcQ", 1, &sample_item(), dir.path()).unwrap();
        write_to_cache("dQw4w9WgXcQ", now_epoch() + 3600, &sample_item(), dir.path()).unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
