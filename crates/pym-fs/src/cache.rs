//! Staging cache for uploaded content.
//!
//! Each cached file `<name>` has a JSON sidecar `<name>.json` with the
//! client's and the cache's view of its metadata. Both are written under an
//! exclusive advisory lock.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use pym_core::config::UploadConfig;
use pym_core::paths::{check_cache_path, is_path_safe};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mime::sniff;
use crate::sentry::FileMeta;

/// Extension of metadata sidecars.
pub const SIDECAR_EXT: &str = "json";

/// Bytes inspected to detect the mime-type.
const SNIFF_LEN: u64 = 8192;

/// Contents of a sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedMeta {
    /// Metadata as claimed by the client.
    pub client_meta: FileMeta,
    /// Metadata derived from the cached bytes.
    pub cache_meta: FileMeta,
    /// When the content was written.
    pub cached_at: DateTime<Utc>,
}

/// A directory of staged uploads.
#[derive(Debug, Clone)]
pub struct UploadCache {
    root: PathBuf,
    ttl: Duration,
    chunk_size: usize,
}

impl UploadCache {
    /// Open (and create) a cache below `root`.
    ///
    /// `root` must lie below `/tmp` or have at least three segments.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let defaults = UploadConfig::default();
        let root = root.into();
        check_cache_path(&root.to_string_lossy())?;
        fs::create_dir_all(&root).map_err(|e| Error::io(e, &root))?;
        Ok(Self {
            root,
            ttl: Duration::from_secs(defaults.ttl_secs),
            chunk_size: defaults.chunk_size,
        })
    }

    /// Open the cache described by the `[upload]` section.
    pub fn from_config(config: &UploadConfig) -> Result<Self> {
        Ok(Self::new(&config.cache_dir)?
            .with_ttl(Duration::from_secs(config.ttl_secs))
            .with_chunk_size(config.chunk_size))
    }

    /// Files older than this are purged.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Copy buffer size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Root directory.
    pub fn root_dir(&self) -> &Path {
        &self.root
    }

    /// Purge threshold.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// A fresh random cache file name.
    pub fn new_cache_filename() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Absolute path of `name`, which is relative to the root.
    pub fn build_path(&self, name: &str) -> Result<PathBuf> {
        is_path_safe(name)?;
        let path = self.root.join(name);
        check_cache_path(&path.to_string_lossy())?;
        Ok(path)
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let mut s = path.as_os_str().to_owned();
        s.push(".");
        s.push(SIDECAR_EXT);
        PathBuf::from(s)
    }

    /// Write `content` as `name` and its sidecar.
    ///
    /// `name` must be a base name and must not end in `.json`, which is
    /// reserved for sidecars. Without `overwrite` an existing file is a
    /// conflict ([`Error::Exists`]), detected atomically on creation. If the
    /// sidecar cannot be written, the content file is removed again. Returns
    /// the metadata derived from the written bytes.
    pub fn store(
        &self,
        name: &str,
        content: &mut dyn Read,
        client_meta: &FileMeta,
        overwrite: bool,
    ) -> Result<FileMeta> {
        let is_sidecar_name = name.ends_with(&format!(".{SIDECAR_EXT}"));
        if name.contains('/') || is_sidecar_name || is_path_safe(name).is_err() {
            return Err(Error::InvalidCacheName(name.to_string()));
        }
        let path = self.build_path(name)?;

        let file = open_for_write(&path, overwrite)?;
        if let Err(e) = self.write_locked(&file, content) {
            log::error!("Failed to write cache file {}: {e}", path.display());
            drop(file);
            if let Err(rm) = fs::remove_file(&path) {
                log::warn!("Could not remove partial cache file {}: {rm}", path.display());
            }
            return Err(Error::io(e, &path));
        }
        drop(file);

        let sidecar_path = Self::sidecar_path(&path);
        let cache_meta = match self.write_sidecar(name, &path, &sidecar_path, client_meta) {
            Ok(meta) => meta,
            Err(e) => {
                log::error!("Failed to write sidecar {}: {e}", sidecar_path.display());
                for p in [&sidecar_path, &path] {
                    match fs::remove_file(p) {
                        Ok(()) => {}
                        Err(rm) if rm.kind() == io::ErrorKind::NotFound => {}
                        Err(rm) => {
                            log::warn!("Could not remove partial cache file {}: {rm}", p.display())
                        }
                    }
                }
                return Err(e);
            }
        };

        log::debug!(
            "Cached '{}' as {} ({} bytes, {})",
            client_meta.filename,
            path.display(),
            cache_meta.size,
            cache_meta.mime_type
        );
        Ok(cache_meta)
    }

    fn write_sidecar(
        &self,
        name: &str,
        path: &Path,
        sidecar_path: &Path,
        client_meta: &FileMeta,
    ) -> Result<FileMeta> {
        let cache_meta = self.derive_meta(name, path, &client_meta.filename)?;
        let sidecar = CachedMeta {
            client_meta: client_meta.clone(),
            cache_meta: cache_meta.clone(),
            cached_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&sidecar)?;
        let file = open_for_write(sidecar_path, true)?;
        self.write_locked(&file, &mut json.as_slice())
            .map_err(|e| Error::io(e, sidecar_path))?;
        Ok(cache_meta)
    }

    fn write_locked(&self, file: &File, content: &mut dyn Read) -> io::Result<()> {
        file.lock_exclusive()?;
        let result = (|| -> io::Result<()> {
            file.set_len(0)?;
            let mut out = file;
            let mut buf = vec![0u8; self.chunk_size];
            loop {
                let n = content.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])?;
            }
            out.flush()
        })();
        FileExt::unlock(file)?;
        result
    }

    fn derive_meta(&self, name: &str, path: &Path, filename_hint: &str) -> Result<FileMeta> {
        let size = fs::metadata(path).map_err(|e| Error::io(e, path))?.len();
        let mut head = Vec::new();
        File::open(path)
            .and_then(|f| f.take(SNIFF_LEN).read_to_end(&mut head))
            .map_err(|e| Error::io(e, path))?;
        let (mime_type, encoding) = sniff(&head, filename_hint);
        Ok(FileMeta {
            filename: name.to_string(),
            size,
            mime_type,
            encoding,
        })
    }

    /// Open a cached file and read its sidecar.
    pub fn open(&self, name: &str) -> Result<(File, CachedMeta)> {
        let path = self.build_path(name)?;
        let sidecar_path = Self::sidecar_path(&path);
        let json = fs::read(&sidecar_path).map_err(|e| Error::io(e, &sidecar_path))?;
        let meta = serde_json::from_slice(&json)?;
        let file = File::open(&path).map_err(|e| Error::io(e, &path))?;
        Ok((file, meta))
    }

    /// Content of a cached file, at most `limit` bytes if given.
    pub fn read(&self, name: &str, limit: Option<u64>) -> Result<Vec<u8>> {
        let path = self.build_path(name)?;
        let file = File::open(&path).map_err(|e| Error::io(e, &path))?;
        let mut buf = Vec::new();
        match limit {
            Some(n) => file.take(n).read_to_end(&mut buf),
            None => (&file).read_to_end(&mut buf),
        }
        .map_err(|e| Error::io(e, &path))?;
        Ok(buf)
    }

    /// Remove a cached file and its sidecar. Missing files are ignored.
    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.build_path(name.trim_start_matches('/'))?;
        for p in [Self::sidecar_path(&path), path] {
            match fs::remove_file(&p) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(e, &p)),
            }
        }
        Ok(())
    }

    /// Remove files last modified more than `ttl` ago (default: the cache's
    /// own ttl). Returns how many were removed.
    pub fn purge(&self, ttl: Option<Duration>) -> Result<usize> {
        let ttl = ttl.unwrap_or(self.ttl);
        let threshold = SystemTime::now()
            .checked_sub(ttl)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let sidecar_suffix = format!(".{SIDECAR_EXT}");
        let mut removed = 0;
        let mut dirs = vec![self.root.clone()];
        while let Some(dir) = dirs.pop() {
            let entries = fs::read_dir(&dir).map_err(|e| Error::io(e, &dir))?;
            for entry in entries {
                let entry = entry.map_err(|e| Error::io(e, &dir))?;
                let path = entry.path();
                let meta = entry.metadata().map_err(|e| Error::io(e, &path))?;
                if meta.is_dir() {
                    dirs.push(path);
                    continue;
                }
                if path.to_string_lossy().ends_with(&sidecar_suffix) {
                    continue;
                }
                let modified = meta.modified().map_err(|e| Error::io(e, &path))?;
                if modified >= threshold {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                self.delete(&relative.to_string_lossy())?;
                removed += 1;
            }
        }
        if removed > 0 {
            log::info!("Purged {removed} file(s) from {}", self.root.display());
        }
        Ok(removed)
    }
}

fn open_for_write(path: &Path, overwrite: bool) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(false);
    } else {
        options.create_new(true);
    }
    options.open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::AlreadyExists {
            Error::Exists(path.to_path_buf())
        } else {
            Error::io(e, path)
        }
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use tempfile::TempDir;

    fn cache() -> (TempDir, UploadCache) {
        let dir = tempfile::Builder::new()
            .prefix("pym-cache")
            .tempdir_in("/tmp")
            .unwrap();
        let cache = UploadCache::new(dir.path()).unwrap();
        (dir, cache)
    }

    fn client(name: &str, size: u64) -> FileMeta {
        FileMeta {
            filename: name.into(),
            size,
            mime_type: "text/plain".into(),
            encoding: None,
        }
    }

    #[test]
    fn test_root_must_be_deep_or_tmp() {
        assert!(UploadCache::new("/home").is_err());
        assert!(UploadCache::new("/etc/pym").is_err());
    }

    #[test]
    fn test_store_open_read_delete() {
        let (_dir, cache) = cache();
        let mut content: &[u8] = b"hello cache";
        let meta = cache
            .store("abc", &mut content, &client("hello.txt", 11), false)
            .unwrap();
        assert_eq!(meta.filename, "abc");
        assert_eq!(meta.size, 11);
        assert_eq!(meta.mime_type, "text/plain");

        let (_file, sidecar) = cache.open("abc").unwrap();
        assert_eq!(sidecar.client_meta.filename, "hello.txt");
        assert_eq!(sidecar.cache_meta, meta);

        assert_eq!(cache.read("abc", Some(5)).unwrap(), b"hello");
        assert_eq!(cache.read("abc", None).unwrap(), b"hello cache");

        cache.delete("abc").unwrap();
        assert!(cache.read("abc", None).is_err());
        assert!(!cache.root_dir().join("abc.json").exists());
        // idempotent
        cache.delete("abc").unwrap();
    }

    #[test]
    fn test_existing_file_conflicts_unless_overwrite() {
        let (_dir, cache) = cache();
        cache
            .store("x", &mut &b"one"[..], &client("x", 3), false)
            .unwrap();
        let err = cache
            .store("x", &mut &b"two"[..], &client("x", 3), false)
            .unwrap_err();
        assert!(matches!(err, Error::Exists(_)));
        assert_eq!(cache.read("x", None).unwrap(), b"one");

        cache
            .store("x", &mut &b"2"[..], &client("x", 1), true)
            .unwrap();
        assert_eq!(cache.read("x", None).unwrap(), b"2");
    }

    #[test]
    fn test_cache_name_must_be_basename() {
        let (_dir, cache) = cache();
        for name in ["a/b", "../x", ""] {
            let err = cache
                .store(name, &mut &b""[..], &client("x", 0), false)
                .unwrap_err();
            assert!(matches!(err, Error::InvalidCacheName(_)), "{name}");
        }
    }

    #[test]
    fn test_sidecar_extension_is_reserved() {
        let (_dir, cache) = cache();
        let err = cache
            .store("x.json", &mut &b"{}"[..], &client("x.json", 2), false)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCacheName(_)));
        assert!(!cache.root_dir().join("x.json").exists());
    }

    #[test]
    fn test_failed_sidecar_leaves_nothing_behind() {
        let (_dir, cache) = cache();
        let blocker = cache.root_dir().join("x.json");
        fs::create_dir(&blocker).unwrap();
        assert!(
            cache
                .store("x", &mut &b"one"[..], &client("x", 3), false)
                .is_err()
        );
        assert!(!cache.root_dir().join("x").exists());

        fs::remove_dir(&blocker).unwrap();
        cache
            .store("x", &mut &b"one"[..], &client("x", 3), false)
            .unwrap();
        assert_eq!(cache.read("x", None).unwrap(), b"one");
    }

    #[test]
    fn test_concurrent_writers_same_name() {
        let (_dir, cache) = cache();
        let barrier = Arc::new(Barrier::new(4));
        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let cache = &cache;
                    let barrier = barrier.clone();
                    s.spawn(move || {
                        let body = format!("writer {i}");
                        barrier.wait();
                        cache.store("same", &mut body.as_bytes(), &client("same", 8), false)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok, 1);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| matches!(e, Error::Exists(_)))
        );
        let content = String::from_utf8(cache.read("same", None).unwrap()).unwrap();
        assert!(content.starts_with("writer "));
    }

    #[test]
    fn test_purge_removes_old_files_only() {
        let (_dir, cache) = cache();
        cache
            .store("old", &mut &b"1"[..], &client("old", 1), false)
            .unwrap();
        assert_eq!(cache.purge(Some(Duration::from_secs(3600))).unwrap(), 0);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.purge(Some(Duration::from_millis(1))).unwrap(), 1);
        assert!(!cache.root_dir().join("old").exists());
        assert!(!cache.root_dir().join("old.json").exists());
    }

    #[test]
    fn test_from_config() {
        let dir = tempfile::Builder::new().tempdir_in("/tmp").unwrap();
        let config = UploadConfig {
            cache_dir: dir.path().join("uploads"),
            ttl_secs: 60,
            chunk_size: 4,
        };
        let cache = UploadCache::from_config(&config).unwrap();
        assert!(cache.root_dir().is_dir());
        assert_eq!(cache.ttl(), Duration::from_secs(60));
        cache
            .store("c", &mut &b"chunked content"[..], &client("c", 15), false)
            .unwrap();
        assert_eq!(cache.read("c", None).unwrap(), b"chunked content");
    }
}
