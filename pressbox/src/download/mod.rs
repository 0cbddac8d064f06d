//! Download cache with atomic publication.
//!
//! ```text
//! <cache>/
//!   <key>            complete entry
//!   <key>.partial    transfer in progress, never read
//! ```
//!
//! A transfer streams into `<key>.partial` and is renamed to `<key>` only
//! once the whole body is on disk, so a crash never leaves a truncated file
//! under the final name. Entries are never revalidated against the remote.

mod fetcher;

pub use fetcher::{ByteStream, Fetcher, HttpFetcher};

use crate::lock::FileLockManager;
use futures::StreamExt;
use pressbox_shared::{PressboxError, PressboxResult};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

const PARTIAL_SUFFIX: &str = ".partial";

/// Handle to a complete cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    pub path: PathBuf,
    /// File name, defaults to the cache key.
    pub name: String,
}

impl CachedFile {
    pub async fn read(&self) -> PressboxResult<Vec<u8>> {
        tokio::fs::read(&self.path).await.map_err(|e| {
            PressboxError::Storage(format!("cannot read {}: {}", self.path.display(), e))
        })
    }
}

/// Cache-key locking across processes sharing one cache directory.
#[derive(Clone)]
struct KeyLocks {
    manager: Arc<FileLockManager>,
    dir: PathBuf,
}

#[derive(Clone)]
pub struct CachedDownloader {
    cache_dir: PathBuf,
    fetcher: Arc<dyn Fetcher>,
    locks: Option<KeyLocks>,
    timeout: Option<Duration>,
}

impl CachedDownloader {
    pub fn new(cache_dir: impl Into<PathBuf>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            fetcher,
            locks: None,
            timeout: None,
        }
    }

    /// Hold an exclusive lock on `<locks_dir>/<key>.lock` around each
    /// check-and-download.
    pub fn with_locks(mut self, manager: Arc<FileLockManager>, locks_dir: PathBuf) -> Self {
        self.locks = Some(KeyLocks {
            manager,
            dir: locks_dir,
        });
        self
    }

    /// Bound each transfer. `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Complete entry for `key`, without touching the network.
    pub fn cached(&self, key: &str) -> PressboxResult<Option<CachedFile>> {
        validate_key(key)?;
        let path = self.cache_dir.join(key);
        Ok(path.is_file().then(|| CachedFile {
            path,
            name: key.to_string(),
        }))
    }

    /// Return the entry for `key`, downloading `url` into it first if needed.
    pub async fn fetch(&self, url: &str, key: &str) -> PressboxResult<CachedFile> {
        validate_key(key)?;

        let _guard = match &self.locks {
            Some(locks) => Some(
                locks
                    .manager
                    .acquire(&locks.dir.join(format!("{}.lock", key)), true)
                    .await?,
            ),
            None => None,
        };

        if let Some(file) = self.cached(key)? {
            tracing::debug!(key, "Cache hit");
            return Ok(file);
        }

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| {
                PressboxError::Download(format!(
                    "cannot create cache directory {}: {}",
                    self.cache_dir.display(),
                    e
                ))
            })?;

        let path = self.cache_dir.join(key);
        let partial = self.cache_dir.join(format!("{}{}", key, PARTIAL_SUFFIX));
        let started = Instant::now();
        tracing::info!(url, key, "Downloading");

        let transfer = self.download_to(url, &partial);
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, transfer).await {
                Ok(result) => result,
                Err(_) => Err(PressboxError::Download(format!(
                    "{}: timed out after {:?}",
                    url, limit
                ))),
            },
            None => transfer.await,
        };

        let result = match result {
            Ok(bytes) => tokio::fs::rename(&partial, &path)
                .await
                .map(|_| bytes)
                .map_err(|e| PressboxError::Download(format!("cannot publish {}: {}", key, e))),
            Err(e) => Err(e),
        };

        match result {
            Ok(bytes) => {
                tracing::info!(
                    key,
                    bytes,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Download cached"
                );
                Ok(CachedFile {
                    path,
                    name: key.to_string(),
                })
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                tracing::warn!(url, key, "Download failed: {}", e);
                Err(e)
            }
        }
    }

    async fn download_to(&self, url: &str, partial: &Path) -> PressboxResult<u64> {
        let mut stream = self.fetcher.open(url).await?;

        let write_err = |e: std::io::Error| {
            PressboxError::Download(format!("cannot write {}: {}", partial.display(), e))
        };
        let mut file = tokio::fs::File::create(partial).await.map_err(write_err)?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| match e {
                PressboxError::Download(_) => e,
                other => PressboxError::Download(other.to_string()),
            })?;
            file.write_all(&chunk).await.map_err(write_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        Ok(written)
    }
}

fn validate_key(key: &str) -> PressboxResult<()> {
    let valid = !key.is_empty()
        && key != "."
        && key != ".."
        && !key.contains(['/', '\\'])
        && !key.ends_with(PARTIAL_SUFFIX);
    if valid {
        Ok(())
    } else {
        Err(PressboxError::Config(format!("invalid cache key '{}'", key)))
    }
}

/// Stable cache key for a URL: a short digest of the URL plus its file name.
pub fn cache_key_for(url: &str) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    let name = url
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("download");
    format!("{}-{}", &digest[..16], name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        opened: AtomicUsize,
        chunks: Vec<&'static [u8]>,
        fail_after: Option<usize>,
        stall_after: Option<usize>,
    }

    impl CountingFetcher {
        fn new(chunks: Vec<&'static [u8]>) -> Self {
            Self {
                opened: AtomicUsize::new(0),
                chunks,
                fail_after: None,
                stall_after: None,
            }
        }

        fn stalling_after(chunks: Vec<&'static [u8]>, n: usize) -> Self {
            Self {
                stall_after: Some(n),
                ..Self::new(chunks)
            }
        }

        fn failing_after(chunks: Vec<&'static [u8]>, n: usize) -> Self {
            Self {
                fail_after: Some(n),
                ..Self::new(chunks)
            }
        }
    }

    #[async_trait]
    impl Fetcher for CountingFetcher {
        async fn open(&self, _url: &str) -> PressboxResult<ByteStream> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let mut items: Vec<PressboxResult<Vec<u8>>> =
                self.chunks.iter().map(|c| Ok(c.to_vec())).collect();
            if let Some(n) = self.fail_after {
                items.truncate(n);
                items.push(Err(PressboxError::Transport("connection reset".into())));
            }
            if let Some(n) = self.stall_after {
                items.truncate(n);
                return Ok(stream::iter(items).chain(stream::pending()).boxed());
            }
            Ok(stream::iter(items).boxed())
        }
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|rd| {
                rd.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_second_fetch_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        let fetcher = Arc::new(CountingFetcher::new(vec![b"hello ", b"world"]));
        let downloader = CachedDownloader::new(&cache, fetcher.clone());

        let first = downloader.fetch("https://example.org/a.tar.gz", "k").await.unwrap();
        assert_eq!(entries(&cache), vec!["k"]);

        let second = downloader.fetch("https://example.org/a.tar.gz", "k").await.unwrap();
        assert_eq!(fetcher.opened.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(second.read().await.unwrap(), b"hello world");
        assert_eq!(entries(&cache), vec!["k"]);
    }

    #[tokio::test]
    async fn test_failed_stream_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::failing_after(vec![b"part", b"ial"], 1));
        let downloader = CachedDownloader::new(dir.path(), fetcher);

        let err = downloader.fetch("https://example.org/a", "k").await.unwrap_err();
        assert!(matches!(err, PressboxError::Download(_)));
        assert!(!dir.path().join("k").exists());
        assert!(!dir.path().join("k.partial").exists());
    }

    #[tokio::test]
    async fn test_stalled_transfer_times_out_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::stalling_after(vec![b"first chunk"], 1));
        let downloader = CachedDownloader::new(dir.path(), fetcher)
            .with_timeout(Some(Duration::from_millis(100)));

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            downloader.fetch("https://example.org/a", "k"),
        )
        .await
        .unwrap()
        .unwrap_err();
        match err {
            PressboxError::Download(message) => assert!(message.contains("timed out")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dir.path().join("k").exists());
        assert!(!dir.path().join("k.partial").exists());
    }

    #[tokio::test]
    async fn test_unusable_cache_dir_is_a_download_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let fetcher = Arc::new(CountingFetcher::new(vec![b"x"]));
        let downloader = CachedDownloader::new(blocker.join("cache"), fetcher.clone());

        let err = downloader.fetch("https://example.org/a", "k").await.unwrap_err();
        assert!(matches!(err, PressboxError::Download(_)));
        assert_eq!(fetcher.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_partial_file_is_not_an_entry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("k.partial"), b"stale").unwrap();
        let fetcher = Arc::new(CountingFetcher::new(vec![b"fresh"]));
        let downloader = CachedDownloader::new(dir.path(), fetcher.clone());

        assert!(downloader.cached("k").unwrap().is_none());
        let file = downloader.fetch("https://example.org/a", "k").await.unwrap();
        assert_eq!(file.read().await.unwrap(), b"fresh");
        assert_eq!(fetcher.opened.load(Ordering::SeqCst), 1);
        assert_eq!(entries(dir.path()), vec!["k"]);
    }

    #[tokio::test]
    async fn test_locked_fetch_uses_lock_dir() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::new(vec![b"x"]));
        let downloader = CachedDownloader::new(dir.path().join("cache"), fetcher)
            .with_locks(Arc::new(FileLockManager::new()), dir.path().join("locks"));

        downloader.fetch("https://example.org/a", "k").await.unwrap();
        assert!(dir.path().join("locks/k.lock").is_file());
    }

    #[tokio::test]
    async fn test_invalid_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let downloader =
            CachedDownloader::new(dir.path(), Arc::new(CountingFetcher::new(Vec::new())));
        for key in ["", ".", "..", "a/b", "k.partial"] {
            assert!(matches!(
                downloader.fetch("https://example.org/a", key).await,
                Err(PressboxError::Config(_))
            ));
        }
    }

    #[test]
    fn test_cache_key_for_url() {
        let key = cache_key_for("https://wordpress.org/wordpress-6.4.tar.gz?x=1");
        assert!(key.ends_with("-wordpress-6.4.tar.gz"));
        assert_eq!(key.len(), 16 + 1 + "wordpress-6.4.tar.gz".len());
        assert_eq!(key, cache_key_for("https://wordpress.org/wordpress-6.4.tar.gz?x=1"));
        assert!(cache_key_for("https://example.org/").ends_with("-download"));
    }
}
