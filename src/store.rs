//! Durable string-keyed blob storage shared by every surface of the app.
//!
//! Values are opaque serialized text; the store knows nothing about their
//! shape. Writes replace the whole value for a key.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs as async_fs;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid store key `{0}`")]
    InvalidKey(String),
}

/// Async key/value store holding serialized blobs.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    fn set(&self, key: &str, value: String) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Process-local store. Clones share the same map, so several registries built
/// on clones behave like separate surfaces backed by one durable store.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    values: Arc<Mutex<HashMap<String, String>>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `set` calls across all clones.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.values.lock().await.insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Distinguishes temporary files of concurrent writes within one process.
static TMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// One `<key>.json` file per key under a directory. Each write goes to its own
/// temporary file that is renamed into place, so readers never see a torn
/// value and concurrent writers (threads or processes) only race on the rename.
#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match async_fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        async_fs::create_dir_all(&self.root).await?;
        let sequence = TMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .root
            .join(format!(".{key}.{}.{sequence}.tmp", std::process::id()));
        let written = match async_fs::write(&tmp, value).await {
            Ok(()) => async_fs::rename(&tmp, &path).await,
            Err(err) => Err(err),
        };
        if written.is_err() {
            let _ = async_fs::remove_file(&tmp).await;
        }
        written.map_err(StoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        env::temp_dir().join(format!("redmine-timer-store-{name}-{nanos}"))
    }

    #[tokio::test]
    async fn memory_store_clones_share_values() {
        let store = MemoryStore::new();
        let other_surface = store.clone();

        store.set("timers", "{}".to_string()).await.unwrap();

        assert_eq!(other_surface.get("timers").await.unwrap().as_deref(), Some("{}"));
        assert_eq!(other_surface.write_count(), 1);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_survives_a_new_instance() {
        let dir = unique_dir("reopen");
        let store = FileStore::new(&dir);
        assert!(store.get("timers").await.unwrap().is_none());

        store.set("timers", r#"{"version":1}"#.to_string()).await.unwrap();
        store.set("timers", r#"{"version":1,"timers":{}}"#.to_string()).await.unwrap();

        let reopened = FileStore::new(&dir);
        assert_eq!(
            reopened.get("timers").await.unwrap().as_deref(),
            Some(r#"{"version":1,"timers":{}}"#)
        );

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn concurrent_writers_never_lose_a_set() {
        let dir = unique_dir("concurrent");
        let mut tasks = Vec::new();
        for writer in 0..4 {
            let store = FileStore::new(&dir);
            tasks.push(tokio::spawn(async move {
                let mut failures = 0;
                for n in 0..100 {
                    let blob = format!(r#"{{"writer":{writer},"n":{n}}}"#);
                    if store.set("timers", blob).await.is_err() {
                        failures += 1;
                    }
                }
                failures
            }));
        }
        let mut failures = 0;
        for task in tasks {
            failures += task.await.unwrap();
        }
        assert_eq!(failures, 0);

        let last = FileStore::new(&dir).get("timers").await.unwrap().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&last).unwrap();
        assert!(parsed.get("writer").is_some());

        let leftovers = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn file_store_rejects_path_like_keys() {
        let store = FileStore::new(unique_dir("keys"));
        let err = store.get("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }
}
