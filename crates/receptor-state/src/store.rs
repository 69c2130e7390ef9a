//! CheckStateStore — file-backed key/value store for check state.
//!
//! Keys look like `<prefix>:<suffix>`. The prefix names a directory under
//! the root and the suffix the file inside it; a key without `:` maps to a
//! file directly under the root. Characters outside `[A-Za-z0-9_-]` are
//! stripped from both segments.

use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use receptor_core::AgentConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::cache::StateCache;
use crate::error::{StateError, StateResult};

/// Value returned for keys that were never persisted.
pub const EMPTY_STATE: &str = "{}";

#[derive(Debug, Clone)]
pub struct StateConfig {
    pub root_path: PathBuf,
    /// Cache entry TTL.
    pub expiration: Duration,
    /// Interval between cache sweeps.
    pub purge_interval: Duration,
}

impl StateConfig {
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            expiration: Duration::from_secs(10 * 60),
            purge_interval: Duration::from_secs(5 * 60),
        }
    }

    pub fn from_agent_config(config: &AgentConfig) -> Self {
        Self {
            root_path: config.check_state_root_path.clone(),
            expiration: config.check_state_expiration_duration,
            purge_interval: config.check_state_purge_duration,
        }
    }
}

struct Inner {
    config: StateConfig,
    cache: StateCache,
}

/// Write-through check state store. Cheap to clone.
#[derive(Clone)]
pub struct CheckStateStore {
    inner: Arc<Inner>,
}

impl CheckStateStore {
    pub fn new(config: StateConfig) -> Self {
        let cache = StateCache::new(config.expiration);
        Self {
            inner: Arc::new(Inner { config, cache }),
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.inner.config.root_path
    }

    /// Read the value for `key`, preferring the cache.
    ///
    /// A key with no file yields [`EMPTY_STATE`]. A single trailing newline
    /// is stripped from file contents.
    pub fn get(&self, key: &str) -> StateResult<String> {
        if let Some(value) = self.inner.cache.get(key) {
            return Ok(value);
        }

        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(mut content) => {
                if content.ends_with('\n') {
                    content.pop();
                    if content.ends_with('\r') {
                        content.pop();
                    }
                }
                self.inner.cache.insert(key, &content);
                Ok(content)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(EMPTY_STATE.to_string()),
            Err(source) => Err(StateError::Read { path, source }),
        }
    }

    /// Like [`get`](Self::get), but logs errors and falls back to [`EMPTY_STATE`].
    pub fn get_or_default(&self, key: &str) -> String {
        self.get(key).unwrap_or_else(|e| {
            error!(%key, error = %e, "failed to read check state");
            EMPTY_STATE.to_string()
        })
    }

    /// Persist `value` for `key`, then refresh the cache.
    pub fn set(&self, key: &str, value: &str) -> StateResult<()> {
        let path = self.path_for(key)?;
        if let Some(dir) = path.parent() {
            create_private_dir(dir).map_err(|source| StateError::Write {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        write_atomic(&path, value.as_bytes()).map_err(|source| StateError::Write {
            path: path.clone(),
            source,
        })?;
        self.inner.cache.insert(key, value);
        debug!(%key, path = %path.display(), "check state stored");
        Ok(())
    }

    /// Drop every cached entry. Files are left untouched.
    pub fn clear(&self) {
        self.inner.cache.clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.inner.cache.len()
    }

    /// Spawn the periodic cache sweep. Exits when `shutdown` flips to true.
    pub fn spawn_purge(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(store.inner.config.purge_interval);
            interval.tick().await;
            info!("check state purge loop started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let purged = store.inner.cache.purge_expired();
                        if purged > 0 {
                            debug!(purged, "expired check state cache entries");
                        }
                    }
                    _ = shutdown.changed() => {
                        info!("check state purge loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn path_for(&self, key: &str) -> StateResult<PathBuf> {
        key_to_path(&self.inner.config.root_path, key)
    }
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Map a state key onto its file under `root`.
pub fn key_to_path(root: &Path, key: &str) -> StateResult<PathBuf> {
    let (prefix, suffix) = match key.split_once(':') {
        Some((prefix, suffix)) => (sanitize(prefix), Some(sanitize(suffix))),
        None => (sanitize(key), None),
    };
    if prefix.is_empty() {
        return Err(StateError::InvalidKey(key.to_string()));
    }
    match suffix {
        Some(suffix) if suffix.is_empty() => Err(StateError::InvalidKey(key.to_string())),
        Some(suffix) => Ok(root.join(prefix).join(suffix)),
        None => Ok(root.join(prefix)),
    }
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

/// Write to a sibling temp file and rename it over the target.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> CheckStateStore {
        CheckStateStore::new(StateConfig::new(dir))
    }

    #[test]
    fn key_path_splits_at_first_colon() {
        let root = Path::new("/r");
        assert_eq!(key_to_path(root, "check:key").unwrap(), root.join("check").join("key"));
        assert_eq!(
            key_to_path(root, "a:b:c").unwrap(),
            root.join("a").join("bc")
        );
        assert_eq!(key_to_path(root, "plain").unwrap(), root.join("plain"));
    }

    #[test]
    fn key_path_strips_unsafe_characters() {
        let root = Path::new("/r");
        assert_eq!(
            key_to_path(root, "my check/../x:some.key!").unwrap(),
            root.join("mycheckx").join("somekey")
        );
        assert!(matches!(
            key_to_path(root, "../:x"),
            Err(StateError::InvalidKey(_))
        ));
        assert!(matches!(
            key_to_path(root, "check:..."),
            Err(StateError::InvalidKey(_))
        ));
    }

    #[test]
    fn missing_key_reads_as_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert_eq!(store.get("check:missing").unwrap(), EMPTY_STATE);
    }

    #[test]
    fn set_then_get_returns_value_and_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.set("check:key", r#"{"x":1}"#).unwrap();
        assert_eq!(store.get("check:key").unwrap(), r#"{"x":1}"#);

        let on_disk = fs::read_to_string(dir.path().join("check").join("key")).unwrap();
        assert_eq!(on_disk, r#"{"x":1}"#);
    }

    #[test]
    fn get_strips_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("c")).unwrap();
        fs::write(dir.path().join("c").join("k"), "value\n").unwrap();
        assert_eq!(store(dir.path()).get("c:k").unwrap(), "value");
    }

    #[test]
    fn clear_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.set("c:k", "v").unwrap();
        assert_eq!(store.cached_entries(), 1);
        store.clear();
        assert_eq!(store.cached_entries(), 0);
        assert_eq!(store.get("c:k").unwrap(), "v");
    }

    #[cfg(unix)]
    #[test]
    fn files_and_dirs_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        store(dir.path()).set("c:k", "v").unwrap();
        let dir_mode = fs::metadata(dir.path().join("c")).unwrap().permissions().mode();
        let file_mode = fs::metadata(dir.path().join("c").join("k"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);
        assert_eq!(file_mode & 0o777, 0o600);
    }

    #[test]
    fn failed_write_leaves_cache_untouched() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the key's directory should be.
        fs::write(dir.path().join("c"), "").unwrap();
        let store = store(dir.path());
        assert!(store.set("c:k", "v").is_err());
        assert_eq!(store.cached_entries(), 0);
    }

    #[tokio::test]
    async fn purge_loop_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckStateStore::new(StateConfig {
            root_path: dir.path().to_path_buf(),
            expiration: Duration::from_millis(5),
            purge_interval: Duration::from_millis(10),
        });
        store.set("c:k", "v").unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = store.spawn_purge(rx);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.cached_entries(), 0);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
