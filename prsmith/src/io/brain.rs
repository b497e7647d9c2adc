//! The brain: durable per-thread and per-repository records.
//!
//! Records live one object per key at `<namespace>/<threads|repos>/<key>.json`.
//! Writes are read-merge-write without locking: concurrent writers to the same
//! key race and the last write wins for every field it carries. Nothing else in
//! the crate reads or writes the backing objects directly.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::core::naming::sanitize_key;
use crate::core::plan::Plan;

/// Version stamped on every record written.
pub const SCHEMA_VERSION: u32 = 1;

/// Which family of records a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Thread,
    Repo,
}

impl Scope {
    pub fn segment(self) -> &'static str {
        match self {
            Self::Thread => "threads",
            Self::Repo => "repos",
        }
    }
}

/// Per-conversation record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThreadState {
    pub last_repo: Option<String>,
    pub last_task: Option<String>,
    pub last_plan: Option<Plan>,
    pub last_pr_url: Option<String>,
    pub last_branch: Option<String>,
    pub last_job_id: Option<String>,
    pub last_error: Option<ErrorSlot>,
    pub updated_at: Option<String>,
    pub version: Option<u32>,
}

/// Diagnostics for the most recent failed job on a thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorSlot {
    pub message: String,
    pub at: String,
    pub job_id: Option<String>,
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_snippet: Option<String>,
}

/// Per-repository record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepoState {
    pub last_touched_at: Option<String>,
    pub last_pr_url: Option<String>,
    pub last_branch: Option<String>,
    pub prefs: Map<String, Value>,
    pub updated_at: Option<String>,
    pub version: Option<u32>,
}

/// Fields to merge into a [`ThreadState`]. `None` leaves a field untouched;
/// `last_error: Some(None)` clears the error slot.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_repo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_plan: Option<Plan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pr_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<Option<ErrorSlot>>,
}

/// Fields to merge into a [`RepoState`].
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_touched_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pr_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefs: Option<Map<String, Value>>,
}

/// Storage of opaque objects by relative path.
pub trait ObjectStore: Send + Sync {
    /// Fetch an object; `Ok(None)` when it does not exist.
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, path: &str, body: &[u8]) -> Result<()>;
}

/// Objects as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl ObjectStore for FsObjectStore {
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let full = self.resolve(path);
        match fs::read(&full) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read {}", full.display())),
        }
    }

    /// Atomic from a reader's point of view (temp file + rename).
    fn put(&self, path: &str, body: &[u8]) -> Result<()> {
        let full = self.resolve(path);
        let parent = full
            .parent()
            .with_context(|| format!("object path missing parent {}", full.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
        let tmp_path = full.with_extension(format!(
            "json.{}.{}.tmp",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp_path, body)
            .with_context(|| format!("write temp object {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &full).with_context(|| format!("replace {}", full.display()))?;
        Ok(())
    }
}

/// Process-local objects.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> Vec<String> {
        let objects = self.objects.lock().map(|o| o.keys().cloned().collect());
        let mut paths: Vec<String> = objects.unwrap_or_default();
        paths.sort();
        paths
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| anyhow!("memory store poisoned"))?;
        Ok(objects.get(path).cloned())
    }

    fn put(&self, path: &str, body: &[u8]) -> Result<()> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| anyhow!("memory store poisoned"))?;
        objects.insert(path.to_string(), body.to_vec());
        Ok(())
    }
}

/// Merge-on-write record store. Cheap to clone.
#[derive(Clone)]
pub struct StateStore {
    backend: Option<Arc<dyn ObjectStore>>,
    namespace: String,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("enabled", &self.is_enabled())
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl StateStore {
    pub fn new(backend: Arc<dyn ObjectStore>, namespace: impl Into<String>) -> Self {
        Self {
            backend: Some(backend),
            namespace: namespace.into(),
        }
    }

    /// A store with no backend: reads are absent and writes are dropped.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            namespace: String::new(),
        }
    }

    /// Filesystem-backed store, or a disabled one when `root` is `None`.
    pub fn from_root(root: Option<&Path>, namespace: &str) -> Self {
        match root {
            Some(root) => Self::new(Arc::new(FsObjectStore::new(root)), namespace),
            None => Self::disabled(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Object path for a key.
    pub fn object_path(&self, scope: Scope, key: &str) -> Result<String> {
        let name = sanitize_key(key).ok_or_else(|| anyhow!("empty {} key", scope.segment()))?;
        Ok(format!("{}/{}/{name}.json", self.namespace, scope.segment()))
    }

    /// Latest raw record for a key. Missing or unreadable objects are absent.
    pub fn load_raw(&self, scope: Scope, key: &str) -> Option<Map<String, Value>> {
        let backend = self.backend.as_ref()?;
        let path = match self.object_path(scope, key) {
            Ok(path) => path,
            Err(err) => {
                warn!(err = %err, "invalid brain key");
                return None;
            }
        };
        let bytes = match backend.get(&path) {
            Ok(bytes) => bytes?,
            Err(err) => {
                warn!(path, err = %format!("{err:#}"), "brain read failed");
                return None;
            }
        };
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Some(map),
            Ok(_) => {
                warn!(path, "brain object is not a JSON object");
                None
            }
            Err(err) => {
                warn!(path, err = %err, "brain object is not valid JSON");
                None
            }
        }
    }

    /// Latest record for a key as a typed value.
    pub fn load<T: DeserializeOwned>(&self, scope: Scope, key: &str) -> Option<T> {
        let raw = self.load_raw(scope, key)?;
        match serde_json::from_value(Value::Object(raw)) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(key, err = %err, "brain record has unexpected shape");
                None
            }
        }
    }

    pub fn load_thread(&self, key: &str) -> Option<ThreadState> {
        self.load(Scope::Thread, key)
    }

    pub fn load_repo(&self, key: &str) -> Option<RepoState> {
        self.load(Scope::Repo, key)
    }

    /// Shallow-merge `patch` over the current record and write it back.
    ///
    /// Fields absent from the patch are preserved; `null` clears a field.
    #[instrument(skip_all, fields(scope = scope.segment(), key))]
    pub fn save<P: Serialize>(&self, scope: Scope, key: &str, patch: &P) -> Result<()> {
        let Some(backend) = self.backend.as_ref() else {
            return Ok(());
        };
        let path = self.object_path(scope, key)?;
        let Value::Object(fields) = serde_json::to_value(patch).context("serialize patch")? else {
            return Err(anyhow!("brain patch must serialize to an object"));
        };

        let mut record = self.load_raw(scope, key).unwrap_or_default();
        for (field, value) in fields {
            record.insert(field, value);
        }
        record.insert("updatedAt".to_string(), Value::String(timestamp_now()));
        record.insert("version".to_string(), Value::from(SCHEMA_VERSION));

        let mut body = serde_json::to_vec_pretty(&Value::Object(record)).context("serialize record")?;
        body.push(b'\n');
        backend
            .put(&path, &body)
            .with_context(|| format!("write brain object {path}"))?;
        debug!(path, "brain record saved");
        Ok(())
    }

    pub fn save_thread(&self, key: &str, patch: &ThreadPatch) -> Result<()> {
        self.save(Scope::Thread, key, patch)
    }

    pub fn save_repo(&self, key: &str, patch: &RepoPatch) -> Result<()> {
        self.save(Scope::Repo, key, patch)
    }

    /// Record a failure in the thread's error slot. Never fails; problems are logged.
    pub fn record_error(&self, thread_key: &str, slot: ErrorSlot) {
        let patch = ThreadPatch {
            last_error: Some(Some(slot)),
            ..ThreadPatch::default()
        };
        if let Err(err) = self.save_thread(thread_key, &patch) {
            warn!(err = %format!("{err:#}"), "failed to record error in brain");
        }
    }

    /// Erase the thread's error slot. Never fails; problems are logged.
    pub fn clear_error(&self, thread_key: &str) {
        let patch = ThreadPatch {
            last_error: Some(None),
            ..ThreadPatch::default()
        };
        if let Err(err) = self.save_thread(thread_key, &patch) {
            warn!(err = %format!("{err:#}"), "failed to clear error slot in brain");
        }
    }
}

/// RFC 3339 UTC timestamp with millisecond precision.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
