//! Local file-based state storage backend.
//!
//! The state directory holds `<key>.json` and `<key>.lock` per VM. State is
//! written to a temporary file and renamed into place. A lock file is
//! created exclusively, so only one of two racing runs gets it.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{Result, StateError, TowerError};

use super::lock::{LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::VmState;

/// State store keeping one JSON file per VM in a local directory.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    dir: PathBuf,
}

impl LocalStateStore {
    /// Creates a store rooted at `dir`. The directory is created on the
    /// first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the state directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the state file for `key`.
    #[must_use]
    pub fn state_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key)))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", file_stem(key)))
    }

    async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            TowerError::State(StateError::Corrupted {
                message: format!("Cannot create state directory {}: {e}", self.dir.display()),
            })
        })
    }

    /// Creates the lock file only if it does not exist. Returns false when
    /// another lock file is already in place.
    async fn create_lock(&self, path: &Path, lock: &LockInfo) -> Result<bool> {
        let content = serde_json::to_vec_pretty(lock)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(lock_failed(path, &e)),
        };
        file.write_all(&content)
            .await
            .map_err(|e| lock_failed(path, &e))?;
        file.sync_all().await.map_err(|e| lock_failed(path, &e))?;
        Ok(true)
    }
}

/// Maps a key to a file name that stays inside the state directory.
fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn lock_failed(path: &Path, err: &std::io::Error) -> TowerError {
    TowerError::State(StateError::LockFailed {
        message: format!("{}: {err}", path.display()),
    })
}

/// Reads and parses `path`, `None` if the file does not exist.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(TowerError::State(StateError::Corrupted {
                message: format!("Failed to read {}: {e}", path.display()),
            }));
        }
    };
    serde_json::from_str(&content).map(Some).map_err(|e| {
        TowerError::State(StateError::Corrupted {
            message: format!("Failed to parse {}: {e}", path.display()),
        })
    })
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self, key: &str) -> Result<Option<VmState>> {
        let path = self.state_path(key);
        let state = read_json(&path).await?;
        if state.is_none() {
            debug!("No state recorded at {}", path.display());
        }
        Ok(state)
    }

    async fn save(&self, key: &str, state: &VmState) -> Result<()> {
        self.ensure_dir().await?;
        let path = self.state_path(key);
        let content = serde_json::to_vec_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        let temp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&content).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &path).await?;

        info!("Saved state for vm {} to {}", state.vm_id, path.display());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.state_path(key);
        remove_if_present(&path).await?;
        info!("Removed state {}", path.display());
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, holder: &str) -> Result<LockInfo> {
        self.ensure_dir().await?;
        let path = self.lock_path(key);
        let lock = LockInfo::new(holder);

        if !self.create_lock(&path, &lock).await? {
            if let Some(existing) = read_json::<LockInfo>(&path).await? {
                if !existing.is_expired() {
                    return Err(TowerError::State(StateError::LockedByOther {
                        holder: existing.holder,
                        since: existing.acquired_at.to_rfc3339(),
                    }));
                }
                warn!(
                    "Taking over expired lock on {key} held by {}",
                    existing.holder
                );
            }
            remove_if_present(&path).await?;
            if !self.create_lock(&path, &lock).await? {
                return Err(TowerError::State(StateError::LockFailed {
                    message: format!("lock on {key} was taken concurrently"),
                }));
            }
        }

        info!(
            "Acquired state lock {} on {key} (expires in {LOCK_EXPIRY_SECS}s)",
            lock.lock_id
        );
        Ok(lock)
    }

    async fn release_lock(&self, key: &str, lock_id: &str) -> Result<()> {
        let path = self.lock_path(key);
        match read_json::<LockInfo>(&path).await? {
            Some(existing) if existing.lock_id == lock_id => {
                remove_if_present(&path).await?;
                info!("Released state lock {lock_id} on {key}");
            }
            Some(existing) => debug!(
                "Lock on {key} is held by {}, not releasing {lock_id}",
                existing.lock_id
            ),
            None => debug!("Lock on {key} already released"),
        }
        Ok(())
    }

    async fn lock_info(&self, key: &str) -> Result<Option<LockInfo>> {
        read_json(&self.lock_path(key)).await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
