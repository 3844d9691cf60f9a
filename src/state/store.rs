//! State store trait definition.
//!
//! Every VM is stored under its own key (see
//! [`VmSpec::state_key`](crate::config::VmSpec::state_key)), so runs against
//! different VMs never share a state record or a lock.

use async_trait::async_trait;

use crate::error::Result;

use super::lock::LockInfo;
use super::types::VmState;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the state recorded under `key`, `None` if there is none yet.
    async fn load(&self, key: &str) -> Result<Option<VmState>>;

    /// Replaces the state recorded under `key`.
    async fn save(&self, key: &str, state: &VmState) -> Result<()>;

    /// Forgets the state recorded under `key`. Missing state is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Takes the lock on `key` for `holder`.
    ///
    /// An expired lock is taken over; a live one is an error naming its
    /// holder.
    async fn acquire_lock(&self, key: &str, holder: &str) -> Result<LockInfo>;

    /// Releases the lock on `key` if `lock_id` still holds it.
    async fn release_lock(&self, key: &str, lock_id: &str) -> Result<()>;

    /// Returns the lock on `key`, expired or not.
    async fn lock_info(&self, key: &str) -> Result<Option<LockInfo>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
