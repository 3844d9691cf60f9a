//! State locking for concurrent access protection.
//!
//! Two `towerctl apply` runs against the same state file would interleave
//! their mutations on the same VM. The lock file records who holds it and
//! until when; an expired lock belongs to a crashed run and may be taken.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lock expiry duration in seconds. An apply that powers a VM on for the
/// guest agent may take up to twice the 10 minute agent deadline.
pub const LOCK_EXPIRY_SECS: i64 = 30 * 60;

/// Information about a state lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a lock held by `holder` for [`LOCK_EXPIRY_SECS`].
    #[must_use]
    pub fn new(holder: &str) -> Self {
        Self::with_ttl(holder, Duration::seconds(LOCK_EXPIRY_SECS))
    }

    /// Creates a lock held by `holder` for `ttl`.
    #[must_use]
    pub fn with_ttl(holder: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());
    let pid = std::process::id();
    let uuid = Uuid::new_v4().simple().to_string();

    format!("{hostname}-{pid}-{}", &uuid[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_lock_is_live() {
        let lock = LockInfo::new("towerctl-test");

        assert_eq!(lock.holder, "towerctl-test");
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > LOCK_EXPIRY_SECS - 5);
    }

    #[test]
    fn test_negative_ttl_is_expired() {
        let lock = LockInfo::with_ttl("crashed", Duration::seconds(-1));

        assert!(lock.is_expired());
        assert_eq!(lock.remaining_secs(), 0);
    }

    #[test]
    fn test_holder_id_generation() {
        let id1 = generate_holder_id();
        let id2 = generate_holder_id();

        assert_ne!(id1, id2);
        assert!(id1.contains(&std::process::id().to_string()));
    }
}
