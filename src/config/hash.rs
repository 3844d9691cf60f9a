//! Configuration hashing for change detection.
//!
//! The VM hash identifies which desired configuration a state entry was
//! reconciled from. The account fingerprint lets a later run tell whether
//! the guest OS credentials changed without keeping the password around.

use sha2::{Digest, Sha256};

use super::spec::{GuestOsAccount, VmSpec};

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of a desired VM.
    ///
    /// The guest OS password only enters the hash through its fingerprint.
    #[must_use]
    pub fn hash_vm(&self, spec: &VmSpec) -> String {
        let mut redacted = spec.clone();
        let account = redacted.guest_os_account.take();

        let mut hasher = Sha256::new();
        // Serializing plain data structs cannot fail.
        hasher.update(serde_json::to_vec(&redacted).unwrap_or_default());
        if let Some(account) = &account {
            hasher.update(self.fingerprint_account(account).as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a fingerprint of a guest OS account.
    #[must_use]
    pub fn fingerprint_account(&self, account: &GuestOsAccount) -> String {
        let mut hasher = Sha256::new();
        hasher.update(account.username.as_bytes());
        hasher.update([0u8]);
        hasher.update(account.password.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns a short version of a hash for display.
    #[must_use]
    pub fn short_hash(hash: &str) -> &str {
        hash.get(..12).unwrap_or(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> VmSpec {
        VmSpec {
            id: Some(String::from("vm-1")),
            name: Some(String::from("web-1")),
            vcpu: Some(4),
            ..VmSpec::default()
        }
    }

    fn account(password: &str) -> GuestOsAccount {
        GuestOsAccount {
            username: String::from("root"),
            password: password.to_string(),
        }
    }

    #[test]
    fn test_hash_is_deterministic() {
        let hasher = ConfigHasher::new();
        assert_eq!(hasher.hash_vm(&spec()), hasher.hash_vm(&spec()));
    }

    #[test]
    fn test_hash_changes_with_spec() {
        let hasher = ConfigHasher::new();
        let mut changed = spec();
        changed.vcpu = Some(8);

        assert_ne!(hasher.hash_vm(&spec()), hasher.hash_vm(&changed));
    }

    #[test]
    fn test_password_change_changes_fingerprint() {
        let hasher = ConfigHasher::new();
        let a = hasher.fingerprint_account(&account("one"));
        let b = hasher.fingerprint_account(&account("two"));

        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(!a.contains("one"));
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(ConfigHasher::short_hash("abcdef0123456789"), "abcdef012345");
        assert_eq!(ConfigHasher::short_hash("abc"), "abc");
    }
}
