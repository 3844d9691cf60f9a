//! Storage-policy lookup cache.
//!
//! Policies never change once created, so the whole table is fetched once
//! per process on first use and never invalidated.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::context::Context;
use crate::error::{ApiError, Result, TowerError};
use crate::retry::{retry, RetryOptions};

use super::api::ControlPlane;
use super::types::StoragePolicy;

/// Process-wide storage-policy table keyed by local id.
#[derive(Debug, Default)]
pub struct StoragePolicyCache {
    policies: OnceCell<HashMap<String, StoragePolicy>>,
    retry: RetryOptions,
}

impl StoragePolicyCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(retry: RetryOptions) -> Self {
        Self {
            policies: OnceCell::new(),
            retry,
        }
    }

    /// Returns true once the table has been fetched.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.policies.initialized()
    }

    /// Resolves a policy by local id or id suffix.
    ///
    /// The first call lists every policy; concurrent first calls share that
    /// single query. A failed fetch leaves the cache empty for the next call.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] for an unknown id, or the fetch error.
    pub async fn get(
        &self,
        ctx: &Context,
        api: &Arc<dyn ControlPlane>,
        id: &str,
    ) -> Result<StoragePolicy> {
        let table = self
            .policies
            .get_or_try_init(|| async {
                debug!("Fetching storage policies");
                let records = retry(ctx, &self.retry, || api.list_storage_policies()).await?;
                Ok::<_, TowerError>(
                    records
                        .into_iter()
                        .map(|r| {
                            let policy = r.policy();
                            (r.local_id, policy)
                        })
                        .collect(),
                )
            })
            .await?;

        lookup(table, id).ok_or_else(|| {
            ApiError::NotFound {
                kind: "storage policy",
                id: id.to_string(),
            }
            .into()
        })
    }
}

fn lookup(table: &HashMap<String, StoragePolicy>, id: &str) -> Option<StoragePolicy> {
    if id.is_empty() {
        return None;
    }
    table.get(id).copied().or_else(|| {
        table
            .iter()
            .find(|(local_id, _)| local_id.ends_with(id))
            .map(|(_, policy)| *policy)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tower::api::MockControlPlane;
    use crate::tower::types::StoragePolicyRecord;

    fn records() -> Vec<StoragePolicyRecord> {
        vec![
            StoragePolicyRecord {
                id: String::from("p1"),
                local_id: String::from("cluster-a_policy-thin-2"),
                replica_num: 2,
                thin_provision: true,
            },
            StoragePolicyRecord {
                id: String::from("p2"),
                local_id: String::from("cluster-a_policy-thick-3"),
                replica_num: 3,
                thin_provision: false,
            },
        ]
    }

    #[tokio::test]
    async fn test_single_fetch_across_concurrent_callers() {
        let mut api = MockControlPlane::new();
        api.expect_list_storage_policies()
            .times(1)
            .returning(|| Ok(records()));
        let api: Arc<dyn ControlPlane> = Arc::new(api);
        let cache = StoragePolicyCache::default();
        let ctx = Context::background();

        let (a, b) = tokio::join!(
            cache.get(&ctx, &api, "cluster-a_policy-thin-2"),
            cache.get(&ctx, &api, "policy-thick-3"),
        );

        assert_eq!(a.expect("exact id"), StoragePolicy::new(2, true));
        assert_eq!(b.expect("suffix id"), StoragePolicy::new(3, false));
        assert!(cache.is_populated());
        assert_eq!(
            cache
                .get(&ctx, &api, "policy-thin-2")
                .await
                .expect("cached")
                .to_string(),
            "REPLICA_2_THIN_PROVISION"
        );
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let mut api = MockControlPlane::new();
        api.expect_list_storage_policies()
            .times(1)
            .returning(|| Ok(records()));
        let api: Arc<dyn ControlPlane> = Arc::new(api);
        let cache = StoragePolicyCache::default();

        let err = cache
            .get(&Context::background(), &api, "missing")
            .await
            .expect_err("unknown policy");

        assert!(matches!(
            err,
            TowerError::Api(ApiError::NotFound { kind: "storage policy", .. })
        ));
    }
}
