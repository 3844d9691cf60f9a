//! Checks that every VLAN and ISO referenced by a VM spec exists.

use std::sync::Arc;
use tracing::debug;

use crate::config::VmSpec;
use crate::context::Context;
use crate::error::{ReconcileError, Result, TowerError};
use crate::retry::{retry, RetryOptions};

use super::api::ControlPlane;

/// Resolves sub-resource references against the control plane.
///
/// A failed lookup does not stop the others; every offending sub-resource
/// is reported in one aggregate error.
#[derive(Clone)]
pub struct ReferenceResolver {
    api: Arc<dyn ControlPlane>,
    retry: RetryOptions,
}

impl ReferenceResolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new(api: Arc<dyn ControlPlane>, retry: RetryOptions) -> Self {
        Self { api, retry }
    }

    /// Verifies every NIC VLAN and every CD-ROM image referenced by `spec`.
    ///
    /// # Errors
    ///
    /// Returns the single failure, or [`TowerError::Aggregate`] naming each
    /// unresolved reference. Cancellation aborts immediately.
    pub async fn verify(&self, ctx: &Context, spec: &VmSpec) -> Result<()> {
        let mut errors = Vec::new();

        for (index, nic) in spec.nics.iter().flatten().enumerate() {
            let found = retry(ctx, &self.retry, || self.api.get_vlan(&nic.vlan_id)).await;
            if let Some(err) = unresolved(format!("nic[{index}]"), "vlan", &nic.vlan_id, found)? {
                errors.push(err);
            }
        }

        for (index, cd_rom) in spec.cd_roms.iter().flatten().enumerate() {
            let Some(Some(iso_id)) = cd_rom.requested_image() else {
                continue;
            };
            let found = retry(ctx, &self.retry, || self.api.get_iso(iso_id)).await;
            if let Some(err) = unresolved(format!("cd_rom[{index}]"), "iso", iso_id, found)? {
                errors.push(err);
            }
        }

        debug!("Reference check found {} problem(s)", errors.len());
        TowerError::from_collected(errors).map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for ReferenceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceResolver")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Turns a lookup outcome into a collected error, propagating cancellation.
fn unresolved<T>(
    resource: String,
    kind: &'static str,
    id: &str,
    found: Result<Option<T>>,
) -> Result<Option<TowerError>> {
    let reason = match found {
        Ok(Some(_)) => return Ok(None),
        Ok(None) => String::from("not found"),
        Err(err) if err.is_cancellation() => return Err(err),
        Err(err) => err.to_string(),
    };
    Ok(Some(
        ReconcileError::UnresolvedReference {
            resource,
            kind,
            id: id.to_string(),
            reason,
        }
        .into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CdRomSpec, NicSpec};
    use crate::tower::api::MockControlPlane;
    use crate::tower::types::{ElfImage, Vlan};

    fn nic(vlan: &str) -> NicSpec {
        serde_yaml::from_str(&format!("vlan_id: {vlan}")).expect("valid nic")
    }

    #[tokio::test]
    async fn test_all_failures_are_collected() {
        let mut api = MockControlPlane::new();
        api.expect_get_vlan().times(3).returning(|id| {
            Ok((id != "missing-a" && id != "missing-b").then(|| Vlan {
                id: id.to_string(),
                name: String::new(),
            }))
        });
        api.expect_get_iso().times(1).returning(|_| Ok(None));
        let resolver = ReferenceResolver::new(Arc::new(api), RetryOptions::default());
        let spec = VmSpec {
            id: Some(String::from("vm-1")),
            nics: Some(vec![nic("missing-a"), nic("vlan-ok"), nic("missing-b")]),
            cd_roms: Some(vec![
                CdRomSpec {
                    id: None,
                    boot: 1,
                    iso_id: Some(Some(String::from("iso-x"))),
                },
                CdRomSpec {
                    id: None,
                    boot: 2,
                    iso_id: Some(None),
                },
            ]),
            ..VmSpec::default()
        };

        let err = resolver
            .verify(&Context::background(), &spec)
            .await
            .expect_err("three references are missing");

        let TowerError::Aggregate(errors) = &err else {
            panic!("expected aggregate, got {err:?}");
        };
        assert_eq!(errors.len(), 3);
        let text = err.to_string();
        assert!(text.contains("nic[0] references vlan missing-a"));
        assert!(text.contains("nic[2] references vlan missing-b"));
        assert!(text.contains("cd_rom[0] references iso iso-x"));
    }

    #[tokio::test]
    async fn test_resolved_references_pass() {
        let mut api = MockControlPlane::new();
        api.expect_get_iso().returning(|id| {
            Ok(Some(ElfImage {
                id: id.to_string(),
                name: String::from("ubuntu.iso"),
            }))
        });
        let resolver = ReferenceResolver::new(Arc::new(api), RetryOptions::default());
        let spec = VmSpec {
            id: Some(String::from("vm-1")),
            cd_roms: Some(vec![CdRomSpec {
                id: Some(String::from("cd1")),
                boot: 1,
                iso_id: Some(Some(String::from("iso-1"))),
            }]),
            ..VmSpec::default()
        };

        resolver
            .verify(&Context::background(), &spec)
            .await
            .expect("references resolve");
    }
}
