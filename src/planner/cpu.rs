//! CPU topology resolution.
//!
//! The desired `vcpu`, cores per socket and socket count are each optional.
//! Missing dimensions are derived from the observed topology; combinations
//! where `vcpu` is not a multiple of the given dimension are rejected.

use crate::error::ReconcileError;
use crate::tower::CpuTopology;

/// A fully resolved CPU layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedCpu {
    /// Virtual CPU count.
    pub vcpu: u32,
    /// Cores per socket and socket count.
    pub topology: CpuTopology,
}

/// Resolves the desired CPU dimensions against `current`.
///
/// Returns `Ok(None)` when no dimension is requested.
///
/// # Errors
///
/// Returns [`ReconcileError::InvalidCpuTopology`] when `vcpu` is not
/// divisible by the given sockets or cores, a dimension is zero, or the
/// derived vcpu count does not fit in a `u32`.
pub fn resolve_cpu(
    vcpu: Option<u32>,
    cores: Option<u32>,
    sockets: Option<u32>,
    current: CpuTopology,
) -> Result<Option<ResolvedCpu>, ReconcileError> {
    if [vcpu, cores, sockets].contains(&Some(0)) {
        return Err(invalid("cpu dimensions must be positive"));
    }
    let current_sockets = current.sockets.max(1);
    let current_cores = current.cores.max(1);

    let (vcpu, cores, sockets) = match (vcpu, cores, sockets) {
        (None, None, None) => return Ok(None),
        (Some(vcpu), None, None) => {
            if vcpu % current_sockets == 0 {
                (vcpu, vcpu / current_sockets, current_sockets)
            } else if vcpu % current_cores == 0 {
                (vcpu, current_cores, vcpu / current_cores)
            } else {
                (vcpu, vcpu, 1)
            }
        }
        (Some(vcpu), None, Some(sockets)) => {
            if vcpu % sockets != 0 {
                return Err(invalid("vcpu must be divisible by number of cpu sockets"));
            }
            (vcpu, vcpu / sockets, sockets)
        }
        (None, None, Some(sockets)) => (product(sockets, current_cores)?, current_cores, sockets),
        (Some(vcpu), Some(cores), None) => {
            if vcpu % cores != 0 {
                return Err(invalid("vcpu must be divisible by number of cpu cores"));
            }
            (vcpu, cores, vcpu / cores)
        }
        (None, Some(cores), None) => (product(current_sockets, cores)?, cores, current_sockets),
        (None, Some(cores), Some(sockets)) => (product(cores, sockets)?, cores, sockets),
        (Some(vcpu), Some(cores), Some(sockets)) => (vcpu, cores, sockets),
    };

    Ok(Some(ResolvedCpu {
        vcpu,
        topology: CpuTopology { cores, sockets },
    }))
}

fn product(a: u32, b: u32) -> Result<u32, ReconcileError> {
    a.checked_mul(b)
        .ok_or_else(|| invalid("vcpu count overflows"))
}

fn invalid(message: &str) -> ReconcileError {
    ReconcileError::InvalidCpuTopology {
        message: message.to_string(),
    }
}
