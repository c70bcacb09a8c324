//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;

use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use lsrd_utils::southbound::{Nexthop, Protocol};
use serde::{Deserialize, Serialize};

// Outcome of a kernel forwarding table operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum KernelStatus {
    Success,
    AlreadyExists,
    Unreachable,
    Failure,
}

/// Kernel forwarding table backend used by the RIB.
///
/// Implementations report the outcome of each operation instead of failing,
/// leaving the retry policy to the RIB work queue.
#[async_trait]
pub trait KernelSync: Send + Sync {
    /// Installs a route, replacing any existing route for the same prefix.
    async fn add_route(
        &self,
        protocol: Protocol,
        prefix: Ipv4Network,
        nexthops: &BTreeSet<Nexthop>,
    ) -> KernelStatus;

    /// Removes a previously installed route.
    async fn delete_route(
        &self,
        protocol: Protocol,
        prefix: Ipv4Network,
        nexthops: &BTreeSet<Nexthop>,
    ) -> KernelStatus;
}

// ===== impl KernelStatus =====

impl KernelStatus {
    // Returns whether the forwarding table is known to be in the requested
    // state.
    pub fn is_ok(&self) -> bool {
        matches!(self, KernelStatus::Success | KernelStatus::AlreadyExists)
    }

    // Maps an errno value returned by the kernel.
    pub fn from_errno(errno: i32) -> KernelStatus {
        match errno {
            0 => KernelStatus::Success,
            libc::EEXIST => KernelStatus::AlreadyExists,
            libc::ENETUNREACH | libc::EHOSTUNREACH => KernelStatus::Unreachable,
            _ => KernelStatus::Failure,
        }
    }
}

impl std::fmt::Display for KernelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelStatus::Success => write!(f, "success"),
            KernelStatus::AlreadyExists => write!(f, "already exists"),
            KernelStatus::Unreachable => write!(f, "network unreachable"),
            KernelStatus::Failure => write!(f, "failure"),
        }
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(KernelStatus::from_errno(0), KernelStatus::Success);
        assert_eq!(
            KernelStatus::from_errno(libc::EEXIST),
            KernelStatus::AlreadyExists
        );
        assert_eq!(
            KernelStatus::from_errno(libc::ENETUNREACH),
            KernelStatus::Unreachable
        );
        assert_eq!(
            KernelStatus::from_errno(libc::EHOSTUNREACH),
            KernelStatus::Unreachable
        );
        assert_eq!(
            KernelStatus::from_errno(libc::EPERM),
            KernelStatus::Failure
        );
        assert!(KernelStatus::AlreadyExists.is_ok());
        assert!(!KernelStatus::Unreachable.is_ok());
    }
}
