//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use ipnetwork::Ipv4Network;
use lsrd_utils::southbound::Protocol;
use tracing::{debug, debug_span};

// RIB debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Route sources
    RouteAdd(&'a Ipv4Network, Protocol, u32),
    RouteDel(&'a Ipv4Network, Protocol),
    InterfaceUpdate(&'a str, u32, bool),
    // Selection
    SelectionChange(&'a Ipv4Network, Option<Protocol>, Option<Protocol>),
    SelectionRefresh(&'a Ipv4Network, Protocol),
    SelectionUnchanged(&'a Ipv4Network, Protocol),
    // Kernel synchronization
    KernelInstall(&'a Ipv4Network, Protocol),
    KernelUninstall(&'a Ipv4Network, Protocol),
    KernelAlreadyExists(&'a Ipv4Network, Protocol),
    // Work queue
    WorkqSweep(usize),
    WorkqRetry(&'a Ipv4Network, u32, Duration),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::RouteAdd(prefix, protocol, distance) => {
                // Parent span(s): rib
                debug_span!("route", %prefix).in_scope(|| {
                    debug!(%protocol, %distance, "{}", self);
                })
            }
            Debug::RouteDel(prefix, protocol)
            | Debug::SelectionRefresh(prefix, protocol)
            | Debug::SelectionUnchanged(prefix, protocol)
            | Debug::KernelInstall(prefix, protocol)
            | Debug::KernelUninstall(prefix, protocol)
            | Debug::KernelAlreadyExists(prefix, protocol) => {
                // Parent span(s): rib
                debug_span!("route", %prefix).in_scope(|| {
                    debug!(%protocol, "{}", self);
                })
            }
            Debug::InterfaceUpdate(name, ifindex, operative) => {
                // Parent span(s): rib
                debug_span!("interface", %name).in_scope(|| {
                    debug!(%ifindex, %operative, "{}", self);
                })
            }
            Debug::SelectionChange(prefix, old, new) => {
                // Parent span(s): rib
                debug_span!("route", %prefix).in_scope(|| {
                    debug!(?old, ?new, "{}", self);
                })
            }
            Debug::WorkqSweep(count) => {
                // Parent span(s): rib
                debug!(%count, "{}", self);
            }
            Debug::WorkqRetry(prefix, attempt, delay) => {
                // Parent span(s): rib
                debug_span!("route", %prefix).in_scope(|| {
                    debug!(%attempt, ?delay, "{}", self);
                })
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::RouteAdd(..) => {
                write!(f, "route added")
            }
            Debug::RouteDel(..) => {
                write!(f, "route removed")
            }
            Debug::InterfaceUpdate(..) => {
                write!(f, "interface update")
            }
            Debug::SelectionChange(..) => {
                write!(f, "selected route changed")
            }
            Debug::SelectionRefresh(..) => {
                write!(f, "selected route attributes changed")
            }
            Debug::SelectionUnchanged(..) => {
                write!(f, "selected route unchanged")
            }
            Debug::KernelInstall(..) => {
                write!(f, "installing route")
            }
            Debug::KernelUninstall(..) => {
                write!(f, "uninstalling route")
            }
            Debug::KernelAlreadyExists(..) => {
                write!(f, "route already present in the kernel")
            }
            Debug::WorkqSweep(..) => {
                write!(f, "revalidating all prefixes")
            }
            Debug::WorkqRetry(..) => {
                write!(f, "rescheduling kernel update")
            }
        }
    }
}
