//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use ipnetwork::Ipv4Network;
use lsrd_utils::southbound::Protocol;
use tracing::{error, warn, warn_span};

use crate::kernel::KernelStatus;

// RIB errors.
#[derive(Debug)]
pub enum Error {
    // I/O errors
    IoError(IoError),
    // Kernel synchronization
    KernelInstallError(Ipv4Network, Protocol, KernelStatus),
    KernelUninstallError(Ipv4Network, Protocol, KernelStatus),
    RetriesExhausted(Ipv4Network, u32),
    // Other
    UnknownInterface(u32),
}

// RIB I/O errors.
#[derive(Debug)]
pub enum IoError {
    NetlinkSocketError(std::io::Error),
    NetlinkDumpError(rtnetlink::Error),
}

// ===== impl Error =====

impl Error {
    pub fn log(&self) {
        match self {
            Error::IoError(error) => {
                error.log();
            }
            Error::KernelInstallError(prefix, protocol, status)
            | Error::KernelUninstallError(prefix, protocol, status) => {
                warn_span!("route", %prefix).in_scope(|| {
                    warn!(%protocol, %status, "{}", self);
                })
            }
            Error::RetriesExhausted(prefix, retries) => {
                warn_span!("route", %prefix).in_scope(|| {
                    error!(%retries, "{}", self);
                })
            }
            Error::UnknownInterface(ifindex) => {
                warn!(%ifindex, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::KernelInstallError(..) => {
                write!(f, "failed to install route")
            }
            Error::KernelUninstallError(..) => {
                write!(f, "failed to uninstall route")
            }
            Error::RetriesExhausted(..) => {
                write!(
                    f,
                    "giving up on kernel update, forwarding table may be out of sync"
                )
            }
            Error::UnknownInterface(..) => {
                write!(f, "unknown interface")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub fn log(&self) {
        match self {
            IoError::NetlinkSocketError(error) => {
                error!(error = %with_source(error), "{}", self);
            }
            IoError::NetlinkDumpError(error) => {
                error!(error = %with_source(error), "{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::NetlinkSocketError(..) => {
                write!(f, "failed to create netlink socket")
            }
            IoError::NetlinkDumpError(..) => {
                write!(f, "failed to fetch interface information")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::NetlinkSocketError(error) => Some(error),
            IoError::NetlinkDumpError(error) => Some(error),
        }
    }
}

// ===== helper functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
