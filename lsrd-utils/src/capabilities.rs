//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use capctl::caps::CapState;
use tracing::error;

/// Runs the provided closure with the permitted capabilities made effective.
///
/// Used around raw socket and netlink socket creation once the daemon has
/// dropped its privileges.
pub fn raise<F, R>(cb: F) -> R
where
    F: FnOnce() -> R,
{
    let mut caps = match CapState::get_current() {
        Ok(caps) => Some(caps),
        Err(error) => {
            error!(%error, "failed to get current capabilities");
            None
        }
    };

    // Raise capabilities.
    if let Some(caps) = &mut caps {
        caps.effective = caps.permitted;
        if let Err(error) = caps.set_current() {
            error!(%error, "failed to update current capabilities");
        }
    }

    // Run closure.
    let ret = cb();

    // Drop capabilities.
    if let Some(caps) = &mut caps {
        caps.effective.clear();
        if let Err(error) = caps.set_current() {
            error!(%error, "failed to update current capabilities");
        }
    }

    ret
}
