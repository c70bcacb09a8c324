//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::derivable_impls)]

use std::time::Duration;

use ipnetwork::Ipv4Network;
use lsrd_utils::southbound::Protocol;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RibCfg {
    // Work queue parameters, in milliseconds.
    pub hold_time: u64,
    pub inter_item_delay: u64,
    pub retry_backoff_initial: u64,
    pub retry_backoff_max: u64,
    pub max_retries: u32,
    pub distance: DistanceCfg,
    pub connected: Vec<ConnectedCfg>,
}

// Administrative distance overrides, per route source.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DistanceCfg {
    pub connected: Option<u32>,
    pub r#static: Option<u32>,
    pub ospf: Option<u32>,
    pub kernel: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectedCfg {
    pub prefix: Ipv4Network,
    pub ifindex: u32,
}

// ===== impl RibCfg =====

impl RibCfg {
    pub fn hold_time(&self) -> Duration {
        Duration::from_millis(self.hold_time)
    }

    pub fn inter_item_delay(&self) -> Duration {
        Duration::from_millis(self.inter_item_delay)
    }

    // Delay before the given retry attempt (starting at 1), doubling from
    // the initial backoff up to the configured maximum.
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let backoff = self
            .retry_backoff_initial
            .saturating_mul(1 << shift)
            .min(self.retry_backoff_max);
        Duration::from_millis(backoff)
    }
}

impl Default for RibCfg {
    fn default() -> RibCfg {
        RibCfg {
            hold_time: 10,
            inter_item_delay: 0,
            retry_backoff_initial: 100,
            retry_backoff_max: 5000,
            max_retries: 3,
            distance: Default::default(),
            connected: Default::default(),
        }
    }
}

// ===== impl DistanceCfg =====

impl DistanceCfg {
    // Returns the administrative distance to use for routes of the given
    // protocol, or `None` to keep the one supplied by the route source.
    pub fn get(&self, protocol: Protocol) -> Option<u32> {
        match protocol {
            Protocol::DIRECT => self.connected,
            Protocol::STATIC => self.r#static,
            Protocol::OSPFV2 => self.ospf,
            Protocol::KERNEL => self.kernel,
        }
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_backoff_doubles_until_max() {
        let config = RibCfg {
            retry_backoff_initial: 100,
            retry_backoff_max: 500,
            ..Default::default()
        };
        assert_eq!(config.retry_backoff(1), Duration::from_millis(100));
        assert_eq!(config.retry_backoff(2), Duration::from_millis(200));
        assert_eq!(config.retry_backoff(3), Duration::from_millis(400));
        assert_eq!(config.retry_backoff(4), Duration::from_millis(500));
        assert_eq!(config.retry_backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn distance_overrides() {
        let config = DistanceCfg {
            ospf: Some(90),
            ..Default::default()
        };
        assert_eq!(config.get(Protocol::OSPFV2), Some(90));
        assert_eq!(config.get(Protocol::STATIC), None);
    }
}
