//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::derivable_impls)]

use lsrd_ospf::config::InstanceCfg;
use lsrd_routing::config::RibCfg;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    // Unprivileged user to run as.
    pub user: Option<String>,
    pub logging: Logging,
    pub ospf: InstanceCfg,
    pub rib: RibCfg,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub file: LoggingFile,
    pub stdout: LoggingStdout,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingFile {
    pub enabled: bool,
    pub dir: String,
    pub name: String,
    pub rotation: LoggingFileRotation,
    #[serde(flatten)]
    pub fmt: LoggingFmt,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingStdout {
    pub enabled: bool,
    #[serde(flatten)]
    pub fmt: LoggingFmt,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingFmt {
    pub style: LoggingFmtStyle,
    pub colors: bool,
    pub show_thread_id: bool,
    pub show_source: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingFileRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingFmtStyle {
    Compact,
    Full,
    Json,
    Pretty,
}

// ===== impl Config =====

impl Config {
    const DFLT_FILEPATH: &'static str = "/etc/lsrd.toml";

    pub(crate) fn load(config_file: Option<&str>) -> Result<Config, String> {
        let config_file = config_file.unwrap_or(Config::DFLT_FILEPATH);

        match std::fs::read_to_string(config_file) {
            Ok(config_str) => Config::parse(&config_str),
            Err(err) => {
                eprintln!("Failed to load configuration file: {err}");
                eprintln!("Falling back to default configuration...");
                Ok(Config::default())
            }
        }
    }

    fn parse(config_str: &str) -> Result<Config, String> {
        toml::from_str(config_str)
            .map_err(|err| format!("Failed to parse configuration file: {err}"))
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            user: None,
            logging: Default::default(),
            ospf: Default::default(),
            rib: Default::default(),
        }
    }
}

// ===== impl LoggingFile =====

impl Default for LoggingFile {
    fn default() -> LoggingFile {
        LoggingFile {
            enabled: false,
            dir: "/var/log".to_owned(),
            name: "lsrd.log".to_owned(),
            rotation: Default::default(),
            fmt: Default::default(),
        }
    }
}

// ===== impl LoggingStdout =====

impl Default for LoggingStdout {
    fn default() -> LoggingStdout {
        LoggingStdout {
            enabled: true,
            fmt: Default::default(),
        }
    }
}

// ===== impl LoggingFmt =====

impl Default for LoggingFmt {
    fn default() -> LoggingFmt {
        LoggingFmt {
            style: LoggingFmtStyle::Full,
            colors: false,
            show_thread_id: false,
            show_source: false,
        }
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn parse_full_config() {
        let config = Config::parse(
            r#"
            [logging.stdout]
            enabled = true
            style = "json"
            show_source = true

            [logging.file]
            enabled = true
            rotation = "daily"

            [ospf]
            router_id = "1.1.1.1"
            max_paths = 4
            ecmp_tie_break = "lower-router-id"
            spf_initial_delay = 100

            [[ospf.areas]]
            area_id = "0.0.0.1"
            area_type = "stub"

            [[ospf.areas.interfaces]]
            name = "eth0"
            address = "10.0.0.1/30"
            if_type = "point-to-point"
            cost = 20

            [rib]
            hold_time = 50
            max_retries = 5

            [rib.distance]
            ospf = 90

            [[rib.connected]]
            prefix = "192.168.0.0/24"
            ifindex = 3
            "#,
        )
        .unwrap();

        assert!(matches!(
            config.logging.stdout.fmt.style,
            LoggingFmtStyle::Json
        ));
        assert!(config.logging.stdout.fmt.show_source);
        assert!(matches!(
            config.logging.file.rotation,
            LoggingFileRotation::Daily
        ));
        assert_eq!(config.ospf.router_id, Some(Ipv4Addr::new(1, 1, 1, 1)));
        assert_eq!(config.ospf.max_paths, 4);
        assert_eq!(config.ospf.spf_initial_delay, 100);
        // Unset values keep their defaults.
        assert_eq!(config.ospf.spf_long_delay, 5000);
        let area = &config.ospf.areas[0];
        assert_eq!(area.area_id, Ipv4Addr::new(0, 0, 0, 1));
        assert_eq!(area.interfaces[0].cost, 20);
        assert_eq!(area.interfaces[0].hello_interval, 10);
        assert_eq!(config.rib.hold_time, 50);
        assert_eq!(config.rib.max_retries, 5);
        assert_eq!(config.rib.distance.ospf, Some(90));
        assert_eq!(config.rib.connected[0].ifindex, 3);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(Config::parse("[rib]\nhold_tme = 10\n").is_err());
        assert!(Config::parse("[ospf]\nrouter-id = \"1.1.1.1\"\n").is_err());
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert!(config.user.is_none());
        assert!(config.logging.stdout.enabled);
        assert!(!config.logging.file.enabled);
        assert!(config.ospf.areas.is_empty());
        assert_eq!(config.rib.max_retries, 3);
    }
}
