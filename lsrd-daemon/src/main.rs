//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod config;

use capctl::caps;
use clap::{App, Arg};
use config::{Config, LoggingFileRotation, LoggingFmtStyle};
use lsrd_ospf::config::InstanceCfg;
use lsrd_routing::netlink::{self, Netlink};
use lsrd_utils::UnboundedSender;
use lsrd_utils::southbound::{InterfaceMsg, RibMsg};
use nix::unistd::{Uid, User};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;

fn init_tracing(config: &config::Logging) {
    // Enable logging to a file.
    let file = config.file.enabled.then(|| {
        let file_appender = match config.file.rotation {
            LoggingFileRotation::Never => {
                rolling::never(&config.file.dir, &config.file.name)
            }
            LoggingFileRotation::Hourly => {
                rolling::hourly(&config.file.dir, &config.file.name)
            }
            LoggingFileRotation::Daily => {
                rolling::daily(&config.file.dir, &config.file.name)
            }
        };

        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(false)
            .with_thread_ids(config.file.fmt.show_thread_id)
            .with_file(config.file.fmt.show_source)
            .with_line_number(config.file.fmt.show_source)
            .with_ansi(config.file.fmt.colors);
        let layer = match config.file.fmt.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(log_level_filter)
    });

    // Enable logging to stdout.
    let stdout = config.stdout.enabled.then(|| {
        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(config.stdout.fmt.show_thread_id)
            .with_file(config.stdout.fmt.show_source)
            .with_line_number(config.stdout.fmt.show_source)
            .with_ansi(config.stdout.fmt.colors);
        let layer = match config.stdout.fmt.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(log_level_filter)
    });

    // Default to the "info" level, unless overridden by RUST_LOG.
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(file)
        .with(stdout)
        .init();
}

fn privdrop(user: &str) -> nix::Result<()> {
    // Preserve set of permitted capabilities upon privdrop.
    if let Err(error) =
        capctl::prctl::set_securebits(capctl::prctl::Secbits::KEEP_CAPS)
    {
        error!(%error, "failed to set securebits");
    }

    // Drop to unprivileged user and group.
    if let Some(user) = User::from_name(user)? {
        nix::unistd::setgroups(&[user.gid])?;
        nix::unistd::setresgid(user.gid, user.gid, user.gid)?;
        nix::unistd::setresuid(user.uid, user.uid, user.uid)?;
    } else {
        error!(name = %user, "failed to find user");
        std::process::exit(1);
    }

    // Set permitted capabilities.
    let mut caps = caps::CapState::empty();
    for cap in [caps::Cap::NET_ADMIN, caps::Cap::NET_RAW] {
        caps.permitted.add(cap);
    }
    if let Err(error) = caps.set_current() {
        error!(%error, "failed to set permitted capabilities");
    }

    Ok(())
}

fn signal_listener() -> mpsc::Receiver<()> {
    let (signal_tx, signal_rx) = mpsc::channel(1);

    tokio::task::spawn(async move {
        let (mut sigint, mut sigterm) = match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            (Err(error), _) | (_, Err(error)) => {
                error!(%error, "failed to install signal handlers");
                let _ = signal_tx.send(()).await;
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => {
                info!("received SIGINT");
                let _ = signal_tx.send(()).await;
            },
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                let _ = signal_tx.send(()).await;
            }
        }
    });

    signal_rx
}

// Resolves the ifindex of interfaces configured by name only.
fn resolve_interfaces(config: &mut InstanceCfg) {
    for iface in config
        .areas
        .iter_mut()
        .flat_map(|area| area.interfaces.iter_mut())
        .filter(|iface| iface.ifindex == 0)
    {
        match nix::net::if_::if_nametoindex(iface.name.as_str()) {
            Ok(ifindex) => iface.ifindex = ifindex,
            Err(error) => {
                warn!(name = %iface.name, %error, "failed to resolve interface");
            }
        }
    }
}

// Relays kernel interface events to the RIB and to OSPF.
fn relay_iface_msg(
    msg: InterfaceMsg,
    rib_tx: &UnboundedSender<RibMsg>,
    ospf_tx: &UnboundedSender<InterfaceMsg>,
) {
    let _ = rib_tx.send(msg.clone().into());
    let _ = ospf_tx.send(msg);
}

async fn run(config: Config) {
    // Spawn signal listener.
    let mut signal_rx = signal_listener();

    // Start the RIB.
    let kernel = match Netlink::new() {
        Ok(kernel) => kernel,
        Err(error) => {
            error.log();
            return;
        }
    };
    let (rib_tx, rib_rx) = mpsc::unbounded_channel();
    let _rib = lsrd_routing::spawn(config.rib, Box::new(kernel), rib_rx);

    // Start the interface monitor. The current interfaces and addresses
    // are queued before any protocol starts.
    let (iface_tx, mut iface_rx) = mpsc::unbounded_channel();
    let _monitor = match netlink::interface_monitor(iface_tx).await {
        Ok(task) => task,
        Err(error) => {
            error.log();
            return;
        }
    };

    // Start the OSPF instance.
    let mut ospf_config = config.ospf;
    resolve_interfaces(&mut ospf_config);
    let (ospf_iface_tx, ospf_iface_rx) = mpsc::unbounded_channel();
    let _ospf = match lsrd_ospf::instance::spawn(
        ospf_config,
        rib_tx.clone(),
        ospf_iface_rx,
    ) {
        Ok(task) => task,
        Err(error) => {
            error.log();
            return;
        }
    };

    // We're ready to go!
    info!("starting up");

    // Dropping the task handles cancels the instances and their timers.
    loop {
        tokio::select! {
            _ = signal_rx.recv() => break,
            Some(msg) = iface_rx.recv() => {
                relay_iface_msg(msg, &rib_tx, &ospf_iface_tx);
            }
        }
    }
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("Link-state routing daemon")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .get_matches();

    // Read configuration file.
    let config_file = matches.value_of("config");
    let config = match Config::load(config_file) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    };

    // Check for root privileges.
    if !Uid::effective().is_root() {
        eprintln!("need privileged user");
        std::process::exit(1);
    }

    // Initialize tracing.
    init_tracing(&config.logging);

    // Drop privileges.
    if let Some(user) = &config.user
        && let Err(error) = privdrop(user)
    {
        error!(%error, "failed to drop root privileges");
        std::process::exit(1);
    }

    // Main loop.
    match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime.block_on(run(config)),
        Err(error) => {
            error!(%error, "failed to create async runtime");
            std::process::exit(1);
        }
    }

    info!("exiting");
}
