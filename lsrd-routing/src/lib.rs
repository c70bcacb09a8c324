//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod config;
pub mod debug;
pub mod error;
pub mod interface;
pub mod kernel;
pub mod netlink;
pub mod rib;
pub mod workq;

use std::time::Duration;

use lsrd_utils::UnboundedReceiver;
use lsrd_utils::southbound::{AddressMsg, Protocol, RibMsg};
use lsrd_utils::task::Task;
use tracing::{Instrument, debug_span};

use crate::config::RibCfg;
use crate::debug::Debug;
use crate::error::Error;
use crate::interface::Interfaces;
use crate::kernel::KernelSync;
use crate::rib::Rib;
use crate::workq::{Job, WorkItem, WorkQueue};

pub struct Master {
    // RIB configuration.
    pub config: RibCfg,
    // Operational state of the known interfaces.
    pub interfaces: Interfaces,
    // RIB.
    pub rib: Rib,
    // Kernel synchronization jobs.
    pub workq: WorkQueue,
    // Kernel forwarding table.
    pub kernel: Box<dyn KernelSync>,
}

// ===== impl Master =====

impl Master {
    pub fn new(config: RibCfg, kernel: Box<dyn KernelSync>) -> Master {
        let connected = config.connected.clone();
        let mut master = Master {
            config,
            interfaces: Default::default(),
            rib: Default::default(),
            workq: Default::default(),
            kernel,
        };

        // Add statically configured connected routes.
        for cfg in connected {
            master.process_msg(RibMsg::AddressAdd(AddressMsg {
                ifname: String::new(),
                ifindex: cfg.ifindex,
                addr: cfg.prefix,
            }));
        }

        master
    }

    pub fn process_msg(&mut self, msg: RibMsg) {
        match msg {
            RibMsg::RouteAdd(msg) => {
                let distance = self
                    .config
                    .distance
                    .get(msg.protocol)
                    .unwrap_or(msg.distance);
                let prefix = msg.prefix;
                Debug::RouteAdd(&prefix, msg.protocol, distance).log();
                self.rib.route_add(msg, distance);
                self.enqueue(Job::Reconcile(prefix));
            }
            RibMsg::RouteDel(msg) => {
                Debug::RouteDel(&msg.prefix, msg.protocol).log();
                if self.rib.route_del(&msg) {
                    self.enqueue(Job::Reconcile(msg.prefix));
                }
            }
            RibMsg::InterfaceUpd(msg) => {
                Debug::InterfaceUpdate(&msg.ifname, msg.ifindex, msg.operative)
                    .log();
                if self
                    .interfaces
                    .update(msg.ifname, msg.ifindex, msg.operative)
                {
                    self.enqueue(Job::Sweep);
                }
            }
            RibMsg::AddressAdd(msg) => {
                let distance = self
                    .config
                    .distance
                    .get(Protocol::DIRECT)
                    .unwrap_or(Protocol::DIRECT.default_distance());
                let prefix = self.rib.connected_route_add(&msg, distance);
                Debug::RouteAdd(&prefix, Protocol::DIRECT, distance).log();
                self.enqueue(Job::Reconcile(prefix));
            }
            RibMsg::AddressDel(msg) => {
                if let Some(prefix) = self.rib.connected_route_del(&msg) {
                    Debug::RouteDel(&prefix, Protocol::DIRECT).log();
                    self.enqueue(Job::Reconcile(prefix));
                }
            }
        }
    }

    // Processes the next ready job of the work queue, then rearms the
    // work queue timer.
    pub async fn process_workq(&mut self) {
        self.workq.tick();

        if let Some(item) = self.workq.pop_ready() {
            match item.job {
                Job::Reconcile(prefix) => {
                    let kernel = self.kernel.as_ref();
                    if let Err(error) =
                        self.rib.reconcile(prefix, &self.interfaces, kernel).await
                    {
                        error.log();
                        self.retry(item);
                    }
                }
                Job::Sweep => {
                    let prefixes = self.rib.prefixes();
                    Debug::WorkqSweep(prefixes.len()).log();
                    for prefix in prefixes {
                        self.workq.push(Job::Reconcile(prefix), Duration::ZERO);
                    }
                }
            }
        }

        self.workq.reschedule(self.config.inter_item_delay());
    }

    /// Processes work queue jobs until the queue is empty, including
    /// retries of failed jobs.
    pub async fn run_pending_jobs(&mut self) {
        while !self.workq.is_empty() {
            if self.workq.tick_rx.recv().await.is_none() {
                break;
            }
            self.process_workq().await;
        }
    }

    pub async fn run(mut self, mut rib_rx: UnboundedReceiver<RibMsg>) {
        loop {
            tokio::select! {
                msg = rib_rx.recv() => {
                    let Some(msg) = msg else {
                        // All route sources are gone.
                        break;
                    };
                    self.process_msg(msg);
                }
                Some(_) = self.workq.tick_rx.recv() => {
                    self.process_workq().await;
                }
            }
        }
    }

    fn enqueue(&mut self, job: Job) {
        self.workq.push(job, self.config.hold_time());
    }

    // Requeues a failed job, or drops it once the retry limit is reached.
    fn retry(&mut self, mut item: WorkItem) {
        let Job::Reconcile(prefix) = item.job else {
            return;
        };

        item.retries += 1;
        if item.retries > self.config.max_retries {
            Error::RetriesExhausted(prefix, self.config.max_retries).log();
            return;
        }

        let delay = self.config.retry_backoff(item.retries);
        Debug::WorkqRetry(&prefix, item.retries, delay).log();
        self.workq.requeue(item, delay);
    }
}

// ===== global functions =====

// Creates the RIB and spawns its event loop.
pub fn spawn(
    config: RibCfg,
    kernel: Box<dyn KernelSync>,
    rib_rx: UnboundedReceiver<RibMsg>,
) -> Task<()> {
    let master = Master::new(config, kernel);
    let span = debug_span!("rib");
    Task::spawn(master.run(rib_rx).instrument(span))
}
