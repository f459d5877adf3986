//! The ordered reconciliation pipeline.
//!
//! Step order matters: the runtime configuration is written before any
//! mount changes, and cgroups are fixed before anything that assumes a
//! stable cgroup root.

use std::time::Duration;

use nodeboot_common::config::NodeConfig;
use nodeboot_common::constants::{CGROUP_FIX_ATTEMPTS, CGROUP_FIX_DELAY};
use nodeboot_common::error::Result;
use nodeboot_common::types::{EnvironmentFacts, IptablesMode, Snapshotter};
use serde::Serialize;

use crate::host::Host;
use crate::runtime::{containerd, proxy};
use crate::{cgroup, filesystem, identity, iptables, kmsg, network, probe, validate};

/// What a completed run detected and chose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    /// Probe results the run acted on.
    pub facts: EnvironmentFacts,
    /// Snapshotter written to the containerd config, if not the default.
    pub snapshotter: Option<Snapshotter>,
    /// Selected iptables backend.
    pub iptables: IptablesMode,
}

/// Runs every fixup against one host.
pub struct Reconciler<'a> {
    host: Host<'a>,
    config: &'a NodeConfig,
    cgroup_attempts: u32,
    cgroup_delay: Duration,
}

impl<'a> Reconciler<'a> {
    /// Creates a reconciler with the production retry policy.
    #[must_use]
    pub const fn new(host: Host<'a>, config: &'a NodeConfig) -> Self {
        Self {
            host,
            config,
            cgroup_attempts: CGROUP_FIX_ATTEMPTS,
            cgroup_delay: CGROUP_FIX_DELAY,
        }
    }

    /// Overrides the cgroup retry policy.
    #[must_use]
    pub const fn with_cgroup_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.cgroup_attempts = attempts;
        self.cgroup_delay = delay;
        self
    }

    /// Runs the whole pipeline, stopping at the first fatal step.
    ///
    /// # Errors
    ///
    /// Returns the error of the first step that cannot be tolerated.
    pub fn run(&self) -> Result<Report> {
        let host = &self.host;
        let facts = probe::probe(host.sysroot, host.mounter);

        validate::validate(&facts)?;
        let snapshotter = containerd::configure(host, self.config, &facts)?;
        proxy::configure(host.sysroot, &self.config.proxy)?;
        kmsg::reconcile(host, &facts)?;
        filesystem::fixup::reconcile(host, &facts)?;
        cgroup::reconcile_with_retry(host, &facts.cgroup, self.cgroup_attempts, self.cgroup_delay)?;
        identity::reconcile(host)?;
        let iptables = iptables::reconcile(host);
        network::reconcile(host, self.config, &facts)?;

        Ok(Report {
            facts,
            snapshotter,
            iptables,
        })
    }
}
