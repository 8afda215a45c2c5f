//! Entry point tying configuration, transport and object kinds together

use crate::cbs::{DiskBackups, Disks, Snapshots};
use crate::client::ApiClient;
use crate::live::LiveDomains;
use crate::tcss::ClusterAgents;
use cloudplane_config::Config;
use cloudplane_core::{Context, RateGate, Reconciler, Result};
use std::sync::Arc;
use tracing::debug;

/// Builds contexts and reconcilers from one loaded configuration
#[derive(Debug, Clone)]
pub struct Provider {
    config: Config,
}

impl Provider {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A context talking to the live API. Fails without credentials.
    pub fn connect(&self) -> Result<Context> {
        let client = ApiClient::from_config(&self.config)?;
        debug!(region = %self.config.region, "Connecting");
        Ok(Context::new(
            Arc::new(client),
            RateGate::new(self.config.rate_limit.clone()),
            &self.config.region,
        ))
    }

    /// Wrap a kind with the configured read budget
    pub fn reconciler<L: cloudplane_core::Lifecycle>(&self, lifecycle: L) -> Reconciler<L> {
        Reconciler::new(lifecycle).with_read_budget(self.config.budgets.read)
    }

    pub fn disks(&self) -> Disks {
        Disks::new(self.config.budgets)
    }

    pub fn snapshots(&self) -> Snapshots {
        Snapshots::new(self.config.budgets)
    }

    pub fn disk_backups(&self) -> DiskBackups {
        DiskBackups::new(self.config.budgets)
    }

    pub fn live_domains(&self) -> LiveDomains {
        LiveDomains::new(self.config.budgets)
    }

    pub fn cluster_agents(&self) -> ClusterAgents {
        ClusterAgents::new(self.config.budgets)
    }
}
