//! Object kinds and the signed API client for cloudplane
//!
//! Each kind implements [`cloudplane_core::Lifecycle`] and [`Listing`]:
//!
//! | kind | service | id | deleted when |
//! |---|---|---|---|
//! | [`Disks`] | `cbs` | disk id | absent, or `TORECYCLE` unless forced |
//! | [`Snapshots`] | `cbs` | snapshot id | absent |
//! | [`DiskBackups`] | `cbs` | `{diskId}#{backupId}` | absent |
//! | [`LiveDomains`] | `live` | domain name | absent |
//! | [`ClusterAgents`] | `tcss` | cluster id | absent or `AccessedNone` |
//!
//! # Example
//!
//! ```ignore
//! use cloudplane_config::Config;
//! use cloudplane_provider::{DiskSpec, Provider};
//!
//! let provider = Provider::new(Config::load(None)?);
//! let ctx = provider.connect()?;
//! let disks = provider.reconciler(provider.disks());
//!
//! let created = disks.create(&ctx, &spec).await?;
//! println!("created {}", created.id);
//! ```

pub mod cbs;
pub mod client;
pub mod live;
pub mod provider;
pub mod sign;
pub mod steps;
pub mod tags;
pub mod tcss;

pub use cbs::{
    CBS, Disk, DiskBackup, DiskBackupKey, DiskBackupSpec, DiskBackupState, DiskBackups, DiskKey,
    DiskSpec, DiskState, Disks, Placement, Snapshot, SnapshotKey, SnapshotSpec, SnapshotState,
    Snapshots,
};
pub use client::ApiClient;
pub use live::{DomainType, LIVE, LiveDomain, LiveDomainKey, LiveDomainSpec, LiveDomains};
pub use provider::Provider;
pub use steps::Listing;
pub use tags::Tag;
pub use tcss::{AccessedStatus, ClusterAgent, ClusterAgentKey, ClusterAgentSpec, ClusterAgents, TCSS};
