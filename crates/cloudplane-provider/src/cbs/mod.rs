//! Block storage: disks, snapshots and disk backups

mod backup;
mod disk;
mod snapshot;

pub use backup::{DiskBackup, DiskBackupKey, DiskBackupSpec, DiskBackupState, DiskBackups};
pub use disk::{Disk, DiskKey, DiskSpec, DiskState, Disks, Placement};
pub use snapshot::{Snapshot, SnapshotKey, SnapshotSpec, SnapshotState, Snapshots};

use cloudplane_core::Service;

pub const CBS: Service = Service::new("cbs", "2017-03-12");
