use crate::alerts::UsageReading;
use crate::config::Host;
use std::path::Path;
use sysinfo::{DiskExt, System, SystemExt};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocalProbeError {
    #[error("no local filesystem contains {mount}")]
    MountNotFound { mount: String },
    #[error("filesystem at {mount} reports zero capacity")]
    EmptyFilesystem { mount: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDisk {
    pub mount_point: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Reads disk usage of the machine diskwatch runs on.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalProbe;

impl LocalProbe {
    pub fn read(&self, host: &Host, timestamp: i64) -> Result<UsageReading, LocalProbeError> {
        let mut system = System::new();
        system.refresh_disks_list();
        system.refresh_disks();

        let disks: Vec<LocalDisk> = system
            .disks()
            .iter()
            .map(|d| LocalDisk {
                mount_point: d.mount_point().to_string_lossy().to_string(),
                total_bytes: d.total_space(),
                available_bytes: d.available_space(),
            })
            .collect();

        reading_for_mount(&host.name, &host.mount, &disks, timestamp)
    }
}

/// Picks the deepest mount containing `mount`, the way `df <path>` does.
pub fn reading_for_mount(
    host: &str,
    mount: &str,
    disks: &[LocalDisk],
    timestamp: i64,
) -> Result<UsageReading, LocalProbeError> {
    let target = Path::new(mount);
    let disk = disks
        .iter()
        .filter(|d| target.starts_with(&d.mount_point))
        .max_by_key(|d| Path::new(&d.mount_point).components().count())
        .ok_or_else(|| LocalProbeError::MountNotFound {
            mount: mount.to_string(),
        })?;

    if disk.total_bytes == 0 {
        return Err(LocalProbeError::EmptyFilesystem {
            mount: disk.mount_point.clone(),
        });
    }

    let used = disk.total_bytes.saturating_sub(disk.available_bytes);
    // Round up like df's Capacity column.
    let pct = (u128::from(used) * 100).div_ceil(u128::from(disk.total_bytes));

    Ok(UsageReading {
        host: host.to_string(),
        mount_point: disk.mount_point.clone(),
        used_percent: pct.min(100) as u8,
        timestamp,
    })
}
