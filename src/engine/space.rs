//! Free-space probing for take storage

use std::path::{Path, PathBuf};

use sysinfo::Disks;

use crate::error::{FourtrackError, Result};

/// Reports free bytes on the volume holding a path
pub trait SpaceProbe: Send + Sync {
    fn available_bytes(&self, path: &Path) -> Result<u64>;
}

/// Queries mounted disks through sysinfo
///
/// The volume is the disk whose mount point is the longest prefix of the
/// (canonicalized) path.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskSpaceProbe;

impl SpaceProbe for DiskSpaceProbe {
    fn available_bytes(&self, path: &Path) -> Result<u64> {
        let target = existing_ancestor(path);
        let disks = Disks::new_with_refreshed_list();

        disks
            .list()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
            .ok_or_else(|| FourtrackError::EngineSetup {
                reason: format!("no mounted volume holds {}", path.display()),
            })
    }
}

/// Takes directories may not exist yet; probe the closest parent that does
fn existing_ancestor(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    absolute
        .ancestors()
        .find_map(|p| p.canonicalize().ok())
        .unwrap_or(absolute)
}
