//! VSMB shares (Windows guests).
//!
//! A share is keyed by host path and access mode. Adding an existing key
//! takes another reference instead of a second host-side share; the host
//! share goes away when the last reference is released.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use uvmagent_core::error::Result;
use uvmagent_core::host::{HostModifyRequest, VsmbOptions};

use super::UtilityVM;

/// Prefix of guest-visible VSMB paths.
pub const VSMB_PATH_PREFIX: &str = r"\\?\VMSMB\VSMB-{";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(super) struct VsmbKey {
    pub(super) host_path: PathBuf,
    pub(super) read_only: bool,
}

impl VsmbKey {
    pub(super) fn new(host_path: &Path, read_only: bool) -> Self {
        Self {
            host_path: host_path.to_path_buf(),
            read_only,
        }
    }

    pub(super) fn lock_key(&self) -> String {
        format!(
            "vsmb/{}/{}",
            if self.read_only { "ro" } else { "rw" },
            self.host_path.display()
        )
    }
}

/// A host-side VSMB share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VsmbShare {
    pub name: String,
    pub host_path: PathBuf,
    pub guest_path: String,
    pub options: VsmbOptions,
    pub ref_count: u32,
}

impl UtilityVM {
    /// Add (or take another reference on) a VSMB share of `host_path`.
    ///
    /// Callers must hold the resource lock for the share's key.
    pub(super) async fn add_vsmb(
        &self,
        host_path: &Path,
        options: VsmbOptions,
        cancel: &CancellationToken,
    ) -> Result<VsmbShare> {
        let key = VsmbKey::new(host_path, options.read_only);

        let name = {
            let mut state = self.state.lock();
            if let Some(share) = state.vsmb_shares.get_mut(&key) {
                share.ref_count += 1;
                tracing::debug!(name = %share.name, ref_count = share.ref_count, "Reusing VSMB share");
                return Ok(share.clone());
            }
            state.vsmb_counter += 1;
            format!("s{}", state.vsmb_counter)
        };

        self.host_add(
            &HostModifyRequest::AddVsmbShare {
                name: name.clone(),
                host_path: host_path.display().to_string(),
                options,
            },
            HostModifyRequest::RemoveVsmbShare { name: name.clone() },
            cancel,
        )
        .await?;

        let share = VsmbShare {
            guest_path: self.vsmb_guest_path(&name),
            name,
            host_path: host_path.to_path_buf(),
            options,
            ref_count: 1,
        };
        self.state.lock().vsmb_shares.insert(key, share.clone());
        Ok(share)
    }

    /// Drop one reference; removes the host share on the last one.
    ///
    /// Unknown shares are ignored. Callers must hold the resource lock.
    pub(super) async fn release_vsmb(&self, host_path: &Path, read_only: bool) {
        let key = VsmbKey::new(host_path, read_only);
        let removed = {
            let mut state = self.state.lock();
            match state.vsmb_shares.get_mut(&key) {
                Some(share) if share.ref_count > 1 => {
                    share.ref_count -= 1;
                    None
                }
                Some(_) => state.vsmb_shares.remove(&key),
                None => None,
            }
        };

        if let Some(share) = removed {
            self.host_release(&HostModifyRequest::RemoveVsmbShare { name: share.name })
                .await;
        }
    }

    pub(super) fn find_vsmb(&self, host_path: &Path, read_only: bool) -> Option<VsmbShare> {
        let key = VsmbKey::new(host_path, read_only);
        self.state.lock().vsmb_shares.get(&key).cloned()
    }

    /// Guest-visible path of the VSMB share named `name`.
    fn vsmb_guest_path(&self, name: &str) -> String {
        format!(r"{}{}}}\{}", VSMB_PATH_PREFIX, self.vsmb_guid, name)
    }
}
