//! Plan9 file-server shares (Linux guests).
//!
//! Shares are keyed by guest mount path: one share per mount point.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use uvmagent_core::error::{AgentError, Result};
use uvmagent_core::host::{HostModifyRequest, Plan9Flags};

use super::UtilityVM;

/// vsock port the host 9P server listens on.
pub const PLAN9_PORT: u32 = 564;

/// A host-side Plan9 share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan9Share {
    pub name: String,
    pub host_path: PathBuf,
    pub guest_path: String,
    pub port: u32,
    pub flags: Plan9Flags,
}

impl UtilityVM {
    /// Add a Plan9 share of `host_path` mounted at `guest_path`.
    ///
    /// Callers must hold the resource lock for `guest_path`.
    pub(super) async fn add_plan9(
        &self,
        host_path: &Path,
        guest_path: &str,
        flags: Plan9Flags,
        cancel: &CancellationToken,
    ) -> Result<Plan9Share> {
        let name = {
            let mut state = self.state.lock();
            if let Some(share) = state.plan9_shares.get(guest_path) {
                return Err(AgentError::ShareError {
                    path: host_path.display().to_string(),
                    message: format!(
                        "guest path {} already shares {}",
                        guest_path,
                        share.host_path.display()
                    ),
                });
            }
            state.plan9_counter += 1;
            state.plan9_counter.to_string()
        };

        self.host_add(
            &HostModifyRequest::AddPlan9Share {
                name: name.clone(),
                host_path: host_path.display().to_string(),
                port: PLAN9_PORT,
                flags: flags.clone(),
            },
            HostModifyRequest::RemovePlan9Share {
                name: name.clone(),
                port: PLAN9_PORT,
            },
            cancel,
        )
        .await?;

        let share = Plan9Share {
            name,
            host_path: host_path.to_path_buf(),
            guest_path: guest_path.to_string(),
            port: PLAN9_PORT,
            flags,
        };
        self.state
            .lock()
            .plan9_shares
            .insert(guest_path.to_string(), share.clone());
        Ok(share)
    }

    /// Remove the share mounted at `guest_path`. Unknown paths are ignored.
    pub(super) async fn release_plan9(&self, guest_path: &str) {
        let removed = self.state.lock().plan9_shares.remove(guest_path);
        if let Some(share) = removed {
            self.host_release(&HostModifyRequest::RemovePlan9Share {
                name: share.name,
                port: share.port,
            })
            .await;
        }
    }

    pub(super) fn find_plan9(&self, guest_path: &str) -> Option<Plan9Share> {
        self.state.lock().plan9_shares.get(guest_path).cloned()
    }
}
