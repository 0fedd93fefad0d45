//! Share manager: expose a host path inside the guest.
//!
//! Each share allocates a host-side object and then registers the mapping
//! with the guest. If registration fails or is cancelled, the host object
//! is released before the error is returned.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use uvmagent_core::error::{AgentError, Result};
use uvmagent_core::guest::{GuestOs, GuestResourceRequest, MappedDirectory, RequestType};
use uvmagent_core::host::{Plan9Flags, VsmbOptions};
use uvmagent_core::share::{ShareMechanism, ShareRequest};

use super::vsmb::VsmbKey;
use super::UtilityVM;

fn guest_path_lock_key(guest_path: &str) -> String {
    format!("mapping/{}", guest_path)
}

impl UtilityVM {
    /// Share `host_path` into the guest at `guest_path`.
    ///
    /// On success the host share and the guest mapping both exist. On error
    /// no host-side share object created by this call remains.
    pub async fn share(
        &self,
        host_path: &Path,
        guest_path: &str,
        read_only: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tracing::info!(
            vm_id = %self.id,
            host_path = %host_path.display(),
            guest_path,
            read_only,
            os = %self.os,
            "Sharing host path into guest"
        );

        let _mapping_guard = self
            .resource_locks
            .lock(guest_path_lock_key(guest_path))
            .await;

        let is_dir = match self.os {
            GuestOs::Windows => false,
            GuestOs::Linux => {
                tokio::fs::metadata(host_path)
                    .await
                    .map_err(|e| AgentError::ShareError {
                        path: host_path.display().to_string(),
                        message: format!("could not open path on host: {}", e),
                    })?
                    .is_dir()
            }
        };

        let plan = ShareRequest::plan(self.os, host_path, guest_path, read_only, is_dir)?;
        match plan.mechanism {
            ShareMechanism::Vsmb(options) => {
                self.share_vsmb(&plan.host_path, guest_path, options, cancel)
                    .await
            }
            ShareMechanism::Plan9(flags) => {
                self.share_plan9(&plan.host_path, guest_path, flags, cancel)
                    .await
            }
        }
    }

    async fn share_vsmb(
        &self,
        host_path: &Path,
        guest_path: &str,
        options: VsmbOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let read_only = options.read_only;
        let existing = self.state.lock().vsmb_mappings.get(guest_path).cloned();
        if let Some(existing) = existing {
            return Err(AgentError::ShareError {
                path: host_path.display().to_string(),
                message: format!(
                    "guest path {} already maps {}",
                    guest_path,
                    existing.host_path.display()
                ),
            });
        }

        let key = VsmbKey::new(host_path, read_only);
        let _share_guard = self.resource_locks.lock(key.lock_key()).await;

        let share = self.add_vsmb(host_path, options, cancel).await?;

        let mapping = MappedDirectory {
            host_path: share.guest_path.clone(),
            container_path: guest_path.to_string(),
            read_only,
            share_name: None,
            port: None,
        };

        if let Err(e) = self
            .guest_request(
                &GuestResourceRequest::mapped_directory(RequestType::Add, mapping.clone()),
                cancel,
            )
            .await
        {
            tracing::warn!(
                vm_id = %self.id,
                share = %share.name,
                guest_path,
                error = %e,
                "Guest mapping failed, releasing VSMB share"
            );
            self.guest_undo_if_ambiguous(
                &e,
                &GuestResourceRequest::mapped_directory(RequestType::Remove, mapping),
            )
            .await;
            self.release_vsmb(host_path, read_only).await;
            return Err(e);
        }

        self.state
            .lock()
            .vsmb_mappings
            .insert(guest_path.to_string(), key);
        Ok(())
    }

    async fn share_plan9(
        &self,
        host_path: &Path,
        guest_path: &str,
        flags: Plan9Flags,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let read_only = flags.read_only;
        let share = self.add_plan9(host_path, guest_path, flags, cancel).await?;

        let mapping = MappedDirectory {
            host_path: share.name.clone(),
            container_path: guest_path.to_string(),
            read_only,
            share_name: Some(share.name.clone()),
            port: Some(share.port),
        };

        if let Err(e) = self
            .guest_request(
                &GuestResourceRequest::mapped_directory(RequestType::Add, mapping.clone()),
                cancel,
            )
            .await
        {
            tracing::warn!(
                vm_id = %self.id,
                share = %share.name,
                guest_path,
                error = %e,
                "Guest mapping failed, releasing Plan9 share"
            );
            self.guest_undo_if_ambiguous(
                &e,
                &GuestResourceRequest::mapped_directory(RequestType::Remove, mapping),
            )
            .await;
            self.release_plan9(guest_path).await;
            return Err(e);
        }

        Ok(())
    }

    /// Remove the mapping at `guest_path` and release its host share.
    ///
    /// Unknown guest paths are a successful no-op. If the guest refuses the
    /// removal, the share stays so the call can be retried.
    pub async fn unshare(&self, guest_path: &str, cancel: &CancellationToken) -> Result<()> {
        let _mapping_guard = self
            .resource_locks
            .lock(guest_path_lock_key(guest_path))
            .await;

        match self.os {
            GuestOs::Windows => {
                let key = self.state.lock().vsmb_mappings.get(guest_path).cloned();
                let Some(key) = key else {
                    return Ok(());
                };
                let _share_guard = self.resource_locks.lock(key.lock_key()).await;
                let Some(share) = self.find_vsmb(&key.host_path, key.read_only) else {
                    self.state.lock().vsmb_mappings.remove(guest_path);
                    return Ok(());
                };

                self.guest_request(
                    &GuestResourceRequest::mapped_directory(
                        RequestType::Remove,
                        MappedDirectory {
                            host_path: share.guest_path,
                            container_path: guest_path.to_string(),
                            read_only: key.read_only,
                            share_name: None,
                            port: None,
                        },
                    ),
                    cancel,
                )
                .await?;

                self.state.lock().vsmb_mappings.remove(guest_path);
                self.release_vsmb(&key.host_path, key.read_only).await;
            }
            GuestOs::Linux => {
                let Some(share) = self.find_plan9(guest_path) else {
                    return Ok(());
                };

                self.guest_request(
                    &GuestResourceRequest::mapped_directory(
                        RequestType::Remove,
                        MappedDirectory {
                            host_path: share.name.clone(),
                            container_path: guest_path.to_string(),
                            read_only: share.flags.read_only,
                            share_name: Some(share.name.clone()),
                            port: Some(share.port),
                        },
                    ),
                    cancel,
                )
                .await?;

                self.release_plan9(guest_path).await;
            }
        }

        tracing::info!(vm_id = %self.id, guest_path, "Share removed");
        Ok(())
    }
}
