//! Host-to-guest share requests.
//!
//! The share mechanism is never caller-supplied: it follows from the guest
//! OS family. Linux guests sharing a single file get the file's parent
//! directory with an allow-list containing only that file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AgentError, Result};
use crate::guest::GuestOs;
use crate::host::{Plan9Flags, VsmbOptions};

/// How a host path is exposed to the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareMechanism {
    /// Block-level remote share (Windows guests).
    Vsmb(VsmbOptions),
    /// 9P file server (Linux guests).
    Plan9(Plan9Flags),
}

/// A resolved share: what is exposed, where, and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRequest {
    /// Host path actually exported (parent dir for single-file Plan9 shares).
    pub host_path: PathBuf,
    pub guest_path: String,
    pub read_only: bool,
    pub mechanism: ShareMechanism,
}

impl ShareRequest {
    /// Build the share for `host_path` given the guest family.
    ///
    /// `is_dir` is only consulted for Linux guests.
    pub fn plan(
        os: GuestOs,
        host_path: &Path,
        guest_path: &str,
        read_only: bool,
        is_dir: bool,
    ) -> Result<Self> {
        let (host_path, mechanism) = match os {
            GuestOs::Windows => (
                host_path.to_path_buf(),
                ShareMechanism::Vsmb(VsmbOptions::default_for(read_only)),
            ),
            GuestOs::Linux if is_dir => (
                host_path.to_path_buf(),
                ShareMechanism::Plan9(Plan9Flags {
                    read_only,
                    ..Plan9Flags::default()
                }),
            ),
            GuestOs::Linux => {
                let (parent, file_name) = split_file_path(host_path)?;
                (
                    parent,
                    ShareMechanism::Plan9(Plan9Flags {
                        read_only,
                        restrict_file_access: true,
                        allowed_names: vec![file_name],
                    }),
                )
            }
        };

        Ok(Self {
            host_path,
            guest_path: guest_path.to_string(),
            read_only,
            mechanism,
        })
    }
}

/// Split a file path into its parent directory and file name.
pub fn split_file_path(path: &Path) -> Result<(PathBuf, String)> {
    let share_error = |message: &str| AgentError::ShareError {
        path: path.display().to_string(),
        message: message.to_string(),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| share_error("path has no file name"))?
        .to_str()
        .ok_or_else(|| share_error("file name is not valid UTF-8"))?;
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((parent, file_name.to_string()))
}
