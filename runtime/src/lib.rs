//! UVM Agent Runtime - resource attachment for a running Utility VM.
//!
//! This crate provides the guest and host channels, endpoint resolution,
//! and the Utility VM bookkeeping that attaches NICs and shares host paths
//! with compensating rollback on failure.

#![allow(clippy::result_large_err)]

pub mod attach;
pub mod endpoint;
pub mod guest;
pub mod host;
pub mod sync;
pub mod uvm;

mod uds;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export common types
pub use attach::EndpointAttachment;
pub use endpoint::{EndpointResolver, EndpointStore};
pub use guest::{GuestChannel, UnixGuestChannel};
pub use host::{ComputeSystem, UnixComputeSystem};
pub use sync::{cancellable, KeyedLock};
pub use uvm::{Plan9Share, UtilityVM, VsmbShare, PLAN9_PORT};

/// UVM Agent Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
