//! UVM Agent - compute agent binary.
//!
//! Serves the ComputeAgent gRPC service for one Utility VM on
//! `<socket_dir>/computeagent-<vm_id>.sock`. Exits non-zero if serving
//! fails so the host can restart it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use uvmagent_core::{AgentConfig, GuestOs, LogFormat};
use uvmagent_runtime::{
    EndpointAttachment, EndpointStore, UnixComputeSystem, UnixGuestChannel, UtilityVM,
};
use uvmagent_server::{ComputeAgentServer, ComputeAgentService};

/// UVM resource-attachment agent
#[derive(Parser, Debug)]
#[command(name = "uvmagent", about = "UVM compute agent", version)]
struct Args {
    /// YAML config file. Flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// ID of the Utility VM to serve.
    #[arg(long)]
    vm_id: Option<String>,

    /// Guest OS family (linux or windows).
    #[arg(long)]
    guest_os: Option<GuestOs>,

    /// Directory for the compute agent socket.
    #[arg(long)]
    socket_dir: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::load(path)?,
            None => AgentConfig::default(),
        };

        if let Some(vm_id) = self.vm_id {
            config.vm_id = vm_id;
        }
        if let Some(guest_os) = self.guest_os {
            config.guest_os = guest_os;
        }
        if let Some(socket_dir) = self.socket_dir {
            config.socket_dir = socket_dir;
        }
        if let Some(log_format) = self.log_format {
            config.log_format = log_format;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(config: &AgentConfig) {
    let default_level = tracing::Level::from(config.log_level).as_str().to_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn run(config: AgentConfig) -> anyhow::Result<()> {
    tracing::info!(
        vm_id = %config.vm_id,
        guest_os = %config.guest_os,
        socket_dir = %config.socket_dir.display(),
        version = uvmagent_runtime::VERSION,
        "Starting UVM compute agent"
    );

    let guest = Arc::new(UnixGuestChannel::new(
        &config.guest_socket,
        config.guest_timeout(),
    ));
    let host = Arc::new(UnixComputeSystem::new(
        &config.host_socket,
        config.guest_timeout(),
    ));
    let vm = Arc::new(UtilityVM::new(&config.vm_id, config.guest_os, guest, host));
    let resolver = Arc::new(EndpointStore::new(&config.endpoints_file));
    let service = ComputeAgentService::new(EndpointAttachment::new(vm, resolver));

    let handle = ComputeAgentServer::for_vm(&config.socket_dir, &config.vm_id, service)
        .bind()
        .await
        .context("failed to start compute agent")?
        .serve();

    let shutdown = handle.shutdown_token();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received shutdown signal");
        shutdown.cancel();
    });

    handle.wait().await.context("compute agent stopped")?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let config = match Args::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("uvmagent: {:#}", e);
            std::process::exit(2);
        }
    };

    init_tracing(&config);

    if let Err(e) = run(config).await {
        tracing::error!(error = %format!("{:#}", e), "Compute agent exited with error");
        std::process::exit(1);
    }
}
