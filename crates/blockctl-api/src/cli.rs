//! Command line of the `blockctl-api` binary.

use crate::api::VolumeApi;
use crate::config::ApiConfig;
use crate::worker::{run_revert_worker, ChannelDispatcher, NoopExecutor};
use anyhow::Result;
use blockctl_core::VolumeStore;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Command line of the `blockctl-api` binary.
#[derive(Parser)]
#[command(name = "blockctl-api")]
#[command(about = "Block storage volume API server", long_about = None)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Run the API server and the revert worker.
    Serve {
        /// Configuration file (`.toml` or `.json`).
        #[arg(short, long, env = "BLOCKCTL_CONFIG", default_value = "/etc/blockctl/api.toml")]
        config: PathBuf,
    },
    /// Load and validate a configuration file, then print it.
    CheckConfig {
        /// Configuration file (`.toml` or `.json`).
        #[arg(short, long)]
        config: PathBuf,
    },
}

impl Cli {
    /// Execute the selected subcommand.
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Serve { ref config } => serve(config).await,
            Command::CheckConfig { ref config } => check_config(config),
        }
    }
}

async fn serve(config_path: &Path) -> Result<()> {
    let config = ApiConfig::load_or_default(config_path)?;
    config.validate()?;

    let store: Arc<dyn VolumeStore> = Arc::new(config.build_store()?);
    let (dispatcher, jobs) = ChannelDispatcher::channel(config.revert_queue_depth);
    let api = VolumeApi::new(store.clone(), Arc::new(dispatcher), &config);

    let worker_handle = tokio::spawn(run_revert_worker(store, Arc::new(NoopExecutor), jobs));
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api.serve().await {
            tracing::error!("API serve error: {}", e);
        }
    });

    tokio::select! {
        _ = worker_handle => tracing::warn!("revert worker exited"),
        _ = api_handle => {}
    }

    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = ApiConfig::from_file(path)?;
    if config.seed_path.is_some() {
        let store = config.build_store()?;
        println!("seed: {} volumes", store.volume_count());
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from(["blockctl-api", "serve", "--config", "/tmp/api.toml"]).unwrap();
        match cli.command {
            Command::Serve { config } => assert_eq!(config, PathBuf::from("/tmp/api.toml")),
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_parse_check_config_requires_path() {
        assert!(Cli::try_parse_from(["blockctl-api", "check-config"]).is_err());
    }

    #[test]
    fn test_check_config_rejects_unknown_extension() {
        assert!(check_config(Path::new("/tmp/blockctl-api.ini")).is_err());
    }
}
