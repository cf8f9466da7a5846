//! Server configuration, loaded from TOML or JSON.

use blockctl_core::filter::{DEFAULT_SNAPSHOT_FILTERS, DEFAULT_VOLUME_FILTERS};
use blockctl_core::listing::DEFAULT_MAX_LIMIT;
use blockctl_core::memory::{Fixture, MemoryStore};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Runtime configuration of the volume API server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Listen address.
    pub bind_addr: SocketAddr,
    /// Cap on page size for list requests.
    pub max_limit: usize,
    /// Filter keys non-admin callers may use on volume listings.
    pub volume_filters: Vec<String>,
    /// Filter keys non-admin callers may use on snapshot listings.
    pub snapshot_filters: Vec<String>,
    /// Reject `all_tenants` from non-admins instead of ignoring it.
    pub strict_tenant_scope: bool,
    /// Root of the links placed in responses.
    pub public_endpoint: String,
    /// JSON fixture of volumes and snapshots loaded at startup.
    pub seed_path: Option<PathBuf>,
    /// Revert jobs that may wait for the worker before dispatch fails.
    pub revert_queue_depth: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8776)),
            max_limit: DEFAULT_MAX_LIMIT,
            volume_filters: DEFAULT_VOLUME_FILTERS.iter().map(|s| s.to_string()).collect(),
            snapshot_filters: DEFAULT_SNAPSHOT_FILTERS.iter().map(|s| s.to_string()).collect(),
            strict_tenant_scope: false,
            public_endpoint: String::from("http://localhost:8776"),
            seed_path: None,
            revert_queue_depth: 64,
        }
    }
}

impl ApiConfig {
    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: ApiConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or fall back to defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::warn!("Config file not found, using defaults: {}", path.display());
            Ok(Self::default())
        }
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.max_limit > 0, "max_limit must be positive");
        anyhow::ensure!(self.revert_queue_depth > 0, "revert_queue_depth must be positive");
        anyhow::ensure!(
            self.public_endpoint.starts_with("http://") || self.public_endpoint.starts_with("https://"),
            "public_endpoint must be an http(s) URL, got {:?}",
            self.public_endpoint
        );
        Ok(())
    }

    /// Build the in-memory store, seeded from `seed_path` when set.
    pub fn build_store(&self) -> anyhow::Result<MemoryStore> {
        let Some(path) = &self.seed_path else {
            return Ok(MemoryStore::new());
        };
        let contents = std::fs::read_to_string(path)?;
        let fixture: Fixture = serde_json::from_str(&contents)?;
        let volumes = fixture.volumes.len();
        let store = MemoryStore::from_fixture(fixture)?;
        tracing::info!(volumes, path = %path.display(), "seeded volume store");
        Ok(store)
    }
}
