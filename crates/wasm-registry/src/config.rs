//! Pull configuration.

use std::path::{Path, PathBuf};

use crate::Result;
use crate::endpoint::{RegistryEndpoint, Scheme};

/// Environment variable naming the working directory.
pub const WORKDIR_ENV: &str = "WASM_REGISTRY_WORKDIR";

/// Environment variable listing registries reached over plain HTTP (comma separated).
pub const INSECURE_ENV: &str = "WASM_REGISTRY_INSECURE";

/// Working directory used when none is configured.
pub const DEFAULT_WORKDIR: &str = ".wasm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullConfig {
    /// Directory the verified artifacts are written to.
    pub workdir: PathBuf,
    /// Registries (`host[:port]`) reached over `http://`.
    pub insecure_registries: Vec<String>,
    pub user_agent: String,
}

impl PullConfig {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            insecure_registries: Vec::new(),
            user_agent: concat!("wasm-registry/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Read [`WORKDIR_ENV`] and [`INSECURE_ENV`] from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let workdir = lookup(WORKDIR_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_WORKDIR.to_string());

        let mut config = Self::new(workdir);
        if let Some(list) = lookup(INSECURE_ENV) {
            for host in list.split(',') {
                config = config.with_insecure_registry(host);
            }
        }
        config
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Reach `registry` over plain HTTP. Blank names are ignored.
    pub fn with_insecure_registry(mut self, registry: &str) -> Self {
        let registry = registry.trim();
        if !registry.is_empty() && !self.is_insecure(registry) {
            self.insecure_registries.push(registry.to_string());
        }
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn is_insecure(&self, registry: &str) -> bool {
        self.insecure_registries.iter().any(|r| r == registry)
    }

    pub fn endpoint_for(&self, registry: &str) -> Result<RegistryEndpoint> {
        let scheme = if self.is_insecure(registry) {
            Scheme::Http
        } else {
            Scheme::Https
        };
        RegistryEndpoint::new(registry, scheme)
    }
}

impl Default for PullConfig {
    fn default() -> Self {
        Self::new(DEFAULT_WORKDIR)
    }
}
