//! TOML configuration.
//!
//! ```toml
//! local_repository = "/var/cache/jvres"
//!
//! [[repositories]]
//! name = "internal"
//! url = "https://maven.example.com/releases"
//! priority = 10
//!
//! [resolver]
//! max_concurrent_fetches = 4
//! include_optional = false
//! request_timeout_secs = 10
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cache::{self, CacheError, LocalCache};
use crate::gateway::FetchGateway;
use crate::registry::{self, RegistryError, Repository};
use crate::resolver::{ResolveOptions, Resolver, DEFAULT_MAX_CONCURRENT_FETCHES};

pub const MAVEN_CENTRAL_URL: &str = "https://repo1.maven.org/maven2/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {origin}: {source}")]
    Parse {
        origin: String,
        source: toml::de::Error,
    },
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Repository definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryConfig {
    pub name: String,
    /// Base URL, `http(s)://` or `file://`.
    pub url: String,
    /// Lower values are consulted first.
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    100
}

impl RepositoryConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            priority: default_priority(),
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn maven_central() -> Self {
        Self::new("central", MAVEN_CENTRAL_URL)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResolverSection {
    pub max_concurrent_fetches: usize,
    pub include_optional: bool,
    pub request_timeout_secs: u64,
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            include_optional: true,
            request_timeout_secs: registry::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResolverConfig {
    /// Cache root; `~/.jv/repository` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_repository: Option<PathBuf>,
    pub repositories: Vec<RepositoryConfig>,
    pub resolver: ResolverSection,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            local_repository: None,
            repositories: vec![RepositoryConfig::maven_central()],
            resolver: ResolverSection::default(),
        }
    }
}

impl ResolverConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            origin: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "loaded resolver config");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            origin: "<inline>".to_string(),
            source,
        })
    }

    pub fn local_repository_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.local_repository {
            Some(path) => Ok(path.clone()),
            None => Ok(cache::default_root()?),
        }
    }

    /// Repositories in consultation order: ascending priority, declaration
    /// order among equals, later duplicates of a name dropped.
    pub fn sorted_repositories(&self) -> Vec<RepositoryConfig> {
        let mut seen = HashSet::new();
        let mut repositories: Vec<RepositoryConfig> = self
            .repositories
            .iter()
            .filter(|repository| seen.insert(repository.name.as_str()))
            .cloned()
            .collect();
        repositories.sort_by_key(|repository| repository.priority);
        repositories
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.resolver.request_timeout_secs.max(1))
    }

    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            max_concurrent_fetches: self.resolver.max_concurrent_fetches.max(1),
            include_optional: self.resolver.include_optional,
        }
    }

    pub fn build_gateway(&self) -> Result<FetchGateway, ConfigError> {
        let cache = Arc::new(LocalCache::new(self.local_repository_path()?)?);
        let timeout = self.request_timeout();
        let repositories = self
            .sorted_repositories()
            .iter()
            .map(|repository| registry::repository_from_config(repository, timeout))
            .collect::<Result<Vec<Arc<dyn Repository>>, _>>()?;
        Ok(FetchGateway::new(cache, repositories))
    }

    pub fn build_resolver(&self) -> Result<Resolver, ConfigError> {
        let gateway = Arc::new(self.build_gateway()?);
        Ok(Resolver::with_options(gateway, self.resolve_options()))
    }
}
