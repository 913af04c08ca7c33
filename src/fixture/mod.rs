//! Fixture collaborators
//!
//! The given phase never touches shared test state directly. Each kind of
//! state lives behind a trait, and a [`Fixtures`] bundle of those traits is
//! injected into every [`Context`](crate::Context):
//! - [`EnvironmentReset`]: wipe state left by a previous test
//! - [`TrustStore`]: custom CA certificates and SSH known hosts
//! - [`RepositoryRegistry`]: repositories and credential templates
//! - [`ProjectRegistry`]: `AppProject` specs
//! - [`SettingsStore`]: resource overrides and filters
//! - [`PluginRegistry`]: config management plugins
//!
//! Stores are shared, last-write-wins, and unlocked from the caller's point
//! of view. Isolation between tests comes from the reset alone.
//!
//! Two backends implement every trait: [`InMemoryFixtures`] records calls
//! in-process, [`ClusterFixtures`] writes to a live cluster.

mod cluster;
pub mod local_repo;
mod memory;

pub use cluster::ClusterFixtures;
pub use memory::{FixtureCall, InMemoryFixtures, RepoEntry, RepoKey};

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{ConfigError, FixtureConfig};
use crate::context::RepoUrlType;
use crate::eventually::ConditionError;
use crate::types::{AppProjectSpec, ConfigManagementPlugin, CredentialKind, ResourceOverride, ResourcesFilter};

/// Errors from fixture operations
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("Failed to create Kubernetes client: {0}")]
    Client(String),

    #[error("Failed to start fixture runtime: {0}")]
    Runtime(String),

    #[error("Kubernetes request failed: {0}")]
    Kube(String),

    #[error("Failed to read fixture file {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON for {what}: {source}")]
    Json {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("git {command} failed: {reason}")]
    Git { command: String, reason: String },

    #[error("Environment not clean: {0}")]
    Reset(#[from] ConditionError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Rejected(String),
}

/// Brings the shared environment back to a clean baseline
pub trait EnvironmentReset: Send + Sync {
    /// Remove everything a previous test may have left behind
    fn ensure_clean_state(&self) -> Result<(), FixtureError>;
}

/// Process-wide TLS and SSH trust
pub trait TrustStore: Send + Sync {
    /// Trust the test CA certificate (idempotent)
    fn add_custom_ca_cert(&self) -> Result<(), FixtureError>;

    /// Trust the test git server's SSH host keys (idempotent)
    fn add_custom_ssh_known_hosts(&self) -> Result<(), FixtureError>;
}

/// Repositories and credential templates, keyed by URL type and flags
pub trait RepositoryRegistry: Send + Sync {
    /// Register the repository for `url_type`
    fn add_repo(&self, url_type: RepoUrlType, insecure: bool, with_creds: bool) -> Result<(), FixtureError>;

    /// Register the HTTPS repository that requires a TLS client certificate
    fn add_repo_client_cert(&self, insecure: bool) -> Result<(), FixtureError>;

    /// Register the Helm chart repository under `name`
    fn add_helm_repo(&self, name: &str) -> Result<(), FixtureError>;

    /// Add a credential template with no repository behind it
    fn add_credentials(&self, kind: CredentialKind) -> Result<(), FixtureError>;
}

/// `AppProject` specs by project name
pub trait ProjectRegistry: Send + Sync {
    /// Overwrite the spec of `project`
    fn set_project_spec(&self, project: &str, spec: AppProjectSpec) -> Result<(), FixtureError>;
}

/// Global resource settings
pub trait SettingsStore: Send + Sync {
    /// Replace all resource overrides
    fn set_resource_overrides(&self, overrides: BTreeMap<String, ResourceOverride>) -> Result<(), FixtureError>;

    /// Replace the resource filter
    fn set_resource_filter(&self, filter: ResourcesFilter) -> Result<(), FixtureError>;
}

/// Config management plugins by name
pub trait PluginRegistry: Send + Sync {
    /// Register `plugin`, replacing any plugin with the same name
    fn register_plugin(&self, plugin: &ConfigManagementPlugin) -> Result<(), FixtureError>;
}

/// A type that can back every collaborator at once
pub trait FixtureBackend:
    EnvironmentReset + TrustStore + RepositoryRegistry + ProjectRegistry + SettingsStore + PluginRegistry
{
}

impl<T> FixtureBackend for T where
    T: EnvironmentReset + TrustStore + RepositoryRegistry + ProjectRegistry + SettingsStore + PluginRegistry
{
}

/// The collaborators a [`Context`](crate::Context) is wired to
///
/// Cheap to clone; every collaborator is shared.
///
/// # Example
///
/// ```
/// use gitops_e2e::config::FixtureConfig;
/// use gitops_e2e::fixture::{Fixtures, InMemoryFixtures};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let backend = Arc::new(InMemoryFixtures::new());
/// let fixtures = Fixtures::from_backend(
///     FixtureConfig::new().settle_delay(Duration::ZERO),
///     backend.clone(),
/// );
/// ```
#[derive(Clone)]
pub struct Fixtures {
    pub(crate) config: Arc<FixtureConfig>,
    pub(crate) reset: Arc<dyn EnvironmentReset>,
    pub(crate) trust: Arc<dyn TrustStore>,
    pub(crate) repos: Arc<dyn RepositoryRegistry>,
    pub(crate) projects: Arc<dyn ProjectRegistry>,
    pub(crate) settings: Arc<dyn SettingsStore>,
    pub(crate) plugins: Arc<dyn PluginRegistry>,
}

impl Fixtures {
    /// Wire every collaborator to one backend
    pub fn from_backend<B>(config: FixtureConfig, backend: Arc<B>) -> Self
    where
        B: FixtureBackend + 'static,
    {
        Self {
            config: Arc::new(config),
            reset: backend.clone(),
            trust: backend.clone(),
            repos: backend.clone(),
            projects: backend.clone(),
            settings: backend.clone(),
            plugins: backend,
        }
    }

    /// Connect to the cluster in the current kubeconfig context, configured
    /// from `ARGOCD_E2E_*` environment variables
    ///
    /// Must be called outside any tokio runtime.
    pub fn connect() -> Result<Self, FixtureError> {
        let config = FixtureConfig::from_env()?;
        let backend = ClusterFixtures::connect(config.clone())?;
        Ok(Self::from_backend(config, Arc::new(backend)))
    }

    /// Shared configuration
    pub fn config(&self) -> &FixtureConfig {
        &self.config
    }

    /// Replace the reset collaborator
    #[must_use]
    pub fn with_reset(mut self, reset: Arc<dyn EnvironmentReset>) -> Self {
        self.reset = reset;
        self
    }

    /// Replace the trust store
    #[must_use]
    pub fn with_trust_store(mut self, trust: Arc<dyn TrustStore>) -> Self {
        self.trust = trust;
        self
    }

    /// Replace the repository registry
    #[must_use]
    pub fn with_repositories(mut self, repos: Arc<dyn RepositoryRegistry>) -> Self {
        self.repos = repos;
        self
    }

    /// Replace the project registry
    #[must_use]
    pub fn with_projects(mut self, projects: Arc<dyn ProjectRegistry>) -> Self {
        self.projects = projects;
        self
    }

    /// Replace the settings store
    #[must_use]
    pub fn with_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the plugin registry
    #[must_use]
    pub fn with_plugins(mut self, plugins: Arc<dyn PluginRegistry>) -> Self {
        self.plugins = plugins;
        self
    }
}

impl fmt::Debug for Fixtures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fixtures")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopReset;

    impl EnvironmentReset for NoopReset {
        fn ensure_clean_state(&self) -> Result<(), FixtureError> {
            Ok(())
        }
    }

    #[test]
    fn test_from_backend_shares_config() {
        let fixtures = Fixtures::from_backend(
            FixtureConfig::new().argocd_namespace("argocd"),
            Arc::new(InMemoryFixtures::new()),
        );
        let cloned = fixtures.clone();

        assert_eq!(cloned.config().argocd_namespace, "argocd");
        assert!(Arc::ptr_eq(&fixtures.config, &cloned.config));
    }

    #[test]
    fn test_with_reset_swaps_only_reset() {
        let backend = Arc::new(InMemoryFixtures::new());
        let fixtures = Fixtures::from_backend(FixtureConfig::new(), backend.clone())
            .with_reset(Arc::new(NoopReset));

        fixtures.reset.ensure_clean_state().unwrap();
        fixtures.trust.add_custom_ca_cert().unwrap();

        assert_eq!(backend.calls(), vec![FixtureCall::AddCustomCaCert]);
    }

    #[test]
    fn test_fixture_error_display() {
        let err = FixtureError::Git {
            command: "commit".to_string(),
            reason: "nothing to commit".to_string(),
        };
        assert_eq!(err.to_string(), "git commit failed: nothing to commit");

        let err = FixtureError::ReadFile {
            path: PathBuf::from("/fx/id_rsa"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("/fx/id_rsa"));

        let err = FixtureError::Rejected("store offline".to_string());
        assert_eq!(err.to_string(), "store offline");
    }
}
