//! Configuration for the e2e fixture environment
//!
//! Describes where the system under test lives (install namespace, repo
//! URLs, fixture files) and how long the given phase settles before handing
//! off. Build it programmatically - no config files needed. Environment
//! variables can override the defaults via [`FixtureConfig::from_env`].
//!
//! # Example
//!
//! ```
//! use gitops_e2e::config::FixtureConfig;
//! use std::time::Duration;
//!
//! let config = FixtureConfig::new()
//!     .argocd_namespace("argocd-e2e")
//!     .settle_delay(Duration::from_millis(500))
//!     .git_credentials("admin", "password");
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::context::RepoUrlType;
use crate::types::CredentialKind;

/// Errors from reading configuration overrides
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Fixture environment configuration
#[derive(Debug, Clone)]
pub struct FixtureConfig {
    /// Namespace the deployment-management system is installed in
    pub argocd_namespace: String,

    /// Namespace applications under test deploy into
    pub deployment_namespace: String,

    /// Host used as the TLS certificate key for the test git server
    pub repo_server_host: String,

    /// HTTPS git repository
    pub https_repo_url: String,

    /// HTTPS git repository that requires a client certificate
    pub https_client_cert_repo_url: String,

    /// SSH git repository
    pub ssh_repo_url: String,

    /// Helm chart repository
    pub helm_repo_url: String,

    /// Local git repository served over `file://`
    pub repo_dir: PathBuf,

    /// Source tree copied into `repo_dir` on every reset
    pub testdata_dir: Option<PathBuf>,

    /// Directory holding `certs/` and `testrepos/` key material
    pub fixture_dir: PathBuf,

    /// Git username for credential-backed repositories
    pub git_username: String,

    /// Git password for credential-backed repositories
    pub git_password: String,

    /// Pause before the given phase hands off
    pub settle_delay: Duration,

    /// Upper bound on waiting for the environment reset to finish
    pub reset_timeout: Duration,

    /// Field manager name for server-side apply
    pub field_manager: String,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            argocd_namespace: "argocd-e2e".to_string(),
            deployment_namespace: "argocd-e2e-apps".to_string(),
            repo_server_host: "localhost".to_string(),
            https_repo_url: "https://localhost:9443/argo-e2e/testdata.git".to_string(),
            https_client_cert_repo_url: "https://localhost:9444/argo-e2e/testdata.git".to_string(),
            ssh_repo_url: "ssh://root@localhost:2222/tmp/argo-e2e/testdata.git".to_string(),
            helm_repo_url: "https://localhost:9444/argo-e2e/testdata.git/helm-repo".to_string(),
            repo_dir: PathBuf::from("/tmp/argo-e2e/testdata.git"),
            testdata_dir: None,
            fixture_dir: PathBuf::from("test/e2e/fixture"),
            git_username: "admin".to_string(),
            git_password: "password".to_string(),
            settle_delay: Duration::from_secs(1),
            reset_timeout: Duration::from_secs(60),
            field_manager: "gitops-e2e".to_string(),
        }
    }
}

impl FixtureConfig {
    /// Create config with the standard e2e defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load defaults, then apply `ARGOCD_E2E_*` environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment, in practice)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ns) = lookup("ARGOCD_E2E_NAMESPACE") {
            config.argocd_namespace = ns;
        }
        if let Some(ns) = lookup("ARGOCD_E2E_DEPLOYMENT_NAMESPACE") {
            config.deployment_namespace = ns;
        }
        if let Some(dir) = lookup("ARGOCD_E2E_REPO_DIR") {
            config.repo_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("ARGOCD_E2E_TESTDATA_DIR") {
            config.testdata_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = lookup("ARGOCD_E2E_FIXTURE_DIR") {
            config.fixture_dir = PathBuf::from(dir);
        }
        if let Some(user) = lookup("ARGOCD_E2E_GIT_USERNAME") {
            config.git_username = user;
        }
        if let Some(password) = lookup("ARGOCD_E2E_GIT_PASSWORD") {
            config.git_password = password;
        }
        if let Some(raw) = lookup("ARGOCD_E2E_SETTLE_DELAY_MS") {
            config.settle_delay = Duration::from_millis(parse_u64("ARGOCD_E2E_SETTLE_DELAY_MS", raw)?);
        }
        if let Some(raw) = lookup("ARGOCD_E2E_RESET_TIMEOUT_SECS") {
            config.reset_timeout = Duration::from_secs(parse_u64("ARGOCD_E2E_RESET_TIMEOUT_SECS", raw)?);
        }

        Ok(config)
    }

    /// Set the install namespace
    pub fn argocd_namespace(mut self, ns: impl Into<String>) -> Self {
        self.argocd_namespace = ns.into();
        self
    }

    /// Set the namespace applications deploy into
    pub fn deployment_namespace(mut self, ns: impl Into<String>) -> Self {
        self.deployment_namespace = ns.into();
        self
    }

    /// Set the local git repository path
    pub fn repo_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.repo_dir = dir.into();
        self
    }

    /// Set the source tree copied into the local repository on reset
    pub fn testdata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.testdata_dir = Some(dir.into());
        self
    }

    /// Set the fixture key material directory
    pub fn fixture_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fixture_dir = dir.into();
        self
    }

    /// Set git username and password
    pub fn git_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.git_username = username.into();
        self.git_password = password.into();
        self
    }

    /// Set the settling delay before handoff
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the reset timeout
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Repository URL for a URL type
    pub fn repo_url(&self, url_type: RepoUrlType) -> String {
        match url_type {
            RepoUrlType::File => format!("file://{}", self.repo_dir.display()),
            RepoUrlType::Https => self.https_repo_url.clone(),
            RepoUrlType::Ssh => self.ssh_repo_url.clone(),
            RepoUrlType::Helm => self.helm_repo_url.clone(),
        }
    }

    /// URL prefix a credential template applies to
    ///
    /// Templates match every repository below the parent of the test repo.
    pub fn credentials_url(&self, kind: CredentialKind) -> String {
        let url = match kind {
            CredentialKind::HttpsUserPass => &self.https_repo_url,
            CredentialKind::HttpsClientCert => &self.https_client_cert_repo_url,
            CredentialKind::Ssh => &self.ssh_repo_url,
        };
        parent_url(url).to_string()
    }

    /// CA certificate trusted for the test git server
    pub fn ca_cert_path(&self) -> PathBuf {
        self.fixture_dir.join("certs").join("argocd-test-ca.crt")
    }

    /// TLS client certificate
    pub fn client_cert_path(&self) -> PathBuf {
        self.fixture_dir.join("certs").join("argocd-test-client.crt")
    }

    /// TLS client key
    pub fn client_key_path(&self) -> PathBuf {
        self.fixture_dir.join("certs").join("argocd-test-client.key")
    }

    /// SSH private key for the test git server
    pub fn ssh_private_key_path(&self) -> PathBuf {
        self.fixture_dir.join("testrepos").join("id_rsa")
    }

    /// SSH known hosts entries for the test git server
    pub fn ssh_known_hosts_path(&self) -> PathBuf {
        self.fixture_dir.join("testrepos").join("ssh_known_hosts")
    }

    /// Whether a local testdata tree is configured and present
    pub fn has_testdata(&self) -> bool {
        self.testdata_dir.as_deref().is_some_and(Path::exists)
    }
}

fn parse_u64(var: &'static str, raw: String) -> Result<u64, ConfigError> {
    raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
        var,
        value: raw.clone(),
        reason: e.to_string(),
    })
}

fn parent_url(url: &str) -> &str {
    url.rsplit_once('/').map_or(url, |(parent, _)| parent)
}
