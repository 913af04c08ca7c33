//! The "given" phase
//!
//! [`Context`] collects everything a test declares before it acts: where the
//! application comes from, where it goes, how it syncs, and which shared
//! fixtures (repositories, certificates, projects, settings, plugins) must
//! exist. Setters that change shared state call the fixture collaborators
//! immediately; the rest only record a value. [`Context::when`] hands the
//! finished context to the next phase.
//!
//! # Example
//!
//! ```no_run
//! use gitops_e2e::{given, Fixtures};
//!
//! let fixtures = Fixtures::connect().expect("cluster fixtures");
//!
//! let actions = given(&fixtures)
//!     .ssh_repo_url_added(true)
//!     .repo_url_type(gitops_e2e::RepoUrlType::Ssh)
//!     .path("guestbook")
//!     .prune(false)
//!     .when();
//!
//! let app = actions.application().expect("valid context");
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::actions::Actions;
use crate::config::FixtureConfig;
use crate::fixture::{FixtureError, Fixtures};
use crate::names;
use crate::types::{AppProjectSpec, ConfigManagementPlugin, CredentialKind, ResourceOverride, ResourcesFilter};

/// API server address as seen from inside the cluster
pub const KUBERNETES_INTERNAL_API_SERVER_ADDR: &str = "https://kubernetes.default.svc";

/// Where the application source is served from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoUrlType {
    /// Local git repository over `file://`
    #[default]
    File,
    Https,
    Ssh,
    /// Helm chart repository
    Helm,
}

impl RepoUrlType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Https => "https",
            Self::Ssh => "ssh",
            Self::Helm => "helm",
        }
    }
}

impl fmt::Display for RepoUrlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a test declared, as plain values
///
/// Read through [`Context::state`] or [`Actions::state`]. Only the
/// [`Context`] setters change it.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextState {
    /// Application name
    pub name: String,
    pub project: String,
    pub path: String,
    pub chart: String,
    pub revision: String,
    pub repo_url_type: RepoUrlType,
    pub local_path: String,
    pub dest_server: String,
    /// Ksonnet environment
    pub env: String,
    /// `name=value` overrides, in declaration order
    pub parameters: Vec<String>,
    /// `name=value` jsonnet top-level string arguments
    pub jsonnet_tla_str: Vec<String>,
    /// `name=value` jsonnet top-level code arguments
    pub jsonnet_tla_code: Vec<String>,
    pub name_prefix: String,
    pub name_suffix: String,
    /// `group:kind:name`
    pub resource: String,
    pub prune: bool,
    /// Don't wait for the sync to finish
    pub asynchronous: bool,
    pub force: bool,
    /// Seconds
    pub timeout: i64,
    /// Plugin forced for this application, empty for none
    pub config_management_plugin: String,
}

impl ContextState {
    fn new(name: String) -> Self {
        Self {
            name,
            project: "default".to_string(),
            path: String::new(),
            chart: String::new(),
            revision: String::new(),
            repo_url_type: RepoUrlType::File,
            local_path: String::new(),
            dest_server: KUBERNETES_INTERNAL_API_SERVER_ADDR.to_string(),
            env: String::new(),
            parameters: Vec::new(),
            jsonnet_tla_str: Vec::new(),
            jsonnet_tla_code: Vec::new(),
            name_prefix: String::new(),
            name_suffix: String::new(),
            resource: String::new(),
            prune: true,
            asynchronous: false,
            force: false,
            timeout: 10,
            config_management_plugin: String::new(),
        }
    }
}

/// Given-phase builder
///
/// Created by [`given`] (or [`Context::try_given`]), which resets the shared
/// environment first. Every setter consumes and returns the context, so a
/// test is one chain ending in [`Context::when`].
///
/// Nothing is validated here; bad values surface in the next phase through
/// [`Actions::validate`].
pub struct Context {
    state: ContextState,
    fixtures: Fixtures,
}

/// Reset the environment and start a new given phase
///
/// # Panics
///
/// Panics if the environment cannot be brought to a clean state. Nothing in
/// a test may run against a dirty environment.
#[track_caller]
#[must_use]
pub fn given(fixtures: &Fixtures) -> Context {
    Context::try_given(fixtures).unwrap_or_else(|e| panic!("Failed to ensure clean state: {e}"))
}

impl Context {
    /// Reset the environment, then create a context with default values
    ///
    /// # Errors
    ///
    /// Returns the reset collaborator's error. No context exists in that case.
    pub fn try_given(fixtures: &Fixtures) -> Result<Self, FixtureError> {
        fixtures.reset.ensure_clean_state()?;

        let state = ContextState::new(names::generate_name());
        info!(name = %state.name, "Environment clean, starting given phase");

        Ok(Self {
            state,
            fixtures: fixtures.clone(),
        })
    }

    /// Declared values
    pub fn state(&self) -> &ContextState {
        &self.state
    }

    /// Fixture configuration
    pub fn config(&self) -> &FixtureConfig {
        self.fixtures.config()
    }

    /// Injected collaborators
    pub fn fixtures(&self) -> &Fixtures {
        &self.fixtures
    }

    #[track_caller]
    fn must(&self, operation: &str, result: Result<(), FixtureError>) {
        if let Err(e) = result {
            panic!("{operation} failed for {}: {e}", self.state.name);
        }
        debug!(name = %self.state.name, operation, "Fixture applied");
    }

    // ============================================================
    // Trust
    // ============================================================

    /// Trust the test CA certificate
    ///
    /// # Panics
    ///
    /// Panics if the trust store rejects the certificate.
    #[track_caller]
    #[must_use]
    pub fn custom_ca_cert_added(self) -> Self {
        self.must("add custom CA cert", self.fixtures.trust.add_custom_ca_cert());
        self
    }

    /// Trust the test git server's SSH host keys
    ///
    /// # Panics
    ///
    /// Panics if the trust store rejects the keys.
    #[track_caller]
    #[must_use]
    pub fn custom_ssh_known_hosts_added(self) -> Self {
        self.must(
            "add custom SSH known hosts",
            self.fixtures.trust.add_custom_ssh_known_hosts(),
        );
        self
    }

    // ============================================================
    // Repositories and credentials
    // ============================================================
    //
    // All of these panic if the repository registry fails.

    /// Register the HTTPS repository, verifying its certificate
    #[track_caller]
    #[must_use]
    pub fn https_repo_url_added(self, with_creds: bool) -> Self {
        self.add_repo(RepoUrlType::Https, false, with_creds)
    }

    /// Register the HTTPS repository without certificate verification
    #[track_caller]
    #[must_use]
    pub fn https_insecure_repo_url_added(self, with_creds: bool) -> Self {
        self.add_repo(RepoUrlType::Https, true, with_creds)
    }

    /// Register the HTTPS repository that requires a client certificate
    #[track_caller]
    #[must_use]
    pub fn https_repo_url_with_client_cert_added(self) -> Self {
        self.add_repo_client_cert(false)
    }

    /// Register the client-certificate HTTPS repository without certificate
    /// verification
    #[track_caller]
    #[must_use]
    pub fn https_insecure_repo_url_with_client_cert_added(self) -> Self {
        self.add_repo_client_cert(true)
    }

    /// Register the SSH repository, verifying its host key
    #[track_caller]
    #[must_use]
    pub fn ssh_repo_url_added(self, with_creds: bool) -> Self {
        self.add_repo(RepoUrlType::Ssh, false, with_creds)
    }

    /// Register the SSH repository without host key verification
    #[track_caller]
    #[must_use]
    pub fn ssh_insecure_repo_url_added(self, with_creds: bool) -> Self {
        self.add_repo(RepoUrlType::Ssh, true, with_creds)
    }

    /// Register the Helm chart repository under `name`
    #[track_caller]
    #[must_use]
    pub fn helm_repo_added(self, name: &str) -> Self {
        self.must("add helm repo", self.fixtures.repos.add_helm_repo(name));
        self
    }

    /// Add an HTTPS username/password credential template
    #[track_caller]
    #[must_use]
    pub fn https_credentials_user_pass_added(self) -> Self {
        self.add_credentials(CredentialKind::HttpsUserPass)
    }

    /// Add an HTTPS client certificate credential template
    #[track_caller]
    #[must_use]
    pub fn https_credentials_tls_client_cert_added(self) -> Self {
        self.add_credentials(CredentialKind::HttpsClientCert)
    }

    /// Add an SSH private key credential template
    #[track_caller]
    #[must_use]
    pub fn ssh_credentials_added(self) -> Self {
        self.add_credentials(CredentialKind::Ssh)
    }

    #[track_caller]
    fn add_repo(self, url_type: RepoUrlType, insecure: bool, with_creds: bool) -> Self {
        self.must(
            &format!("add {url_type} repo"),
            self.fixtures.repos.add_repo(url_type, insecure, with_creds),
        );
        self
    }

    #[track_caller]
    fn add_repo_client_cert(self, insecure: bool) -> Self {
        self.must(
            "add client cert repo",
            self.fixtures.repos.add_repo_client_cert(insecure),
        );
        self
    }

    #[track_caller]
    fn add_credentials(self, kind: CredentialKind) -> Self {
        self.must(
            &format!("add {kind} credentials"),
            self.fixtures.repos.add_credentials(kind),
        );
        self
    }

    // ============================================================
    // Projects, settings, plugins
    // ============================================================

    /// Overwrite the spec of the context's current project
    ///
    /// Uses whatever [`Context::project`] is at the time of the call.
    ///
    /// # Panics
    ///
    /// Panics if the project registry fails.
    #[track_caller]
    #[must_use]
    pub fn project_spec(self, spec: AppProjectSpec) -> Self {
        self.must(
            "set project spec",
            self.fixtures.projects.set_project_spec(&self.state.project, spec),
        );
        self
    }

    /// Replace the global resource overrides
    ///
    /// # Panics
    ///
    /// Panics if the settings store fails.
    #[track_caller]
    #[must_use]
    pub fn resource_overrides(self, overrides: BTreeMap<String, ResourceOverride>) -> Self {
        self.must(
            "set resource overrides",
            self.fixtures.settings.set_resource_overrides(overrides),
        );
        self
    }

    /// Replace the global resource filter
    ///
    /// # Panics
    ///
    /// Panics if the settings store fails.
    #[track_caller]
    #[must_use]
    pub fn resource_filter(self, filter: ResourcesFilter) -> Self {
        self.must(
            "set resource filter",
            self.fixtures.settings.set_resource_filter(filter),
        );
        self
    }

    /// Register `plugin` and force this application to use it
    ///
    /// # Panics
    ///
    /// Panics if the plugin registry fails; the binding is not made then.
    #[track_caller]
    #[must_use]
    pub fn config_management_plugin(mut self, plugin: ConfigManagementPlugin) -> Self {
        self.must(
            "register config management plugin",
            self.fixtures.plugins.register_plugin(&plugin),
        );
        self.state.config_management_plugin = plugin.name;
        self
    }

    // ============================================================
    // Plain values
    // ============================================================

    #[must_use]
    pub fn repo_url_type(mut self, url_type: RepoUrlType) -> Self {
        self.state.repo_url_type = url_type;
        self
    }

    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.state.name = name.to_string();
        self
    }

    #[must_use]
    pub fn path(mut self, path: &str) -> Self {
        self.state.path = path.to_string();
        self
    }

    /// Helm chart name (Helm repositories only)
    #[must_use]
    pub fn chart(mut self, chart: &str) -> Self {
        self.state.chart = chart.to_string();
        self
    }

    #[must_use]
    pub fn revision(mut self, revision: &str) -> Self {
        self.state.revision = revision.to_string();
        self
    }

    /// Operation timeout in seconds
    #[must_use]
    pub fn timeout(mut self, timeout: i64) -> Self {
        self.state.timeout = timeout;
        self
    }

    #[must_use]
    pub fn dest_server(mut self, dest_server: &str) -> Self {
        self.state.dest_server = dest_server.to_string();
        self
    }

    #[must_use]
    pub fn env(mut self, env: &str) -> Self {
        self.state.env = env.to_string();
        self
    }

    /// Append a `name=value` parameter
    ///
    /// Rendered as a Helm parameter whatever the repo URL type, since a
    /// git path may hold a chart.
    #[must_use]
    pub fn parameter(mut self, parameter: &str) -> Self {
        self.state.parameters.push(parameter.to_string());
        self
    }

    /// Append a `name=value` jsonnet top-level string argument
    #[must_use]
    pub fn jsonnet_tla_str_parameter(mut self, parameter: &str) -> Self {
        self.state.jsonnet_tla_str.push(parameter.to_string());
        self
    }

    /// Append a `name=value` jsonnet top-level code argument
    #[must_use]
    pub fn jsonnet_tla_code_parameter(mut self, parameter: &str) -> Self {
        self.state.jsonnet_tla_code.push(parameter.to_string());
        self
    }

    /// Select a single resource as `group:kind:name`
    #[must_use]
    pub fn selected_resource(mut self, resource: &str) -> Self {
        self.state.resource = resource.to_string();
        self
    }

    #[must_use]
    pub fn name_prefix(mut self, name_prefix: &str) -> Self {
        self.state.name_prefix = name_prefix.to_string();
        self
    }

    #[must_use]
    pub fn name_suffix(mut self, name_suffix: &str) -> Self {
        self.state.name_suffix = name_suffix.to_string();
        self
    }

    #[must_use]
    pub fn prune(mut self, prune: bool) -> Self {
        self.state.prune = prune;
        self
    }

    /// Sync without waiting for completion
    #[must_use]
    pub fn asynchronous(mut self, asynchronous: bool) -> Self {
        self.state.asynchronous = asynchronous;
        self
    }

    /// Sync from a local directory instead of the repository
    #[must_use]
    pub fn local_path(mut self, local_path: &str) -> Self {
        self.state.local_path = local_path.to_string();
        self
    }

    #[must_use]
    pub fn project(mut self, project: &str) -> Self {
        self.state.project = project.to_string();
        self
    }

    #[must_use]
    pub fn force(mut self) -> Self {
        self.state.force = true;
        self
    }

    /// Run `block` now, for setup no named setter covers
    #[must_use]
    pub fn and<F>(self, block: F) -> Self
    where
        F: FnOnce(),
    {
        block();
        self
    }

    /// Finish the given phase
    ///
    /// Blocks for the configured settling delay so freshly written settings
    /// can propagate, then hands the context to the next phase.
    // TODO: poll the settings store for readiness once it exposes a
    // generation marker, instead of sleeping.
    #[must_use]
    pub fn when(self) -> Actions {
        let delay = self.config().settle_delay;
        debug!(name = %self.state.name, ?delay, "Settling before handoff");
        std::thread::sleep(delay);

        info!(
            name = %self.state.name,
            project = %self.state.project,
            repo_url_type = %self.state.repo_url_type,
            "Given phase complete"
        );
        Actions::new(self)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
