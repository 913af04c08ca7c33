//! In-process fixture backend
//!
//! Keeps every store in memory with last-write-wins semantics and records
//! each call in order, so tests of the DSL itself can assert on exactly which
//! side effects a chain produced.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use super::{
    EnvironmentReset, FixtureError, PluginRegistry, ProjectRegistry, RepositoryRegistry, SettingsStore,
    TrustStore,
};
use crate::context::RepoUrlType;
use crate::types::{AppProjectSpec, ConfigManagementPlugin, CredentialKind, ResourceOverride, ResourcesFilter};

/// One recorded fixture call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixtureCall {
    EnsureCleanState,
    AddCustomCaCert,
    AddCustomSshKnownHosts,
    AddRepo {
        url_type: RepoUrlType,
        insecure: bool,
        with_creds: bool,
    },
    AddRepoClientCert {
        insecure: bool,
    },
    AddHelmRepo {
        name: String,
    },
    AddCredentials(CredentialKind),
    SetProjectSpec {
        project: String,
    },
    SetResourceOverrides {
        keys: Vec<String>,
    },
    SetResourceFilter,
    RegisterPlugin {
        name: String,
    },
}

/// Key a registered repository is stored under
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum RepoKey {
    Url(RepoUrlType),
    ClientCert,
    Helm(String),
}

/// A registered repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepoEntry {
    pub insecure: bool,
    pub with_creds: bool,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<FixtureCall>,
    ca_cert_trusted: bool,
    known_hosts_trusted: bool,
    repos: BTreeMap<RepoKey, RepoEntry>,
    credentials: BTreeSet<CredentialKind>,
    projects: BTreeMap<String, AppProjectSpec>,
    resource_overrides: BTreeMap<String, ResourceOverride>,
    resource_filter: ResourcesFilter,
    plugins: BTreeMap<String, ConfigManagementPlugin>,
    reset_failure: Option<String>,
    call_failure: Option<String>,
}

impl State {
    fn clear_stores(&mut self) {
        self.ca_cert_trusted = false;
        self.known_hosts_trusted = false;
        self.repos.clear();
        self.credentials.clear();
        self.projects.clear();
        self.projects
            .insert("default".to_string(), AppProjectSpec::permissive());
        self.resource_overrides.clear();
        self.resource_filter = ResourcesFilter::default();
        self.plugins.clear();
    }
}

/// Recording, in-memory implementation of every fixture trait
#[derive(Debug, Default)]
pub struct InMemoryFixtures {
    state: Mutex<State>,
}

impl InMemoryFixtures {
    /// Create an empty backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent reset fail with `message`
    pub fn fail_reset(&self, message: &str) {
        self.lock().reset_failure = Some(message.to_string());
    }

    /// Make every subsequent non-reset call fail with `message`
    pub fn fail_calls(&self, message: &str) {
        self.lock().call_failure = Some(message.to_string());
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<FixtureCall> {
        self.lock().calls.clone()
    }

    /// Whether the test CA is trusted
    pub fn ca_cert_trusted(&self) -> bool {
        self.lock().ca_cert_trusted
    }

    /// Whether the test SSH host keys are trusted
    pub fn known_hosts_trusted(&self) -> bool {
        self.lock().known_hosts_trusted
    }

    /// Registered repositories
    pub fn repos(&self) -> BTreeMap<RepoKey, RepoEntry> {
        self.lock().repos.clone()
    }

    /// Registered credential templates
    pub fn credentials(&self) -> BTreeSet<CredentialKind> {
        self.lock().credentials.clone()
    }

    /// Spec stored for `project`
    pub fn project_spec(&self, project: &str) -> Option<AppProjectSpec> {
        self.lock().projects.get(project).cloned()
    }

    /// Current resource overrides
    pub fn resource_overrides(&self) -> BTreeMap<String, ResourceOverride> {
        self.lock().resource_overrides.clone()
    }

    /// Current resource filter
    pub fn resource_filter(&self) -> ResourcesFilter {
        self.lock().resource_filter.clone()
    }

    /// Plugin registered under `name`
    pub fn plugin(&self, name: &str) -> Option<ConfigManagementPlugin> {
        self.lock().plugins.get(name).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // a panicking test must not poison the store for later assertions
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record `call`, then apply `update` unless failures are injected
    fn record<F>(&self, call: FixtureCall, update: F) -> Result<(), FixtureError>
    where
        F: FnOnce(&mut State),
    {
        let mut state = self.lock();
        debug!(?call, "Fixture call");
        state.calls.push(call);

        if let Some(message) = &state.call_failure {
            return Err(FixtureError::Rejected(message.clone()));
        }

        update(&mut *state);
        Ok(())
    }
}

impl EnvironmentReset for InMemoryFixtures {
    fn ensure_clean_state(&self) -> Result<(), FixtureError> {
        let mut state = self.lock();
        state.calls.push(FixtureCall::EnsureCleanState);

        if let Some(message) = &state.reset_failure {
            return Err(FixtureError::Rejected(message.clone()));
        }

        state.clear_stores();
        Ok(())
    }
}

impl TrustStore for InMemoryFixtures {
    fn add_custom_ca_cert(&self) -> Result<(), FixtureError> {
        self.record(FixtureCall::AddCustomCaCert, |s| s.ca_cert_trusted = true)
    }

    fn add_custom_ssh_known_hosts(&self) -> Result<(), FixtureError> {
        self.record(FixtureCall::AddCustomSshKnownHosts, |s| {
            s.known_hosts_trusted = true;
        })
    }
}

impl RepositoryRegistry for InMemoryFixtures {
    fn add_repo(&self, url_type: RepoUrlType, insecure: bool, with_creds: bool) -> Result<(), FixtureError> {
        let call = FixtureCall::AddRepo {
            url_type,
            insecure,
            with_creds,
        };
        self.record(call, |s| {
            s.repos
                .insert(RepoKey::Url(url_type), RepoEntry { insecure, with_creds });
        })
    }

    fn add_repo_client_cert(&self, insecure: bool) -> Result<(), FixtureError> {
        self.record(FixtureCall::AddRepoClientCert { insecure }, |s| {
            s.repos.insert(
                RepoKey::ClientCert,
                RepoEntry {
                    insecure,
                    with_creds: true,
                },
            );
        })
    }

    fn add_helm_repo(&self, name: &str) -> Result<(), FixtureError> {
        let call = FixtureCall::AddHelmRepo {
            name: name.to_string(),
        };
        self.record(call, |s| {
            s.repos.insert(
                RepoKey::Helm(name.to_string()),
                RepoEntry {
                    insecure: false,
                    with_creds: true,
                },
            );
        })
    }

    fn add_credentials(&self, kind: CredentialKind) -> Result<(), FixtureError> {
        self.record(FixtureCall::AddCredentials(kind), |s| {
            s.credentials.insert(kind);
        })
    }
}

impl ProjectRegistry for InMemoryFixtures {
    fn set_project_spec(&self, project: &str, spec: AppProjectSpec) -> Result<(), FixtureError> {
        let call = FixtureCall::SetProjectSpec {
            project: project.to_string(),
        };
        self.record(call, |s| {
            s.projects.insert(project.to_string(), spec);
        })
    }
}

impl SettingsStore for InMemoryFixtures {
    fn set_resource_overrides(&self, overrides: BTreeMap<String, ResourceOverride>) -> Result<(), FixtureError> {
        let call = FixtureCall::SetResourceOverrides {
            keys: overrides.keys().cloned().collect(),
        };
        self.record(call, |s| s.resource_overrides = overrides)
    }

    fn set_resource_filter(&self, filter: ResourcesFilter) -> Result<(), FixtureError> {
        self.record(FixtureCall::SetResourceFilter, |s| s.resource_filter = filter)
    }
}

impl PluginRegistry for InMemoryFixtures {
    fn register_plugin(&self, plugin: &ConfigManagementPlugin) -> Result<(), FixtureError> {
        let call = FixtureCall::RegisterPlugin {
            name: plugin.name.clone(),
        };
        self.record(call, |s| {
            s.plugins.insert(plugin.name.clone(), plugin.clone());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FilteredResource;

    #[test]
    fn test_reset_restores_default_project() {
        let fixtures = InMemoryFixtures::new();
        fixtures
            .set_project_spec("default", AppProjectSpec::new().source_repo("https://only.here"))
            .unwrap();
        fixtures.add_custom_ca_cert().unwrap();

        fixtures.ensure_clean_state().unwrap();

        assert_eq!(fixtures.project_spec("default"), Some(AppProjectSpec::permissive()));
        assert!(!fixtures.ca_cert_trusted());
    }

    #[test]
    fn test_reset_clears_every_store() {
        let fixtures = InMemoryFixtures::new();
        fixtures.add_repo(RepoUrlType::Https, false, true).unwrap();
        fixtures.add_credentials(CredentialKind::Ssh).unwrap();
        fixtures.add_custom_ssh_known_hosts().unwrap();
        fixtures
            .set_resource_filter(ResourcesFilter::new().exclude(FilteredResource::new(&["*"], &["Secret"], &["*"])))
            .unwrap();
        fixtures
            .register_plugin(&ConfigManagementPlugin::new("cmp", &["true"]))
            .unwrap();

        fixtures.ensure_clean_state().unwrap();

        assert!(fixtures.repos().is_empty());
        assert!(fixtures.credentials().is_empty());
        assert!(!fixtures.known_hosts_trusted());
        assert_eq!(fixtures.resource_filter(), ResourcesFilter::default());
        assert!(fixtures.plugin("cmp").is_none());
    }

    #[test]
    fn test_repo_last_write_wins() {
        let fixtures = InMemoryFixtures::new();
        fixtures.add_repo(RepoUrlType::Ssh, true, false).unwrap();
        fixtures.add_repo(RepoUrlType::Ssh, false, true).unwrap();

        let repos = fixtures.repos();
        assert_eq!(repos.len(), 1);
        assert_eq!(
            repos[&RepoKey::Url(RepoUrlType::Ssh)],
            RepoEntry {
                insecure: false,
                with_creds: true
            }
        );
    }

    #[test]
    fn test_overrides_replace_not_merge() {
        let fixtures = InMemoryFixtures::new();
        let first: BTreeMap<_, _> = [("apps/Deployment".to_string(), ResourceOverride::new().actions("a"))].into();
        let second: BTreeMap<_, _> = [("/ConfigMap".to_string(), ResourceOverride::new())].into();

        fixtures.set_resource_overrides(first).unwrap();
        fixtures.set_resource_overrides(second).unwrap();

        let keys: Vec<_> = fixtures.resource_overrides().into_keys().collect();
        assert_eq!(keys, vec!["/ConfigMap".to_string()]);
    }

    #[test]
    fn test_plugin_registered_by_name() {
        let fixtures = InMemoryFixtures::new();
        fixtures
            .register_plugin(&ConfigManagementPlugin::new("cmp", &["v1"]))
            .unwrap();
        fixtures
            .register_plugin(&ConfigManagementPlugin::new("cmp", &["v2"]))
            .unwrap();

        assert_eq!(fixtures.plugin("cmp").unwrap().generate.command, vec!["v2".to_string()]);
    }

    #[test]
    fn test_calls_recorded_in_order() {
        let fixtures = InMemoryFixtures::new();
        fixtures.ensure_clean_state().unwrap();
        fixtures.add_helm_repo("stable").unwrap();
        fixtures.add_repo_client_cert(true).unwrap();

        assert_eq!(
            fixtures.calls(),
            vec![
                FixtureCall::EnsureCleanState,
                FixtureCall::AddHelmRepo {
                    name: "stable".to_string()
                },
                FixtureCall::AddRepoClientCert { insecure: true },
            ]
        );
    }

    #[test]
    fn test_injected_failures() {
        let fixtures = InMemoryFixtures::new();
        fixtures.fail_calls("registry unavailable");

        let err = fixtures.add_helm_repo("stable").unwrap_err();
        assert_eq!(err.to_string(), "registry unavailable");
        assert!(fixtures.repos().is_empty());
        // the attempt is still recorded
        assert_eq!(fixtures.calls().len(), 1);

        // resets are governed separately
        fixtures.ensure_clean_state().unwrap();
        fixtures.fail_reset("cluster unreachable");
        assert!(fixtures.ensure_clean_state().is_err());
    }
}
