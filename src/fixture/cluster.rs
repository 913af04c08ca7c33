//! Live cluster backend
//!
//! Repositories and credential templates become labeled `Secret`s, trust and
//! settings live in the install's `ConfigMap`s, and projects are `AppProject`
//! custom resources reached through the dynamic API.
//!
//! The DSL is synchronous, so every call blocks on a private current-thread
//! runtime. Never use this backend from inside another tokio runtime.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::core::ApiResource;
use kube::Client;
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use tracing::{debug, info, instrument};

use super::local_repo;
use super::{
    EnvironmentReset, FixtureError, PluginRegistry, ProjectRegistry, RepositoryRegistry, SettingsStore, TrustStore,
};
use crate::config::FixtureConfig;
use crate::context::RepoUrlType;
use crate::eventually::eventually;
use crate::types::{AppProjectSpec, ConfigManagementPlugin, CredentialKind, ResourceOverride, ResourcesFilter};

const ARGOCD_CM: &str = "argocd-cm";
const TLS_CERTS_CM: &str = "argocd-tls-certs-cm";
const SSH_KNOWN_HOSTS_CM: &str = "argocd-ssh-known-hosts-cm";
const KNOWN_HOSTS_KEY: &str = "ssh_known_hosts";

const SECRET_TYPE_LABEL: &str = "argocd.argoproj.io/secret-type";
const MANAGED_LABEL: &str = "gitops-e2e.io/managed";

const DEFAULT_PROJECT: &str = "default";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// `argocd-cm` keys a test may write; all are dropped on reset
const MANAGED_SETTINGS: &[&str] = &[
    "repositories",
    "repository.credentials",
    "helm.repositories",
    "resource.customizations",
    "resource.exclusions",
    "resource.inclusions",
    "configManagementPlugins",
];

/// Group, version, resource and kind of an Argo CD custom resource
#[derive(Debug, Clone, PartialEq, Eq)]
struct Gvr {
    group: &'static str,
    version: &'static str,
    resource: &'static str,
    kind: &'static str,
}

impl Gvr {
    const fn argo(resource: &'static str, kind: &'static str) -> Self {
        Self {
            group: "argoproj.io",
            version: "v1alpha1",
            resource,
            kind,
        }
    }

    fn application() -> Self {
        Self::argo("applications", "Application")
    }

    fn app_project() -> Self {
        Self::argo("appprojects", "AppProject")
    }

    fn to_api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.to_string(),
            version: self.version.to_string(),
            api_version: format!("{}/{}", self.group, self.version),
            kind: self.kind.to_string(),
            plural: self.resource.to_string(),
        }
    }
}

/// Fixture backend that writes to the Argo CD install in the current
/// kubeconfig context
pub struct ClusterFixtures {
    config: FixtureConfig,
    client: Client,
    runtime: Runtime,
}

impl ClusterFixtures {
    /// Connect with the default kubeconfig / in-cluster configuration
    ///
    /// # Errors
    ///
    /// Fails when the runtime cannot start or no cluster is reachable.
    pub fn connect(config: FixtureConfig) -> Result<Self, FixtureError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| FixtureError::Runtime(e.to_string()))?;

        let client = runtime
            .block_on(Client::try_default())
            .map_err(|e| FixtureError::Client(e.to_string()))?;

        info!(
            namespace = %config.argocd_namespace,
            apps = %config.deployment_namespace,
            "Connected fixture backend"
        );

        Ok(Self {
            config,
            client,
            runtime,
        })
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    fn config_maps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.config.argocd_namespace)
    }

    fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.config.argocd_namespace)
    }

    fn dynamic(&self, gvr: &Gvr) -> Api<DynamicObject> {
        Api::namespaced_with(
            self.client.clone(),
            &self.config.argocd_namespace,
            &gvr.to_api_resource(),
        )
    }

    // -------------------------------------------------------------------
    // ConfigMaps
    // -------------------------------------------------------------------

    async fn config_map_value(&self, name: &str, key: &str) -> Result<Option<String>, FixtureError> {
        let cm = self
            .config_maps()
            .get(name)
            .await
            .map_err(|e| kube_error(&e, "ConfigMap", name))?;
        Ok(cm.data.and_then(|mut data| data.remove(key)))
    }

    /// Merge `data` into the ConfigMap; `null` values delete keys
    async fn patch_config_map(&self, name: &str, data: Value) -> Result<(), FixtureError> {
        let patch = json!({ "data": data });
        self.config_maps()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| kube_error(&e, "ConfigMap", name))?;
        debug!(config_map = %name, "Patched");
        Ok(())
    }

    async fn set_setting<T: serde::Serialize>(
        &self,
        key: &'static str,
        value: &T,
        empty: bool,
    ) -> Result<(), FixtureError> {
        let encoded = if empty {
            Value::Null
        } else {
            Value::String(serde_json::to_string(value).map_err(|source| FixtureError::Json { what: key, source })?)
        };
        self.patch_config_map(ARGOCD_CM, json!({ key: encoded })).await
    }

    // -------------------------------------------------------------------
    // Secrets
    // -------------------------------------------------------------------

    /// Server-side apply a repository or credential template secret
    ///
    /// Keys missing from `data` are removed if a previous apply set them.
    async fn apply_secret(
        &self,
        name: &str,
        secret_type: &str,
        data: BTreeMap<&str, String>,
    ) -> Result<(), FixtureError> {
        let labels = BTreeMap::from([
            (SECRET_TYPE_LABEL.to_string(), secret_type.to_string()),
            (MANAGED_LABEL.to_string(), "true".to_string()),
        ]);

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.config.argocd_namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            data: Some(
                data.into_iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.into_bytes())))
                    .collect(),
            ),
            ..Default::default()
        };

        let params = PatchParams::apply(&self.config.field_manager).force();
        self.secrets()
            .patch(name, &params, &Patch::Apply(&secret))
            .await
            .map_err(|e| kube_error(&e, "Secret", name))?;

        info!(secret = %name, secret_type = %secret_type, "Applied");
        Ok(())
    }

    fn user_pass(&self, data: &mut BTreeMap<&str, String>) {
        data.insert("username", self.config.git_username.clone());
        data.insert("password", self.config.git_password.clone());
    }

    fn client_cert(&self, data: &mut BTreeMap<&str, String>) -> Result<(), FixtureError> {
        data.insert("tlsClientCertData", read_fixture(&self.config.client_cert_path())?);
        data.insert("tlsClientCertKey", read_fixture(&self.config.client_key_path())?);
        Ok(())
    }

    fn ssh_key(&self, data: &mut BTreeMap<&str, String>) -> Result<(), FixtureError> {
        data.insert("sshPrivateKey", read_fixture(&self.config.ssh_private_key_path())?);
        Ok(())
    }

    // -------------------------------------------------------------------
    // Projects
    // -------------------------------------------------------------------

    async fn replace_project(&self, project: &str, spec: &AppProjectSpec) -> Result<(), FixtureError> {
        let gvr = Gvr::app_project();
        let api = self.dynamic(&gvr);
        let spec = serde_json::to_value(spec).map_err(|source| FixtureError::Json {
            what: "project spec",
            source,
        })?;

        let existing = api
            .get_opt(project)
            .await
            .map_err(|e| kube_error(&e, gvr.kind, project))?;

        match existing {
            Some(mut obj) => {
                obj.data["spec"] = spec;
                api.replace(project, &PostParams::default(), &obj)
                    .await
                    .map_err(|e| kube_error(&e, gvr.kind, project))?;
            }
            None => {
                let obj = DynamicObject::new(project, &gvr.to_api_resource())
                    .within(&self.config.argocd_namespace)
                    .data(json!({ "spec": spec }));
                api.create(&PostParams::default(), &obj)
                    .await
                    .map_err(|e| kube_error(&e, gvr.kind, project))?;
            }
        }

        info!(project = %project, "Set project spec");
        Ok(())
    }

    // -------------------------------------------------------------------
    // Reset
    // -------------------------------------------------------------------

    async fn reset_cluster(&self) -> Result<(), FixtureError> {
        self.delete_applications().await?;
        self.delete_projects().await?;
        self.replace_project(DEFAULT_PROJECT, &AppProjectSpec::permissive())
            .await?;

        let cleared: serde_json::Map<String, Value> = MANAGED_SETTINGS
            .iter()
            .map(|key| (key.to_string(), Value::Null))
            .collect();
        self.patch_config_map(ARGOCD_CM, Value::Object(cleared)).await?;
        self.patch_config_map(TLS_CERTS_CM, Value::Null).await?;
        self.patch_config_map(SSH_KNOWN_HOSTS_CM, json!({ KNOWN_HOSTS_KEY: null }))
            .await?;

        let selector = format!("{MANAGED_LABEL}=true");
        self.secrets()
            .delete_collection(&DeleteParams::default(), &ListParams::default().labels(&selector))
            .await
            .map_err(|e| kube_error(&e, "Secret", &selector))?;

        self.recreate_deployment_namespace().await
    }

    async fn delete_applications(&self) -> Result<(), FixtureError> {
        let gvr = Gvr::application();
        let api = self.dynamic(&gvr);
        let apps = api
            .list(&ListParams::default())
            .await
            .map_err(|e| kube_error(&e, gvr.kind, "*"))?;

        for app in apps.items {
            let Some(name) = app.metadata.name else {
                continue;
            };
            // the resources finalizer waits for a cascade the next test does not need
            let strip = json!({ "metadata": { "finalizers": null } });
            ignore_not_found(api.patch(&name, &PatchParams::default(), &Patch::Merge(&strip)).await)
                .map_err(|e| kube_error(&e, gvr.kind, &name))?;
            ignore_not_found(api.delete(&name, &DeleteParams::default()).await)
                .map_err(|e| kube_error(&e, gvr.kind, &name))?;
            debug!(application = %name, "Deleted");
        }

        let api = &api;
        eventually(move || async move {
            api.list(&ListParams::default())
                .await
                .map(|list| list.items.is_empty())
                .unwrap_or(false)
        })
        .describe("applications deleted")
        .timeout(self.config.reset_timeout)
        .interval(POLL_INTERVAL)
        .await_condition()
        .await?;

        Ok(())
    }

    async fn delete_projects(&self) -> Result<(), FixtureError> {
        let gvr = Gvr::app_project();
        let api = self.dynamic(&gvr);
        let projects = api
            .list(&ListParams::default())
            .await
            .map_err(|e| kube_error(&e, gvr.kind, "*"))?;

        for name in projects.items.into_iter().filter_map(|p| p.metadata.name) {
            if name == DEFAULT_PROJECT {
                continue;
            }
            ignore_not_found(api.delete(&name, &DeleteParams::default()).await)
                .map_err(|e| kube_error(&e, gvr.kind, &name))?;
            debug!(project = %name, "Deleted");
        }
        Ok(())
    }

    async fn recreate_deployment_namespace(&self) -> Result<(), FixtureError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let name = self.config.deployment_namespace.as_str();

        ignore_not_found(namespaces.delete(name, &DeleteParams::default()).await)
            .map_err(|e| kube_error(&e, "Namespace", name))?;

        let api = &namespaces;
        eventually(move || async move { matches!(api.get_opt(name).await, Ok(None)) })
            .describe(format!("namespace {name} deleted"))
            .timeout(self.config.reset_timeout)
            .interval(POLL_INTERVAL)
            .await_condition()
            .await?;

        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(MANAGED_LABEL.to_string(), "true".to_string())])),
                ..Default::default()
            },
            ..Default::default()
        };
        namespaces
            .create(&PostParams::default(), &ns)
            .await
            .map_err(|e| kube_error(&e, "Namespace", name))?;

        debug!(namespace = %name, "Recreated");
        Ok(())
    }
}

impl EnvironmentReset for ClusterFixtures {
    #[instrument(skip(self), fields(namespace = %self.config.argocd_namespace))]
    fn ensure_clean_state(&self) -> Result<(), FixtureError> {
        self.block_on(self.reset_cluster())?;

        if let Some(testdata) = self.config.testdata_dir.as_deref() {
            local_repo::recreate(testdata, &self.config.repo_dir)?;
        }

        info!("Environment reset");
        Ok(())
    }
}

impl TrustStore for ClusterFixtures {
    fn add_custom_ca_cert(&self) -> Result<(), FixtureError> {
        let pem = read_fixture(&self.config.ca_cert_path())?;
        let host = self.config.repo_server_host.as_str();
        self.block_on(self.patch_config_map(TLS_CERTS_CM, json!({ host: pem })))?;
        info!(host = %host, "Trusted custom CA");
        Ok(())
    }

    fn add_custom_ssh_known_hosts(&self) -> Result<(), FixtureError> {
        let wanted = read_fixture(&self.config.ssh_known_hosts_path())?;
        self.block_on(async {
            let current = self
                .config_map_value(SSH_KNOWN_HOSTS_CM, KNOWN_HOSTS_KEY)
                .await?
                .unwrap_or_default();
            let merged = merge_lines(&current, &wanted);
            self.patch_config_map(SSH_KNOWN_HOSTS_CM, json!({ KNOWN_HOSTS_KEY: merged }))
                .await
        })?;
        info!("Trusted custom SSH known hosts");
        Ok(())
    }
}

impl RepositoryRegistry for ClusterFixtures {
    #[instrument(skip(self))]
    fn add_repo(&self, url_type: RepoUrlType, insecure: bool, with_creds: bool) -> Result<(), FixtureError> {
        let mut data = BTreeMap::new();
        data.insert("url", self.config.repo_url(url_type));
        data.insert(
            "type",
            if url_type == RepoUrlType::Helm { "helm" } else { "git" }.to_string(),
        );
        if insecure {
            data.insert("insecure", "true".to_string());
        }
        if with_creds {
            match url_type {
                RepoUrlType::Https | RepoUrlType::Helm => self.user_pass(&mut data),
                RepoUrlType::Ssh => self.ssh_key(&mut data)?,
                RepoUrlType::File => debug!("Local repositories take no credentials"),
            }
        }

        self.block_on(self.apply_secret(&format!("repo-{url_type}"), "repository", data))
    }

    #[instrument(skip(self))]
    fn add_repo_client_cert(&self, insecure: bool) -> Result<(), FixtureError> {
        let mut data = BTreeMap::new();
        data.insert("url", self.config.https_client_cert_repo_url.clone());
        data.insert("type", "git".to_string());
        if insecure {
            data.insert("insecure", "true".to_string());
        }
        self.user_pass(&mut data);
        self.client_cert(&mut data)?;

        self.block_on(self.apply_secret("repo-https-client-cert", "repository", data))
    }

    #[instrument(skip(self))]
    fn add_helm_repo(&self, name: &str) -> Result<(), FixtureError> {
        let mut data = BTreeMap::new();
        data.insert("url", self.config.helm_repo_url.clone());
        data.insert("type", "helm".to_string());
        data.insert("name", name.to_string());
        self.user_pass(&mut data);
        self.client_cert(&mut data)?;

        self.block_on(self.apply_secret(&format!("repo-helm-{name}"), "repository", data))
    }

    #[instrument(skip(self))]
    fn add_credentials(&self, kind: CredentialKind) -> Result<(), FixtureError> {
        let mut data = BTreeMap::new();
        data.insert("url", self.config.credentials_url(kind));
        match kind {
            CredentialKind::HttpsUserPass => self.user_pass(&mut data),
            CredentialKind::HttpsClientCert => {
                self.user_pass(&mut data);
                self.client_cert(&mut data)?;
            }
            CredentialKind::Ssh => self.ssh_key(&mut data)?,
        }

        self.block_on(self.apply_secret(&format!("creds-{kind}"), "repo-creds", data))
    }
}

impl ProjectRegistry for ClusterFixtures {
    #[instrument(skip(self, spec))]
    fn set_project_spec(&self, project: &str, spec: AppProjectSpec) -> Result<(), FixtureError> {
        self.block_on(self.replace_project(project, &spec))
    }
}

impl SettingsStore for ClusterFixtures {
    fn set_resource_overrides(&self, overrides: BTreeMap<String, ResourceOverride>) -> Result<(), FixtureError> {
        self.block_on(self.set_setting("resource.customizations", &overrides, overrides.is_empty()))?;
        info!(count = overrides.len(), "Set resource overrides");
        Ok(())
    }

    fn set_resource_filter(&self, filter: ResourcesFilter) -> Result<(), FixtureError> {
        self.block_on(async {
            self.set_setting(
                "resource.exclusions",
                &filter.resource_exclusions,
                filter.resource_exclusions.is_empty(),
            )
            .await?;
            self.set_setting(
                "resource.inclusions",
                &filter.resource_inclusions,
                filter.resource_inclusions.is_empty(),
            )
            .await
        })?;
        info!(
            exclusions = filter.resource_exclusions.len(),
            inclusions = filter.resource_inclusions.len(),
            "Set resource filter"
        );
        Ok(())
    }
}

impl PluginRegistry for ClusterFixtures {
    #[instrument(skip(self, plugin), fields(plugin = %plugin.name))]
    fn register_plugin(&self, plugin: &ConfigManagementPlugin) -> Result<(), FixtureError> {
        self.block_on(async {
            let current = self
                .config_map_value(ARGOCD_CM, "configManagementPlugins")
                .await?;
            let mut plugins: Vec<ConfigManagementPlugin> = match current.as_deref() {
                None | Some("") => Vec::new(),
                Some(raw) => serde_json::from_str(raw).map_err(|source| FixtureError::Json {
                    what: "configManagementPlugins",
                    source,
                })?,
            };
            upsert_plugin(&mut plugins, plugin);
            self.set_setting("configManagementPlugins", &plugins, false).await
        })
    }
}

impl std::fmt::Debug for ClusterFixtures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterFixtures")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn read_fixture(path: &Path) -> Result<String, FixtureError> {
    std::fs::read_to_string(path).map_err(|source| FixtureError::ReadFile {
        path: path.to_path_buf(),
        source,
    })
}

fn ignore_not_found<T>(result: Result<T, kube::Error>) -> Result<(), kube::Error> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e),
    }
}

/// Append lines of `extra` missing from `current`, skipping blanks
fn merge_lines(current: &str, extra: &str) -> String {
    let mut lines: Vec<&str> = current.lines().filter(|l| !l.trim().is_empty()).collect();
    for line in extra.lines().filter(|l| !l.trim().is_empty()) {
        if !lines.contains(&line) {
            lines.push(line);
        }
    }
    let mut merged = lines.join("\n");
    merged.push('\n');
    merged
}

fn upsert_plugin(plugins: &mut Vec<ConfigManagementPlugin>, plugin: &ConfigManagementPlugin) {
    match plugins.iter_mut().find(|p| p.name == plugin.name) {
        Some(existing) => *existing = plugin.clone(),
        None => plugins.push(plugin.clone()),
    }
}

/// Turn a kube error into a message naming the object involved
fn kube_error(err: &kube::Error, kind: &str, name: &str) -> FixtureError {
    let raw = err.to_string();

    let msg = if let kube::Error::Api(ae) = err {
        match ae.code {
            404 => format!("{kind} '{name}' not found"),
            409 => format!("{kind} '{name}' was modified concurrently or already exists"),
            403 => format!("{kind} '{name}': permission denied (check RBAC)"),
            _ => format!("{kind} '{name}': {raw}"),
        }
    } else if raw.contains("connection refused") {
        format!("{kind} '{name}': cannot connect to Kubernetes API")
    } else {
        format!("{kind} '{name}': {raw}")
    };

    FixtureError::Kube(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gvr_api_resource() {
        let ar = Gvr::app_project().to_api_resource();
        assert_eq!(ar.api_version, "argoproj.io/v1alpha1");
        assert_eq!(ar.kind, "AppProject");
        assert_eq!(ar.plural, "appprojects");

        assert_eq!(Gvr::application().to_api_resource().plural, "applications");
    }

    #[test]
    fn test_merge_lines_skips_duplicates() {
        let current = "host-a ssh-rsa AAA\n";
        let extra = "host-a ssh-rsa AAA\n\nhost-b ssh-ed25519 BBB\n";

        assert_eq!(
            merge_lines(current, extra),
            "host-a ssh-rsa AAA\nhost-b ssh-ed25519 BBB\n"
        );
        assert_eq!(merge_lines("", "host-b x\n"), "host-b x\n");
    }

    #[test]
    fn test_upsert_plugin_replaces_by_name() {
        let mut plugins = vec![
            ConfigManagementPlugin::new("cmp", &["old"]),
            ConfigManagementPlugin::new("other", &["true"]),
        ];

        upsert_plugin(&mut plugins, &ConfigManagementPlugin::new("cmp", &["new"]));
        upsert_plugin(&mut plugins, &ConfigManagementPlugin::new("third", &["true"]));

        let names: Vec<&str> = plugins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["cmp", "other", "third"]);
        assert_eq!(plugins[0], ConfigManagementPlugin::new("cmp", &["new"]));
    }

    #[test]
    fn test_read_fixture_names_path() {
        let err = read_fixture(Path::new("/nonexistent/gitops-e2e/id_rsa")).unwrap_err();
        assert!(matches!(err, FixtureError::ReadFile { .. }));
        assert!(err.to_string().contains("/nonexistent/gitops-e2e/id_rsa"));
    }

    #[test]
    fn test_kube_error_messages() {
        let not_found = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "secrets \"repo-ssh\" not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        });
        assert_eq!(
            kube_error(&not_found, "Secret", "repo-ssh").to_string(),
            "Kubernetes request failed: Secret 'repo-ssh' not found"
        );

        let forbidden = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
        });
        assert!(kube_error(&forbidden, "ConfigMap", "argocd-cm")
            .to_string()
            .contains("permission denied"));
    }

    #[test]
    fn test_ignore_not_found() {
        let gone: Result<(), kube::Error> = Err(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        }));
        assert!(ignore_not_found(gone).is_ok());
        assert!(ignore_not_found(Ok::<_, kube::Error>(1)).is_ok());
    }
}
