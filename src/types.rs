//! Argo CD API value types
//!
//! The subset of the `argoproj.io/v1alpha1` API the given phase writes into
//! fixture stores, plus the `Application` manifest the next phase renders.
//! Field names serialize in the API's camelCase form.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of standalone credential template
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CredentialKind {
    /// HTTPS username and password
    HttpsUserPass,
    /// HTTPS TLS client certificate
    HttpsClientCert,
    /// SSH private key
    Ssh,
}

impl CredentialKind {
    /// Short identifier used in secret names
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HttpsUserPass => "https-userpass",
            Self::HttpsClientCert => "https-client-cert",
            Self::Ssh => "ssh",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `AppProject` spec
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppProjectSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_repos: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destinations: Vec<ApplicationDestination>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_resource_whitelist: Vec<GroupKind>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespace_resource_blacklist: Vec<GroupKind>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespace_resource_whitelist: Vec<GroupKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphaned_resources: Option<OrphanedResourcesMonitorSettings>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signature_keys: Vec<SignatureKey>,
}

impl AppProjectSpec {
    /// Create an empty project spec
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Any repo, any destination, any cluster-scoped resource
    ///
    /// This is what the `default` project looks like after a reset.
    #[must_use]
    pub fn permissive() -> Self {
        Self::new()
            .source_repo("*")
            .destination("*", "*")
            .cluster_resource_whitelist("*", "*")
    }

    /// Set the description
    #[must_use]
    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Allow a source repository (glob)
    #[must_use]
    pub fn source_repo(mut self, repo: &str) -> Self {
        self.source_repos.push(repo.to_string());
        self
    }

    /// Allow a destination server/namespace pair (globs)
    #[must_use]
    pub fn destination(mut self, server: &str, namespace: &str) -> Self {
        self.destinations.push(ApplicationDestination {
            server: server.to_string(),
            namespace: namespace.to_string(),
        });
        self
    }

    /// Allow a cluster-scoped resource kind
    #[must_use]
    pub fn cluster_resource_whitelist(mut self, group: &str, kind: &str) -> Self {
        self.cluster_resource_whitelist.push(GroupKind::new(group, kind));
        self
    }

    /// Deny a namespaced resource kind
    #[must_use]
    pub fn namespace_resource_blacklist(mut self, group: &str, kind: &str) -> Self {
        self.namespace_resource_blacklist.push(GroupKind::new(group, kind));
        self
    }

    /// Allow only listed namespaced resource kinds
    #[must_use]
    pub fn namespace_resource_whitelist(mut self, group: &str, kind: &str) -> Self {
        self.namespace_resource_whitelist.push(GroupKind::new(group, kind));
        self
    }

    /// Enable orphaned resource monitoring
    #[must_use]
    pub fn orphaned_resources(mut self, warn: bool) -> Self {
        self.orphaned_resources = Some(OrphanedResourcesMonitorSettings { warn: Some(warn) });
        self
    }

    /// Require commits signed by a GnuPG key
    #[must_use]
    pub fn signature_key(mut self, key_id: &str) -> Self {
        self.signature_keys.push(SignatureKey {
            key_id: key_id.to_string(),
        });
        self
    }
}

/// API group and kind pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            kind: kind.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanedResourcesMonitorSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureKey {
    #[serde(rename = "keyID")]
    pub key_id: String,
}

/// Per-kind customization of health, actions and diffing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOverride {
    #[serde(default, rename = "health.lua", skip_serializing_if = "String::is_empty")]
    pub health_lua: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub actions: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ignore_differences: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub known_type_fields: Vec<KnownTypeField>,
}

impl ResourceOverride {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the Lua health check script
    #[must_use]
    pub fn health_lua(mut self, script: &str) -> Self {
        self.health_lua = script.to_string();
        self
    }

    /// Set the Lua actions definition
    #[must_use]
    pub fn actions(mut self, actions: &str) -> Self {
        self.actions = actions.to_string();
        self
    }

    /// Set the diff ignore rules (YAML)
    #[must_use]
    pub fn ignore_differences(mut self, rules: &str) -> Self {
        self.ignore_differences = rules.to_string();
        self
    }

    /// Declare a field's well-known type for diffing
    #[must_use]
    pub fn known_type_field(mut self, field: &str, type_name: &str) -> Self {
        self.known_type_fields.push(KnownTypeField {
            field: field.to_string(),
            type_name: type_name.to_string(),
        });
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownTypeField {
    pub field: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Resource inclusion/exclusion rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_exclusions: Vec<FilteredResource>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_inclusions: Vec<FilteredResource>,
}

impl ResourcesFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an exclusion rule
    #[must_use]
    pub fn exclude(mut self, resource: FilteredResource) -> Self {
        self.resource_exclusions.push(resource);
        self
    }

    /// Add an inclusion rule
    #[must_use]
    pub fn include(mut self, resource: FilteredResource) -> Self {
        self.resource_inclusions.push(resource);
        self
    }
}

/// One filter rule: matching API groups, kinds and clusters (globs)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteredResource {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_groups: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<String>,
}

impl FilteredResource {
    pub fn new(api_groups: &[&str], kinds: &[&str], clusters: &[&str]) -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect();
        Self {
            api_groups: owned(api_groups),
            kinds: owned(kinds),
            clusters: owned(clusters),
        }
    }
}

/// Config management plugin definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigManagementPlugin {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<PluginCommand>,

    pub generate: PluginCommand,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub lock_repo: bool,
}

impl ConfigManagementPlugin {
    /// Create a plugin whose generate step runs `command`
    pub fn new(name: &str, command: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            init: None,
            generate: PluginCommand::new(command),
            lock_repo: false,
        }
    }

    /// Set arguments for the generate command
    #[must_use]
    pub fn generate_args(mut self, args: &[&str]) -> Self {
        self.generate.args = args.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Run `command` before generating
    #[must_use]
    pub fn init(mut self, command: &[&str]) -> Self {
        self.init = Some(PluginCommand::new(command));
        self
    }

    /// Serialize repo access while the plugin runs
    #[must_use]
    pub fn lock_repo(mut self, lock: bool) -> Self {
        self.lock_repo = lock;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginCommand {
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl PluginCommand {
    pub fn new(command: &[&str]) -> Self {
        Self {
            command: command.iter().map(|s| (*s).to_string()).collect(),
            args: Vec::new(),
        }
    }
}

// ============================================================
// Application manifest
// ============================================================

/// `Application` custom resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub api_version: String,
    pub kind: String,
    pub metadata: ApplicationMeta,
    pub spec: ApplicationSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationMeta {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    pub project: String,
    pub source: ApplicationSource,
    pub destination: ApplicationDestination,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    #[serde(rename = "repoURL")]
    pub repo_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_revision: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<ApplicationSourceHelm>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kustomize: Option<ApplicationSourceKustomize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ksonnet: Option<ApplicationSourceKsonnet>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<ApplicationSourceDirectory>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<ApplicationSourcePlugin>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDestination {
    pub server: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSourceHelm {
    pub parameters: Vec<HelmParameter>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmParameter {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSourceKustomize {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name_prefix: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name_suffix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSourceKsonnet {
    pub environment: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSourceDirectory {
    pub jsonnet: ApplicationSourceJsonnet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSourceJsonnet {
    pub tlas: Vec<JsonnetVar>,
}

/// Jsonnet top-level argument; `code` marks it as a code (not string) binding
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonnetVar {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub code: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSourcePlugin {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_permissive_project() {
        let spec = AppProjectSpec::permissive();

        assert_eq!(spec.source_repos, vec!["*".to_string()]);
        assert_eq!(spec.destinations[0].server, "*");
        assert_eq!(spec.destinations[0].namespace, "*");
        assert_eq!(spec.cluster_resource_whitelist, vec![GroupKind::new("*", "*")]);
    }

    #[test]
    fn test_project_spec_serializes_camel_case() {
        let spec = AppProjectSpec::new()
            .source_repo("https://example.com/*")
            .namespace_resource_blacklist("", "ConfigMap")
            .signature_key("D56C4FCA57A46444");

        let value = serde_json::to_value(&spec).unwrap();

        assert_eq!(value["sourceRepos"], json!(["https://example.com/*"]));
        assert_eq!(
            value["namespaceResourceBlacklist"],
            json!([{ "group": "", "kind": "ConfigMap" }])
        );
        assert_eq!(value["signatureKeys"], json!([{ "keyID": "D56C4FCA57A46444" }]));
        assert!(value.get("destinations").is_none());
    }

    #[test]
    fn test_resource_override_field_names() {
        let ov = ResourceOverride::new()
            .health_lua("return {status = 'Healthy'}")
            .known_type_field("spec.template.spec", "core/v1/PodSpec");

        let value = serde_json::to_value(&ov).unwrap();

        assert_eq!(value["health.lua"], "return {status = 'Healthy'}");
        assert_eq!(
            value["knownTypeFields"],
            json!([{ "field": "spec.template.spec", "type": "core/v1/PodSpec" }])
        );
        assert!(value.get("actions").is_none());
    }

    #[test]
    fn test_plugin_roundtrip_keeps_lock_flag() {
        let plugin = ConfigManagementPlugin::new("cmp", &["sh", "-c"])
            .generate_args(&["cat *.yaml"])
            .lock_repo(true);

        let value = serde_json::to_value(&plugin).unwrap();
        assert_eq!(value["lockRepo"], true);
        assert_eq!(value["generate"]["args"], json!(["cat *.yaml"]));

        let back: ConfigManagementPlugin = serde_json::from_value(value).unwrap();
        assert_eq!(back, plugin);
    }

    #[test]
    fn test_filtered_resource_new() {
        let rule = FilteredResource::new(&["apps"], &["Deployment"], &["*"]);

        assert_eq!(rule.api_groups, vec!["apps".to_string()]);
        assert_eq!(rule.kinds, vec!["Deployment".to_string()]);
        assert_eq!(rule.clusters, vec!["*".to_string()]);
    }

    #[test]
    fn test_credential_kind_names() {
        assert_eq!(CredentialKind::HttpsUserPass.to_string(), "https-userpass");
        assert_eq!(CredentialKind::HttpsClientCert.as_str(), "https-client-cert");
        assert_eq!(CredentialKind::Ssh.as_str(), "ssh");
    }
}
