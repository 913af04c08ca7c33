//! Handoff to the "when" phase
//!
//! [`Actions`] owns the finished [`Context`] and only lends it out
//! immutably. It validates the declared values and turns them into the
//! `Application` manifest the when phase creates.

use tracing::debug;

use crate::context::{Context, ContextState, RepoUrlType};
use crate::types::{
    Application, ApplicationDestination, ApplicationMeta, ApplicationSource, ApplicationSourceDirectory,
    ApplicationSourceHelm, ApplicationSourceJsonnet, ApplicationSourceKsonnet, ApplicationSourceKustomize,
    ApplicationSourcePlugin, ApplicationSpec, HelmParameter, JsonnetVar,
};
use crate::validation::{self, split_binding, ValidationErrors};

/// The "when" phase entry point, produced by [`Context::when`]
#[derive(Debug)]
pub struct Actions {
    context: Context,
}

impl Actions {
    pub(crate) fn new(context: Context) -> Self {
        Self { context }
    }

    /// The context handed over by the given phase
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Shorthand for `context().state()`
    pub fn state(&self) -> &ContextState {
        self.context.state()
    }

    /// Run the deferred validation rules
    ///
    /// # Errors
    ///
    /// Returns every invalid field at once.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        validation::validate(self.state())
    }

    /// Repository URL for the declared repo URL type
    pub fn repo_url(&self) -> String {
        self.context.config().repo_url(self.state().repo_url_type)
    }

    /// Render the `Application` this test deploys
    ///
    /// # Errors
    ///
    /// Returns the validation errors if the context is invalid.
    pub fn application(&self) -> Result<Application, ValidationErrors> {
        self.validate()?;

        let state = self.state();
        let config = self.context.config();

        let app = Application {
            api_version: "argoproj.io/v1alpha1".to_string(),
            kind: "Application".to_string(),
            metadata: ApplicationMeta {
                name: state.name.clone(),
                namespace: config.argocd_namespace.clone(),
            },
            spec: ApplicationSpec {
                project: state.project.clone(),
                source: self.source(),
                destination: ApplicationDestination {
                    server: state.dest_server.clone(),
                    namespace: config.deployment_namespace.clone(),
                },
            },
        };

        debug!(name = %app.metadata.name, repo = %app.spec.source.repo_url, "Rendered application");
        Ok(app)
    }

    /// Run `block` now
    #[must_use]
    pub fn and<F>(self, block: F) -> Self
    where
        F: FnOnce(),
    {
        block();
        self
    }

    fn source(&self) -> ApplicationSource {
        let state = self.state();
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

        // git paths hold helm charts too; only the repo server knows the
        // source type, so parameters go to helm for every repo URL type
        let helm = (!state.parameters.is_empty()).then(|| ApplicationSourceHelm {
            parameters: bindings(&state.parameters)
                .map(|(name, value)| HelmParameter {
                    name: name.to_string(),
                    value: value.to_string(),
                })
                .collect(),
        });

        let kustomize = (!state.name_prefix.is_empty() || !state.name_suffix.is_empty()).then(|| {
            ApplicationSourceKustomize {
                name_prefix: state.name_prefix.clone(),
                name_suffix: state.name_suffix.clone(),
            }
        });

        let tlas: Vec<JsonnetVar> = bindings(&state.jsonnet_tla_str)
            .map(|binding| jsonnet_var(binding, false))
            .chain(bindings(&state.jsonnet_tla_code).map(|binding| jsonnet_var(binding, true)))
            .collect();
        let directory = (!tlas.is_empty()).then(|| ApplicationSourceDirectory {
            jsonnet: ApplicationSourceJsonnet { tlas },
        });

        ApplicationSource {
            repo_url: self.repo_url(),
            // helm repositories address charts, not paths
            path: if state.repo_url_type == RepoUrlType::Helm {
                None
            } else {
                non_empty(&state.path)
            },
            chart: non_empty(&state.chart),
            target_revision: non_empty(&state.revision),
            helm,
            kustomize,
            ksonnet: non_empty(&state.env).map(|environment| ApplicationSourceKsonnet { environment }),
            directory,
            plugin: non_empty(&state.config_management_plugin).map(|name| ApplicationSourcePlugin { name }),
        }
    }
}

fn bindings(entries: &[String]) -> impl Iterator<Item = (&str, &str)> {
    entries.iter().filter_map(|entry| split_binding(entry))
}

fn jsonnet_var((name, value): (&str, &str), code: bool) -> JsonnetVar {
    JsonnetVar {
        name: name.to_string(),
        value: value.to_string(),
        code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FixtureConfig;
    use crate::context::given;
    use crate::fixture::{Fixtures, InMemoryFixtures};
    use crate::types::ConfigManagementPlugin;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn fixtures() -> Fixtures {
        let config = FixtureConfig::new()
            .settle_delay(Duration::ZERO)
            .deployment_namespace("apps");
        Fixtures::from_backend(config, Arc::new(InMemoryFixtures::new()))
    }

    #[test]
    fn test_minimal_application() {
        let actions = given(&fixtures()).name("guestbook").path("guestbook").when();

        let app = actions.application().unwrap();

        assert_eq!(app.metadata.name, "guestbook");
        assert_eq!(app.metadata.namespace, "argocd-e2e");
        assert_eq!(app.spec.project, "default");
        assert!(app.spec.source.repo_url.starts_with("file://"));
        assert_eq!(app.spec.source.path.as_deref(), Some("guestbook"));
        assert_eq!(app.spec.destination.server, "https://kubernetes.default.svc");
        assert_eq!(app.spec.destination.namespace, "apps");
        assert!(app.spec.source.helm.is_none());
        assert!(app.spec.source.plugin.is_none());
    }

    #[test]
    fn test_helm_application() {
        let actions = given(&fixtures())
            .name("helm-guestbook")
            .repo_url_type(RepoUrlType::Helm)
            .chart("helm-guestbook")
            .revision("1.0.0")
            .parameter("replicaCount=2")
            .parameter("image.tag=v2")
            .when();

        let value = serde_json::to_value(actions.application().unwrap()).unwrap();
        let source = &value["spec"]["source"];

        assert!(source["repoURL"].as_str().unwrap().ends_with("/helm-repo"));
        assert_eq!(source["chart"], "helm-guestbook");
        assert_eq!(source["targetRevision"], "1.0.0");
        assert!(source.get("path").is_none());
        assert_eq!(
            source["helm"]["parameters"],
            json!([
                { "name": "replicaCount", "value": "2" },
                { "name": "image.tag", "value": "v2" }
            ])
        );
    }

    #[test]
    fn test_parameters_for_chart_in_git_path() {
        let actions = given(&fixtures())
            .name("helm-in-git")
            .path("helm-guestbook")
            .parameter("replicaCount=3")
            .when();

        let source = actions.application().unwrap().spec.source;

        assert_eq!(source.path.as_deref(), Some("helm-guestbook"));
        assert!(source.chart.is_none());
        assert_eq!(
            source.helm.unwrap().parameters,
            vec![HelmParameter {
                name: "replicaCount".to_string(),
                value: "3".to_string(),
            }]
        );
    }

    #[test]
    fn test_kustomize_jsonnet_and_plugin() {
        let actions = given(&fixtures())
            .name("mixed")
            .path("jsonnet-tla")
            .name_prefix("pre-")
            .jsonnet_tla_str_parameter("foo=bar")
            .jsonnet_tla_code_parameter("bar=1+1")
            .config_management_plugin(ConfigManagementPlugin::new("cmp", &["true"]))
            .env("prod")
            .when();

        let source = actions.application().unwrap().spec.source;

        assert_eq!(source.kustomize.unwrap().name_prefix, "pre-");
        assert_eq!(source.plugin.unwrap().name, "cmp");
        assert_eq!(source.ksonnet.unwrap().environment, "prod");
        let tlas = source.directory.unwrap().jsonnet.tlas;
        assert_eq!(
            tlas,
            vec![
                JsonnetVar {
                    name: "foo".to_string(),
                    value: "bar".to_string(),
                    code: false
                },
                JsonnetVar {
                    name: "bar".to_string(),
                    value: "1+1".to_string(),
                    code: true
                },
            ]
        );
    }

    #[test]
    fn test_invalid_context_not_rendered() {
        let actions = given(&fixtures()).timeout(0).chart("orphan").when();

        let errs = actions.application().unwrap_err();

        assert!(errs.has("timeout"));
        assert!(errs.has("chart"));
    }

    #[test]
    fn test_repo_url_follows_type() {
        let fixtures = fixtures();
        let https = given(&fixtures).repo_url_type(RepoUrlType::Https).when();
        let ssh = given(&fixtures).repo_url_type(RepoUrlType::Ssh).when();

        assert_eq!(https.repo_url(), fixtures.config().https_repo_url);
        assert_eq!(ssh.repo_url(), fixtures.config().ssh_repo_url);
    }

    #[test]
    fn test_and_keeps_context() {
        let mut seen = String::new();
        let actions = given(&fixtures()).name("kept").when();

        let actions = actions.and(|| seen.push_str("ran"));

        assert_eq!(seen, "ran");
        assert_eq!(actions.state().name, "kept");
    }
}
