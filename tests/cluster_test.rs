//! Given-phase tests against a live Argo CD install
//!
//! Run with `cargo test -- --ignored` once the e2e environment is up and
//! `ARGOCD_E2E_*` points at it. Every `given()` resets the one shared
//! install, so these tests are `#[serial]`.

use gitops_e2e::{given, AppProjectSpec, ConfigManagementPlugin, Fixtures, RepoUrlType};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::Api;
use serial_test::serial;

fn connect() -> Fixtures {
    gitops_e2e::init_logging();
    Fixtures::connect().expect("Should connect to the e2e cluster")
}

/// Read one `argocd-cm` key straight from the cluster
fn argocd_cm_value(fixtures: &Fixtures, key: &str) -> Option<String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Should build runtime");

    runtime.block_on(async {
        let client = kube::Client::try_default().await.expect("Should create client");
        let config_maps: Api<ConfigMap> = Api::namespaced(client, &fixtures.config().argocd_namespace);
        config_maps
            .get("argocd-cm")
            .await
            .expect("argocd-cm should exist")
            .data
            .and_then(|mut data| data.remove(key))
    })
}

#[test]
#[ignore] // Requires real cluster
#[serial]
fn test_reset_then_register_repositories() {
    let fixtures = connect();

    let actions = given(&fixtures)
        .custom_ca_cert_added()
        .custom_ssh_known_hosts_added()
        .https_repo_url_added(true)
        .ssh_repo_url_added(true)
        .https_credentials_user_pass_added()
        .repo_url_type(RepoUrlType::Ssh)
        .path("guestbook")
        .when();

    assert!(actions.validate().is_ok());
    assert_eq!(actions.repo_url(), fixtures.config().ssh_repo_url);
}

#[test]
#[ignore] // Requires real cluster
#[serial]
fn test_reset_removes_registered_plugin() {
    let fixtures = connect();

    let actions = given(&fixtures)
        .project_spec(AppProjectSpec::permissive().description("e2e default"))
        .config_management_plugin(ConfigManagementPlugin::new("cmp-e2e", &["sh", "-c", "cat *.yaml"]))
        .path("guestbook")
        .when();

    assert_eq!(actions.state().config_management_plugin, "cmp-e2e");
    let plugins = argocd_cm_value(&fixtures, "configManagementPlugins").unwrap_or_default();
    assert!(plugins.contains("cmp-e2e"), "plugin not registered: {plugins}");

    let _clean = given(&fixtures).when();

    let plugins = argocd_cm_value(&fixtures, "configManagementPlugins").unwrap_or_default();
    assert!(!plugins.contains("cmp-e2e"), "plugin survived reset: {plugins}");
}
