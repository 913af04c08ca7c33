//! gitops-e2e - the "given" phase of a given/when/then e2e DSL for Argo CD
//!
//! A test starts from [`given`], which resets the shared environment and
//! names the test's application. Chained setters then declare what the
//! application looks like and register the repositories, credentials,
//! projects and settings it needs. [`Context::when`] hands the finished
//! context to the next phase as [`Actions`].
//!
//! Shared state is reached only through the collaborator traits in
//! [`fixture`]. Use [`Fixtures::connect`] against a live cluster, or
//! [`fixture::InMemoryFixtures`] to exercise the DSL in-process.
//!
//! # Example
//!
//! ```
//! use gitops_e2e::config::FixtureConfig;
//! use gitops_e2e::fixture::{Fixtures, InMemoryFixtures};
//! use gitops_e2e::{given, RepoUrlType};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let fixtures = Fixtures::from_backend(
//!     FixtureConfig::new().settle_delay(Duration::ZERO),
//!     Arc::new(InMemoryFixtures::new()),
//! );
//!
//! let actions = given(&fixtures)
//!     .custom_ssh_known_hosts_added()
//!     .ssh_repo_url_added(true)
//!     .repo_url_type(RepoUrlType::Ssh)
//!     .path("guestbook")
//!     .when();
//!
//! let app = actions.application().unwrap();
//! assert_eq!(app.spec.source.path.as_deref(), Some("guestbook"));
//! ```
//!
//! # Logging
//!
//! Call [`telemetry::init_logging`] once per test binary; `RUST_LOG`
//! controls the filter.

pub mod actions;
pub mod config;
pub mod context;
pub mod eventually;
pub mod fixture;
pub mod names;
pub mod telemetry;
pub mod types;
pub mod validation;

pub use actions::Actions;
pub use config::{ConfigError, FixtureConfig};
pub use context::{given, Context, ContextState, RepoUrlType, KUBERNETES_INTERNAL_API_SERVER_ADDR};
pub use fixture::{ClusterFixtures, FixtureError, Fixtures, InMemoryFixtures};
pub use telemetry::init_logging;
pub use types::{
    AppProjectSpec, Application, ConfigManagementPlugin, CredentialKind, FilteredResource, ResourceOverride,
    ResourcesFilter,
};
pub use validation::{FieldError, ValidationErrors};
