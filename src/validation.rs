//! Deferred validation of a finished context
//!
//! The given phase accepts any value. The next phase runs these rules before
//! acting, and gets every problem at once instead of the first downstream
//! failure.

use crate::context::{ContextState, RepoUrlType};
use crate::names::is_dns_subdomain;

/// One invalid field
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct FieldError {
    pub field: &'static str,
    pub reason: String,
}

/// Every invalid field of a context, in field order
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid context ({} errors){}", .errors.len(), list(.errors))]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    /// Whether `field` has at least one error
    pub fn has(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

fn list(errors: &[FieldError]) -> String {
    errors.iter().map(|e| format!("; {e}")).collect()
}

#[derive(Default)]
struct Collector {
    errors: Vec<FieldError>,
}

impl Collector {
    fn check(&mut self, ok: bool, field: &'static str, reason: impl Into<String>) {
        if !ok {
            self.errors.push(FieldError {
                field,
                reason: reason.into(),
            });
        }
    }

    fn finish(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors { errors: self.errors })
        }
    }
}

/// Validate a declared context
///
/// # Errors
///
/// Returns every rule violation found.
pub fn validate(state: &ContextState) -> Result<(), ValidationErrors> {
    let mut c = Collector::default();

    c.check(
        is_dns_subdomain(&state.name),
        "name",
        format!("{:?} is not a valid DNS subdomain", state.name),
    );
    c.check(!state.project.is_empty(), "project", "must not be empty");
    c.check(!state.dest_server.is_empty(), "dest_server", "must not be empty");
    c.check(
        state.timeout > 0,
        "timeout",
        format!("must be a positive number of seconds, got {}", state.timeout),
    );

    if !state.resource.is_empty() {
        c.check(
            is_resource_selector(&state.resource),
            "resource",
            format!("{:?} is not group:kind:name", state.resource),
        );
    }

    for (field, entries) in [
        ("parameters", &state.parameters),
        ("jsonnet_tla_str", &state.jsonnet_tla_str),
        ("jsonnet_tla_code", &state.jsonnet_tla_code),
    ] {
        for entry in entries {
            c.check(
                split_binding(entry).is_some(),
                field,
                format!("{entry:?} is not name=value"),
            );
        }
    }

    let helm = state.repo_url_type == RepoUrlType::Helm;
    if !state.chart.is_empty() {
        c.check(
            helm,
            "chart",
            format!("requires a helm repository, repo URL type is {}", state.repo_url_type),
        );
        c.check(state.path.is_empty(), "chart", "cannot be combined with path");
    } else {
        c.check(!helm, "chart", "helm repositories need a chart");
    }

    c.finish()
}

/// Split `name=value` on the first `=`; `None` when there is no `=` or no name
pub fn split_binding(binding: &str) -> Option<(&str, &str)> {
    binding
        .split_once('=')
        .filter(|(name, _)| !name.is_empty())
}

/// `group:kind:name`, group may be empty (core API)
fn is_resource_selector(resource: &str) -> bool {
    let parts: Vec<&str> = resource.split(':').collect();
    matches!(parts.as_slice(), [_, kind, name] if !kind.is_empty() && !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ContextState {
        ContextState {
            name: "guestbook".to_string(),
            project: "default".to_string(),
            path: "guestbook".to_string(),
            chart: String::new(),
            revision: String::new(),
            repo_url_type: RepoUrlType::File,
            local_path: String::new(),
            dest_server: "https://kubernetes.default.svc".to_string(),
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

    #[test]
    fn test_valid_state() {
        assert!(validate(&state()).is_ok());
    }

    #[test]
    fn test_all_errors_reported() {
        let mut s = state();
        s.name = "Bad_Name".to_string();
        s.timeout = 0;
        s.parameters.push("novalue".to_string());
        s.jsonnet_tla_code.push("=1".to_string());

        let errs = validate(&s).unwrap_err();

        assert_eq!(errs.len(), 4);
        assert!(errs.has("name"));
        assert!(errs.has("timeout"));
        assert!(errs.has("parameters"));
        assert!(errs.has("jsonnet_tla_code"));
        assert!(!errs.has("project"));
    }

    #[test]
    fn test_name_labels_checked() {
        let mut s = state();
        s.name = "guest..book".to_string();
        assert!(validate(&s).unwrap_err().has("name"));

        s.name = "guest.-book".to_string();
        assert!(validate(&s).unwrap_err().has("name"));

        s.name = "guest.book".to_string();
        assert!(validate(&s).is_ok());
    }

    #[test]
    fn test_resource_selector() {
        let mut s = state();

        s.resource = ":Service:guestbook-ui".to_string();
        assert!(validate(&s).is_ok());

        s.resource = "apps:Deployment:guestbook-ui".to_string();
        assert!(validate(&s).is_ok());

        s.resource = "Deployment/guestbook-ui".to_string();
        assert!(validate(&s).unwrap_err().has("resource"));

        s.resource = "apps::guestbook-ui".to_string();
        assert!(validate(&s).unwrap_err().has("resource"));
    }

    #[test]
    fn test_chart_rules() {
        let mut s = state();
        s.chart = "helm-guestbook".to_string();
        let errs = validate(&s).unwrap_err();
        // wrong repo type and combined with path
        assert_eq!(errs.len(), 2);

        s.repo_url_type = RepoUrlType::Helm;
        s.path = String::new();
        assert!(validate(&s).is_ok());

        s.chart = String::new();
        assert!(validate(&s).unwrap_err().has("chart"));
    }

    #[test]
    fn test_empty_required_fields() {
        let mut s = state();
        s.project = String::new();
        s.dest_server = String::new();

        let errs = validate(&s).unwrap_err();
        assert!(errs.has("project"));
        assert!(errs.has("dest_server"));
    }

    #[test]
    fn test_split_binding() {
        assert_eq!(split_binding("image.tag=v2"), Some(("image.tag", "v2")));
        assert_eq!(split_binding("expr=a=b"), Some(("expr", "a=b")));
        assert_eq!(split_binding("empty="), Some(("empty", "")));
        assert_eq!(split_binding("=v"), None);
        assert_eq!(split_binding("novalue"), None);
    }

    #[test]
    fn test_display_lists_every_error() {
        let mut s = state();
        s.timeout = -1;
        s.project = String::new();

        let msg = validate(&s).unwrap_err().to_string();
        assert!(msg.starts_with("invalid context (2 errors)"));
        assert!(msg.contains("timeout: must be a positive number of seconds, got -1"));
        assert!(msg.contains("project: must not be empty"));
    }
}
