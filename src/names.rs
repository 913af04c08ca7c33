//! Test name generation
//!
//! Every context gets a unique, DNS-friendly name derived from the running
//! test. The Rust test harness names each test thread after the test path
//! (`module::tests::my_test`), so that is the seed.

/// Longest name a Kubernetes label value accepts
const MAX_NAME_LEN: usize = 63;

/// Random suffix length
const SUFFIX_LEN: usize = 5;

/// Generate a unique name for the current test
///
/// Uses the last path segment of the current thread's name, falling back to
/// `e2e` when the thread is unnamed (or is `main`).
#[must_use]
pub fn generate_name() -> String {
    let thread = std::thread::current();
    let seed = match thread.name() {
        Some(name) if name != "main" => name.rsplit("::").next().unwrap_or(name),
        _ => "e2e",
    };

    let id = uuid::Uuid::new_v4().simple().to_string();
    dns_friendly(seed, &id[..SUFFIX_LEN])
}

/// Lowercase `raw`, map every other character to `-`, and append `-suffix`
///
/// The result never exceeds 63 characters; `raw` is truncated to make room
/// for the suffix.
#[must_use]
pub fn dns_friendly(raw: &str, suffix: &str) -> String {
    let mut base = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            base.push(c);
        } else if !base.ends_with('-') && !base.is_empty() {
            base.push('-');
        }
    }

    let budget = MAX_NAME_LEN.saturating_sub(suffix.len() + 1);
    base.truncate(budget);
    let base = base.trim_end_matches('-');

    match (base.is_empty(), suffix.is_empty()) {
        (true, true) => "e2e".to_string(),
        (true, false) => suffix.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{base}-{suffix}"),
    }
}

/// Check a name against the DNS-1123 subdomain rules Kubernetes uses for
/// object names
///
/// Every dot-separated label must be non-empty, lowercase alphanumeric or
/// `-`, and start and end with an alphanumeric.
#[must_use]
pub fn is_dns_subdomain(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(is_dns_label)
}

fn is_dns_label(label: &str) -> bool {
    let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();

    label.chars().all(|c| alnum(c) || c == '-')
        && label.chars().next().is_some_and(alnum)
        && label.chars().last().is_some_and(alnum)
}
