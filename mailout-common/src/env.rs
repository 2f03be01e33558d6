//! `ENV:NAME` indirection for configuration values.

const ENV_PREFIX: &str = "ENV:";

/// Resolve a configuration value.
///
/// Values of the form `ENV:NAME` are replaced with the contents of the
/// environment variable `NAME` (empty if unset); everything else is returned
/// unchanged.
pub fn resolve(value: &str) -> String {
    value.strip_prefix(ENV_PREFIX).map_or_else(
        || value.to_string(),
        |name| std::env::var(name).unwrap_or_default(),
    )
}
