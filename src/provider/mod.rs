//! Provider-qualified entity names.
//!
//! Every router, middleware and service carries a qualified name of the form
//! `name@provider`. References written in configuration may omit the provider
//! suffix, in which case they inherit the provider of the entity that
//! references them — a chain middleware's members inherit the *chain's*
//! provider, not the top-level router's.

/// Separator between an entity name and its provider.
pub const PROVIDER_SEPARATOR: char = '@';

/// Provider name reserved for internally-generated entities.
pub const INTERNAL_PROVIDER: &str = "internal";

/// Qualify `reference` against the given context provider.
///
/// A reference that already carries a provider suffix is returned unchanged,
/// which makes qualification idempotent.
pub fn qualify(reference: &str, context_provider: &str) -> String {
    if reference.contains(PROVIDER_SEPARATOR) || context_provider.is_empty() {
        reference.to_string()
    } else {
        format!("{reference}{PROVIDER_SEPARATOR}{context_provider}")
    }
}

/// Extract the provider suffix of a qualified name.
///
/// An unqualified name has no provider; callers decide the fallback.
pub fn provider_of(qualified: &str) -> Option<&str> {
    qualified
        .split_once(PROVIDER_SEPARATOR)
        .map(|(_, provider)| provider)
}
