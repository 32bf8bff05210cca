//! Tag resolver collaborator contract (C8).
//!
//! The manager never invents tag identities itself; every name a caller
//! passes to `Subscribe` or a dynamic topic-add goes through a resolver so
//! an adapter can map human-entered names onto its own addressing scheme
//! (and reject unknown or unauthorized names by simply omitting them).

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::value::TagIdentifier;

/// Resolves human-entered tag names into canonical [`TagIdentifier`]s.
///
/// Implementations may return fewer identifiers than names requested (e.g.
/// unknown or unauthorized names are silently dropped); an `Err` means
/// resolution itself failed (upstream unavailable, malformed request) and
/// should fail the whole operation that invoked it.
#[async_trait]
pub trait TagResolver: Send + Sync {
    /// Resolves `names` into tag identifiers, honoring `cancel`.
    async fn resolve(&self, names: &[String], cancel: &CancellationToken) -> Result<Vec<TagIdentifier>, String>;
}

/// Default resolver used when an adapter has no separate naming scheme: a
/// tag's name is also its id.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

#[async_trait]
impl TagResolver for IdentityResolver {
    async fn resolve(&self, names: &[String], _cancel: &CancellationToken) -> Result<Vec<TagIdentifier>, String> {
        Ok(names.iter().map(|name| TagIdentifier::new(name.clone(), name.clone())).collect())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn identity_resolver_maps_name_to_both_fields() {
        let resolver = IdentityResolver;
        let resolved = resolver
            .resolve(&["Reactor1.Temperature".to_string()], &CancellationToken::new())
            .await
            .expect("identity resolution never fails");
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, "Reactor1.Temperature");
        assert_eq!(resolved[0].name, "Reactor1.Temperature");
    }
}
