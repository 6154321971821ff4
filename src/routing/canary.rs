//! Canary merging: attach canary backends to their primaries as alternatives.

use crate::model::{
    CanaryAffinityBehavior, PathType, ResolvedDeclaration, DEFAULT_SERVER_NAME,
};
use crate::routing::builder::RoutingModel;
use crate::routing::locations::normalize_prefix;

/// Links canary backends to primaries serving the same host and path.
pub struct CanaryMerger;

/// Outcome of matching one canary backend against a server.
enum MatchOutcome {
    Merged,
    /// The canary's backend already serves this server directly.
    IsPrimary,
    NoMatch,
}

impl CanaryMerger {
    /// Merge every canary declaration into `model`.
    ///
    /// Canaries without a primary have their backend removed. Running this
    /// twice over the same model changes nothing.
    pub fn merge(model: &mut RoutingModel, declarations: &[ResolvedDeclaration]) {
        let mut canaries: Vec<&ResolvedDeclaration> =
            declarations.iter().filter(|d| d.is_canary()).collect();
        canaries.sort_by_key(|d| d.key());

        for decl in canaries {
            let namespace = decl.declaration.namespace.as_str();
            let behavior = decl.settings.affinity.canary_behavior;

            if let Some(backend_ref) = &decl.declaration.default_backend {
                let alt = backend_ref.upstream_name(namespace);
                if !model.backends.contains_key(&alt) {
                    tracing::warn!(declaration = %decl.key(), backend = %alt, "Canary backend not found");
                } else {
                    let outcome = merge_into_server(model, DEFAULT_SERVER_NAME, &alt, None, behavior);
                    finish(model, decl, &alt, outcome);
                }
            }

            for rule in &decl.declaration.rules {
                let host = if rule.host.is_empty() {
                    DEFAULT_SERVER_NAME.to_string()
                } else {
                    rule.host.to_ascii_lowercase()
                };
                for path in &rule.paths {
                    let alt = path.backend.upstream_name(namespace);
                    if !model.backends.contains_key(&alt) {
                        continue;
                    }
                    if !model.servers.contains_key(&host) {
                        tracing::warn!(
                            declaration = %decl.key(),
                            backend = %alt,
                            host = %host,
                            "Cannot merge canary into a host that does not exist"
                        );
                        finish(model, decl, &alt, MatchOutcome::NoMatch);
                        continue;
                    }
                    let outcome = merge_into_server(
                        model,
                        &host,
                        &alt,
                        Some((path.path(), path.path_type())),
                        behavior,
                    );
                    finish(model, decl, &alt, outcome);
                }
            }
        }
    }
}

/// Register `alt` as an alternative of every primary in `host` that serves
/// the matching path (any location when `path` is `None`).
fn merge_into_server(
    model: &mut RoutingModel,
    host: &str,
    alt: &str,
    path: Option<(&str, PathType)>,
    behavior: CanaryAffinityBehavior,
) -> MatchOutcome {
    let Some(server) = model.servers.get(host) else {
        return MatchOutcome::NoMatch;
    };

    let mut primaries = Vec::new();
    for location in &server.locations {
        if location.backend == alt {
            tracing::warn!(
                backend = %alt,
                host = %host,
                path = %location.path,
                "Canary backend is a primary backend for this location"
            );
            return MatchOutcome::IsPrimary;
        }
        let path_matches = match path {
            None => true,
            Some((p, t)) => {
                location.path_type == t
                    && (location.path == p
                        || (t == PathType::Prefix && location.path == normalize_prefix(p)))
            }
        };
        if path_matches && !primaries.contains(&location.backend) {
            primaries.push(location.backend.clone());
        }
    }

    let mut merged = false;
    for primary in primaries {
        if can_merge(model, &primary, alt) {
            merged |= merge_alternative(model, &primary, alt, behavior);
        }
    }
    if merged {
        MatchOutcome::Merged
    } else {
        MatchOutcome::NoMatch
    }
}

fn can_merge(model: &RoutingModel, primary: &str, alt: &str) -> bool {
    match (model.backends.get(primary), model.backends.get(alt)) {
        (Some(p), Some(a)) => p.name != a.name && !p.no_server,
        _ => false,
    }
}

/// Returns true when `alt` is an alternative of `primary` afterwards.
fn merge_alternative(
    model: &mut RoutingModel,
    primary: &str,
    alt: &str,
    behavior: CanaryAffinityBehavior,
) -> bool {
    let Some(pri) = model.backends.get(primary) else {
        return false;
    };
    if pri.alternative_backends.iter().any(|a| a == alt) {
        return true;
    }
    let affinity = pri.session_affinity.clone();

    if behavior == CanaryAffinityBehavior::Sticky {
        if let Some(canary) = model.backends.get_mut(alt) {
            canary.session_affinity = affinity;
        }
    }
    if let Some(pri) = model.backends.get_mut(primary) {
        tracing::debug!(primary = %primary, alternative = %alt, "Canary merged");
        pri.alternative_backends.push(alt.to_string());
        return true;
    }
    false
}

fn finish(model: &mut RoutingModel, decl: &ResolvedDeclaration, alt: &str, outcome: MatchOutcome) {
    if let MatchOutcome::NoMatch = outcome {
        let still_referenced = model
            .backends
            .values()
            .any(|b| b.alternative_backends.iter().any(|a| a == alt));
        if still_referenced {
            return;
        }
        tracing::warn!(
            declaration = %decl.key(),
            backend = %alt,
            "Canary has no matching primary, dropping its backend"
        );
        model.backends.remove(alt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Backend, Location, Server};

    fn model_with(primary: &str, canary: &str, location_path: &str) -> RoutingModel {
        let mut model = RoutingModel::default();
        model.backends.insert(primary.into(), Backend::new(primary));
        let mut alt = Backend::new(canary);
        alt.no_server = true;
        model.backends.insert(canary.into(), alt);
        let mut server = Server::new("foo.com");
        let mut loc = Location::root(primary);
        loc.path = location_path.into();
        loc.is_default_backend = false;
        server.locations.push(loc);
        model.servers.insert("foo.com".into(), server);
        model
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut model = model_with("pri", "alt", "/a/");
        assert!(merge_alternative(&mut model, "pri", "alt", CanaryAffinityBehavior::Sticky));
        assert!(merge_alternative(&mut model, "pri", "alt", CanaryAffinityBehavior::Sticky));
        assert_eq!(model.backends["pri"].alternative_backends, vec!["alt".to_string()]);
    }

    #[test]
    fn test_normalized_prefix_matches_canary_path() {
        let mut model = model_with("pri", "alt", "/a/");
        let outcome = merge_into_server(
            &mut model,
            "foo.com",
            "alt",
            Some(("/a", PathType::Prefix)),
            CanaryAffinityBehavior::Sticky,
        );
        assert!(matches!(outcome, MatchOutcome::Merged));
    }

    #[test]
    fn test_self_merge_refused() {
        let mut model = model_with("pri", "alt", "/a/");
        assert!(!can_merge(&model, "pri", "pri"));
        let outcome = merge_into_server(
            &mut model,
            "foo.com",
            "pri",
            Some(("/a", PathType::Prefix)),
            CanaryAffinityBehavior::Sticky,
        );
        assert!(matches!(outcome, MatchOutcome::IsPrimary));
        assert!(model.backends["pri"].alternative_backends.is_empty());
    }

    #[test]
    fn test_catch_all_canary_joins_every_catch_all_primary() {
        let mut model = model_with("pri", "alt", "/a/");
        let server = model.servers.remove("foo.com").unwrap();
        model.servers.insert(DEFAULT_SERVER_NAME.into(), server);
        model.backends.insert("other".into(), Backend::new("other"));
        if let Some(server) = model.servers.get_mut(DEFAULT_SERVER_NAME) {
            server.locations.push(Location::root("other"));
        }

        let outcome = merge_into_server(
            &mut model,
            DEFAULT_SERVER_NAME,
            "alt",
            None,
            CanaryAffinityBehavior::Sticky,
        );
        assert!(matches!(outcome, MatchOutcome::Merged));
        assert_eq!(model.backends["pri"].alternative_backends, vec!["alt".to_string()]);
        assert_eq!(model.backends["other"].alternative_backends, vec!["alt".to_string()]);
    }

    #[test]
    fn test_no_server_primary_cannot_take_alternatives() {
        let mut model = model_with("pri", "alt", "/a/");
        if let Some(b) = model.backends.get_mut("pri") {
            b.no_server = true;
        }
        assert!(!can_merge(&model, "pri", "alt"));
    }
}
