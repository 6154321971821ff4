//! Certificate selection for servers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::model::{RoutingDeclaration, SslCert};
use crate::store::ResourceStore;

/// Name of the TLS secret covering `host`, or `None` for the default
/// certificate.
///
/// A TLS entry naming the host wins. Otherwise every entry's certificate is
/// checked for a CN/SAN match.
pub fn tls_secret_for_host(
    host: &str,
    decl: &RoutingDeclaration,
    store: &dyn ResourceStore,
) -> Option<String> {
    for entry in &decl.tls {
        if entry.hosts.iter().any(|h| h.eq_ignore_ascii_case(host)) {
            return entry.secret_name.clone().filter(|s| !s.is_empty());
        }
    }

    for entry in &decl.tls {
        let Some(secret) = entry.secret_name.as_deref().filter(|s| !s.is_empty()) else {
            continue;
        };
        match store.resolve_certificate(&decl.namespace, secret) {
            Ok(cert) if cert.matches_host(host) => return Some(secret.to_string()),
            _ => continue,
        }
    }
    None
}

/// Pick the certificate for `host` from `decl`'s TLS section.
///
/// Misses and hostname mismatches fall back to `default`.
pub fn select_certificate(
    host: &str,
    decl: &RoutingDeclaration,
    store: &dyn ResourceStore,
    default: Option<&SslCert>,
) -> Option<SslCert> {
    let key = decl.key();
    let Some(secret) = tls_secret_for_host(host, decl, store) else {
        tracing::info!(
            host,
            declaration = %key,
            "Host has no matching TLS secret, using default certificate"
        );
        return default.cloned();
    };

    match store.resolve_certificate(&decl.namespace, &secret) {
        Ok(cert) if cert.matches_host(host) => Some(cert),
        Ok(cert) => {
            tracing::warn!(
                host,
                secret = %cert.secret,
                "Certificate has no matching CN or SAN, using default certificate"
            );
            default.cloned()
        }
        Err(e) => {
            tracing::warn!(
                host,
                declaration = %key,
                error = %e,
                "Certificate lookup failed, using default certificate"
            );
            default.cloned()
        }
    }
}

/// Whether `cert` expires before `now + window`.
pub fn expires_within(cert: &SslCert, window: Duration, now: SystemTime) -> bool {
    let now_secs = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    cert.not_after < now_secs.saturating_add(window.as_secs() as i64)
}
