//! TCP/UDP stream services exposed on dedicated ports.
//!
//! Each entry maps an external port to `namespace/service:port`, optionally
//! followed by `:PROXY` (decode) and `:PROXY` (encode) for TCP.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{L4Backend, L4Protocol, L4Service, ServicePort};
use crate::store::ResourceStore;

/// Resolve a port → service mapping into stream services, sorted by port.
pub fn resolve_streams(
    mapping: &BTreeMap<String, String>,
    protocol: L4Protocol,
    reserved_ports: &BTreeSet<u16>,
    store: &dyn ResourceStore,
) -> Vec<L4Service> {
    let mut services = Vec::new();

    for (external, target) in mapping {
        let Ok(port) = external.trim().parse::<u16>() else {
            tracing::warn!(port = %external, "Stream port is not a number, skipping");
            continue;
        };
        if reserved_ports.contains(&port) {
            tracing::warn!(port, "Stream port is reserved, skipping");
            continue;
        }

        let Some(backend) = parse_target(target, protocol) else {
            tracing::warn!(port, target = %target, "Malformed stream target, skipping");
            continue;
        };

        let service = match store.resolve_service(&backend.namespace, &backend.name) {
            Ok(service) => service,
            Err(e) => {
                tracing::warn!(port, error = %e, "Stream service lookup failed, skipping");
                continue;
            }
        };
        let Some(spec) = service.port(&backend.port).or_else(|| match &backend.port {
            ServicePort::Number(n) => service.ports.iter().find(|p| p.target() == *n),
            ServicePort::Name(_) => None,
        }) else {
            tracing::warn!(port, service = %service.key(), target_port = %backend.port, "Stream service has no such port, skipping");
            continue;
        };
        let resolved_port = ServicePort::Number(spec.port);

        let endpoints = match store.resolve_endpoints(&backend.namespace, &backend.name, &resolved_port) {
            Ok(endpoints) if !endpoints.is_empty() => endpoints,
            Ok(_) => {
                tracing::warn!(port, service = %service.key(), "Stream service has no endpoints, skipping");
                continue;
            }
            Err(e) => {
                tracing::warn!(port, error = %e, "Stream endpoint lookup failed, skipping");
                continue;
            }
        };

        services.push(L4Service {
            port,
            backend,
            endpoints,
        });
    }

    services.sort_by_key(|s| s.port);
    services
}

fn parse_target(target: &str, protocol: L4Protocol) -> Option<L4Backend> {
    let mut parts = target.trim().split(':');
    let (namespace, name) = parts.next()?.split_once('/')?;
    if namespace.is_empty() || name.is_empty() {
        return None;
    }
    let port_raw = parts.next()?;
    if port_raw.is_empty() {
        return None;
    }
    let port = match port_raw.parse::<u16>() {
        Ok(n) => ServicePort::Number(n),
        Err(_) => ServicePort::Name(port_raw.to_string()),
    };
    let is_tcp = protocol == L4Protocol::Tcp;
    let decode = is_tcp && parts.next().is_some_and(|p| p == "PROXY");
    let encode = is_tcp && parts.next().is_some_and(|p| p == "PROXY");

    Some(L4Backend {
        namespace: namespace.to_string(),
        name: name.to_string(),
        port,
        protocol,
        proxy_protocol_decode: decode,
        proxy_protocol_encode: encode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_proxy_flags() {
        let b = parse_target("default/db:5432:PROXY:PROXY", L4Protocol::Tcp).unwrap();
        assert_eq!(b.namespace, "default");
        assert_eq!(b.name, "db");
        assert_eq!(b.port, ServicePort::Number(5432));
        assert!(b.proxy_protocol_decode);
        assert!(b.proxy_protocol_encode);

        let b = parse_target("default/dns:dns:PROXY", L4Protocol::Udp).unwrap();
        assert_eq!(b.port, ServicePort::Name("dns".into()));
        assert!(!b.proxy_protocol_decode);
    }

    #[test]
    fn test_rejects_malformed_targets() {
        assert!(parse_target("db:5432", L4Protocol::Tcp).is_none());
        assert!(parse_target("default/db", L4Protocol::Tcp).is_none());
        assert!(parse_target("/db:1", L4Protocol::Tcp).is_none());
    }
}
