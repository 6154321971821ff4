//! Backend, server and location types plus the configuration snapshot.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::declaration::{DeclarationKey, PathType, ServicePort};
use crate::model::settings::{AffinityKind, CookieHash};

/// Upstream used whenever nothing else resolves.
pub const DEFAULT_UPSTREAM_NAME: &str = "upstream-default-backend";
/// Catch-all server hostname.
pub const DEFAULT_SERVER_NAME: &str = "_";
pub const ROOT_LOCATION: &str = "/";
/// Sentinel endpoint served by the data plane itself (returns 404/503).
pub const DEFAULT_ENDPOINT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_ENDPOINT_PORT: u16 = 8181;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            target: None,
        }
    }

    pub fn sentinel() -> Self {
        Self::new(DEFAULT_ENDPOINT_ADDRESS, DEFAULT_ENDPOINT_PORT)
    }
}

/// Canary traffic split attached to an alternative backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrafficShapingPolicy {
    pub weight: u32,
    pub weight_total: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAffinity {
    pub kind: AffinityKind,
    pub cookie_name: String,
    pub cookie_hash: CookieHash,
    /// Hostname → locations using this affinity.
    #[serde(default)]
    pub locations: BTreeMap<String, Vec<String>>,
}

/// A named upstream group.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct Backend {
    pub name: String,
    /// `namespace/name` of the service, absent for synthetic backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<ServicePort>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_affinity: Option<SessionAffinity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_hash_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancing: Option<String>,
    #[serde(default)]
    pub traffic_shaping: TrafficShapingPolicy,
    #[serde(default)]
    pub alternative_backends: Vec<String>,
    /// Reachable only as an alternative of some primary.
    #[serde(default)]
    pub no_server: bool,
    #[serde(default)]
    pub ssl_passthrough: bool,
}

impl Backend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service: None,
            port: None,
            endpoints: Vec::new(),
            session_affinity: None,
            upstream_hash_by: None,
            load_balancing: None,
            traffic_shaping: TrafficShapingPolicy::default(),
            alternative_backends: Vec::new(),
            no_server: false,
            ssl_passthrough: false,
        }
    }

    /// Sort set-like lists so serialization is order independent.
    pub fn normalize(&mut self) {
        self.endpoints.sort();
        self.endpoints.dedup();
        self.alternative_backends.sort();
        self.alternative_backends.dedup();
    }
}

impl PartialEq for Backend {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.service == other.service
            && self.port == other.port
            && self.session_affinity == other.session_affinity
            && self.upstream_hash_by == other.upstream_hash_by
            && self.load_balancing == other.load_balancing
            && self.traffic_shaping == other.traffic_shaping
            && self.no_server == other.no_server
            && self.ssl_passthrough == other.ssl_passthrough
            && as_set(&self.endpoints) == as_set(&other.endpoints)
            && as_set(&self.alternative_backends) == as_set(&other.alternative_backends)
    }
}

fn as_set<T: Ord>(items: &[T]) -> BTreeSet<&T> {
    items.iter().collect()
}

/// A certificate resolved from a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslCert {
    /// `namespace/name` of the secret.
    pub secret: String,
    /// Subject CN plus DNS SANs, lowercased.
    pub hostnames: Vec<String>,
    /// Expiry as unix seconds.
    pub not_after: i64,
    /// Content fingerprint of the PEM bundle.
    pub fingerprint: String,
}

impl SslCert {
    /// ASCII case-insensitive match, `*.domain` covering exactly one label.
    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.hostnames.iter().any(|name| {
            if let Some(suffix) = name.strip_prefix("*.") {
                match host.split_once('.') {
                    Some((label, rest)) => !label.is_empty() && rest == suffix,
                    None => false,
                }
            } else {
                *name == host
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    pub path_type: PathType,
    pub backend: String,
    /// Placeholder pointing at a default backend; a real rule may replace it.
    pub is_default_backend: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declaration: Option<DeclarationKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<ServicePort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite_target: Option<String>,
    #[serde(default)]
    pub use_regex: bool,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

impl Location {
    pub fn root(backend: impl Into<String>) -> Self {
        Self {
            path: ROOT_LOCATION.to_string(),
            path_type: PathType::Prefix,
            backend: backend.into(),
            is_default_backend: true,
            declaration: None,
            service: None,
            port: None,
            rewrite_target: None,
            use_regex: false,
            settings: BTreeMap::new(),
        }
    }

    /// Rewrite target present and different from the path.
    pub fn rewrites(&self) -> bool {
        matches!(&self.rewrite_target, Some(t) if !t.is_empty() && *t != self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub hostname: String,
    pub locations: Vec<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_cert: Option<SslCert>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub ssl_passthrough: bool,
}

impl Server {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            locations: Vec::new(),
            ssl_cert: None,
            aliases: Vec::new(),
            ssl_passthrough: false,
        }
    }

    pub fn location(&self, path: &str, path_type: PathType) -> Option<&Location> {
        self.locations
            .iter()
            .find(|l| l.path == path && l.path_type == path_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum L4Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L4Backend {
    pub namespace: String,
    pub name: String,
    pub port: ServicePort,
    pub protocol: L4Protocol,
    #[serde(default)]
    pub proxy_protocol_decode: bool,
    #[serde(default)]
    pub proxy_protocol_encode: bool,
}

/// A TCP or UDP stream service exposed on a dedicated port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L4Service {
    pub port: u16,
    pub backend: L4Backend,
    pub endpoints: Vec<Endpoint>,
}

/// A hostname routed by SNI without TLS termination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassthroughBackend {
    pub hostname: String,
    /// `namespace/name` of the service.
    pub service: String,
    pub port: ServicePort,
    pub backend: String,
}

/// The unit compared between reconciliation ticks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Configuration {
    pub backends: Vec<Backend>,
    pub servers: Vec<Server>,
    #[serde(default)]
    pub tcp_streams: Vec<L4Service>,
    #[serde(default)]
    pub udp_streams: Vec<L4Service>,
    #[serde(default)]
    pub passthrough_backends: Vec<PassthroughBackend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl PartialEq for Configuration {
    fn eq(&self, other: &Self) -> bool {
        self.backends == other.backends
            && self.servers == other.servers
            && self.tcp_streams == other.tcp_streams
            && self.udp_streams == other.udp_streams
            && self.passthrough_backends == other.passthrough_backends
    }
}

impl Configuration {
    pub fn backend(&self, name: &str) -> Option<&Backend> {
        self.backends.iter().find(|b| b.name == name)
    }

    pub fn server(&self, hostname: &str) -> Option<&Server> {
        self.servers.iter().find(|s| s.hostname == hostname)
    }

    /// Copy with set-like lists sorted and the checksum cleared.
    pub fn normalized(&self) -> Self {
        let mut copy = self.clone();
        copy.checksum = None;
        for backend in &mut copy.backends {
            backend.normalize();
        }
        for stream in copy.tcp_streams.iter_mut().chain(copy.udp_streams.iter_mut()) {
            stream.endpoints.sort();
        }
        copy
    }

    /// Copy without backends, the part only a full reload can apply.
    pub fn without_backends(&self) -> Self {
        let mut copy = self.clone();
        copy.backends.clear();
        copy
    }

    /// Every server hostname and alias.
    pub fn hostnames(&self) -> BTreeSet<&str> {
        self.servers
            .iter()
            .flat_map(|s| std::iter::once(s.hostname.as_str()).chain(s.aliases.iter().map(String::as_str)))
            .collect()
    }

    /// Secret names of every certificate in use.
    pub fn certificates(&self) -> BTreeSet<&str> {
        self.servers
            .iter()
            .filter_map(|s| s.ssl_cert.as_ref())
            .map(|c| c.secret.as_str())
            .collect()
    }

    pub fn declarations(&self) -> BTreeSet<&DeclarationKey> {
        self.servers
            .iter()
            .flat_map(|s| s.locations.iter())
            .filter_map(|l| l.declaration.as_ref())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cert(names: &[&str]) -> SslCert {
        SslCert {
            secret: "default/tls".into(),
            hostnames: names.iter().map(|s| s.to_string()).collect(),
            not_after: 0,
            fingerprint: String::new(),
        }
    }

    #[test]
    fn test_backend_equality_ignores_endpoint_order() {
        let mut a = Backend::new("default-web-80");
        a.endpoints = vec![Endpoint::new("10.0.0.1", 80), Endpoint::new("10.0.0.2", 80)];
        a.alternative_backends = vec!["x".into(), "y".into()];
        let mut b = a.clone();
        b.endpoints.reverse();
        b.alternative_backends.reverse();
        assert_eq!(a, b);

        b.endpoints.pop();
        assert_ne!(a, b);
    }

    #[test]
    fn test_configuration_equality_ignores_checksum() {
        let a = Configuration::default();
        let mut b = Configuration::default();
        b.checksum = Some("abc".into());
        assert_eq!(a, b);
    }

    #[test]
    fn test_wildcard_matches_single_label() {
        let c = cert(&["*.example.com"]);
        assert!(c.matches_host("www.Example.com"));
        assert!(!c.matches_host("a.b.example.com"));
        assert!(!c.matches_host("example.com"));
    }

    #[test]
    fn test_exact_cert_match_case_insensitive() {
        let c = cert(&["foo.com"]);
        assert!(c.matches_host("FOO.com"));
        assert!(!c.matches_host("bar.com"));
    }

    #[test]
    fn test_rewrites_only_when_target_differs() {
        let mut loc = Location::root("b");
        loc.path = "/a".into();
        assert!(!loc.rewrites());
        loc.rewrite_target = Some("/a".into());
        assert!(!loc.rewrites());
        loc.rewrite_target = Some("/".into());
        assert!(loc.rewrites());
    }
}
