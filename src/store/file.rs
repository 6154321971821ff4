//! File-backed resource store.
//!
//! The whole cluster view is one TOML snapshot. Reloading parses the file,
//! resolves certificates and swaps the state atomically.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_parser::prelude::*;

use crate::error::{ControllerError, LookupKind, Result};
use crate::model::{Endpoint, RoutingDeclaration, ServicePort, SslCert};
use crate::store::cache::{EndpointCache, NamespaceScope};
use crate::store::{ResourceStore, Service};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse snapshot {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPort {
    #[serde(default)]
    pub name: Option<String>,
    pub port: u16,
}

/// Ready addresses backing one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSet {
    pub namespace: String,
    pub service: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub ports: Vec<EndpointPort>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSpec {
    pub namespace: String,
    pub name: String,
    /// Inline PEM bundle.
    #[serde(default)]
    pub certificate: Option<String>,
    /// PEM file, relative to the snapshot's directory.
    #[serde(default)]
    pub certificate_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSnapshot {
    pub declarations: Vec<RoutingDeclaration>,
    pub services: Vec<Service>,
    pub endpoints: Vec<EndpointSet>,
    pub secrets: Vec<SecretSpec>,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Bumped on every applied snapshot; tags endpoint cache loads.
    generation: u64,
    snapshot: ClusterSnapshot,
    certificates: HashMap<String, SslCert>,
}

/// Resource store backed by a snapshot file.
pub struct FileStore {
    path: Option<PathBuf>,
    state: ArcSwap<StoreState>,
    cache: EndpointCache,
}

impl FileStore {
    /// Load the snapshot at `path`.
    pub fn open(path: &Path) -> std::result::Result<Self, StoreError> {
        let snapshot = read_snapshot(path)?;
        let state = build_state(snapshot, path.parent(), 0);
        tracing::info!(
            path = %path.display(),
            declarations = state.snapshot.declarations.len(),
            services = state.snapshot.services.len(),
            certificates = state.certificates.len(),
            "Snapshot loaded"
        );
        Ok(Self {
            path: Some(path.to_path_buf()),
            state: ArcSwap::from_pointee(state),
            cache: EndpointCache::new(),
        })
    }

    /// In-memory store, mostly for tests and dry runs.
    pub fn from_snapshot(snapshot: ClusterSnapshot) -> Self {
        Self {
            path: None,
            state: ArcSwap::from_pointee(build_state(snapshot, None, 0)),
            cache: EndpointCache::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Re-read the snapshot file. Returns whether anything changed.
    pub fn reload(&self) -> std::result::Result<bool, StoreError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(false);
        };
        let snapshot = read_snapshot(path)?;
        Ok(self.replace_with(snapshot, path.parent()))
    }

    /// Swap in a new snapshot. Returns whether anything changed.
    pub fn replace(&self, snapshot: ClusterSnapshot) -> bool {
        let base = self.path.as_deref().and_then(Path::parent).map(Path::to_path_buf);
        self.replace_with(snapshot, base.as_deref())
    }

    fn replace_with(&self, snapshot: ClusterSnapshot, base: Option<&Path>) -> bool {
        let current = self.state.load_full();
        if current.snapshot == snapshot {
            return false;
        }
        let changed = changed_namespaces(&current.snapshot.endpoints, &snapshot.endpoints);
        let generation = current.generation + 1;
        self.state.store(Arc::new(build_state(snapshot, base, generation)));
        self.cache.advance(generation);
        for namespace in &changed {
            self.cache.invalidate(namespace);
        }
        tracing::info!(
            generation,
            invalidated_namespaces = changed.len(),
            endpoints = self.total_endpoints(),
            "Snapshot reloaded"
        );
        true
    }

    /// Address count across every namespace.
    pub fn total_endpoints(&self) -> usize {
        let state = self.state.load();
        self.cache
            .get_or_load(NamespaceScope::All, state.generation, || {
                state.snapshot.endpoints.clone()
            })
            .iter()
            .map(|s| s.addresses.len())
            .sum()
    }

    /// Generation of the snapshot currently served.
    pub fn generation(&self) -> u64 {
        self.state.load().generation
    }

    pub fn endpoint_cache(&self) -> &EndpointCache {
        &self.cache
    }
}

impl ResourceStore for FileStore {
    fn list_declarations(&self) -> Vec<RoutingDeclaration> {
        self.state.load().snapshot.declarations.clone()
    }

    fn resolve_service(&self, namespace: &str, name: &str) -> Result<Service> {
        self.state
            .load()
            .snapshot
            .services
            .iter()
            .find(|s| s.namespace == namespace && s.name == name)
            .cloned()
            .ok_or_else(|| {
                ControllerError::lookup_miss(LookupKind::Service, format!("{}/{}", namespace, name))
            })
    }

    fn resolve_endpoints(
        &self,
        namespace: &str,
        service: &str,
        port: &ServicePort,
    ) -> Result<Vec<Endpoint>> {
        let svc = self.resolve_service(namespace, service)?;
        let spec = svc.port(port).ok_or_else(|| {
            ControllerError::lookup_miss(
                LookupKind::Service,
                format!("{}/{}:{}", namespace, service, port),
            )
        })?;

        let state = self.state.load();
        let sets = self
            .cache
            .get_or_load(NamespaceScope::Namespace(namespace.to_string()), state.generation, || {
                state
                    .snapshot
                    .endpoints
                    .iter()
                    .filter(|s| s.namespace == namespace)
                    .cloned()
                    .collect()
            });

        let target = format!("{}/{}", namespace, service);
        let mut matching = sets.iter().filter(|s| s.service == service).peekable();
        if matching.peek().is_none() {
            return Err(ControllerError::lookup_miss(LookupKind::Endpoints, target));
        }
        let mut endpoints = Vec::new();
        for set in matching {
            let matched = if set.ports.is_empty() {
                Some(spec.target())
            } else {
                set.ports
                    .iter()
                    .find(|p| match (&spec.name, &p.name) {
                        (Some(want), Some(have)) => want == have,
                        _ => p.port == spec.target(),
                    })
                    .map(|p| p.port)
            };
            let Some(port) = matched else { continue };
            for address in &set.addresses {
                endpoints.push(Endpoint {
                    address: address.clone(),
                    port,
                    target: Some(target.clone()),
                });
            }
        }
        endpoints.sort();
        endpoints.dedup();
        Ok(endpoints)
    }

    fn resolve_certificate(&self, namespace: &str, secret: &str) -> Result<SslCert> {
        let key = format!("{}/{}", namespace, secret);
        self.state
            .load()
            .certificates
            .get(&key)
            .cloned()
            .ok_or_else(|| ControllerError::lookup_miss(LookupKind::Secret, key))
    }
}

fn read_snapshot(path: &Path) -> std::result::Result<ClusterSnapshot, StoreError> {
    let content = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn build_state(snapshot: ClusterSnapshot, base: Option<&Path>, generation: u64) -> StoreState {
    let mut certificates = HashMap::new();
    for secret in &snapshot.secrets {
        let key = format!("{}/{}", secret.namespace, secret.name);
        let pem = match (&secret.certificate, &secret.certificate_file) {
            (Some(inline), _) => inline.clone().into_bytes(),
            (None, Some(file)) => {
                let full = match base {
                    Some(dir) if file.is_relative() => dir.join(file),
                    _ => file.clone(),
                };
                match std::fs::read(&full) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(secret = %key, path = %full.display(), error = %e, "Failed to read certificate file");
                        continue;
                    }
                }
            }
            (None, None) => {
                tracing::warn!(secret = %key, "Secret has no certificate");
                continue;
            }
        };
        match parse_certificate(&key, &pem) {
            Ok(cert) => {
                certificates.insert(key, cert);
            }
            Err(e) => tracing::warn!(secret = %key, error = %e, "Failed to parse certificate"),
        }
    }
    StoreState {
        generation,
        snapshot,
        certificates,
    }
}

/// Parse the leaf certificate of a PEM bundle.
pub fn parse_certificate(secret: &str, pem_data: &[u8]) -> std::result::Result<SslCert, String> {
    let blocks = x509_parser::pem::Pem::iter_from_buffer(pem_data)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid PEM: {}", e))?;
    let leaf = blocks.first().ok_or_else(|| "no PEM blocks found".to_string())?;
    let (_, cert) = X509Certificate::from_der(&leaf.contents)
        .map_err(|e| format!("invalid certificate: {}", e))?;

    let mut hostnames = BTreeSet::new();
    for cn in cert.subject().iter_common_name() {
        if let Ok(name) = cn.as_str() {
            hostnames.insert(name.to_ascii_lowercase());
        }
    }
    for ext in cert.extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
            for name in &san.general_names {
                if let GeneralName::DNSName(dns) = name {
                    hostnames.insert(dns.to_ascii_lowercase());
                }
            }
        }
    }

    Ok(SslCert {
        secret: secret.to_string(),
        hostnames: hostnames.into_iter().collect(),
        not_after: cert.validity().not_after.timestamp(),
        fingerprint: hex::encode(Sha256::digest(pem_data)),
    })
}

fn changed_namespaces(old: &[EndpointSet], new: &[EndpointSet]) -> BTreeSet<String> {
    fn by_namespace(sets: &[EndpointSet]) -> BTreeMap<&str, Vec<&EndpointSet>> {
        let mut map: BTreeMap<&str, Vec<&EndpointSet>> = BTreeMap::new();
        for set in sets {
            map.entry(set.namespace.as_str()).or_default().push(set);
        }
        map
    }
    let old = by_namespace(old);
    let new = by_namespace(new);
    old.keys()
        .chain(new.keys())
        .filter(|ns| old.get(*ns) != new.get(*ns))
        .map(|ns| ns.to_string())
        .collect()
}
