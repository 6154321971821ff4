//! Routing model synthesis.
//!
//! Turns the full set of declarations plus store lookups into backends,
//! servers and locations. The output depends only on the inputs, never on
//! their order: declarations are sorted by key and everything is kept in
//! ordered maps.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, SystemTime};

use crate::error::{ControllerError, Result};
use crate::model::{
    Backend, BackendRef, Configuration, Endpoint, L4Service, Location,
    PassthroughBackend, ResolvedDeclaration, Server, SessionAffinity, SslCert,
    TrafficShapingPolicy, AffinityKind, DEFAULT_SERVER_NAME, DEFAULT_UPSTREAM_NAME,
    ROOT_LOCATION,
};
use crate::routing::locations;
use crate::routing::overlap::{check_overlap, Candidates, OverlapPolicy};
use crate::routing::tls;
use crate::store::ResourceStore;

/// Knobs that shape synthesis.
#[derive(Debug, Clone)]
pub struct BuilderOptions {
    /// `namespace/name` of the service behind the default upstream.
    pub default_backend_service: Option<String>,
    /// `namespace/name` of the default certificate secret.
    pub default_certificate: Option<String>,
    pub use_service_address: bool,
    pub enable_ssl_passthrough: bool,
    pub overlap_policy: OverlapPolicy,
    pub cert_expiry_warning: Duration,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            default_backend_service: None,
            default_certificate: None,
            use_service_address: false,
            enable_ssl_passthrough: false,
            overlap_policy: OverlapPolicy::FirstMatch,
            cert_expiry_warning: Duration::from_secs(240 * 3600),
        }
    }
}

/// Intermediate model shared by the builder and the canary merger.
#[derive(Debug, Clone, Default)]
pub struct RoutingModel {
    pub backends: BTreeMap<String, Backend>,
    pub servers: BTreeMap<String, Server>,
    pub passthrough_backends: Vec<PassthroughBackend>,
}

impl RoutingModel {
    /// Check the cross-references the data plane relies on.
    pub fn validate(&self) -> Result<()> {
        if !self.backends.contains_key(DEFAULT_UPSTREAM_NAME) {
            return Err(ControllerError::BuildFailure(
                "default upstream is missing".to_string(),
            ));
        }
        if !self.servers.contains_key(DEFAULT_SERVER_NAME) {
            return Err(ControllerError::BuildFailure(
                "catch-all server is missing".to_string(),
            ));
        }
        for server in self.servers.values() {
            for location in &server.locations {
                match self.backends.get(&location.backend) {
                    None => {
                        return Err(ControllerError::BuildFailure(format!(
                            "location {}{} references unknown backend {}",
                            server.hostname, location.path, location.backend
                        )))
                    }
                    Some(b) if b.no_server => {
                        return Err(ControllerError::BuildFailure(format!(
                            "location {}{} routes directly to canary backend {}",
                            server.hostname, location.path, location.backend
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        for backend in self.backends.values() {
            for alt in &backend.alternative_backends {
                match self.backends.get(alt) {
                    Some(b) if b.no_server => {}
                    _ => {
                        return Err(ControllerError::BuildFailure(format!(
                            "backend {} has invalid alternative {}",
                            backend.name, alt
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    /// Flatten into the configuration snapshot, sorted by name.
    pub fn into_configuration(
        self,
        tcp_streams: Vec<L4Service>,
        udp_streams: Vec<L4Service>,
    ) -> Configuration {
        let mut backends: Vec<Backend> = self.backends.into_values().collect();
        for backend in &mut backends {
            backend.normalize();
        }
        let mut passthrough_backends = self.passthrough_backends;
        passthrough_backends.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        Configuration {
            backends,
            servers: self.servers.into_values().collect(),
            tcp_streams,
            udp_streams,
            passthrough_backends,
            checksum: None,
        }
    }
}

/// Builds the base routing model from declarations.
pub struct ModelBuilder<'a> {
    store: &'a dyn ResourceStore,
    options: &'a BuilderOptions,
}

impl<'a> ModelBuilder<'a> {
    pub fn new(store: &'a dyn ResourceStore, options: &'a BuilderOptions) -> Self {
        Self { store, options }
    }

    /// Build the model. Each of `candidates` is checked for overlaps
    /// against the rest.
    pub fn build(
        &self,
        declarations: &[ResolvedDeclaration],
        candidates: &Candidates,
    ) -> Result<RoutingModel> {
        let mut sorted: Vec<&ResolvedDeclaration> = declarations.iter().collect();
        sorted.sort_by_key(|d| d.key());
        sorted.dedup_by_key(|d| d.key());

        for candidate in sorted.iter().filter(|d| candidates.contains(&d.key())) {
            let admitted = candidates.admitted(&candidate.key());
            check_overlap(self.options.overlap_policy, candidate, admitted, &sorted)?;
        }

        let mut model = RoutingModel::default();
        model
            .backends
            .insert(DEFAULT_UPSTREAM_NAME.to_string(), self.default_upstream());

        self.create_upstreams(&sorted, &mut model.backends);
        self.create_servers(&sorted, &mut model);
        self.create_locations(&sorted, &mut model);

        for server in model.servers.values_mut() {
            locations::post_process(&mut server.locations);
        }

        self.collect_passthrough(&mut model);

        Ok(model)
    }

    fn default_upstream(&self) -> Backend {
        let mut upstream = Backend::new(DEFAULT_UPSTREAM_NAME);
        if let Some(svc_key) = self.options.default_backend_service.as_deref() {
            upstream.service = Some(svc_key.to_string());
            match split_key(svc_key) {
                Some((namespace, name)) => match self.store.resolve_service(namespace, name) {
                    Ok(service) => match service.ports.first() {
                        Some(spec) => {
                            let port = crate::model::ServicePort::Number(spec.port);
                            match self.store.resolve_endpoints(namespace, name, &port) {
                                Ok(endpoints) => upstream.endpoints = endpoints,
                                Err(e) => tracing::warn!(error = %e, "Default backend endpoints unavailable"),
                            }
                            upstream.port = Some(port);
                        }
                        None => tracing::warn!(service = svc_key, "Default backend service has no ports"),
                    },
                    Err(e) => tracing::warn!(error = %e, "Default backend service unavailable"),
                },
                None => tracing::warn!(service = svc_key, "Default backend service is not namespace/name"),
            }
        }
        if upstream.endpoints.is_empty() {
            tracing::debug!("Default upstream has no endpoints, using sentinel endpoint");
            upstream.endpoints.push(Endpoint::sentinel());
        }
        upstream
    }

    fn create_upstreams(
        &self,
        declarations: &[&ResolvedDeclaration],
        backends: &mut BTreeMap<String, Backend>,
    ) {
        for decl in declarations {
            let namespace = decl.declaration.namespace.as_str();
            let refs = decl
                .declaration
                .default_backend
                .iter()
                .chain(decl.declaration.rules.iter().flat_map(|r| r.paths.iter().map(|p| &p.backend)));

            for backend_ref in refs {
                let name = backend_ref.upstream_name(namespace);
                if backends.contains_key(&name) {
                    continue;
                }
                let backend = self.create_upstream(decl, backend_ref, name.clone());
                tracing::debug!(backend = %name, declaration = %decl.key(), endpoints = backend.endpoints.len(), "Upstream created");
                backends.insert(name, backend);
            }
        }
    }

    fn create_upstream(
        &self,
        decl: &ResolvedDeclaration,
        backend_ref: &BackendRef,
        name: String,
    ) -> Backend {
        let namespace = decl.declaration.namespace.as_str();
        let settings = &decl.settings;
        let mut backend = Backend::new(name);
        backend.service = Some(format!("{}/{}", namespace, backend_ref.service));
        backend.port = Some(backend_ref.port.clone());
        backend.upstream_hash_by = settings.upstream_hash_by.clone();
        backend.load_balancing = settings.load_balancing.clone();

        if settings.canary.enabled {
            backend.no_server = true;
            backend.traffic_shaping = TrafficShapingPolicy {
                weight: settings.canary.weight,
                weight_total: settings.canary.weight_total,
                header: settings.canary.header.clone(),
                header_value: settings.canary.header_value.clone(),
                header_pattern: settings.canary.header_pattern.clone(),
                cookie: settings.canary.cookie.clone(),
            };
        }

        let use_service_address = settings
            .service_upstream
            .unwrap_or(self.options.use_service_address);
        if use_service_address {
            if let Some(endpoint) = self.service_address(namespace, backend_ref) {
                backend.endpoints = vec![endpoint];
                return backend;
            }
            tracing::warn!(
                backend = %backend.name,
                "Service address unavailable, falling back to endpoints"
            );
        }

        match self
            .store
            .resolve_endpoints(namespace, &backend_ref.service, &backend_ref.port)
        {
            Ok(mut endpoints) => {
                endpoints.sort();
                if endpoints.is_empty() {
                    tracing::warn!(backend = %backend.name, "Service has no active endpoints");
                }
                backend.endpoints = endpoints;
            }
            Err(e) => tracing::warn!(backend = %backend.name, error = %e, "Endpoint lookup failed"),
        }
        backend
    }

    /// One synthetic endpoint at the service's cluster address.
    fn service_address(&self, namespace: &str, backend_ref: &BackendRef) -> Option<Endpoint> {
        let service = self
            .store
            .resolve_service(namespace, &backend_ref.service)
            .ok()?;
        let ip = service
            .cluster_ip
            .as_deref()
            .filter(|ip| !ip.is_empty() && *ip != "None")?;
        let spec = service.port(&backend_ref.port)?;
        Some(Endpoint {
            address: ip.to_string(),
            port: spec.port,
            target: Some(service.key()),
        })
    }

    fn default_certificate(&self) -> Option<SslCert> {
        let key = self.options.default_certificate.as_deref()?;
        let (namespace, name) = split_key(key)?;
        match self.store.resolve_certificate(namespace, name) {
            Ok(cert) => Some(cert),
            Err(e) => {
                tracing::warn!(error = %e, "Default certificate unavailable");
                None
            }
        }
    }

    fn create_servers(&self, declarations: &[&ResolvedDeclaration], model: &mut RoutingModel) {
        let default_cert = self.default_certificate();

        let mut catch_all = Server::new(DEFAULT_SERVER_NAME);
        catch_all.locations.push(Location::root(DEFAULT_UPSTREAM_NAME));
        catch_all.ssl_cert = default_cert.clone();
        model
            .servers
            .insert(DEFAULT_SERVER_NAME.to_string(), catch_all);

        for decl in declarations.iter().filter(|d| !d.is_canary()) {
            let namespace = decl.declaration.namespace.as_str();
            let default_upstream = decl
                .declaration
                .default_backend
                .as_ref()
                .map(|b| b.upstream_name(namespace));

            if decl.declaration.rules.is_empty() {
                if let (Some(upstream), Some(backend_ref)) =
                    (&default_upstream, &decl.declaration.default_backend)
                {
                    self.claim_catch_all(decl, upstream, backend_ref, model);
                }
                continue;
            }

            for rule in &decl.declaration.rules {
                let host = server_name(&rule.host);
                if model.servers.contains_key(&host) {
                    continue;
                }
                let mut server = Server::new(host.clone());
                let mut root = Location::root(
                    default_upstream
                        .clone()
                        .unwrap_or_else(|| DEFAULT_UPSTREAM_NAME.to_string()),
                );
                if let Some(backend_ref) = &decl.declaration.default_backend {
                    root.service = Some(format!("{}/{}", namespace, backend_ref.service));
                    root.port = Some(backend_ref.port.clone());
                }
                server.locations.push(root);
                server.ssl_passthrough =
                    self.options.enable_ssl_passthrough && decl.settings.ssl_passthrough;
                tracing::debug!(host = %host, declaration = %decl.key(), "Server created");
                model.servers.insert(host, server);
            }
        }

        // aliases and certificates, first declaration wins
        for decl in declarations.iter().filter(|d| !d.is_canary()) {
            for rule in &decl.declaration.rules {
                let host = server_name(&rule.host);
                if host == DEFAULT_SERVER_NAME {
                    continue;
                }
                let Some(server) = model.servers.get_mut(&host) else {
                    continue;
                };

                if server.aliases.is_empty() && !decl.settings.aliases.is_empty() {
                    server.aliases = decl.settings.aliases.clone();
                }

                if server.ssl_cert.is_some() || decl.declaration.tls.is_empty() {
                    continue;
                }
                let cert = tls::select_certificate(
                    &host,
                    &decl.declaration,
                    self.store,
                    default_cert.as_ref(),
                );
                if let Some(cert) = &cert {
                    if tls::expires_within(cert, self.options.cert_expiry_warning, SystemTime::now()) {
                        tracing::warn!(
                            host = %host,
                            secret = %cert.secret,
                            not_after = cert.not_after,
                            "SSL certificate is expired or about to expire"
                        );
                    }
                }
                server.ssl_cert = cert;
            }
        }

        let hostnames: BTreeSet<String> = model.servers.keys().cloned().collect();
        for server in model.servers.values_mut() {
            server.aliases.retain(|alias| {
                let conflict = hostnames.contains(alias);
                if conflict {
                    tracing::warn!(
                        host = %server.hostname,
                        alias = %alias,
                        "Alias conflicts with an existing server, removing it"
                    );
                }
                !conflict
            });
        }
    }

    /// A declaration with only a default backend takes over the catch-all root.
    fn claim_catch_all(
        &self,
        decl: &ResolvedDeclaration,
        upstream: &str,
        backend_ref: &BackendRef,
        model: &mut RoutingModel,
    ) {
        let Some(root) = model
            .servers
            .get_mut(DEFAULT_SERVER_NAME)
            .and_then(|s| s.locations.iter_mut().find(|l| l.path == ROOT_LOCATION))
        else {
            return;
        };
        if !root.is_default_backend {
            tracing::warn!(
                declaration = %decl.key(),
                backend = %root.backend,
                "Catch-all location already claimed"
            );
            return;
        }
        tracing::info!(declaration = %decl.key(), backend = upstream, "Declaration claims the catch-all server");
        root.backend = upstream.to_string();
        root.is_default_backend = false;
        root.declaration = Some(decl.key());
        root.service = Some(format!("{}/{}", decl.declaration.namespace, backend_ref.service));
        root.port = Some(backend_ref.port.clone());
    }

    fn create_locations(&self, declarations: &[&ResolvedDeclaration], model: &mut RoutingModel) {
        for decl in declarations.iter().filter(|d| !d.is_canary()) {
            let namespace = decl.declaration.namespace.as_str();
            let settings = &decl.settings;

            for rule in &decl.declaration.rules {
                let host = server_name(&rule.host);
                let server_key = if model.servers.contains_key(&host) {
                    host.clone()
                } else {
                    DEFAULT_SERVER_NAME.to_string()
                };

                for path in &rule.paths {
                    let upstream = path.backend.upstream_name(namespace);
                    let Some(backend) = model.backends.get_mut(&upstream) else {
                        continue;
                    };
                    if backend.no_server {
                        continue;
                    }
                    let Some(server) = model.servers.get_mut(&server_key) else {
                        continue;
                    };

                    let fresh = Location {
                        path: path.path().to_string(),
                        path_type: path.path_type(),
                        backend: upstream.clone(),
                        is_default_backend: false,
                        declaration: Some(decl.key()),
                        service: Some(format!("{}/{}", namespace, path.backend.service)),
                        port: Some(path.backend.port.clone()),
                        rewrite_target: settings.rewrite_target.clone(),
                        use_regex: settings.use_regex,
                        settings: settings.extra.clone(),
                    };

                    match server
                        .locations
                        .iter_mut()
                        .find(|l| l.path == fresh.path && l.path_type == fresh.path_type)
                    {
                        Some(existing) if existing.is_default_backend => {
                            tracing::debug!(
                                host = %server.hostname,
                                path = %fresh.path,
                                backend = %upstream,
                                "Replacing default backend location"
                            );
                            *existing = fresh;
                        }
                        Some(existing) => {
                            tracing::debug!(
                                host = %server.hostname,
                                path = %fresh.path,
                                kept = %existing.backend,
                                ignored = %upstream,
                                declaration = %decl.key(),
                                "Location already configured"
                            );
                        }
                        None => server.locations.push(fresh),
                    }

                    if settings.affinity.kind == AffinityKind::Cookie {
                        let affinity = backend.session_affinity.get_or_insert_with(|| SessionAffinity {
                            kind: AffinityKind::Cookie,
                            cookie_name: settings.affinity.cookie_name.clone(),
                            cookie_hash: settings.affinity.cookie_hash,
                            locations: BTreeMap::new(),
                        });
                        let paths = affinity.locations.entry(host.clone()).or_default();
                        if !paths.iter().any(|p| p == path.path()) {
                            paths.push(path.path().to_string());
                        }
                    }
                }
            }
        }
    }

    fn collect_passthrough(&self, model: &mut RoutingModel) {
        if !self.options.enable_ssl_passthrough {
            return;
        }
        for server in model.servers.values().filter(|s| s.ssl_passthrough) {
            for location in &server.locations {
                if location.path != ROOT_LOCATION {
                    tracing::warn!(
                        host = %server.hostname,
                        path = %location.path,
                        "Ignoring SSL passthrough for non-root location"
                    );
                    continue;
                }
                if location.backend == DEFAULT_UPSTREAM_NAME {
                    tracing::warn!(
                        host = %server.hostname,
                        "SSL passthrough server has no default backend, skipping"
                    );
                    continue;
                }
                let Some(backend) = model.backends.get_mut(&location.backend) else {
                    continue;
                };
                let (Some(service), Some(port)) = (backend.service.clone(), backend.port.clone())
                else {
                    continue;
                };
                backend.ssl_passthrough = true;
                model.passthrough_backends.push(PassthroughBackend {
                    hostname: server.hostname.clone(),
                    service,
                    port,
                    backend: backend.name.clone(),
                });
            }
        }
    }
}

/// Server name for a rule host; empty means the catch-all.
fn server_name(host: &str) -> String {
    if host.is_empty() {
        DEFAULT_SERVER_NAME.to_string()
    } else {
        host.to_ascii_lowercase()
    }
}

fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('/')
        .filter(|(ns, name)| !ns.is_empty() && !name.is_empty())
}
