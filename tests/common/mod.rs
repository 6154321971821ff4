//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use ingress_control::dataplane::{renderer, DataPlane};
use ingress_control::error::{ControllerError, Result};
use ingress_control::model::{
    Backend, BackendRef, Configuration, HostRule, PathRule, PathType, RoutingDeclaration,
    ServicePort,
};
use ingress_control::store::{ClusterSnapshot, EndpointSet, FileStore, Service, ServicePortSpec};
use ingress_control::sync::ReconcilerOptions;

pub const PREFIX: &str = "nginx.ingress.kubernetes.io";

pub fn service(namespace: &str, name: &str, port: u16, target_port: u16) -> Service {
    Service {
        namespace: namespace.into(),
        name: name.into(),
        cluster_ip: Some("10.96.0.1".into()),
        ports: vec![ServicePortSpec {
            name: None,
            port,
            target_port: Some(target_port),
        }],
    }
}

pub fn endpoints(namespace: &str, service: &str, addresses: &[&str]) -> EndpointSet {
    EndpointSet {
        namespace: namespace.into(),
        service: service.into(),
        addresses: addresses.iter().map(|a| a.to_string()).collect(),
        ports: vec![],
    }
}

/// One host, one path, one backend.
pub fn declaration(
    namespace: &str,
    name: &str,
    host: &str,
    path: &str,
    service: &str,
    port: u16,
) -> RoutingDeclaration {
    RoutingDeclaration {
        namespace: namespace.into(),
        name: name.into(),
        rules: vec![HostRule {
            host: host.into(),
            paths: vec![path_rule(path, None, service, port)],
        }],
        ..Default::default()
    }
}

pub fn path_rule(path: &str, path_type: Option<PathType>, service: &str, port: u16) -> PathRule {
    PathRule {
        path: Some(path.into()),
        path_type,
        backend: BackendRef {
            service: service.into(),
            port: ServicePort::Number(port),
        },
    }
}

pub fn annotate(mut decl: RoutingDeclaration, pairs: &[(&str, &str)]) -> RoutingDeclaration {
    for (key, value) in pairs {
        decl.annotations
            .insert(format!("{}/{}", PREFIX, key), value.to_string());
    }
    decl
}

pub fn canary(decl: RoutingDeclaration, weight: u32) -> RoutingDeclaration {
    annotate(decl, &[("canary", "true"), ("canary-weight", &weight.to_string())])
}

/// Store with each named service in `default`, port 80 → 8080, one
/// endpoint per service at `10.0.<index>.1`.
pub fn store_with(declarations: Vec<RoutingDeclaration>, services: &[&str]) -> FileStore {
    let mut snapshot = ClusterSnapshot {
        declarations,
        ..Default::default()
    };
    for (i, name) in services.iter().enumerate() {
        snapshot.services.push(service("default", name, 80, 8080));
        let address = format!("10.0.{}.1", i);
        snapshot
            .endpoints
            .push(endpoints("default", name, &[address.as_str()]));
    }
    FileStore::from_snapshot(snapshot)
}

pub fn two_service_store(declarations: Vec<RoutingDeclaration>) -> FileStore {
    store_with(declarations, &["svc-a", "svc-b"])
}

pub fn fast_reconciler_options() -> ReconcilerOptions {
    ReconcilerOptions {
        initial_sync_delay: Duration::ZERO,
        min_sync_interval: Duration::ZERO,
        ..ReconcilerOptions::default()
    }
}

/// Data plane that records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingDataPlane {
    pub reloads: Mutex<Vec<Configuration>>,
    pub pushes: Mutex<Vec<Vec<Backend>>>,
    pub checks: AtomicUsize,
    pub fail_reload: AtomicBool,
    pub fail_push: AtomicBool,
}

impl RecordingDataPlane {
    pub fn reload_count(&self) -> usize {
        self.reloads.lock().unwrap().len()
    }

    pub fn push_count(&self) -> usize {
        self.pushes.lock().unwrap().len()
    }

    pub fn last_push(&self) -> BTreeMap<String, Backend> {
        self.pushes
            .lock()
            .unwrap()
            .last()
            .map(|backends| backends.iter().map(|b| (b.name.clone(), b.clone())).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DataPlane for RecordingDataPlane {
    async fn publish_full(&self, config: &Configuration) -> Result<()> {
        if self.fail_reload.load(Ordering::SeqCst) {
            return Err(ControllerError::PublishFailure("reload rejected".into()));
        }
        self.reloads.lock().unwrap().push(config.clone());
        Ok(())
    }

    async fn apply_dynamic_backends(&self, backends: &[Backend]) -> Result<()> {
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(ControllerError::PublishFailure("connection refused".into()));
        }
        self.pushes.lock().unwrap().push(backends.to_vec());
        Ok(())
    }

    async fn render_and_syntax_check(&self, config: &Configuration) -> Result<Vec<u8>> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        renderer::check_structure(config)?;
        renderer::render(config)
    }
}

/// A minimal TLS 1.2 ClientHello record, with SNI when `host` is set.
pub fn client_hello(host: Option<&str>) -> Vec<u8> {
    let mut extensions = Vec::new();
    if let Some(host) = host {
        let name = host.as_bytes();
        let mut sni = Vec::new();
        sni.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
        sni.push(0);
        sni.extend_from_slice(&(name.len() as u16).to_be_bytes());
        sni.extend_from_slice(name);
        extensions.extend_from_slice(&[0x00, 0x00]);
        extensions.extend_from_slice(&(sni.len() as u16).to_be_bytes());
        extensions.extend_from_slice(&sni);
    }

    let mut hello = vec![0x03, 0x03];
    hello.extend_from_slice(&[1u8; 32]);
    hello.push(0);
    hello.extend_from_slice(&[0x00, 0x02, 0xc0, 0x2f]);
    hello.extend_from_slice(&[0x01, 0x00]);
    hello.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    hello.extend_from_slice(&extensions);

    let mut handshake = vec![0x01];
    handshake.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&hello);

    let mut record = vec![0x16, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}
