//! SNI-routed TCP relay.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::model::Configuration;
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;
use crate::passthrough::sni;
use crate::store::ResourceStore;

/// Where a passthrough connection is relayed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassthroughTarget {
    /// `host:port`, IPv6 hosts bracketed.
    pub address: String,
    /// Prefix the relayed stream with a PROXY protocol v1 header.
    pub proxy_protocol: bool,
}

impl PassthroughTarget {
    pub fn new(address: impl Into<String>, proxy_protocol: bool) -> Self {
        Self {
            address: address.into(),
            proxy_protocol,
        }
    }
}

/// Hostname to target lookup table.
#[derive(Debug, Clone, Default)]
pub struct PassthroughTable {
    hosts: HashMap<String, PassthroughTarget>,
    default: Option<PassthroughTarget>,
}

impl PassthroughTable {
    pub fn new(default: Option<PassthroughTarget>) -> Self {
        Self {
            hosts: HashMap::new(),
            default,
        }
    }

    pub fn insert(&mut self, hostname: &str, target: PassthroughTarget) {
        self.hosts.insert(hostname.to_ascii_lowercase(), target);
    }

    /// Build the table from a configuration's passthrough backends.
    ///
    /// A host is relayed to its service's cluster IP and service port. Without
    /// a usable cluster IP the backend's first endpoint is used instead; hosts
    /// with neither are left out.
    pub fn from_configuration(
        config: &Configuration,
        store: &dyn ResourceStore,
        default: Option<PassthroughTarget>,
    ) -> Self {
        let mut table = Self::new(default);
        for pb in &config.passthrough_backends {
            let (namespace, name) = pb.service.split_once('/').unwrap_or(("", pb.service.as_str()));
            let via_service = store.resolve_service(namespace, name).ok().and_then(|svc| {
                let ip = svc.cluster_ip.as_deref().filter(|ip| !ip.is_empty() && *ip != "None")?;
                let port = svc.port(&pb.port)?.port;
                Some(join_host_port(ip, port))
            });
            let address = via_service.or_else(|| {
                config
                    .backend(&pb.backend)
                    .and_then(|b| b.endpoints.first())
                    .map(|e| join_host_port(&e.address, e.port))
            });
            match address {
                Some(address) => table.insert(&pb.hostname, PassthroughTarget::new(address, false)),
                None => tracing::warn!(
                    host = %pb.hostname,
                    service = %pb.service,
                    "No address for passthrough host, skipping"
                ),
            }
        }
        table
    }

    /// Target for `hostname`, falling back to the default target.
    pub fn resolve(&self, hostname: Option<&str>) -> Option<&PassthroughTarget> {
        hostname
            .and_then(|h| self.hosts.get(&h.to_ascii_lowercase()))
            .or(self.default.as_ref())
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// `PROXY TCP4|TCP6 src dst sport dport\r\n`
pub fn proxy_v1_header(source: SocketAddr, destination: SocketAddr) -> String {
    let family = if source.is_ipv4() { "TCP4" } else { "TCP6" };
    format!(
        "PROXY {} {} {} {} {}\r\n",
        family,
        source.ip(),
        destination.ip(),
        source.port(),
        destination.port()
    )
}

#[derive(Debug, Clone)]
pub struct PassthroughOptions {
    /// Budget for reading the first TLS record.
    pub sniff_timeout: Duration,
    /// Upper bound on sniffed bytes.
    pub buffer_size: usize,
    pub dial_timeout: Duration,
}

impl Default for PassthroughOptions {
    fn default() -> Self {
        Self {
            sniff_timeout: Duration::from_secs(5),
            buffer_size: 4096,
            dial_timeout: Duration::from_secs(5),
        }
    }
}

/// Relays TLS connections by SNI without terminating them.
pub struct PassthroughRouter {
    table: ArcSwap<PassthroughTable>,
    default: Option<PassthroughTarget>,
    options: PassthroughOptions,
    tracker: ConnectionTracker,
}

impl PassthroughRouter {
    pub fn new(default: Option<PassthroughTarget>, options: PassthroughOptions) -> Self {
        Self {
            table: ArcSwap::from_pointee(PassthroughTable::new(default.clone())),
            default,
            options,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Rebuild the hostname table from an applied configuration.
    pub fn rebuild(&self, config: &Configuration, store: &dyn ResourceStore) {
        let table = PassthroughTable::from_configuration(config, store, self.default.clone());
        tracing::debug!(hosts = table.len(), "Passthrough table rebuilt");
        self.update(table);
    }

    pub fn update(&self, table: PassthroughTable) {
        self.table.store(Arc::new(table));
    }

    pub fn table(&self) -> Arc<PassthroughTable> {
        self.table.load_full()
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Accept connections until shutdown.
    ///
    /// Connections already relaying keep running; use the tracker to drain them.
    pub async fn serve(self: Arc<Self>, listener: Listener, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            max_connections = listener.max_connections(),
            "Passthrough router accepting connections"
        );
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Passthrough router stopped accepting");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let router = Arc::clone(&self);
                        let guard = self.tracker.track();
                        tokio::spawn(async move {
                            let _permit = permit;
                            if let Err(e) = router.handle(stream, peer).await {
                                tracing::debug!(
                                    connection_id = %guard.id(),
                                    peer_addr = %peer,
                                    error = %e,
                                    "Passthrough connection ended with error"
                                );
                            }
                            drop(guard);
                        });
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => tracing::warn!(error = %e, "Accept failed"),
                },
            }
        }
    }

    /// Route and relay one client connection.
    pub async fn handle(&self, mut client: TcpStream, peer: SocketAddr) -> io::Result<()> {
        let sniffed = match tokio::time::timeout(
            self.options.sniff_timeout,
            sniff(&mut client, self.options.buffer_size),
        )
        .await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                metrics::record_passthrough_connection("sniff_error");
                return Err(e);
            }
            Err(_) => {
                metrics::record_passthrough_connection("sniff_timeout");
                tracing::debug!(peer_addr = %peer, "No ClientHello before timeout, dropping");
                return Ok(());
            }
        };

        let hostname = sni::server_name(&sniffed);
        let target = match self.table.load().resolve(hostname.as_deref()) {
            Some(target) => target.clone(),
            None => {
                metrics::record_passthrough_connection("no_route");
                tracing::debug!(
                    peer_addr = %peer,
                    host = hostname.as_deref().unwrap_or(""),
                    "No passthrough target, dropping"
                );
                return Ok(());
            }
        };

        let mut upstream = match tokio::time::timeout(
            self.options.dial_timeout,
            TcpStream::connect(target.address.as_str()),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                metrics::record_passthrough_connection("dial_error");
                tracing::warn!(target = %target.address, error = %e, "Passthrough dial failed");
                return Err(e);
            }
            Err(_) => {
                metrics::record_passthrough_connection("dial_error");
                return Err(io::Error::new(io::ErrorKind::TimedOut, "dial timed out"));
            }
        };

        if target.proxy_protocol {
            let local = client.local_addr()?;
            upstream.write_all(proxy_v1_header(peer, local).as_bytes()).await?;
        }
        upstream.write_all(&sniffed).await?;

        metrics::record_passthrough_connection("relayed");
        tracing::debug!(
            peer_addr = %peer,
            host = hostname.as_deref().unwrap_or(""),
            target = %target.address,
            "Relaying passthrough connection"
        );
        relay(client, upstream).await;
        Ok(())
    }
}

/// Read the first TLS record, capped at `buffer_size` bytes.
///
/// Non-handshake traffic yields just the record header, which the caller
/// still replays to whatever target it picks.
async fn sniff(client: &mut TcpStream, buffer_size: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; sni::RECORD_HEADER_LEN];
    client.read_exact(&mut buf).await?;
    if let Some(len) = sni::record_length(&buf) {
        let body = len.min(buffer_size.saturating_sub(sni::RECORD_HEADER_LEN));
        buf.resize(sni::RECORD_HEADER_LEN + body, 0);
        client.read_exact(&mut buf[sni::RECORD_HEADER_LEN..]).await?;
    }
    Ok(buf)
}

/// Copy both directions; the first side to finish ends the relay.
async fn relay(client: TcpStream, upstream: TcpStream) {
    let (mut client_read, mut client_write) = client.into_split();
    let (mut upstream_read, mut upstream_write) = upstream.into_split();

    let mut to_upstream = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut client_read, &mut upstream_write).await;
        let _ = upstream_write.shutdown().await;
        copied
    });
    let mut to_client = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut upstream_read, &mut client_write).await;
        let _ = client_write.shutdown().await;
        copied
    });

    tokio::select! {
        _ = &mut to_upstream => to_client.abort(),
        _ = &mut to_client => to_upstream.abort(),
    }
}
