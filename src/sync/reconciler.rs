//! Reconciliation loop.
//!
//! One tick: read every declaration, synthesize a candidate configuration,
//! decide what the data plane needs, publish, and only then make the
//! candidate the running configuration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use tokio::sync::broadcast;

use crate::dataplane::DataPlane;
use crate::error::Result;
use crate::model::Configuration;
use crate::observability::metrics;
use crate::passthrough::PassthroughRouter;
use crate::routing::{self, Candidates, SynthesisOptions};
use crate::store::ResourceStore;
use crate::sync::decision::{checksum, decide, removed_items, ChangeDecision};
use crate::sync::publisher::DynamicPublisher;
use crate::sync::queue::SyncQueue;

/// Shared, atomically swapped view of the running configuration.
#[derive(Debug, Clone, Default)]
pub struct RunningConfig {
    inner: Arc<ArcSwapOption<Configuration>>,
}

impl RunningConfig {
    pub fn load(&self) -> Option<Arc<Configuration>> {
        self.inner.load_full()
    }

    fn store(&self, config: Configuration) {
        self.inner.store(Some(Arc::new(config)));
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    pub synthesis: SynthesisOptions,
    /// Wait before the first dynamic push so the data plane can start.
    pub initial_sync_delay: Duration,
    /// Minimum time between two ticks.
    pub min_sync_interval: Duration,
    /// Tick even without change notifications.
    pub resync_period: Duration,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            synthesis: SynthesisOptions::default(),
            initial_sync_delay: Duration::from_secs(1),
            min_sync_interval: Duration::from_millis(300),
            resync_period: Duration::from_secs(600),
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
    data_plane: Arc<dyn DataPlane>,
    publisher: DynamicPublisher,
    options: ReconcilerOptions,
    running: RunningConfig,
    passthrough: Option<Arc<PassthroughRouter>>,
    first_sync: bool,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        data_plane: Arc<dyn DataPlane>,
        publisher: DynamicPublisher,
        options: ReconcilerOptions,
    ) -> Self {
        Self {
            store,
            data_plane,
            publisher,
            options,
            running: RunningConfig::default(),
            passthrough: None,
            first_sync: true,
        }
    }

    /// Rebuild this router's hostname table after every applied tick.
    pub fn with_passthrough(mut self, router: Arc<PassthroughRouter>) -> Self {
        self.passthrough = Some(router);
        self
    }

    pub fn running(&self) -> RunningConfig {
        self.running.clone()
    }

    /// Run one reconciliation tick.
    ///
    /// Any failure leaves the running configuration untouched.
    pub async fn sync(&mut self) -> Result<ChangeDecision> {
        let started = Instant::now();
        let result = self.sync_inner().await;
        let outcome = match &result {
            Ok(decision) => decision.as_str(),
            Err(e) => e.kind_label(),
        };
        metrics::record_sync(outcome, started.elapsed());
        result
    }

    async fn sync_inner(&mut self) -> Result<ChangeDecision> {
        let synthesis = &self.options.synthesis;
        let declarations = routing::resolve_all(
            self.store.list_declarations(),
            &synthesis.parser,
            synthesis.strict_path_validation,
        );
        let mut candidate = routing::synthesize(
            self.store.as_ref(),
            synthesis,
            &declarations,
            &Candidates::new(),
        )?;

        let running = self.running.load();
        let decision = decide(running.as_deref(), &candidate);
        match decision {
            ChangeDecision::NoChange => {
                tracing::debug!("No configuration change detected, skipping");
                return Ok(decision);
            }
            ChangeDecision::FullReload => {
                let sum = checksum(&candidate)?;
                candidate.checksum = Some(sum.clone());
                if let Err(e) = self.data_plane.publish_full(&candidate).await {
                    metrics::record_reload(false);
                    tracing::error!(checksum = %sum, error = %e, "Full reload failed");
                    return Err(e);
                }
                metrics::record_reload(true);
                tracing::info!(
                    checksum = %sum,
                    servers = candidate.servers.len(),
                    backends = candidate.backends.len(),
                    "Configuration reloaded"
                );
            }
            ChangeDecision::DynamicOnly => {
                candidate.checksum = running.as_ref().and_then(|r| r.checksum.clone());
                tracing::info!("Changes handled by dynamic configuration, no reload");
            }
        }

        if self.first_sync {
            tracing::debug!(delay = ?self.options.initial_sync_delay, "Initial sync, waiting before dynamic update");
            tokio::time::sleep(self.options.initial_sync_delay).await;
        }

        self.publisher.publish(&candidate.backends).await?;
        self.first_sync = false;

        if let Some(old) = running.as_deref() {
            let removed = removed_items(old, &candidate);
            if !removed.is_empty() {
                tracing::debug!(
                    hosts = ?removed.hosts,
                    backends = ?removed.backends,
                    certificates = ?removed.certificates,
                    declarations = ?removed.declarations,
                    "Removing metrics for vanished objects"
                );
            }
            for host in &removed.hosts {
                metrics::remove_host(host);
            }
            for backend in &removed.backends {
                metrics::remove_backend(backend);
            }
            for secret in &removed.certificates {
                metrics::set_certificate_in_use(secret, false);
            }
        }
        self.record_gauges(&candidate);

        if let Some(router) = &self.passthrough {
            router.rebuild(&candidate, self.store.as_ref());
        }

        self.running.store(candidate);
        Ok(decision)
    }

    fn record_gauges(&self, config: &Configuration) {
        for backend in &config.backends {
            metrics::set_backend_endpoints(&backend.name, backend.endpoints.len());
        }
        for server in &config.servers {
            if let Some(cert) = &server.ssl_cert {
                metrics::set_ssl_expiry(&server.hostname, cert.not_after);
                metrics::set_certificate_in_use(&cert.secret, true);
            }
        }
    }

    /// Tick on every queued request until shutdown.
    ///
    /// Ticks are at least `min_sync_interval` apart. A failed tick is
    /// requeued. Shutdown is observed between ticks, never during one.
    pub async fn run(mut self, queue: SyncQueue, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Reconciler started");
        let mut last_tick: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = queue.next() => {}
                _ = tokio::time::sleep(self.options.resync_period) => {
                    tracing::debug!("Periodic resync");
                }
            }

            if let Some(last) = last_tick {
                let since = last.elapsed();
                if since < self.options.min_sync_interval {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(self.options.min_sync_interval - since) => {}
                    }
                }
            }
            last_tick = Some(Instant::now());

            if let Err(e) = self.sync().await {
                tracing::error!(error = %e, "Sync failed, requeueing");
                queue.enqueue("retry after failure");
            }
        }

        tracing::info!("Reconciler stopped");
    }
}
