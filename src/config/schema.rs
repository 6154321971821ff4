//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::admission::BatcherOptions;
use crate::model::SettingsParser;
use crate::model::settings::DEFAULT_ANNOTATION_PREFIX;
use crate::observability::LogFormat;
use crate::passthrough::{PassthroughOptions, PassthroughTarget};
use crate::resilience::Backoff;
use crate::routing::{BuilderOptions, OverlapPolicy, StreamOptions, SynthesisOptions};
use crate::sync::ReconcilerOptions;

/// Root configuration for the controller.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ControllerConfig {
    /// Routing model and sync behaviour.
    pub controller: ControllerSection,

    /// Where cluster state is read from.
    pub store: StoreConfig,

    /// Admission webhook and batcher.
    pub admission: AdmissionConfig,

    /// Retry policy for dynamic backend pushes.
    pub dynamic: DynamicConfig,

    /// Data-plane endpoints.
    pub data_plane: DataPlaneConfig,

    /// SNI passthrough listener.
    pub passthrough: PassthroughConfig,

    /// TCP/UDP stream services.
    pub streams: StreamsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControllerSection {
    /// `namespace/name` of the service behind the default upstream.
    pub default_backend_service: Option<String>,

    /// `namespace/name` of the secret used when no declaration supplies one.
    pub default_ssl_certificate: Option<String>,

    /// Prefix of recognized settings-bag keys.
    pub annotation_prefix: String,

    /// Route to the service address instead of individual endpoints.
    pub use_service_address: bool,

    pub enable_ssl_passthrough: bool,

    pub overlap_policy: OverlapPolicy,

    /// Restrict exact/prefix paths to `A-Za-z0-9-._~/`.
    pub strict_path_validation: bool,

    /// Full resync interval in seconds.
    pub sync_period_secs: u64,

    /// Minimum spacing between two sync ticks in milliseconds.
    pub min_sync_interval_ms: u64,

    /// Delay before the very first dynamic push in milliseconds.
    pub initial_sync_delay_ms: u64,

    /// Warn when a certificate in use expires within this many hours.
    pub cert_expiry_warning_hours: u64,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            default_backend_service: None,
            default_ssl_certificate: None,
            annotation_prefix: DEFAULT_ANNOTATION_PREFIX.to_string(),
            use_service_address: false,
            enable_ssl_passthrough: false,
            overlap_policy: OverlapPolicy::default(),
            strict_path_validation: false,
            sync_period_secs: 600,
            min_sync_interval_ms: 300,
            initial_sync_delay_ms: 1000,
            cert_expiry_warning_hours: 240,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Cluster snapshot file (TOML).
    pub snapshot_path: PathBuf,

    /// Reload the snapshot when the file changes.
    pub watch: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("cluster.toml"),
            watch: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub enabled: bool,

    /// Webhook bind address.
    pub bind_address: String,

    /// Minimum spacing between two validated batches in milliseconds.
    pub batch_window_ms: u64,

    pub workers: usize,

    /// How long one request may wait for its verdict, in seconds.
    pub request_deadline_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8443".to_string(),
            batch_window_ms: 3000,
            workers: 10,
            request_deadline_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DynamicConfig {
    /// Retries after the first failed push.
    pub retries: u32,

    pub initial_delay_ms: u64,

    pub factor: f64,

    /// Random extra delay as a fraction of the base delay (0..=1).
    pub jitter: f64,
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self {
            retries: 15,
            initial_delay_ms: 1000,
            factor: 1.3,
            jitter: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DataPlaneConfig {
    /// Base URL of the data plane's configuration API.
    pub endpoint: String,

    pub backends_path: String,

    pub reload_path: String,

    /// Where the rendered configuration is written before a reload.
    pub output_path: Option<String>,

    /// External syntax check; receives the rendered document on stdin.
    pub test_command: Vec<String>,

    pub request_timeout_ms: u64,
}

impl Default for DataPlaneConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:10246".to_string(),
            backends_path: "/configuration/backends".to_string(),
            reload_path: "/reload".to_string(),
            output_path: None,
            test_command: Vec::new(),
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PassthroughConfig {
    /// Public TLS port; only bound when SSL passthrough is enabled.
    pub bind_address: String,

    pub max_connections: usize,

    /// Where connections without a passthrough host go, usually the
    /// local proxy's TLS port. Unset means drop.
    pub default_target: Option<String>,

    /// Send a PROXY v1 header to the default target.
    pub default_proxy_protocol: bool,

    pub sniff_timeout_ms: u64,

    pub dial_timeout_ms: u64,

    /// Upper bound on bytes read while looking for the ClientHello.
    pub buffer_size: usize,
}

impl Default for PassthroughConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:443".to_string(),
            max_connections: 10_000,
            default_target: Some("127.0.0.1:442".to_string()),
            default_proxy_protocol: true,
            sniff_timeout_ms: 5000,
            dial_timeout_ms: 5000,
            buffer_size: 4096,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamsConfig {
    /// `external port → namespace/service:port[:PROXY[:PROXY]]`
    pub tcp: BTreeMap<String, String>,

    pub udp: BTreeMap<String, String>,

    /// Ports the controller itself uses; stream entries on them are ignored.
    pub reserved_ports: Vec<u16>,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            tcp: BTreeMap::new(),
            udp: BTreeMap::new(),
            reserved_ports: vec![80, 442, 443, 8181, 10246, 10254],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter directive, e.g. `info` or `info,ingress_control=debug`.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:10254".to_string(),
        }
    }
}

impl ControllerConfig {
    pub fn builder_options(&self) -> BuilderOptions {
        let c = &self.controller;
        BuilderOptions {
            default_backend_service: c.default_backend_service.clone(),
            default_certificate: c.default_ssl_certificate.clone(),
            use_service_address: c.use_service_address,
            enable_ssl_passthrough: c.enable_ssl_passthrough,
            overlap_policy: c.overlap_policy,
            cert_expiry_warning: Duration::from_secs(c.cert_expiry_warning_hours * 3600),
        }
    }

    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            tcp: self.streams.tcp.clone(),
            udp: self.streams.udp.clone(),
            reserved_ports: self.streams.reserved_ports.iter().copied().collect(),
        }
    }

    pub fn synthesis_options(&self) -> SynthesisOptions {
        SynthesisOptions {
            builder: self.builder_options(),
            streams: self.stream_options(),
            parser: SettingsParser::new(self.controller.annotation_prefix.clone()),
            strict_path_validation: self.controller.strict_path_validation,
        }
    }

    pub fn reconciler_options(&self) -> ReconcilerOptions {
        ReconcilerOptions {
            synthesis: self.synthesis_options(),
            initial_sync_delay: Duration::from_millis(self.controller.initial_sync_delay_ms),
            min_sync_interval: Duration::from_millis(self.controller.min_sync_interval_ms),
            resync_period: Duration::from_secs(self.controller.sync_period_secs),
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial: Duration::from_millis(self.dynamic.initial_delay_ms),
            factor: self.dynamic.factor,
            jitter: self.dynamic.jitter,
            retries: self.dynamic.retries,
        }
    }

    pub fn batcher_options(&self) -> BatcherOptions {
        BatcherOptions {
            window: Duration::from_millis(self.admission.batch_window_ms),
            workers: self.admission.workers,
            deadline: Duration::from_secs(self.admission.request_deadline_secs),
        }
    }

    pub fn passthrough_options(&self) -> PassthroughOptions {
        PassthroughOptions {
            sniff_timeout: Duration::from_millis(self.passthrough.sniff_timeout_ms),
            buffer_size: self.passthrough.buffer_size,
            dial_timeout: Duration::from_millis(self.passthrough.dial_timeout_ms),
        }
    }

    pub fn passthrough_default(&self) -> Option<PassthroughTarget> {
        self.passthrough
            .default_target
            .as_ref()
            .map(|addr| PassthroughTarget::new(addr.clone(), self.passthrough.default_proxy_protocol))
    }
}
