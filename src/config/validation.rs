//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (workers > 0, jitter within 0..=1)
//! - Check addresses, URLs and `namespace/name` references are well formed
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function of the parsed config

use std::net::SocketAddr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::config::schema::ControllerConfig;

/// Smallest sniff buffer that can hold a typical ClientHello.
const MIN_BUFFER_SIZE: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &ControllerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let controller = &config.controller;
    for (field, value) in [
        ("controller.default_backend_service", &controller.default_backend_service),
        ("controller.default_ssl_certificate", &controller.default_ssl_certificate),
    ] {
        if let Some(value) = value {
            if !is_namespaced_name(value) {
                errors.push(ValidationError::new(field, format!("{:?} is not namespace/name", value)));
            }
        }
    }
    if controller.annotation_prefix.trim_matches('/').is_empty() {
        errors.push(ValidationError::new("controller.annotation_prefix", "must not be empty"));
    }
    if controller.sync_period_secs == 0 {
        errors.push(ValidationError::new("controller.sync_period_secs", "must be greater than 0"));
    }

    let admission = &config.admission;
    if admission.enabled {
        check_socket_addr(&mut errors, "admission.bind_address", &admission.bind_address);
        if admission.workers == 0 {
            errors.push(ValidationError::new("admission.workers", "must be greater than 0"));
        }
        if admission.batch_window_ms == 0 {
            errors.push(ValidationError::new("admission.batch_window_ms", "must be greater than 0"));
        }
        if admission.request_deadline_secs == 0 {
            errors.push(ValidationError::new("admission.request_deadline_secs", "must be greater than 0"));
        }
    }

    let dynamic = &config.dynamic;
    if !(0.0..=1.0).contains(&dynamic.jitter) {
        errors.push(ValidationError::new("dynamic.jitter", "must be within 0..=1"));
    }
    if dynamic.factor.is_nan() || dynamic.factor < 1.0 {
        errors.push(ValidationError::new("dynamic.factor", "must be at least 1"));
    }

    let data_plane = &config.data_plane;
    match Url::parse(&data_plane.endpoint) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(ValidationError::new(
            "data_plane.endpoint",
            format!("unsupported scheme {:?}", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new("data_plane.endpoint", e.to_string())),
    }
    for (field, path) in [
        ("data_plane.backends_path", &data_plane.backends_path),
        ("data_plane.reload_path", &data_plane.reload_path),
    ] {
        if !path.starts_with('/') {
            errors.push(ValidationError::new(field, "must start with '/'"));
        }
    }
    if data_plane.request_timeout_ms == 0 {
        errors.push(ValidationError::new("data_plane.request_timeout_ms", "must be greater than 0"));
    }

    let passthrough = &config.passthrough;
    if controller.enable_ssl_passthrough {
        check_socket_addr(&mut errors, "passthrough.bind_address", &passthrough.bind_address);
        if passthrough.max_connections == 0 {
            errors.push(ValidationError::new("passthrough.max_connections", "must be greater than 0"));
        }
        if passthrough.buffer_size < MIN_BUFFER_SIZE {
            errors.push(ValidationError::new(
                "passthrough.buffer_size",
                format!("must be at least {}", MIN_BUFFER_SIZE),
            ));
        }
        if let Some(target) = &passthrough.default_target {
            if !is_host_port(target) {
                errors.push(ValidationError::new(
                    "passthrough.default_target",
                    format!("{:?} is not host:port", target),
                ));
            }
        }
    }

    for (field, map) in [("streams.tcp", &config.streams.tcp), ("streams.udp", &config.streams.udp)] {
        for port in map.keys() {
            if port.parse::<u16>().is_err() {
                errors.push(ValidationError::new(field, format!("{:?} is not a port", port)));
            }
        }
    }

    let observability = &config.observability;
    if let Err(e) = EnvFilter::try_new(&observability.log_level) {
        errors.push(ValidationError::new("observability.log_level", e.to_string()));
    }
    if observability.metrics_enabled {
        check_socket_addr(&mut errors, "observability.metrics_address", &observability.metrics_address);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if let Err(e) = value.parse::<SocketAddr>() {
        errors.push(ValidationError::new(field, format!("{:?}: {}", value, e)));
    }
}

fn is_namespaced_name(value: &str) -> bool {
    matches!(value.split_once('/'), Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/'))
}

fn is_host_port(value: &str) -> bool {
    match value.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(validate_config(&ControllerConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = ControllerConfig::default();
        config.admission.workers = 0;
        config.admission.batch_window_ms = 0;
        config.dynamic.jitter = 1.5;
        config.dynamic.factor = 0.5;
        config.data_plane.endpoint = "ftp://proxy".into();
        config.controller.default_backend_service = Some("no-namespace".into());

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "controller.default_backend_service",
                "admission.workers",
                "admission.batch_window_ms",
                "dynamic.jitter",
                "dynamic.factor",
                "data_plane.endpoint",
            ]
        );
    }

    #[test]
    fn test_passthrough_checked_only_when_enabled() {
        let mut config = ControllerConfig::default();
        config.passthrough.buffer_size = 16;
        config.passthrough.default_target = Some("nowhere".into());
        assert!(validate_config(&config).is_ok());

        config.controller.enable_ssl_passthrough = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "passthrough.buffer_size");
        assert_eq!(errors[1].field, "passthrough.default_target");
    }

    #[test]
    fn test_stream_keys_must_be_ports() {
        let mut config = ControllerConfig::default();
        config.streams.tcp.insert("ssh".into(), "default/ssh:22".into());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "streams.tcp");
    }
}
