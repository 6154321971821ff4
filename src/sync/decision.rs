//! Reload-vs-dynamic decision and configuration checksums.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use crate::error::{ControllerError, Result};
use crate::model::Configuration;

/// What a new configuration requires from the data plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDecision {
    NoChange,
    /// Only backends changed; push them without reloading.
    DynamicOnly,
    FullReload,
}

impl ChangeDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeDecision::NoChange => "no_change",
            ChangeDecision::DynamicOnly => "dynamic",
            ChangeDecision::FullReload => "reload",
        }
    }
}

/// Compare the running configuration with a candidate.
///
/// Backends, endpoints included, are always pushed dynamically, so a
/// candidate that matches once backends are set aside needs no reload.
pub fn decide(running: Option<&Configuration>, candidate: &Configuration) -> ChangeDecision {
    let Some(running) = running else {
        return ChangeDecision::FullReload;
    };
    if running == candidate {
        return ChangeDecision::NoChange;
    }
    if running.without_backends() == candidate.without_backends() {
        ChangeDecision::DynamicOnly
    } else {
        ChangeDecision::FullReload
    }
}

/// SHA-256 over the canonical JSON form of the normalized configuration.
///
/// Object keys are sorted and set-like lists ordered, so the value does not
/// depend on field or insertion order.
pub fn checksum(config: &Configuration) -> Result<String> {
    let canonical = serde_json_canonicalizer::to_vec(&config.normalized())
        .map_err(|e| ControllerError::BuildFailure(format!("checksum failed: {}", e)))?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// Names present in the old configuration but not in the new one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovedItems {
    pub hosts: Vec<String>,
    pub backends: Vec<String>,
    pub certificates: Vec<String>,
    pub declarations: Vec<String>,
}

impl RemovedItems {
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
            && self.backends.is_empty()
            && self.certificates.is_empty()
            && self.declarations.is_empty()
    }
}

pub fn removed_items(old: &Configuration, new: &Configuration) -> RemovedItems {
    fn gone<'a>(old: BTreeSet<&'a str>, new: BTreeSet<&'a str>) -> Vec<String> {
        old.difference(&new).map(|s| s.to_string()).collect()
    }

    let old_backends = old.backends.iter().map(|b| b.name.as_str()).collect();
    let new_backends = new.backends.iter().map(|b| b.name.as_str()).collect();
    let old_decls: BTreeSet<String> = old.declarations().iter().map(|k| k.to_string()).collect();
    let new_decls: BTreeSet<String> = new.declarations().iter().map(|k| k.to_string()).collect();

    RemovedItems {
        hosts: gone(old.hostnames(), new.hostnames()),
        backends: gone(old_backends, new_backends),
        certificates: gone(old.certificates(), new.certificates()),
        declarations: old_decls.difference(&new_decls).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Backend, Endpoint, Location, Server};

    fn base() -> Configuration {
        let mut backend = Backend::new("default-web-80");
        backend.endpoints = vec![Endpoint::new("10.0.0.1", 80)];
        let mut server = Server::new("foo.com");
        server.locations.push(Location::root("default-web-80"));
        Configuration {
            backends: vec![Backend::new("upstream-default-backend"), backend],
            servers: vec![server],
            ..Default::default()
        }
    }

    #[test]
    fn test_first_configuration_reloads() {
        assert_eq!(decide(None, &base()), ChangeDecision::FullReload);
    }

    #[test]
    fn test_identical_is_no_change() {
        let mut tagged = base();
        tagged.checksum = Some("x".into());
        assert_eq!(decide(Some(&tagged), &base()), ChangeDecision::NoChange);
    }

    #[test]
    fn test_endpoint_change_is_dynamic() {
        let mut next = base();
        next.backends[1].endpoints.push(Endpoint::new("10.0.0.2", 80));
        assert_eq!(decide(Some(&base()), &next), ChangeDecision::DynamicOnly);
    }

    #[test]
    fn test_new_server_reloads() {
        let mut next = base();
        next.servers.push(Server::new("bar.com"));
        assert_eq!(decide(Some(&base()), &next), ChangeDecision::FullReload);
    }

    #[test]
    fn test_checksum_ignores_endpoint_order() {
        let mut a = base();
        a.backends[1].endpoints = vec![Endpoint::new("10.0.0.1", 80), Endpoint::new("10.0.0.2", 80)];
        let mut b = a.clone();
        b.backends[1].endpoints.reverse();
        b.checksum = Some("stale".into());
        assert_eq!(checksum(&a).unwrap(), checksum(&b).unwrap());

        let mut c = a.clone();
        c.servers.push(Server::new("bar.com"));
        assert_ne!(checksum(&a).unwrap(), checksum(&c).unwrap());
    }

    #[test]
    fn test_removed_hosts_and_backends() {
        let old = base();
        let mut new = base();
        new.servers.clear();
        new.backends.truncate(1);
        let removed = removed_items(&old, &new);
        assert_eq!(removed.hosts, vec!["foo.com".to_string()]);
        assert_eq!(removed.backends, vec!["default-web-80".to_string()]);
        assert!(removed.certificates.is_empty());
    }
}
