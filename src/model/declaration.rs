//! Routing declarations as supplied by the resource store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ControllerError, Result};

/// Namespace-qualified identity of a declaration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeclarationKey {
    pub namespace: String,
    pub name: String,
}

impl DeclarationKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for DeclarationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// How a location's path is matched.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum PathType {
    #[serde(rename = "exact", alias = "Exact")]
    Exact,
    /// Implementation-specific paths are treated as prefixes.
    #[default]
    #[serde(
        rename = "prefix",
        alias = "Prefix",
        alias = "ImplementationSpecific"
    )]
    Prefix,
}

impl std::fmt::Display for PathType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathType::Exact => write!(f, "exact"),
            PathType::Prefix => write!(f, "prefix"),
        }
    }
}

/// A service port, by number or by name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServicePort {
    Number(u16),
    Name(String),
}

impl std::fmt::Display for ServicePort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServicePort::Number(n) => write!(f, "{}", n),
            ServicePort::Name(s) => write!(f, "{}", s),
        }
    }
}

/// Reference to a service port within the declaration's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendRef {
    pub service: String,
    pub port: ServicePort,
}

impl BackendRef {
    /// Upstream name: `"{namespace}-{service}-{port}"`.
    pub fn upstream_name(&self, namespace: &str) -> String {
        format!("{}-{}-{}", namespace, self.service, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRule {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub path_type: Option<PathType>,
    pub backend: BackendRef,
}

impl PathRule {
    pub fn path(&self) -> &str {
        match self.path.as_deref() {
            Some(p) if !p.is_empty() => p,
            _ => "/",
        }
    }

    pub fn path_type(&self) -> PathType {
        self.path_type.unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostRule {
    /// Empty host means the catch-all server.
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub paths: Vec<PathRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TlsEntry {
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Secret in the declaration's namespace. `None` selects the default certificate.
    #[serde(default)]
    pub secret_name: Option<String>,
}

/// A user-authored routing declaration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoutingDeclaration {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub default_backend: Option<BackendRef>,
    #[serde(default)]
    pub rules: Vec<HostRule>,
    #[serde(default)]
    pub tls: Vec<TlsEntry>,
    /// Raw settings bag, interpreted by `SettingsParser`.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl RoutingDeclaration {
    pub fn key(&self) -> DeclarationKey {
        DeclarationKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Structural path checks.
    ///
    /// Paths must be absolute. With `strict` set, exact and prefix paths may
    /// only contain `A-Za-z0-9-._~/`. Regex paths are exempt from the
    /// character check.
    pub fn validate_paths(&self, strict: bool, uses_regex: bool) -> Result<()> {
        for rule in &self.rules {
            for path in &rule.paths {
                let p = path.path();
                if !p.starts_with('/') {
                    return Err(ControllerError::invalid(
                        self.key(),
                        format!("path {:?} on host {:?} must start with '/'", p, rule.host),
                    ));
                }
                if strict && !uses_regex && !p.chars().all(is_safe_path_char) {
                    return Err(ControllerError::invalid(
                        self.key(),
                        format!("path {:?} on host {:?} contains invalid characters", p, rule.host),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Every hostname this declaration names in its rules.
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.host.as_str())
    }
}

fn is_safe_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~' | '/')
}
