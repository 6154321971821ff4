//! Per-declaration settings parsed from annotations.
//!
//! Parsing is a pure function of the declaration and the configured key
//! prefix. Keys under the prefix that are not recognized here are kept
//! verbatim and travel with the declaration's locations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ControllerError, Result};
use crate::model::declaration::{DeclarationKey, RoutingDeclaration};

pub const DEFAULT_ANNOTATION_PREFIX: &str = "nginx.ingress.kubernetes.io";
pub const DEFAULT_COOKIE_NAME: &str = "INGRESSCOOKIE";
pub const DEFAULT_WEIGHT_TOTAL: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanarySettings {
    pub enabled: bool,
    pub weight: u32,
    pub weight_total: u32,
    pub header: Option<String>,
    pub header_value: Option<String>,
    pub header_pattern: Option<String>,
    pub cookie: Option<String>,
}

impl Default for CanarySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            weight: 0,
            weight_total: DEFAULT_WEIGHT_TOTAL,
            header: None,
            header_value: None,
            header_pattern: None,
            cookie: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffinityKind {
    #[default]
    None,
    Cookie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CookieHash {
    Index,
    #[default]
    Md5,
    Sha1,
}

/// Whether a canary backend inherits its primary's session affinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanaryAffinityBehavior {
    /// Canary uses the primary's affinity cookie, so sticky users stay on
    /// whichever side they landed on.
    #[default]
    Sticky,
    /// Canary keeps its own affinity settings.
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffinitySettings {
    pub kind: AffinityKind,
    pub canary_behavior: CanaryAffinityBehavior,
    pub cookie_name: String,
    pub cookie_hash: CookieHash,
}

impl Default for AffinitySettings {
    fn default() -> Self {
        Self {
            kind: AffinityKind::None,
            canary_behavior: CanaryAffinityBehavior::Sticky,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            cookie_hash: CookieHash::Md5,
        }
    }
}

/// Typed view of a declaration's annotations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Settings {
    pub canary: CanarySettings,
    pub affinity: AffinitySettings,
    pub upstream_hash_by: Option<String>,
    pub load_balancing: Option<String>,
    /// Overrides the controller-wide "use service address" option.
    pub service_upstream: Option<bool>,
    pub ssl_passthrough: bool,
    pub rewrite_target: Option<String>,
    pub use_regex: bool,
    pub aliases: Vec<String>,
    /// Unrecognized keys under the prefix, prefix stripped.
    pub extra: BTreeMap<String, String>,
}

/// Parses annotation maps into `Settings`.
#[derive(Debug, Clone)]
pub struct SettingsParser {
    prefix: String,
}

impl Default for SettingsParser {
    fn default() -> Self {
        Self::new(DEFAULT_ANNOTATION_PREFIX)
    }
}

impl SettingsParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self { prefix }
    }

    pub fn parse(&self, decl: &RoutingDeclaration) -> Result<Settings> {
        let key = decl.key();
        let mut settings = Settings::default();

        for (raw_key, value) in &decl.annotations {
            let Some(name) = raw_key.strip_prefix(&self.prefix) else {
                continue;
            };
            let value = value.trim();
            match name {
                "canary" => settings.canary.enabled = parse_bool(&key, name, value)?,
                "canary-weight" => settings.canary.weight = parse_u32(&key, name, value)?,
                "canary-weight-total" => {
                    settings.canary.weight_total = parse_u32(&key, name, value)?
                }
                "canary-by-header" => settings.canary.header = non_empty(value),
                "canary-by-header-value" => settings.canary.header_value = non_empty(value),
                "canary-by-header-pattern" => settings.canary.header_pattern = non_empty(value),
                "canary-by-cookie" => settings.canary.cookie = non_empty(value),
                "affinity" => {
                    settings.affinity.kind = if value == "cookie" {
                        AffinityKind::Cookie
                    } else {
                        if !value.is_empty() {
                            tracing::warn!(
                                declaration = %key,
                                affinity = value,
                                "Unsupported affinity type, affinity disabled"
                            );
                        }
                        AffinityKind::None
                    }
                }
                "affinity-canary-behavior" => {
                    settings.affinity.canary_behavior = match value {
                        "legacy" => CanaryAffinityBehavior::Legacy,
                        "sticky" | "" => CanaryAffinityBehavior::Sticky,
                        other => {
                            return Err(ControllerError::invalid(
                                &key,
                                format!("{} must be 'sticky' or 'legacy', got {:?}", name, other),
                            ))
                        }
                    }
                }
                "session-cookie-name" => {
                    if !value.is_empty() {
                        settings.affinity.cookie_name = value.to_string();
                    }
                }
                "session-cookie-hash" => {
                    settings.affinity.cookie_hash = match value {
                        "index" => CookieHash::Index,
                        "sha1" => CookieHash::Sha1,
                        "md5" => CookieHash::Md5,
                        other => {
                            tracing::warn!(
                                declaration = %key,
                                hash = other,
                                "Invalid session cookie hash, using md5"
                            );
                            CookieHash::Md5
                        }
                    }
                }
                "upstream-hash-by" => settings.upstream_hash_by = non_empty(value),
                "load-balance" => settings.load_balancing = non_empty(value),
                "service-upstream" => {
                    settings.service_upstream = Some(parse_bool(&key, name, value)?)
                }
                "ssl-passthrough" => settings.ssl_passthrough = parse_bool(&key, name, value)?,
                "rewrite-target" => settings.rewrite_target = non_empty(value),
                "use-regex" => settings.use_regex = parse_bool(&key, name, value)?,
                "server-alias" => {
                    settings.aliases = value
                        .split(',')
                        .map(|a| a.trim().to_ascii_lowercase())
                        .filter(|a| !a.is_empty())
                        .collect();
                }
                other => {
                    settings.extra.insert(other.to_string(), value.to_string());
                }
            }
        }

        if settings.canary.weight > settings.canary.weight_total {
            return Err(ControllerError::invalid(
                &key,
                format!(
                    "canary weight {} exceeds weight total {}",
                    settings.canary.weight, settings.canary.weight_total
                ),
            ));
        }

        Ok(settings)
    }
}

fn parse_bool(key: &DeclarationKey, name: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "True" | "TRUE" | "1" => Ok(true),
        "false" | "False" | "FALSE" | "0" => Ok(false),
        other => Err(ControllerError::invalid(
            key,
            format!("{} expects a boolean, got {:?}", name, other),
        )),
    }
}

fn parse_u32(key: &DeclarationKey, name: &str, value: &str) -> Result<u32> {
    value.parse::<u32>().map_err(|_| {
        ControllerError::invalid(
            key,
            format!("{} expects a non-negative integer, got {:?}", name, value),
        )
    })
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// A declaration paired with its parsed settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDeclaration {
    pub declaration: RoutingDeclaration,
    pub settings: Settings,
}

impl ResolvedDeclaration {
    pub fn resolve(declaration: RoutingDeclaration, parser: &SettingsParser) -> Result<Self> {
        let settings = parser.parse(&declaration)?;
        Ok(Self {
            declaration,
            settings,
        })
    }

    pub fn key(&self) -> DeclarationKey {
        self.declaration.key()
    }

    pub fn is_canary(&self) -> bool {
        self.settings.canary.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl_with(annotations: &[(&str, &str)]) -> RoutingDeclaration {
        RoutingDeclaration {
            namespace: "default".into(),
            name: "web".into(),
            default_backend: None,
            rules: vec![],
            tls: vec![],
            annotations: annotations
                .iter()
                .map(|(k, v)| (format!("{}/{}", DEFAULT_ANNOTATION_PREFIX, k), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_parses_canary_settings() {
        let settings = SettingsParser::default()
            .parse(&decl_with(&[
                ("canary", "true"),
                ("canary-weight", "20"),
                ("canary-by-header", "X-Canary"),
            ]))
            .unwrap();
        assert!(settings.canary.enabled);
        assert_eq!(settings.canary.weight, 20);
        assert_eq!(settings.canary.weight_total, 100);
        assert_eq!(settings.canary.header.as_deref(), Some("X-Canary"));
    }

    #[test]
    fn test_weight_above_total_is_invalid() {
        let err = SettingsParser::default()
            .parse(&decl_with(&[("canary-weight", "50"), ("canary-weight-total", "10")]))
            .unwrap_err();
        assert!(matches!(err, ControllerError::DeclarationInvalid { .. }));
    }

    #[test]
    fn test_malformed_bool_is_invalid() {
        assert!(SettingsParser::default()
            .parse(&decl_with(&[("canary", "yes please")]))
            .is_err());
    }

    #[test]
    fn test_affinity_defaults() {
        let settings = SettingsParser::default()
            .parse(&decl_with(&[("affinity", "cookie"), ("session-cookie-hash", "crc")]))
            .unwrap();
        assert_eq!(settings.affinity.kind, AffinityKind::Cookie);
        assert_eq!(settings.affinity.cookie_name, "INGRESSCOOKIE");
        assert_eq!(settings.affinity.cookie_hash, CookieHash::Md5);
        assert_eq!(settings.affinity.canary_behavior, CanaryAffinityBehavior::Sticky);
    }

    #[test]
    fn test_unknown_keys_kept_and_foreign_ignored() {
        let mut decl = decl_with(&[("proxy-body-size", "8m")]);
        decl.annotations
            .insert("other.io/thing".into(), "x".into());
        let settings = SettingsParser::default().parse(&decl).unwrap();
        assert_eq!(settings.extra.get("proxy-body-size").map(String::as_str), Some("8m"));
        assert_eq!(settings.extra.len(), 1);
    }

    #[test]
    fn test_aliases_split_and_lowercased() {
        let settings = SettingsParser::default()
            .parse(&decl_with(&[("server-alias", "A.com, b.com,")]))
            .unwrap();
        assert_eq!(settings.aliases, vec!["a.com".to_string(), "b.com".to_string()]);
    }

    #[test]
    fn test_custom_prefix() {
        let mut decl = decl_with(&[]);
        decl.annotations.insert("ic.example/canary".into(), "true".into());
        let settings = SettingsParser::new("ic.example").parse(&decl).unwrap();
        assert!(settings.canary.enabled);
    }
}
