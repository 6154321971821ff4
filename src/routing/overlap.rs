//! Host/path overlap detection for declarations under admission.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ControllerError, Result};
use crate::model::{DeclarationKey, PathRule, ResolvedDeclaration, DEFAULT_SERVER_NAME};

/// How strictly overlapping host/path claims are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlapPolicy {
    /// No overlap checking.
    Disabled,
    /// The first claimed host/path of the candidate decides the outcome;
    /// later paths are not inspected.
    #[default]
    FirstMatch,
    /// Every host/path of the candidate is inspected.
    Strict,
}

/// Declarations under admission, each with the version currently admitted
/// under the same key, if there is one.
#[derive(Debug, Clone, Default)]
pub struct Candidates {
    entries: BTreeMap<DeclarationKey, Option<ResolvedDeclaration>>,
}

impl Candidates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a candidate. `admitted` is the version it replaces.
    pub fn insert(&mut self, key: DeclarationKey, admitted: Option<ResolvedDeclaration>) {
        self.entries.insert(key, admitted);
    }

    pub fn contains(&self, key: &DeclarationKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn admitted(&self, key: &DeclarationKey) -> Option<&ResolvedDeclaration> {
        self.entries.get(key).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<DeclarationKey> for Candidates {
    /// Candidates with nothing admitted under their keys.
    fn from_iter<I: IntoIterator<Item = DeclarationKey>>(keys: I) -> Self {
        Self {
            entries: keys.into_iter().map(|k| (k, None)).collect(),
        }
    }
}

/// Reject `candidate` if it claims a host+path+path-type already claimed by
/// another declaration, unless at least one side is a canary.
///
/// A path that `admitted`, the candidate's currently admitted version,
/// already claims is exempt: the candidate is among its claimants.
pub fn check_overlap(
    policy: OverlapPolicy,
    candidate: &ResolvedDeclaration,
    admitted: Option<&ResolvedDeclaration>,
    declarations: &[&ResolvedDeclaration],
) -> Result<()> {
    if policy == OverlapPolicy::Disabled {
        return Ok(());
    }
    let key = candidate.key();

    for rule in &candidate.declaration.rules {
        let host = host_or_default(&rule.host);
        for path in &rule.paths {
            let claimants: Vec<&ResolvedDeclaration> = declarations
                .iter()
                .copied()
                .filter(|other| other.key() != key)
                .filter(|other| claims(other, host, path))
                .collect();

            if claimants.is_empty() {
                continue;
            }

            if admitted.is_some_and(|own| claims(own, host, path)) {
                if policy == OverlapPolicy::FirstMatch {
                    return Ok(());
                }
                continue;
            }

            for existing in &claimants {
                if !candidate.is_canary() && !existing.is_canary() {
                    return Err(ControllerError::invalid(
                        &key,
                        format!(
                            "host {:?} and path {:?} is already defined in {}",
                            host,
                            path.path(),
                            existing.key()
                        ),
                    ));
                }
            }

            if policy == OverlapPolicy::FirstMatch {
                return Ok(());
            }
        }
    }
    Ok(())
}

fn claims(decl: &ResolvedDeclaration, host: &str, path: &PathRule) -> bool {
    decl.declaration.rules.iter().any(|r| {
        host_or_default(&r.host).eq_ignore_ascii_case(host)
            && r
                .paths
                .iter()
                .any(|p| p.path() == path.path() && p.path_type() == path.path_type())
    })
}

fn host_or_default(host: &str) -> &str {
    if host.is_empty() {
        DEFAULT_SERVER_NAME
    } else {
        host
    }
}
