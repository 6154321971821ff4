//! Batch validation against the full routing model.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::admission::batcher::BatchValidator;
use crate::dataplane::DataPlane;
use crate::error::Result;
use crate::model::{DeclarationKey, ResolvedDeclaration, RoutingDeclaration};
use crate::routing::{self, Candidates, SynthesisOptions};
use crate::store::ResourceStore;

/// Checks that admitting a batch still yields a renderable configuration.
pub struct DeclarationValidator {
    store: Arc<dyn ResourceStore>,
    data_plane: Arc<dyn DataPlane>,
    options: SynthesisOptions,
}

impl DeclarationValidator {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        data_plane: Arc<dyn DataPlane>,
        options: SynthesisOptions,
    ) -> Self {
        Self {
            store,
            data_plane,
            options,
        }
    }
}

#[async_trait]
impl BatchValidator for DeclarationValidator {
    /// Admitted declarations that share a key with the batch are replaced
    /// by the batch version. Only the batch is overlap-checked, and paths the
    /// replaced version already claims are exempt.
    async fn validate_batch(&self, batch: &[RoutingDeclaration]) -> Result<()> {
        let parser = &self.options.parser;
        let strict = self.options.strict_path_validation;
        let keys: BTreeSet<DeclarationKey> = batch.iter().map(|d| d.key()).collect();

        let (replaced, admitted): (Vec<_>, Vec<_>) = self
            .store
            .list_declarations()
            .into_iter()
            .partition(|d| keys.contains(&d.key()));

        let mut candidates = Candidates::new();
        let mut previous: BTreeMap<DeclarationKey, ResolvedDeclaration> =
            routing::resolve_all(replaced, parser, strict)
                .into_iter()
                .map(|d| (d.key(), d))
                .collect();
        for key in &keys {
            candidates.insert(key.clone(), previous.remove(key));
        }

        let mut declarations = routing::resolve_all(admitted, parser, strict);
        for decl in batch {
            declarations.push(routing::resolve_declaration(decl.clone(), parser, strict)?);
        }

        let config = routing::synthesize(
            self.store.as_ref(),
            &self.options,
            &declarations,
            &candidates,
        )?;
        let rendered = self.data_plane.render_and_syntax_check(&config).await?;
        tracing::debug!(
            batch = batch.len(),
            declarations = declarations.len(),
            rendered_bytes = rendered.len(),
            "Batch produced a valid configuration"
        );
        Ok(())
    }
}
