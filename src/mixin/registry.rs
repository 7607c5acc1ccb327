//! Pending and active bundles.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::mixin::config::{BundleDeclaration, MixinBundle};
use crate::mixin::error::ConfigError;

/// Result of one [`BundleRegistry::initialize_all`] run.
#[derive(Debug, Default)]
pub struct InitReport {
    pub activated: Vec<String>,
    pub failed: Vec<(String, ConfigError)>,
}

impl InitReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct BundleRegistry {
    pending: Vec<MixinBundle>,
    active: Vec<Arc<MixinBundle>>,
    next_sequence: u64,
}

impl BundleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a bundle for the next [`initialize_all`](Self::initialize_all).
    /// Returns false if a bundle with that name is already pending or active.
    pub fn declare(&mut self, declaration: BundleDeclaration) -> bool {
        let name = declaration.name.as_str();
        if self.is_declared(name) {
            debug!(bundle = name, "bundle already declared, skipping");
            return false;
        }
        self.pending.push(MixinBundle::from_declaration(declaration));
        true
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.pending.iter().any(|b| b.name() == name) || self.active.iter().any(|b| b.name() == name)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Active bundles in `(priority, name)` order.
    pub fn active(&self) -> &[Arc<MixinBundle>] {
        &self.active
    }

    /// Initialises every pending bundle and promotes the survivors.
    ///
    /// Runs three passes in `(priority, name)` order: bundle initialisation,
    /// plugin target negotiation, post-initialisation. A bundle failing a
    /// pass is logged and dropped; the others carry on.
    pub fn initialize_all(&mut self) -> InitReport {
        let mut report = InitReport::default();
        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_by(|a, b| a.order_key().cmp(&b.order_key()));

        let mut survivors = Vec::with_capacity(pending.len());
        for mut bundle in pending {
            match bundle.initialise(&mut self.next_sequence) {
                Ok(()) => survivors.push(bundle),
                Err(err) => {
                    error!(bundle = bundle.name(), error = %err, "error initialising mixin bundle");
                    report.failed.push((bundle.name().to_string(), err));
                }
            }
        }

        let targets: Vec<BTreeSet<String>> = survivors.iter().map(MixinBundle::targets).collect();
        for (index, bundle) in survivors.iter().enumerate() {
            let Some(plugin) = bundle.plugin() else { continue };
            let others: BTreeSet<String> = targets
                .iter()
                .enumerate()
                .filter(|&(other, _)| other != index)
                .flat_map(|(_, set)| set.iter().cloned())
                .collect();
            plugin.accept_targets(&targets[index], &others);
        }

        for mut bundle in survivors {
            match bundle.post_initialise() {
                Ok(()) => {
                    info!(bundle = bundle.name(), mixins = bundle.mixins().len(), "activated mixin bundle");
                    report.activated.push(bundle.name().to_string());
                    self.active.push(Arc::new(bundle));
                }
                Err(err) => {
                    error!(bundle = bundle.name(), error = %err, "error post-initialising mixin bundle");
                    report.failed.push((bundle.name().to_string(), err));
                }
            }
        }

        self.active.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        report
    }
}
