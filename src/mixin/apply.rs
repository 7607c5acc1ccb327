//! Driving the merge of an ordered mixin set into one class.
//!
//! The merge itself belongs to an [`Applicator`]; the driver only decides
//! the order, runs the module hooks around it and routes failures by bundle
//! criticality.

use std::sync::Arc;

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::classfile::{access, ClassFile};
use crate::mixin::error::{MergeError, TransformError};
use crate::mixin::info::{MixinInfo, MixinSet};
use crate::mixin::module::TransformerModule;

/// Per-call context handed to the applicator.
#[derive(Debug, Clone, Copy)]
pub struct MergeContext<'a> {
    /// Stable for the life of the transformer.
    pub session_id: Uuid,
    /// Normalised (dot-separated) name of the class being merged.
    pub target: &'a str,
}

/// The merge algorithm.
///
/// `apply` is called once per mixin, in order, on the class as left by
/// every earlier mixin in the set.
pub trait Applicator: Send + Sync {
    fn apply(&self, ctx: &MergeContext<'_>, target: &mut ClassFile, mixin: &MixinInfo) -> Result<(), MergeError>;
}

impl<F> Applicator for F
where
    F: Fn(&MergeContext<'_>, &mut ClassFile, &MixinInfo) -> Result<(), MergeError> + Send + Sync,
{
    fn apply(&self, ctx: &MergeContext<'_>, target: &mut ClassFile, mixin: &MixinInfo) -> Result<(), MergeError> {
        self(ctx, target, mixin)
    }
}

/// Marks each applied mixin with a private synthetic boolean field named
/// `mixin$<Simple>`. Useful as a stand-in merge for dry runs and tooling.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkerApplicator;

impl MarkerApplicator {
    pub fn marker_name(mixin: &MixinInfo) -> String {
        format!("mixin${}", mixin.simple_name())
    }
}

impl Applicator for MarkerApplicator {
    fn apply(&self, _ctx: &MergeContext<'_>, target: &mut ClassFile, mixin: &MixinInfo) -> Result<(), MergeError> {
        let flags = access::ACC_PRIVATE | access::ACC_STATIC | access::ACC_SYNTHETIC;
        target.add_field(flags, &Self::marker_name(mixin), "Z", Vec::new())?;
        Ok(())
    }
}

/// A mixin from an optional bundle that failed and was left out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedMixin {
    pub mixin: String,
    pub bundle: String,
    pub reason: String,
}

pub struct MergeDriver<'a> {
    pub modules: &'a [Arc<dyn TransformerModule>],
    pub applicator: &'a dyn Applicator,
}

impl MergeDriver<'_> {
    /// Pre hooks, then each mixin in order, then post hooks.
    ///
    /// A failure from a required bundle stops the run. Optional failures are
    /// collected and the remaining mixins still apply; whatever the failed
    /// merge left behind in `class` stays.
    pub fn run(
        &self,
        ctx: &MergeContext<'_>,
        class: &mut ClassFile,
        mixins: &MixinSet,
    ) -> Result<Vec<SkippedMixin>, TransformError> {
        for module in self.modules {
            module.pre_apply(ctx.target, class, mixins).map_err(|source| TransformError::Module {
                module: module.name().to_string(),
                target: ctx.target.to_string(),
                source,
            })?;
        }

        let mut skipped = Vec::new();
        for mixin in mixins.iter() {
            debug!(mixin = %mixin, class = ctx.target, "applying mixin");
            let Err(err) = self.applicator.apply(ctx, class, mixin) else { continue };

            if mixin.required {
                error!(mixin = %mixin, class = ctx.target, error = %err, "mixin failed applying");
                return Err(TransformError::RequiredMixinFailed {
                    mixin: mixin.class_name.clone(),
                    target: ctx.target.to_string(),
                    bundle: mixin.bundle.to_string(),
                    phase: mixin.phase,
                    source: err,
                });
            }
            warn!(mixin = %mixin, class = ctx.target, error = %err, "mixin failed applying, skipping");
            skipped.push(SkippedMixin {
                mixin: mixin.class_name.clone(),
                bundle: mixin.bundle.to_string(),
                reason: err.to_string(),
            });
        }

        for module in self.modules {
            module.post_apply(ctx.target, class, mixins).map_err(|source| TransformError::Module {
                module: module.name().to_string(),
                target: ctx.target.to_string(),
                source,
            })?;
        }
        Ok(skipped)
    }
}
