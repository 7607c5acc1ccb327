//! Deciding what happens to one loaded class.

use std::sync::Arc;

use crate::mixin::config::MixinBundle;
use crate::mixin::info::{MixinInfo, MixinSet};

/// How one active bundle relates to a class name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation<'a> {
    OutOfScope,
    /// Inside the mixin package and whitelisted.
    PassThrough,
    /// Inside the mixin package and not whitelisted.
    Forbidden,
    Contributing(&'a [Arc<MixinInfo>]),
}

/// Combined outcome over every active bundle.
#[derive(Debug)]
pub enum Selection {
    Untouched,
    PassThrough { bundle: String },
    Forbidden { bundle: String },
    Apply(MixinSet),
}

impl Selection {
    pub fn is_untouched(&self) -> bool {
        matches!(self, Selection::Untouched)
    }
}

/// Classifies `class` against every bundle.
///
/// A forbidden reference from any bundle beats everything else; a
/// pass-through beats contributed mixins.
pub fn select(bundles: &[Arc<MixinBundle>], class: &str) -> Selection {
    let mut pass_through = None;
    let mut mixins: Option<MixinSet> = None;

    for bundle in bundles {
        match bundle.relation(class) {
            Relation::OutOfScope => {}
            Relation::Forbidden => {
                return Selection::Forbidden { bundle: bundle.name().to_string() };
            }
            Relation::PassThrough => {
                pass_through.get_or_insert_with(|| bundle.name().to_string());
            }
            Relation::Contributing(found) => {
                mixins.get_or_insert_with(MixinSet::empty).extend(found.iter().cloned());
            }
        }
    }

    match (pass_through, mixins) {
        (Some(bundle), _) => Selection::PassThrough { bundle },
        (None, Some(mixins)) => Selection::Apply(mixins),
        (None, None) => Selection::Untouched,
    }
}
