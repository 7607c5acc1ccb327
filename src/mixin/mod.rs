//! Load-time mixin orchestration.
//!
//! Bundles of mixins are declared per [`Phase`](info::Phase), activated by
//! the [`BundleRegistry`](registry::BundleRegistry) and consulted by the
//! [`Transformer`](transformer::Transformer) for every class the VM loads.
//! The merge itself is delegated to an [`Applicator`](apply::Applicator).

pub mod apply;
pub mod callback;
pub mod config;
pub mod dump;
pub mod environment;
pub mod error;
pub mod guard;
pub mod info;
pub mod module;
pub mod registry;
pub mod select;
pub mod transformer;

pub use apply::{Applicator, MarkerApplicator, MergeContext, SkippedMixin};
pub use config::{BundleDeclaration, ConfigPlugin, MixinBundle};
pub use environment::{BundleSource, JsonBundleFile, MixinEnvironment, MixinOption, Options, StaticBundles};
pub use error::{ConfigError, MergeError, ModuleError, TransformError};
pub use info::{MixinInfo, MixinSet, Phase};
pub use transformer::{Transformed, Transformer};
