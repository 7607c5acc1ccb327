//! Common imports for building mixin agents.
//!
//! This prelude is intentionally small: the agent plumbing plus the types a
//! merge algorithm implementation touches.

pub use crate::agent::{ClassNameMapper, MixinAgent};
pub use crate::classfile::ClassFile;
pub use crate::env::Jvmti;
pub use crate::export_agent;
pub use crate::get_default_callbacks;
pub use crate::mixin::{
    Applicator, BundleDeclaration, MergeContext, MergeError, MixinInfo, Phase, TransformError, Transformed,
    Transformer,
};
pub use crate::sys::{jni, jvmti};
pub use crate::{Agent, ClassFileLoadEvent};
