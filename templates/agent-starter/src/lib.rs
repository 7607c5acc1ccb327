use std::sync::Arc;

use jvmti_mixin::prelude::*;

/// Replace with a real merge. This one only adds a `mixin$<Name>` marker
/// field per applied mixin, which is enough to see the agent working with
/// `export` enabled.
struct MyApplicator;

impl Applicator for MyApplicator {
    fn apply(&self, ctx: &MergeContext<'_>, target: &mut ClassFile, mixin: &MixinInfo) -> Result<(), MergeError> {
        tracing::info!(target_class = ctx.target, mixin = %mixin, "applying");
        jvmti_mixin::mixin::MarkerApplicator.apply(ctx, target, mixin)
    }
}

fn agent() -> MixinAgent {
    // Bundles can also come from `config=<file>.json` on the agent path.
    MixinAgent::new(Arc::new(MyApplicator)).with_bundles([BundleDeclaration::new("example", "com.example.mixin")
        .mixin("GreeterMixin", ["com.example.Greeter"])])
}

export_agent!(init = agent());
