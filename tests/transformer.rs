mod common;

use std::collections::BTreeSet;
use std::fs;
use std::sync::{Arc, Mutex};
use std::thread;

use common::{
    environment, parse, rewritten, simple_class, transform, transformer, ClassBuilder, NestedLoadApplicator,
    ScriptedApplicator, Step,
};
use jvmti_mixin::classfile::{access, ClassFile};
use jvmti_mixin::mixin::dump::{SnapshotKind, SnapshotSink};
use jvmti_mixin::mixin::environment::{CompositeSource, MixinOption, Options};
use jvmti_mixin::mixin::error::ConfigError;
use jvmti_mixin::mixin::module::TransformerModule;
use jvmti_mixin::mixin::select::Selection;
use jvmti_mixin::mixin::{
    BundleDeclaration, JsonBundleFile, MarkerApplicator, MergeContext, MergeError, MixinEnvironment, MixinInfo,
    MixinSet, ModuleError, Phase, SkippedMixin, StaticBundles, TransformError, Transformed, Transformer,
};

const FOO: &str = "com.example.Foo";

fn foo_bytes() -> Vec<u8> {
    simple_class("com/example/Foo")
}

#[derive(Default)]
struct RecordingSink {
    writes: Mutex<Vec<(String, SnapshotKind, Vec<u8>)>>,
}

impl SnapshotSink for RecordingSink {
    fn write(&self, class: &str, kind: SnapshotKind, bytes: &[u8]) {
        self.writes.lock().unwrap().push((class.to_string(), kind, bytes.to_vec()));
    }
}

fn broken_descriptor(_ctx: &MergeContext<'_>, class: &mut ClassFile, _mixin: &MixinInfo) -> Result<(), MergeError> {
    class.add_method(access::ACC_PUBLIC | access::ACC_NATIVE, "broken", "(V", Vec::new())?;
    Ok(())
}

fn add_abstract(_ctx: &MergeContext<'_>, class: &mut ClassFile, _mixin: &MixinInfo) -> Result<(), MergeError> {
    class.add_method(access::ACC_PUBLIC | access::ACC_ABSTRACT, "todo", "()V", Vec::new())?;
    Ok(())
}

/// Adds a `pre` method before the merge and records the methods each hook saw.
#[derive(Default)]
struct RecordingModule {
    seen: Mutex<Vec<(&'static str, Vec<String>, usize)>>,
}

impl TransformerModule for RecordingModule {
    fn name(&self) -> &str {
        "recording"
    }

    fn pre_apply(&self, _target: &str, class: &mut ClassFile, mixins: &MixinSet) -> Result<(), ModuleError> {
        self.record("pre", class, mixins);
        class.add_method(access::ACC_PUBLIC | access::ACC_NATIVE, "pre", "()V", Vec::new())?;
        Ok(())
    }

    fn post_apply(&self, _target: &str, class: &mut ClassFile, mixins: &MixinSet) -> Result<(), ModuleError> {
        self.record("post", class, mixins);
        Ok(())
    }
}

impl RecordingModule {
    fn record(&self, hook: &'static str, class: &ClassFile, mixins: &MixinSet) {
        let methods = class.method_names().into_iter().map(String::from).collect();
        self.seen.lock().unwrap().push((hook, methods, mixins.len()));
    }
}

/// Leaves a malformed method behind after the merge.
struct CorruptingModule;

impl TransformerModule for CorruptingModule {
    fn name(&self) -> &str {
        "corrupting"
    }

    fn post_apply(&self, _target: &str, class: &mut ClassFile, _mixins: &MixinSet) -> Result<(), ModuleError> {
        class.add_method(access::ACC_PUBLIC | access::ACC_NATIVE, "late", "(V", Vec::new())?;
        Ok(())
    }
}

#[test]
fn absent_inputs_are_left_alone() {
    let t = transformer(vec![], Arc::new(MarkerApplicator));
    assert!(t.transform("com/example/Foo", None, Some(&foo_bytes())).unwrap().is_unchanged());
    assert!(t.transform("com/example/Foo", Some(FOO), None).unwrap().is_unchanged());
}

#[test]
fn classes_without_mixins_are_not_parsed() {
    let bundles = vec![BundleDeclaration::new("core", "com.example.mixin").mixin("FooMixin", [FOO])];
    let t = transformer(bundles, Arc::new(MarkerApplicator));
    let garbage = [0u8, 1, 2, 3];
    assert_eq!(transform(&t, "com.example.Unrelated", &garbage).unwrap(), Transformed::Unchanged);
}

#[test]
fn malformed_target_is_a_class_format_error() {
    let bundles = vec![BundleDeclaration::new("core", "com.example.mixin").mixin("FooMixin", [FOO])];
    let t = transformer(bundles, Arc::new(MarkerApplicator));
    let err = transform(&t, FOO, &[0xCA, 0xFE, 0xBA, 0xBE]).unwrap_err();
    assert!(matches!(err, TransformError::ClassFormat { ref class, .. } if class == FOO));
}

#[test]
fn mixins_apply_in_phase_priority_sequence_order() {
    let applicator = Arc::new(ScriptedApplicator::new());
    let bundles = vec![
        BundleDeclaration::new("late", "late.mixin").priority(200).mixin("Third", [FOO]),
        BundleDeclaration::new("mid", "mid.mixin").priority(100).mixin("Second", [FOO]),
        BundleDeclaration::new("early", "early.mixin").priority(100).mixin_with_priority("First", [FOO], 50),
    ];
    let t = transformer(bundles, applicator.clone());
    rewritten(transform(&t, FOO, &foo_bytes()));

    assert_eq!(applicator.applied(), vec!["early.mixin.First", "mid.mixin.Second", "late.mixin.Third"]);
    assert!(applicator.observed.lock().unwrap().iter().all(|o| o.target == FOO));
}

#[test]
fn output_does_not_depend_on_declaration_order() {
    let bundles = || {
        vec![
            BundleDeclaration::new("a", "a.mixin").mixin("One", [FOO]).mixin("Two", [FOO]),
            BundleDeclaration::new("b", "b.mixin").priority(10).mixin("Three", [FOO]),
        ]
    };
    let forward = transformer(bundles(), Arc::new(MarkerApplicator));
    let mut reversed = bundles();
    reversed.reverse();
    let backward = transformer(reversed, Arc::new(MarkerApplicator));

    let a = transform(&forward, FOO, &foo_bytes()).unwrap();
    let b = transform(&backward, FOO, &foo_bytes()).unwrap();
    assert_eq!(a, b);

    let class = parse(a.bytes().unwrap());
    let markers: Vec<&str> = class.fields.iter().map(|f| class.member_name(f).unwrap()).collect();
    assert_eq!(markers, vec!["mixin$Three", "mixin$One", "mixin$Two"]);
}

#[test]
fn later_mixins_see_earlier_changes() {
    let applicator = Arc::new(
        ScriptedApplicator::new()
            .step("core.mixin.AddsBar", Step::AddMethod("bar"))
            .step("core.mixin.UsesBar", Step::Noop),
    );
    let bundles = vec![BundleDeclaration::new("core", "core.mixin").mixin("AddsBar", [FOO]).mixin("UsesBar", [FOO])];
    let t = transformer(bundles, applicator.clone());
    let class = rewritten(transform(&t, FOO, &foo_bytes()));

    let observed = applicator.observed.lock().unwrap();
    assert_eq!(observed[0].methods_before, vec!["<init>"]);
    assert_eq!(observed[1].methods_before, vec!["<init>", "bar"]);
    assert!(class.find_method("bar", "()V").is_some());
}

#[test]
fn pass_through_widens_access_and_is_idempotent() {
    let bundles = vec![BundleDeclaration::new("core", "com.example.mixin")
        .mixin("FooMixin", [FOO])
        .pass_through("Helper")];
    let t = transformer(bundles, Arc::new(MarkerApplicator));
    let helper = ClassBuilder::new("com/example/mixin/Helper")
        .access(access::ACC_SUPER)
        .field(access::ACC_PRIVATE, "secret", "I")
        .field(0, "count", "I")
        .method(0, "run", "()V")
        .method(access::ACC_PROTECTED, "hook", "()V")
        .build();

    let first = transform(&t, "com.example.mixin.Helper", &helper).unwrap();
    let class = parse(first.bytes().unwrap());
    assert_eq!(class.access_flags, access::ACC_SUPER | access::ACC_PUBLIC);
    assert_eq!(class.find_field("count", "I").unwrap().access_flags, access::ACC_PUBLIC);
    assert_eq!(class.find_field("secret", "I").unwrap().access_flags, access::ACC_PRIVATE);
    assert_eq!(class.find_method("run", "()V").unwrap().access_flags, access::ACC_PUBLIC);
    assert_eq!(class.find_method("hook", "()V").unwrap().access_flags, access::ACC_PROTECTED);

    let second = transform(&t, "com.example.mixin.Helper", first.bytes().unwrap()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn mixin_classes_cannot_be_loaded_directly() {
    let bundles = vec![BundleDeclaration::new("core", "com.example.mixin").mixin("FooMixin", [FOO])];
    let t = transformer(bundles, Arc::new(MarkerApplicator));
    let err = transform(&t, "com.example.mixin.FooMixin", &[0u8]).unwrap_err();
    match err {
        TransformError::ForbiddenReference { class, bundle } => {
            assert_eq!(class, "com.example.mixin.FooMixin");
            assert_eq!(bundle, "core");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn required_failure_aborts_the_class() {
    let applicator = Arc::new(
        ScriptedApplicator::new()
            .step("req.mixin.A", Step::AddMethod("bar"))
            .step("req.mixin.B", Step::Fail("boom")),
    );
    let bundles = vec![BundleDeclaration::new("req", "req.mixin")
        .required(true)
        .mixin("A", [FOO])
        .mixin("B", [FOO])
        .mixin("C", [FOO])];
    let t = transformer(bundles, applicator.clone());

    match transform(&t, FOO, &foo_bytes()).unwrap_err() {
        TransformError::RequiredMixinFailed { mixin, target, bundle, phase, source } => {
            assert_eq!(mixin, "req.mixin.B");
            assert_eq!(target, FOO);
            assert_eq!(bundle, "req");
            assert_eq!(phase, Phase::Default);
            assert_eq!(source.to_string(), "boom");
        }
        other => panic!("unexpected {other:?}"),
    }
    // C never ran.
    assert_eq!(applicator.applied(), vec!["req.mixin.A", "req.mixin.B"]);
    assert_eq!(t.unhandled_targets(), vec![FOO]);
}

#[test]
fn optional_failure_is_skipped() {
    let applicator = Arc::new(
        ScriptedApplicator::new()
            .step("opt.mixin.A", Step::Fail("nope"))
            .step("opt.mixin.B", Step::AddMethod("bar")),
    );
    let bundles = vec![BundleDeclaration::new("opt", "opt.mixin").mixin("A", [FOO]).mixin("B", [FOO])];
    let t = transformer(bundles, applicator.clone());

    let result = transform(&t, FOO, &foo_bytes()).unwrap();
    assert_eq!(
        result.skipped(),
        &[SkippedMixin { mixin: "opt.mixin.A".into(), bundle: "opt".into(), reason: "nope".into() }]
    );
    let class = parse(result.bytes().unwrap());
    assert!(class.find_method("bar", "()V").is_some());
    assert_eq!(applicator.applied(), vec!["opt.mixin.A", "opt.mixin.B"]);
}

#[test]
fn nested_load_of_a_target_is_reentrance() {
    let nested = NestedLoadApplicator::new("com.example.Bar", simple_class("com/example/Bar"));
    let applicator = Arc::new(nested);
    let bundles = vec![BundleDeclaration::new("core", "core.mixin")
        .mixin("FooMixin", [FOO])
        .mixin("BarMixin", ["com.example.Bar"])];
    let t = Arc::new(transformer(bundles, applicator.clone()));
    applicator.attach(&t);

    // The outer merge completes.
    rewritten(transform(&t, FOO, &foo_bytes()));

    let inner = applicator.nested_result.lock().unwrap().take().expect("nested load attempted");
    assert!(matches!(inner, Err(TransformError::Reentrance { ref target }) if target == "com.example.Bar"));

    // Sticky: even a top-level call now fails for a class with mixins.
    assert!(t.reentrance_tripped());
    let err = transform(&t, "com.example.Bar", &simple_class("com/example/Bar")).unwrap_err();
    assert!(matches!(err, TransformError::Reentrance { .. }));
    // Classes without mixins still go through.
    assert!(transform(&t, "com.example.Other", &[0u8]).unwrap().is_unchanged());

    t.reset_reentrance();
    assert!(!t.reentrance_tripped());
    rewritten(transform(&t, "com.example.Bar", &simple_class("com/example/Bar")));
}

#[test]
fn reinitialize_clears_the_latch() {
    let nested = Arc::new(NestedLoadApplicator::new(FOO, foo_bytes()));
    let bundles = vec![BundleDeclaration::new("core", "core.mixin").mixin("FooMixin", [FOO])];
    let t = Arc::new(transformer(bundles.clone(), nested.clone()));
    nested.attach(&t);

    rewritten(transform(&t, FOO, &foo_bytes()));
    assert!(t.reentrance_tripped());

    let report = t.reinitialize(environment(Phase::Default, Options::default(), bundles)).unwrap();
    // Already active from the first round.
    assert!(report.activated.is_empty());
    assert!(report.is_clean());
    assert!(!t.reentrance_tripped());
}

#[test]
fn bundles_initialise_lazily_per_environment() {
    let bundles = vec![
        BundleDeclaration::new("early", "early.mixin").phase(Phase::PreInit).mixin("E", [FOO]),
        BundleDeclaration::new("main", "main.mixin").mixin("M", [FOO]),
    ];
    let applicator = Arc::new(ScriptedApplicator::new());
    let env = environment(Phase::PreInit, Options::default(), bundles);
    let t = Transformer::create(env.clone(), applicator.clone());
    assert!(t.active_bundles().is_empty());

    rewritten(transform(&t, FOO, &foo_bytes()));
    assert_eq!(applicator.applied(), vec!["early.mixin.E"]);
    let active: Vec<String> = t.active_bundles().iter().map(|b| b.name().to_string()).collect();
    assert_eq!(active, vec!["early"]);

    t.set_environment(env.with_phase(Phase::Default));
    assert_eq!(t.environment().phase(), Phase::Default);
    // Not picked up until the next call.
    assert_eq!(t.active_bundles().len(), 1);

    rewritten(transform(&t, FOO, &foo_bytes()));
    assert_eq!(applicator.applied(), vec!["early.mixin.E", "early.mixin.E", "main.mixin.M"]);
    let active: BTreeSet<String> = t.active_bundles().iter().map(|b| b.name().to_string()).collect();
    assert_eq!(active, BTreeSet::from(["early".to_string(), "main".to_string()]));
}

#[test]
fn source_failure_is_retried_on_next_call() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bundles.json");
    let env = MixinEnvironment::new(Phase::Default, Options::default(), Arc::new(JsonBundleFile::new(&path)));
    let t = Transformer::create(env, Arc::new(MarkerApplicator));

    let err = transform(&t, FOO, &foo_bytes()).unwrap_err();
    assert!(matches!(err, TransformError::Initialization(ConfigError::Read { .. })));

    fs::write(
        &path,
        r#"[{ "name": "core", "package": "core.mixin", "mixins": [{ "class": "FooMixin", "targets": ["com.example.Foo"] }] }]"#,
    )
    .unwrap();
    let class = rewritten(transform(&t, FOO, &foo_bytes()));
    assert!(class.find_field("mixin$FooMixin", "Z").is_some());
}

#[test]
fn missing_bundle_file_does_not_hide_other_sources() {
    let dir = tempfile::tempdir().unwrap();
    let source = CompositeSource(vec![
        Arc::new(StaticBundles(vec![BundleDeclaration::new("core", "core.mixin").mixin("FooMixin", [FOO])])),
        Arc::new(JsonBundleFile::new(dir.path().join("typo.json"))),
    ]);
    let env = MixinEnvironment::new(Phase::Default, Options::default(), Arc::new(source));
    let t = Transformer::create(env, Arc::new(MarkerApplicator));

    assert!(transform(&t, "com.example.Unrelated", &[0u8]).unwrap().is_unchanged());
    let class = rewritten(transform(&t, FOO, &foo_bytes()));
    assert!(class.find_field("mixin$FooMixin", "Z").is_some());
    let active: Vec<String> = t.active_bundles().iter().map(|b| b.name().to_string()).collect();
    assert_eq!(active, vec!["core"]);
}

#[test]
fn export_writes_merged_class() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = Options::default().with(MixinOption::DebugExport);
    options.set_export_dir(dir.path());
    let bundles = vec![BundleDeclaration::new("core", "core.mixin").mixin("FooMixin", [FOO])];
    let t = Transformer::create(environment(Phase::Default, options, bundles), Arc::new(MarkerApplicator));

    let result = transform(&t, FOO, &foo_bytes()).unwrap();
    let written = fs::read(dir.path().join("com/example/Foo.class")).unwrap();
    assert_eq!(written, result.bytes().unwrap());
}

#[test]
fn failed_target_is_dumped_before_merge() {
    let sink = Arc::new(RecordingSink::default());
    let options = Options::default().with(MixinOption::DumpTargetOnFailure);
    let bundles = vec![BundleDeclaration::new("req", "req.mixin").required(true).mixin("A", [FOO])];
    let applicator = Arc::new(ScriptedApplicator::new().step("req.mixin.A", Step::Fail("boom")));
    let t = Transformer::create(environment(Phase::Default, options, bundles), applicator).with_sink(sink.clone());

    transform(&t, FOO, &foo_bytes()).unwrap_err();
    let writes = sink.writes.lock().unwrap();
    assert_eq!(*writes, vec![(FOO.to_string(), SnapshotKind::PreMerge, foo_bytes())]);
}

#[test]
fn export_includes_pass_through_classes() {
    let sink = Arc::new(RecordingSink::default());
    let options = Options::default().with(MixinOption::DebugExport);
    let bundles = vec![BundleDeclaration::new("core", "com.example.mixin")
        .mixin("FooMixin", [FOO])
        .pass_through("Helper")];
    let t = Transformer::create(environment(Phase::Default, options, bundles), Arc::new(MarkerApplicator))
        .with_sink(sink.clone());

    let helper = simple_class("com/example/mixin/Helper");
    let result = transform(&t, "com.example.mixin.Helper", &helper).unwrap();
    let writes = sink.writes.lock().unwrap();
    assert_eq!(
        *writes,
        vec![("com.example.mixin.Helper".to_string(), SnapshotKind::PostMerge, result.bytes().unwrap().to_vec())]
    );
}

#[test]
fn target_is_dumped_when_an_optional_mixin_is_skipped() {
    let sink = Arc::new(RecordingSink::default());
    let options = Options::default().with(MixinOption::DumpTargetOnFailure);
    let bundles = vec![BundleDeclaration::new("opt", "opt.mixin").mixin("A", [FOO]).mixin("B", [FOO])];
    let applicator = Arc::new(
        ScriptedApplicator::new()
            .step("opt.mixin.A", Step::Fail("nope"))
            .step("opt.mixin.B", Step::AddMethod("bar")),
    );
    let t = Transformer::create(environment(Phase::Default, options, bundles), applicator).with_sink(sink.clone());

    let result = transform(&t, FOO, &foo_bytes()).unwrap();
    assert_eq!(result.skipped().len(), 1);
    assert_eq!(*sink.writes.lock().unwrap(), vec![(FOO.to_string(), SnapshotKind::PreMerge, foo_bytes())]);

    // A clean merge writes nothing.
    sink.writes.lock().unwrap().clear();
    let bundles = vec![BundleDeclaration::new("opt", "opt.mixin").mixin("B", [FOO])];
    let applicator = Arc::new(ScriptedApplicator::new().step("opt.mixin.B", Step::AddMethod("bar")));
    let options = Options::default().with(MixinOption::DumpTargetOnFailure);
    let t = Transformer::create(environment(Phase::Default, options, bundles), applicator).with_sink(sink.clone());
    rewritten(transform(&t, FOO, &foo_bytes()));
    assert!(sink.writes.lock().unwrap().is_empty());
}

#[test]
fn no_snapshots_without_options() {
    let sink = Arc::new(RecordingSink::default());
    let bundles = vec![BundleDeclaration::new("core", "core.mixin").mixin("FooMixin", [FOO])];
    let t = transformer(bundles, Arc::new(MarkerApplicator)).with_sink(sink.clone());
    rewritten(transform(&t, FOO, &foo_bytes()));
    assert!(sink.writes.lock().unwrap().is_empty());
}

#[test]
fn verify_rejects_malformed_merge_output() {
    let options = Options::default().with(MixinOption::DebugVerify);
    let bundles = vec![BundleDeclaration::new("core", "core.mixin").mixin("FooMixin", [FOO])];
    let t = Transformer::create(environment(Phase::Default, options.clone(), bundles.clone()), Arc::new(broken_descriptor));

    match transform(&t, FOO, &foo_bytes()).unwrap_err() {
        TransformError::Module { module, target, .. } => {
            assert_eq!(module, "verify");
            assert_eq!(target, FOO);
        }
        other => panic!("unexpected {other:?}"),
    }

    // A well-formed merge passes.
    let t = Transformer::create(environment(Phase::Default, options, bundles), Arc::new(MarkerApplicator));
    rewritten(transform(&t, FOO, &foo_bytes()));
}

#[test]
fn modules_wrap_the_ordered_merge() {
    let module = Arc::new(RecordingModule::default());
    let applicator = Arc::new(
        ScriptedApplicator::new()
            .step("core.mixin.A", Step::AddMethod("a"))
            .step("core.mixin.B", Step::AddMethod("b")),
    );
    let bundles = vec![BundleDeclaration::new("core", "core.mixin").mixin("A", [FOO]).mixin("B", [FOO])];
    let t = transformer(bundles, applicator.clone()).with_module(module.clone());

    let class = rewritten(transform(&t, FOO, &foo_bytes()));
    assert_eq!(class.method_names(), vec!["<init>", "pre", "a", "b"]);

    let seen = module.seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            ("pre", vec!["<init>".to_string()], 2),
            ("post", vec!["<init>".into(), "pre".into(), "a".into(), "b".into()], 2),
        ]
    );
    let before: Vec<Vec<String>> = applicator.observed.lock().unwrap().iter().map(|o| o.methods_before.clone()).collect();
    assert_eq!(
        before,
        vec![vec!["<init>".to_string(), "pre".into()], vec!["<init>".into(), "pre".into(), "a".into()]]
    );
}

#[test]
fn added_modules_run_after_verification() {
    let options = Options::default().with(MixinOption::DebugVerify);
    let bundles = vec![BundleDeclaration::new("core", "core.mixin").mixin("FooMixin", [FOO])];
    let t = Transformer::create(environment(Phase::Default, options, bundles), Arc::new(MarkerApplicator))
        .with_module(Arc::new(CorruptingModule));

    // Verification has already passed when the added module runs.
    let class = rewritten(transform(&t, FOO, &foo_bytes()));
    assert!(class.find_method("late", "(V").is_some());
}

#[test]
fn interface_check_only_warns() {
    let options = Options::default().with(MixinOption::CheckImplements);
    let bundles = vec![BundleDeclaration::new("core", "core.mixin").mixin("FooMixin", [FOO])];
    let t = Transformer::create(environment(Phase::Default, options, bundles), Arc::new(add_abstract));
    let class = rewritten(transform(&t, FOO, &foo_bytes()));
    assert!(class.find_method("todo", "()V").is_some());
}

#[test]
fn applicator_sees_the_session_id() {
    let applicator = Arc::new(ScriptedApplicator::new());
    let bundles = vec![BundleDeclaration::new("core", "core.mixin").mixin("A", [FOO]).mixin("B", [FOO])];
    let t = transformer(bundles, applicator.clone());
    rewritten(transform(&t, FOO, &foo_bytes()));

    let sessions = applicator.sessions.lock().unwrap();
    assert_eq!(*sessions, vec![t.session_id(), t.session_id()]);
    assert_ne!(t.session_id(), transformer(vec![], Arc::new(MarkerApplicator)).session_id());
}

#[test]
fn tracks_unhandled_targets_and_shuts_down() {
    let bundles = vec![BundleDeclaration::new("core", "core.mixin")
        .mixin("FooMixin", [FOO])
        .mixin("BarMixin", ["com.example.Bar"])];
    let t = transformer(bundles, Arc::new(MarkerApplicator));
    assert!(t.unhandled_targets().is_empty());

    rewritten(transform(&t, FOO, &foo_bytes()));
    assert_eq!(t.unhandled_targets(), vec!["com.example.Bar"]);
    assert!(matches!(t.select("com.example.Bar"), Selection::Apply(ref set) if set.len() == 1));

    t.shutdown();
    assert!(t.is_shut_down());
    assert!(transform(&t, "com.example.Bar", &simple_class("com/example/Bar")).unwrap().is_unchanged());
    // Idempotent.
    t.shutdown();
}

#[test]
fn concurrent_loads_do_not_interfere() {
    let targets: Vec<String> = (0..8).map(|i| format!("com.example.C{i}")).collect();
    let bundles = vec![BundleDeclaration::new("core", "core.mixin").mixin("Shared", targets.clone())];
    let t = Arc::new(transformer(bundles, Arc::new(MarkerApplicator)));

    let handles: Vec<_> = targets
        .into_iter()
        .map(|target| {
            let t = Arc::clone(&t);
            thread::spawn(move || {
                let bytes = simple_class(&target.replace('.', "/"));
                let class = rewritten(transform(&t, &target, &bytes));
                assert!(class.find_field("mixin$Shared", "Z").is_some());
                t.reentrance_tripped()
            })
        })
        .collect();

    for handle in handles {
        assert!(!handle.join().unwrap());
    }
    assert!(t.unhandled_targets().is_empty());
}
