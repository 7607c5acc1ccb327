//! The load-time entry point.
//!
//! [`Transformer::transform`] is called for every class the VM loads. Most
//! classes have no mixins and come back [`Transformed::Unchanged`] without
//! being parsed. The rest are parsed, merged and written back.
//!
//! Bundles are initialised lazily: a new environment set with
//! [`Transformer::set_environment`] is picked up by the next call that is
//! not re-entrant.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classfile::{access, ClassFile};
use crate::mixin::apply::{Applicator, MergeContext, MergeDriver, SkippedMixin};
use crate::mixin::config::MixinBundle;
use crate::mixin::dump::{FileSnapshotSink, SnapshotKind, SnapshotSink};
use crate::mixin::environment::{MixinEnvironment, MixinOption, Options};
use crate::mixin::error::TransformError;
use crate::mixin::guard::ThreadGuards;
use crate::mixin::info::MixinSet;
use crate::mixin::module::{InterfaceCheckModule, TransformerModule, VerifyModule};
use crate::mixin::registry::{BundleRegistry, InitReport};
use crate::mixin::select::{select, Selection};

/// Outcome of a successful [`Transformer::transform`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transformed {
    Unchanged,
    Rewritten {
        bytes: Vec<u8>,
        /// Optional-bundle mixins that failed and were left out.
        skipped: Vec<SkippedMixin>,
    },
}

impl Transformed {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Transformed::Unchanged)
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Transformed::Unchanged => None,
            Transformed::Rewritten { bytes, .. } => Some(bytes),
        }
    }

    pub fn skipped(&self) -> &[SkippedMixin] {
        match self {
            Transformed::Unchanged => &[],
            Transformed::Rewritten { skipped, .. } => skipped,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Transformed::Unchanged => None,
            Transformed::Rewritten { bytes, .. } => Some(bytes),
        }
    }
}

struct State {
    registry: BundleRegistry,
    modules: Vec<Arc<dyn TransformerModule>>,
    /// Environment the registry was last initialised for.
    current: Option<Arc<MixinEnvironment>>,
    options: Options,
    sink: Option<Arc<dyn SnapshotSink>>,
}

pub struct Transformer {
    session_id: Uuid,
    applicator: Arc<dyn Applicator>,
    custom_sink: Option<Arc<dyn SnapshotSink>>,
    extra_modules: Vec<Arc<dyn TransformerModule>>,
    guards: ThreadGuards,
    environment: RwLock<Arc<MixinEnvironment>>,
    state: RwLock<State>,
    shut_down: AtomicBool,
    handled: Mutex<BTreeSet<String>>,
}

impl Transformer {
    pub fn create(environment: MixinEnvironment, applicator: Arc<dyn Applicator>) -> Self {
        let session_id = Uuid::new_v4();
        debug!(%session_id, phase = %environment.phase(), "creating mixin transformer");
        Self {
            session_id,
            applicator,
            custom_sink: None,
            extra_modules: Vec::new(),
            guards: ThreadGuards::default(),
            environment: RwLock::new(Arc::new(environment)),
            state: RwLock::new(State {
                registry: BundleRegistry::new(),
                modules: Vec::new(),
                current: None,
                options: Options::default(),
                sink: None,
            }),
            shut_down: AtomicBool::new(false),
            handled: Mutex::new(BTreeSet::new()),
        }
    }

    /// Replaces the file sink that snapshot options would otherwise create.
    pub fn with_sink(mut self, sink: Arc<dyn SnapshotSink>) -> Self {
        self.custom_sink = Some(sink);
        self
    }

    /// Registers a module that runs after the option-driven ones.
    pub fn with_module(mut self, module: Arc<dyn TransformerModule>) -> Self {
        self.extra_modules.push(module);
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn environment(&self) -> Arc<MixinEnvironment> {
        Arc::clone(&self.environment.read())
    }

    /// Selects a new environment. Bundles are initialised on the next
    /// non-re-entrant transform call.
    pub fn set_environment(&self, environment: MixinEnvironment) -> Arc<MixinEnvironment> {
        let environment = Arc::new(environment);
        info!(phase = %environment.phase(), "mixin environment changed");
        *self.environment.write() = Arc::clone(&environment);
        environment
    }

    /// Selects `environment`, initialises it now and clears every
    /// re-entrance latch.
    pub fn reinitialize(&self, environment: MixinEnvironment) -> Result<InitReport, TransformError> {
        let environment = self.set_environment(environment);
        self.guards.reset_all();
        let mut state = self.state.write();
        self.initialize(&mut state, environment)
    }

    /// Makes every later call pass classes through untouched.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let unhandled = self.unhandled_targets();
        if unhandled.is_empty() {
            info!("mixin transformer shut down");
        } else {
            warn!(count = unhandled.len(), targets = ?unhandled, "mixin transformer shut down with targets never loaded");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn active_bundles(&self) -> Vec<Arc<MixinBundle>> {
        self.state.read_recursive().registry.active().to_vec()
    }

    /// Targets of active bundles that have not been rewritten yet.
    pub fn unhandled_targets(&self) -> Vec<String> {
        let state = self.state.read_recursive();
        let handled = self.handled.lock();
        let targets: BTreeSet<&str> = state.registry.active().iter().flat_map(|b| b.indexed_targets()).collect();
        targets.into_iter().filter(|t| !handled.contains(*t)).map(str::to_string).collect()
    }

    /// Whether the calling thread's re-entrance latch is set.
    pub fn reentrance_tripped(&self) -> bool {
        self.guards.is_tripped()
    }

    /// Clears the calling thread's re-entrance latch.
    pub fn reset_reentrance(&self) {
        self.guards.reset();
    }

    /// What [`transform`](Self::transform) would do with `class`, against the
    /// bundles active right now.
    pub fn select(&self, class: &str) -> Selection {
        select(self.state.read_recursive().registry.active(), class)
    }

    pub fn transform(
        &self,
        name: &str,
        transformed_name: Option<&str>,
        bytes: Option<&[u8]>,
    ) -> Result<Transformed, TransformError> {
        let (Some(target), Some(bytes)) = (transformed_name, bytes) else {
            return Ok(Transformed::Unchanged);
        };
        if self.is_shut_down() {
            return Ok(Transformed::Unchanged);
        }

        let scope = self.guards.enter();
        let locked = scope.locked();

        if !locked {
            let environment = self.environment();
            let stale = {
                let state = self.state.read_recursive();
                !state.current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &environment))
            };
            if stale {
                let mut state = self.state.write();
                // Another thread may have got here first.
                if !state.current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &environment)) {
                    self.initialize(&mut state, environment)?;
                }
            }
        }

        let state = self.state.read_recursive();
        match select(state.registry.active(), target) {
            Selection::Untouched => Ok(Transformed::Unchanged),
            Selection::Forbidden { bundle } => {
                Err(TransformError::ForbiddenReference { class: target.to_string(), bundle })
            }
            Selection::PassThrough { bundle } => {
                self.verbose(&state, format_args!("passing through {target} (bundle {bundle})"));
                let bytes = pass_through(target, bytes)?;
                if state.options.is_enabled(MixinOption::DebugExport) {
                    self.snapshot(&state, target, SnapshotKind::PostMerge, &bytes);
                }
                Ok(Transformed::Rewritten { bytes, skipped: Vec::new() })
            }
            Selection::Apply(mixins) => {
                if locked {
                    warn!(class = target, name, "re-entrance detected, this will cause serious problems");
                    return Err(TransformError::Reentrance { target: target.to_string() });
                }
                self.apply_mixins(&state, target, bytes, &mixins)
            }
        }
    }

    fn initialize(&self, state: &mut State, environment: Arc<MixinEnvironment>) -> Result<InitReport, TransformError> {
        let options = environment.options().clone();
        let verbose = options.is_enabled(MixinOption::DebugVerbose);
        let phase = environment.phase();
        if verbose {
            info!(%phase, "initialising mixin bundles");
        } else {
            debug!(%phase, "initialising mixin bundles");
        }

        let declarations = environment.source().declarations(phase).map_err(|err| {
            error!(error = %err, "could not load mixin bundles");
            TransformError::Initialization(err)
        })?;
        for declaration in declarations {
            state.registry.declare(declaration);
        }
        let report = state.registry.initialize_all();

        let mut modules: Vec<Arc<dyn TransformerModule>> = Vec::new();
        if options.is_enabled(MixinOption::DebugVerify) {
            modules.push(Arc::new(VerifyModule));
        }
        if options.is_enabled(MixinOption::CheckImplements) {
            modules.push(Arc::new(InterfaceCheckModule));
        }
        modules.extend(self.extra_modules.iter().cloned());
        state.modules = modules;

        let wants_sink =
            options.is_enabled(MixinOption::DebugExport) || options.is_enabled(MixinOption::DumpTargetOnFailure);
        state.sink = match (&self.custom_sink, wants_sink) {
            (Some(sink), _) => Some(Arc::clone(sink)),
            (None, true) => Some(Arc::new(FileSnapshotSink::new(options.export_dir()))),
            (None, false) => None,
        };

        state.options = options;
        state.current = Some(environment);
        info!(
            activated = report.activated.len(),
            failed = report.failed.len(),
            active = state.registry.active().len(),
            "mixin bundles initialised"
        );
        Ok(report)
    }

    fn apply_mixins(
        &self,
        state: &State,
        target: &str,
        bytes: &[u8],
        mixins: &MixinSet,
    ) -> Result<Transformed, TransformError> {
        self.verbose(state, format_args!("mixing {} into {target}", mixin_names(mixins)));

        let result = self.merge(state, target, bytes, mixins);
        match &result {
            Ok(Transformed::Rewritten { bytes: merged, skipped }) => {
                self.handled.lock().insert(target.to_string());
                if !skipped.is_empty() && state.options.is_enabled(MixinOption::DumpTargetOnFailure) {
                    self.snapshot(state, target, SnapshotKind::PreMerge, bytes);
                }
                if state.options.is_enabled(MixinOption::DebugExport) {
                    self.snapshot(state, target, SnapshotKind::PostMerge, merged);
                }
            }
            Ok(Transformed::Unchanged) => {}
            Err(_) => {
                if state.options.is_enabled(MixinOption::DumpTargetOnFailure) {
                    self.snapshot(state, target, SnapshotKind::PreMerge, bytes);
                }
            }
        }
        result
    }

    fn merge(&self, state: &State, target: &str, bytes: &[u8], mixins: &MixinSet) -> Result<Transformed, TransformError> {
        let class_error = |source| TransformError::ClassFormat { class: target.to_string(), source };
        let mut class = ClassFile::parse(bytes).map_err(class_error)?;
        let ctx = MergeContext { session_id: self.session_id, target };
        let driver = MergeDriver { modules: &state.modules, applicator: self.applicator.as_ref() };
        let skipped = driver.run(&ctx, &mut class, mixins)?;
        let bytes = class.to_bytes().map_err(class_error)?;
        Ok(Transformed::Rewritten { bytes, skipped })
    }

    fn snapshot(&self, state: &State, target: &str, kind: SnapshotKind, bytes: &[u8]) {
        if let Some(sink) = &state.sink {
            sink.write(target, kind, bytes);
        }
    }

    fn verbose(&self, state: &State, message: std::fmt::Arguments<'_>) {
        if state.options.is_enabled(MixinOption::DebugVerbose) {
            info!("{message}");
        } else {
            debug!("{message}");
        }
    }
}

fn mixin_names(mixins: &MixinSet) -> String {
    mixins.iter().map(|m| m.class_name.as_str()).collect::<Vec<_>>().join(", ")
}

/// Makes the class and its package-private members public.
fn pass_through(target: &str, bytes: &[u8]) -> Result<Vec<u8>, TransformError> {
    let class_error = |source| TransformError::ClassFormat { class: target.to_string(), source };
    let mut class = ClassFile::parse(bytes).map_err(class_error)?;
    class.access_flags = (class.access_flags & !(access::ACC_PRIVATE | access::ACC_PROTECTED)) | access::ACC_PUBLIC;
    for member in class.fields.iter_mut().chain(class.methods.iter_mut()) {
        if member.is_package_private() {
            member.access_flags |= access::ACC_PUBLIC;
        }
    }
    class.to_bytes().map_err(class_error)
}
