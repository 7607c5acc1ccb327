//! The ready-made mixin agent.
//!
//! [`MixinAgent`] wires a [`Transformer`] to the JVMTI load hook:
//!
//! ```text
//! ClassFileLoadHook → trampoline → MixinAgent → HookDispatcher → Transformer
//! ```
//!
//! Options come from the `-agentpath` string, e.g.
//! `-agentpath:libagent.so=config=mixins.json,verify,export-dir=/tmp/mixins`,
//! and are overlaid from `MIXIN_*` environment variables.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::{debug, error, info};

use crate::env::Jvmti;
use crate::mixin::environment::{split_options, CompositeSource, JsonBundleFile, StaticBundles};
use crate::mixin::{
    Applicator, BundleDeclaration, BundleSource, MixinEnvironment, MixinOption, Options, Phase, TransformError,
    Transformed, Transformer,
};
use crate::sys::{jni, jvmti};
use crate::{get_default_callbacks, logging, Agent, ClassFileLoadEvent};

/// Maps JVM internal class names to the names bundles are declared with.
pub trait ClassNameMapper: Send + Sync {
    fn map(&self, internal_name: &str) -> String;
}

/// `java/lang/String` → `java.lang.String`.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityMapper;

impl ClassNameMapper for IdentityMapper {
    fn map(&self, internal_name: &str) -> String {
        internal_name.replace('/', ".")
    }
}

/// Anything that can stand behind the load hook.
pub trait ClassHook: Send + Sync {
    fn transform(
        &self,
        name: &str,
        transformed_name: Option<&str>,
        bytes: Option<&[u8]>,
    ) -> Result<Transformed, TransformError>;
}

impl ClassHook for Transformer {
    fn transform(
        &self,
        name: &str,
        transformed_name: Option<&str>,
        bytes: Option<&[u8]>,
    ) -> Result<Transformed, TransformError> {
        Transformer::transform(self, name, transformed_name, bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyId(u64);

/// Routes load events to the most recently registered hook.
///
/// Every registration gets a [`ProxyId`]. Calls made through an older id
/// return [`Transformed::Unchanged`], so a host that re-registers as its
/// startup phases change never runs two transformers over the same class.
#[derive(Default)]
pub struct HookDispatcher {
    active: RwLock<Option<(ProxyId, Arc<dyn ClassHook>)>>,
    next_id: AtomicU64,
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, hook: Arc<dyn ClassHook>) -> ProxyId {
        let id = ProxyId(self.next_id.fetch_add(1, Ordering::SeqCst));
        *self.active.write() = Some((id, hook));
        debug!(proxy = id.0, "registered class hook proxy");
        id
    }

    pub fn is_active(&self, proxy: ProxyId) -> bool {
        self.active.read().as_ref().is_some_and(|(id, _)| *id == proxy)
    }

    pub fn transform(
        &self,
        proxy: ProxyId,
        name: &str,
        transformed_name: Option<&str>,
        bytes: Option<&[u8]>,
    ) -> Result<Transformed, TransformError> {
        // Clone out of the lock: the hook may trigger nested loads.
        let hook = match &*self.active.read() {
            Some((id, hook)) if *id == proxy => Arc::clone(hook),
            _ => return Ok(Transformed::Unchanged),
        };
        hook.transform(name, transformed_name, bytes)
    }
}

/// Options understood by [`MixinAgent`]: every mixin option plus
/// `config=<path>` (repeatable) and `fatal=abort|continue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOptions {
    pub mixin: Options,
    pub configs: Vec<PathBuf>,
    pub abort_on_fatal: bool,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self { mixin: Options::default(), configs: Vec::new(), abort_on_fatal: true }
    }
}

impl AgentOptions {
    pub fn parse(options: &str) -> Result<Self, crate::mixin::error::OptionsError> {
        use crate::mixin::error::OptionsError;

        let mut parsed = Self::default();
        for (key, value) in split_options(options) {
            match key {
                "config" => {
                    let path = value
                        .filter(|v| !v.is_empty())
                        .ok_or_else(|| OptionsError::MissingValue { key: key.to_string() })?;
                    parsed.configs.push(PathBuf::from(path));
                }
                "fatal" => {
                    parsed.abort_on_fatal = match value {
                        Some("abort") => true,
                        Some("continue") => false,
                        Some(other) => {
                            return Err(OptionsError::InvalidValue { key: key.to_string(), value: other.to_string() })
                        }
                        None => return Err(OptionsError::MissingValue { key: key.to_string() }),
                    };
                }
                _ => {
                    if !parsed.mixin.apply_key(key, value)? {
                        return Err(OptionsError::Unknown(key.to_string()));
                    }
                }
            }
        }
        Ok(parsed)
    }
}

struct AgentState {
    transformer: Arc<Transformer>,
    proxy: ProxyId,
    abort_on_fatal: bool,
}

pub struct MixinAgent {
    applicator: Arc<dyn Applicator>,
    bundles: Vec<BundleDeclaration>,
    mapper: Arc<dyn ClassNameMapper>,
    dispatcher: HookDispatcher,
    state: OnceLock<AgentState>,
}

impl MixinAgent {
    pub fn new(applicator: Arc<dyn Applicator>) -> Self {
        Self {
            applicator,
            bundles: Vec::new(),
            mapper: Arc::new(IdentityMapper),
            dispatcher: HookDispatcher::new(),
            state: OnceLock::new(),
        }
    }

    /// Bundles declared in code, alongside any `config=` files.
    pub fn with_bundles(mut self, bundles: impl IntoIterator<Item = BundleDeclaration>) -> Self {
        self.bundles.extend(bundles);
        self
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn ClassNameMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    /// The transformer, once `on_load` has run.
    pub fn transformer(&self) -> Option<&Arc<Transformer>> {
        self.state.get().map(|s| &s.transformer)
    }

    /// Moves the transformer to `phase`. Picked up by the next class load.
    pub fn enter_phase(&self, phase: Phase) {
        if let Some(state) = self.state.get() {
            let next = state.transformer.environment().with_phase(phase);
            state.transformer.set_environment(next);
        }
    }

    fn bundle_source(&self, options: &AgentOptions) -> Arc<dyn BundleSource> {
        let mut sources: Vec<Arc<dyn BundleSource>> = vec![Arc::new(StaticBundles(self.bundles.clone()))];
        for path in &options.configs {
            sources.push(Arc::new(JsonBundleFile::new(path.clone())));
        }
        Arc::new(CompositeSource(sources))
    }

    fn setup_jvmti(vm: *mut jni::JavaVM) -> Result<(), jvmti::jvmtiError> {
        let env = Jvmti::new(vm).map_err(|_| jvmti::jvmtiError::INTERNAL)?;
        env.add_capabilities_with(|caps| caps.set_can_generate_all_class_hook_events(true))?;
        // JDK 9+ only. Without it, classes loaded during the primordial
        // phase are never seen.
        if let Err(err) = env.add_capabilities_with(|caps| caps.set_can_generate_early_class_hook_events(true)) {
            debug!(error = %err, "early class hook events unavailable");
        }
        env.set_event_callbacks(get_default_callbacks())?;
        env.enable_events_global(&[
            jvmti::JVMTI_EVENT_VM_INIT,
            jvmti::JVMTI_EVENT_VM_DEATH,
            jvmti::JVMTI_EVENT_CLASS_FILE_LOAD_HOOK,
        ])
    }

    fn fatal(&self, state: &AgentState, class: &str, err: &TransformError) {
        error!(class, error = %err, source = ?std::error::Error::source(err), "fatal mixin error");
        if state.abort_on_fatal {
            std::process::abort();
        }
    }
}

impl Agent for MixinAgent {
    fn on_load(&self, vm: *mut jni::JavaVM, options: &str) -> jni::jint {
        let options = match AgentOptions::parse(options) {
            Ok(mut parsed) => match parsed.mixin.overlay_env() {
                Ok(()) => parsed,
                Err(err) => {
                    logging::init_logging(false);
                    error!(error = %err, "invalid mixin environment variable");
                    return jni::JNI_ERR;
                }
            },
            Err(err) => {
                logging::init_logging(false);
                error!(error = %err, "invalid agent options");
                return jni::JNI_ERR;
            }
        };
        logging::init_logging(options.mixin.is_enabled(MixinOption::DebugVerbose));

        let environment = MixinEnvironment::new(Phase::PreInit, options.mixin.clone(), self.bundle_source(&options));
        let transformer = Arc::new(Transformer::create(environment, Arc::clone(&self.applicator)));
        let proxy = self.dispatcher.register(Arc::clone(&transformer) as Arc<dyn ClassHook>);
        let session_id = transformer.session_id();

        let state = AgentState { transformer, proxy, abort_on_fatal: options.abort_on_fatal };
        if self.state.set(state).is_err() {
            error!("mixin agent loaded twice");
            return jni::JNI_ERR;
        }

        if let Err(err) = Self::setup_jvmti(vm) {
            error!(error = %err, "could not set up JVMTI");
            return jni::JNI_ERR;
        }

        info!(%session_id, configs = options.configs.len(), "mixin agent loaded");
        jni::JNI_OK
    }

    fn vm_init(&self, _jni: *mut jni::JNIEnv, _thread: jni::jthread) {
        self.enter_phase(Phase::Default);
    }

    fn vm_death(&self, _jni: *mut jni::JNIEnv) {
        if let Some(state) = self.state.get() {
            state.transformer.shutdown();
        }
    }

    fn class_file_load_hook(&self, _jni: *mut jni::JNIEnv, event: &ClassFileLoadEvent<'_>) -> Option<Vec<u8>> {
        let state = self.state.get()?;
        let name = event.name?;
        if event.redefining {
            debug!(class = name, "ignoring redefinition");
            return None;
        }
        let transformed_name = self.mapper.map(name);

        match self.dispatcher.transform(state.proxy, name, Some(&transformed_name), Some(event.class_data)) {
            Ok(transformed) => transformed.into_bytes(),
            Err(err) => {
                self.fatal(state, &transformed_name, &err);
                None
            }
        }
    }
}
