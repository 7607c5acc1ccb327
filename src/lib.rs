//! # jvmti-mixin
//!
//! Load-time mixins for the JVM, delivered as a JVMTI agent.
//!
//! The agent hooks `ClassFileLoadHook`. For every class the VM is about to
//! define it asks the [`mixin::Transformer`] which declared mixins target
//! that class, merges them in a deterministic order and hands the rewritten
//! class file back to the VM.
//!
//! ## Quick Start
//!
//! **1. Create a new library crate built as a `cdylib`:**
//! ```toml
//! [lib]
//! crate-type = ["cdylib"]
//!
//! [dependencies]
//! jvmti-mixin = "0.3"
//! ```
//!
//! **2. Supply a merge algorithm and export the agent (src/lib.rs):**
//! ```rust,ignore
//! use std::sync::Arc;
//! use jvmti_mixin::agent::MixinAgent;
//! use jvmti_mixin::export_agent;
//! use jvmti_mixin::mixin::MarkerApplicator;
//!
//! export_agent!(init = MixinAgent::new(Arc::new(MarkerApplicator)));
//! ```
//!
//! **3. Declare bundles in JSON and run:**
//! ```bash
//! java -agentpath:./target/release/libmy_agent.so=config=mixins.json,verify MyApp
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │          agent::MixinAgent  (options, lifecycle)         │
//! │          agent::HookDispatcher (latest proxy wins)       │
//! ├─────────────────────────────────────────────────────────┤
//! │      Agent trait, trampolines, export_agent! (here)      │
//! ├─────────────────────────────────────────────────────────┤
//! │   mixin::Transformer  registry → select → merge driver   │
//! │   classfile::ClassFile  parse / mutate / write           │
//! ├─────────────────────────────────────────────────────────┤
//! │   env::Jvmti  +  sys::{jni, jvmti} raw bindings          │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`mixin`] | Bundles, ordering, selection, merge driver, transformer |
//! | [`classfile`] | Class file model with a writer and mutation helpers |
//! | [`agent`] | The ready-made JVMTI agent and its hook dispatcher |
//! | [`env`] | `Result`-returning wrapper over the JVMTI functions used |
//! | [`sys`] | Raw JNI/JVMTI types |
//! | [`logging`] | `tracing` subscriber setup |

pub mod agent;
pub mod classfile;
pub mod env;
pub mod logging;
pub mod mixin;
pub mod prelude;
pub mod sys;

use std::os::raw::{c_char, c_uchar};
use std::sync::OnceLock;

pub use crate::sys::jni;
use crate::sys::jvmti;

/// One `ClassFileLoadHook` event, decoded.
#[derive(Debug, Clone, Copy)]
pub struct ClassFileLoadEvent<'a> {
    /// Internal (slash-separated) name. Absent for anonymous classes.
    pub name: Option<&'a str>,
    pub class_data: &'a [u8],
    /// Set when the class is being redefined or retransformed.
    pub redefining: bool,
    pub loader: jni::jobject,
}

/// The core trait for implementing a JVMTI agent.
///
/// Implement it and use [`export_agent!`] to create a loadable agent
/// library. Only the events a class-transforming agent needs are exposed.
///
/// # Thread Safety
///
/// Your agent must be `Sync + Send` because JVMTI events can fire from any
/// thread.
pub trait Agent: Sync + Send {
    /// Called when the agent is loaded into the JVM.
    ///
    /// Return `JNI_OK` (0) on success, or `JNI_ERR` (-1) on failure.
    fn on_load(&self, vm: *mut jni::JavaVM, options: &str) -> jni::jint;

    /// Called when the agent is unloaded (JVM shutdown).
    fn on_unload(&self) {}

    /// The VM finished initialising. Requires `JVMTI_EVENT_VM_INIT`.
    fn vm_init(&self, _jni: *mut jni::JNIEnv, _thread: jni::jthread) {}

    /// The VM is about to die. Requires `JVMTI_EVENT_VM_DEATH`.
    fn vm_death(&self, _jni: *mut jni::JNIEnv) {}

    /// A class is about to be defined. Return replacement class bytes to
    /// rewrite it, or `None` to leave it alone.
    fn class_file_load_hook(&self, _jni: *mut jni::JNIEnv, _event: &ClassFileLoadEvent<'_>) -> Option<Vec<u8>> {
        None
    }
}

// Holds the agent instance so the extern "system" trampolines can find it.
pub static GLOBAL_AGENT: OnceLock<Box<dyn Agent>> = OnceLock::new();

/// Installs the global agent (called by the macro). Fails if one is set.
pub fn set_global_agent(agent: Box<dyn Agent>) -> Result<(), Box<dyn Agent>> {
    GLOBAL_AGENT.set(agent)
}

unsafe extern "system" fn trampoline_vm_init(_env: *mut jvmti::jvmtiEnv, jni: *mut jni::JNIEnv, thread: jni::jthread) {
    if let Some(agent) = GLOBAL_AGENT.get() {
        agent.vm_init(jni, thread);
    }
}

unsafe extern "system" fn trampoline_vm_death(_env: *mut jvmti::jvmtiEnv, jni: *mut jni::JNIEnv) {
    if let Some(agent) = GLOBAL_AGENT.get() {
        agent.vm_death(jni);
    }
}

unsafe extern "system" fn trampoline_class_file_load_hook(
    jvmti_env: *mut jvmti::jvmtiEnv,
    jni: *mut jni::JNIEnv,
    class_being_redefined: jni::jclass,
    loader: jni::jobject,
    name: *const c_char,
    _protection_domain: jni::jobject,
    class_data_len: jni::jint,
    class_data: *const c_uchar,
    new_class_data_len: *mut jni::jint,
    new_class_data: *mut *mut c_uchar,
) {
    let Some(agent) = GLOBAL_AGENT.get() else { return };
    if class_data.is_null() || class_data_len < 0 || new_class_data.is_null() || new_class_data_len.is_null() {
        return;
    }

    // JVM names are modified UTF-8.
    let name = if name.is_null() {
        None
    } else {
        classfile::decode_modified_utf8(std::ffi::CStr::from_ptr(name).to_bytes()).ok()
    };
    let data = std::slice::from_raw_parts(class_data, class_data_len as usize);
    let event = ClassFileLoadEvent {
        name: name.as_deref(),
        class_data: data,
        redefining: !class_being_redefined.is_null(),
        loader,
    };

    let Some(bytes) = agent.class_file_load_hook(jni, &event) else { return };
    let Ok(len) = jni::jint::try_from(bytes.len()) else {
        tracing::error!(class = ?event.name, len = bytes.len(), "rewritten class too large, keeping original");
        return;
    };
    match env::Jvmti::from_raw(jvmti_env).copy_to_vm(&bytes) {
        Ok(mem) => {
            *new_class_data = mem;
            *new_class_data_len = len;
        }
        Err(err) => {
            tracing::error!(class = ?event.name, error = %err, "could not hand rewritten class to the VM");
        }
    }
}

/// Callbacks routing VMInit, VMDeath and ClassFileLoadHook to the global
/// agent. Events still have to be enabled individually.
pub fn get_default_callbacks() -> jvmti::jvmtiEventCallbacks {
    jvmti::jvmtiEventCallbacks {
        VMInit: Some(trampoline_vm_init),
        VMDeath: Some(trampoline_vm_death),
        ClassFileLoadHook: Some(trampoline_class_file_load_hook),
        ..Default::default()
    }
}

/// Generates `Agent_OnLoad` and `Agent_OnUnload` for an [`Agent`].
///
/// ```rust,ignore
/// // An agent with a Default impl
/// export_agent!(MyAgent);
///
/// // Or any expression producing one
/// export_agent!(init = MixinAgent::new(Arc::new(MarkerApplicator)));
/// ```
///
/// Build the crate as a `cdylib` and load it with
/// `java -agentpath:./target/release/libmyagent.so=option1,option2 MyApp`.
/// Your `on_load` must return [`jni::JNI_OK`], anything else aborts startup.
#[macro_export]
macro_rules! export_agent {
    (init = $init:expr) => {
        #[no_mangle]
        pub unsafe extern "system" fn Agent_OnLoad(
            vm: *mut $crate::sys::jni::JavaVM,
            options: *mut std::ffi::c_char,
            _reserved: *mut std::ffi::c_void,
        ) -> $crate::sys::jni::jint {
            let agent: Box<dyn $crate::Agent> = Box::new($init);
            if $crate::set_global_agent(agent).is_err() {
                return $crate::sys::jni::JNI_ERR;
            }

            let options_str = if options.is_null() {
                ""
            } else {
                std::ffi::CStr::from_ptr(options).to_str().unwrap_or("")
            };

            match $crate::GLOBAL_AGENT.get() {
                Some(agent) => agent.on_load(vm, options_str),
                None => $crate::sys::jni::JNI_ERR,
            }
        }

        #[no_mangle]
        pub unsafe extern "system" fn Agent_OnUnload(_vm: *mut $crate::sys::jni::JavaVM) {
            if let Some(agent) = $crate::GLOBAL_AGENT.get() {
                agent.on_unload();
            }
        }
    };
    ($agent_type:ty) => {
        $crate::export_agent!(init = <$agent_type>::default());
    };
}
