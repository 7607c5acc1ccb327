//! High-level wrapper for the JVMTI environment.
//!
//! The agent only needs a handful of JVMTI functions: capabilities, event
//! setup, phase queries and the allocator used to hand rewritten class bytes
//! back to the VM. [`Jvmti`] wraps those with `Result` returns.
//!
//! ```rust,ignore
//! use jvmti_mixin::env::Jvmti;
//! use jvmti_mixin::sys::{jni, jvmti};
//!
//! fn on_load(vm: *mut jni::JavaVM) -> Result<(), jvmti::jvmtiError> {
//!     let env = Jvmti::new(vm).map_err(|_| jvmti::jvmtiError::INTERNAL)?;
//!     env.add_capabilities_with(|caps| caps.set_can_generate_all_class_hook_events(true))?;
//!     env.set_event_callbacks(jvmti_mixin::get_default_callbacks())?;
//!     env.enable_events_global(&[jvmti::JVMTI_EVENT_CLASS_FILE_LOAD_HOOK])?;
//!     Ok(())
//! }
//! ```

use crate::sys::jni;
use crate::sys::jvmti;
use std::ptr;

/// A wrapper around the raw JVMTI environment pointer.
pub struct Jvmti {
    env: *mut jvmti::jvmtiEnv,
}

// A jvmtiEnv may be used from any thread once created.
unsafe impl Send for Jvmti {}
unsafe impl Sync for Jvmti {}

impl Jvmti {
    /// Connects to the JVM and retrieves the JVMTI environment.
    pub fn new(vm: *mut jni::JavaVM) -> Result<Self, jni::jint> {
        if vm.is_null() {
            return Err(jni::JNI_ERR);
        }
        let mut env_ptr: *mut std::ffi::c_void = ptr::null_mut();

        unsafe {
            // vm: *mut JavaVM = *mut *const JNIInvokeInterface_
            let get_env_fn = (**vm).GetEnv;
            let res = get_env_fn(vm, &mut env_ptr, jvmti::JVMTI_VERSION_1_2);
            if res != jni::JNI_OK {
                return Err(res);
            }
        }

        Ok(Jvmti { env: env_ptr as *mut jvmti::jvmtiEnv })
    }

    /// Create a Jvmti wrapper from a raw jvmtiEnv pointer
    ///
    /// # Safety
    /// The caller must ensure the pointer is valid for the duration of use.
    pub unsafe fn from_raw(env: *mut jvmti::jvmtiEnv) -> Self {
        Jvmti { env }
    }

    /// Get the raw jvmtiEnv pointer
    pub fn raw(&self) -> *mut jvmti::jvmtiEnv {
        self.env
    }

    fn table(&self) -> Result<&jvmti::jvmtiInterface_1_, jvmti::jvmtiError> {
        if self.env.is_null() {
            return Err(jvmti::jvmtiError::NULL_POINTER);
        }
        unsafe {
            let functions = (*self.env).functions;
            functions.as_ref().ok_or(jvmti::jvmtiError::NULL_POINTER)
        }
    }

    fn check(err: jvmti::jvmtiError) -> Result<(), jvmti::jvmtiError> {
        if err == jvmti::jvmtiError::NONE {
            Ok(())
        } else {
            Err(err)
        }
    }

    pub fn add_capabilities(&self, caps: &jvmti::jvmtiCapabilities) -> Result<(), jvmti::jvmtiError> {
        let add_caps_fn = self.table()?.AddCapabilities.ok_or(jvmti::jvmtiError::NOT_AVAILABLE)?;
        Self::check(unsafe { add_caps_fn(self.env, caps) })
    }

    /// Builds a capability set with `f` and adds it.
    pub fn add_capabilities_with(
        &self,
        f: impl FnOnce(&mut jvmti::jvmtiCapabilities),
    ) -> Result<(), jvmti::jvmtiError> {
        let mut caps = jvmti::jvmtiCapabilities::default();
        f(&mut caps);
        self.add_capabilities(&caps)
    }

    pub fn set_event_callbacks(&self, callbacks: jvmti::jvmtiEventCallbacks) -> Result<(), jvmti::jvmtiError> {
        let set_callbacks_fn = self.table()?.SetEventCallbacks.ok_or(jvmti::jvmtiError::NOT_AVAILABLE)?;
        let size = std::mem::size_of::<jvmti::jvmtiEventCallbacks>() as jni::jint;
        Self::check(unsafe { set_callbacks_fn(self.env, &callbacks, size) })
    }

    pub fn set_event_notification_mode(&self, enable: bool, event_type: u32, thread: jni::jthread) -> Result<(), jvmti::jvmtiError> {
        let set_mode_fn = self.table()?.SetEventNotificationMode.ok_or(jvmti::jvmtiError::NOT_AVAILABLE)?;
        let mode = if enable { jvmti::JVMTI_ENABLE } else { jvmti::JVMTI_DISABLE };
        // thread can be null (all threads)
        Self::check(unsafe { set_mode_fn(self.env, mode, event_type, thread) })
    }

    /// Enables each event for all threads, stopping at the first failure.
    pub fn enable_events_global(&self, events: &[u32]) -> Result<(), jvmti::jvmtiError> {
        for &event in events {
            self.set_event_notification_mode(true, event, ptr::null_mut())?;
        }
        Ok(())
    }

    pub fn get_phase(&self) -> Result<jni::jint, jvmti::jvmtiError> {
        let get_phase_fn = self.table()?.GetPhase.ok_or(jvmti::jvmtiError::NOT_AVAILABLE)?;
        let mut phase: jni::jint = 0;
        Self::check(unsafe { get_phase_fn(self.env, &mut phase) })?;
        Ok(phase)
    }

    pub fn allocate(&self, size: jni::jlong) -> Result<*mut u8, jvmti::jvmtiError> {
        let allocate_fn = self.table()?.Allocate.ok_or(jvmti::jvmtiError::NOT_AVAILABLE)?;
        let mut mem_ptr: *mut u8 = ptr::null_mut();
        Self::check(unsafe { allocate_fn(self.env, size, &mut mem_ptr) })?;
        Ok(mem_ptr)
    }

    pub fn deallocate(&self, mem: *mut u8) -> Result<(), jvmti::jvmtiError> {
        if mem.is_null() {
            return Ok(());
        }
        let deallocate_fn = self.table()?.Deallocate.ok_or(jvmti::jvmtiError::NOT_AVAILABLE)?;
        Self::check(unsafe { deallocate_fn(self.env, mem) })
    }

    /// Copies `bytes` into JVMTI-owned memory, as ClassFileLoadHook requires
    /// for `new_class_data`. Ownership passes to the VM.
    pub fn copy_to_vm(&self, bytes: &[u8]) -> Result<*mut u8, jvmti::jvmtiError> {
        let mem = self.allocate(bytes.len() as jni::jlong)?;
        if mem.is_null() {
            return Err(jvmti::jvmtiError::OUT_OF_MEMORY);
        }
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), mem, bytes.len()) };
        Ok(mem)
    }
}
