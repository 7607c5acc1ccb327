//! Raw FFI bindings: only the JNI and JVMTI surface the agent touches.

pub mod jni;
pub mod jvmti;
