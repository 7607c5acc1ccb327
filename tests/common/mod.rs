#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use jvmti_mixin::classfile::{access, ClassFile};
use jvmti_mixin::mixin::environment::{MixinEnvironment, Options, StaticBundles};
use jvmti_mixin::mixin::{
    Applicator, BundleDeclaration, MergeContext, MergeError, MixinInfo, Phase, TransformError, Transformed,
    Transformer,
};

pub struct CpBuilder {
    entries: Vec<Vec<u8>>,
    utf8: HashMap<String, u16>,
}

impl CpBuilder {
    pub fn new() -> Self {
        Self { entries: Vec::new(), utf8: HashMap::new() }
    }

    fn push(&mut self, entry: Vec<u8>) -> u16 {
        self.entries.push(entry);
        self.entries.len() as u16
    }

    pub fn utf8(&mut self, s: &str) -> u16 {
        if let Some(&index) = self.utf8.get(s) {
            return index;
        }
        let mut entry = vec![1];
        entry.extend_from_slice(&(s.len() as u16).to_be_bytes());
        entry.extend_from_slice(s.as_bytes());
        let index = self.push(entry);
        self.utf8.insert(s.to_string(), index);
        index
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        let mut entry = vec![7];
        entry.extend_from_slice(&name_index.to_be_bytes());
        self.push(entry)
    }

    /// A `String` constant whose `Utf8` entry holds `encoded` verbatim.
    pub fn raw_string(&mut self, encoded: &[u8]) -> u16 {
        let mut utf8 = vec![1];
        utf8.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
        utf8.extend_from_slice(encoded);
        let utf8_index = self.push(utf8);
        let mut entry = vec![8];
        entry.extend_from_slice(&utf8_index.to_be_bytes());
        self.push(entry)
    }

    pub fn long(&mut self, value: i64) -> u16 {
        let mut entry = vec![5];
        entry.extend_from_slice(&value.to_be_bytes());
        let index = self.push(entry);
        // Second slot of a wide constant, written as nothing.
        self.entries.push(Vec::new());
        index
    }

    fn write(&self, out: &mut Vec<u8>) {
        u2(out, self.entries.len() as u16 + 1);
        for entry in &self.entries {
            out.extend_from_slice(entry);
        }
    }
}

pub fn u2(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn u4(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

struct Member {
    access: u16,
    name: String,
    descriptor: String,
}

/// Builds minimal but well-formed class files. Concrete methods get a
/// `Code` attribute holding a bare `return`.
pub struct ClassBuilder {
    name: String,
    super_name: Option<String>,
    access: u16,
    fields: Vec<Member>,
    methods: Vec<Member>,
    longs: Vec<i64>,
    raw_strings: Vec<Vec<u8>>,
}

impl ClassBuilder {
    /// `name` is the internal, slash-separated name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            super_name: Some("java/lang/Object".to_string()),
            access: access::ACC_PUBLIC,
            fields: Vec::new(),
            methods: Vec::new(),
            longs: Vec::new(),
            raw_strings: Vec::new(),
        }
    }

    pub fn access(mut self, access: u16) -> Self {
        self.access = access;
        self
    }

    pub fn field(mut self, access: u16, name: &str, descriptor: &str) -> Self {
        self.fields.push(Member { access, name: name.into(), descriptor: descriptor.into() });
        self
    }

    pub fn method(mut self, access: u16, name: &str, descriptor: &str) -> Self {
        self.methods.push(Member { access, name: name.into(), descriptor: descriptor.into() });
        self
    }

    pub fn long_constant(mut self, value: i64) -> Self {
        self.longs.push(value);
        self
    }

    /// Adds a string constant from already-encoded modified UTF-8.
    pub fn raw_string_constant(mut self, encoded: &[u8]) -> Self {
        self.raw_strings.push(encoded.to_vec());
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut cp = CpBuilder::new();
        let this_class = cp.class(&self.name);
        let super_class = self.super_name.as_deref().map_or(0, |s| cp.class(s));
        for &value in &self.longs {
            cp.long(value);
        }
        for encoded in &self.raw_strings {
            cp.raw_string(encoded);
        }

        let mut members = Vec::new();
        u2(&mut members, self.fields.len() as u16);
        for field in &self.fields {
            u2(&mut members, field.access);
            u2(&mut members, cp.utf8(&field.name));
            u2(&mut members, cp.utf8(&field.descriptor));
            u2(&mut members, 0);
        }

        u2(&mut members, self.methods.len() as u16);
        for method in &self.methods {
            u2(&mut members, method.access);
            u2(&mut members, cp.utf8(&method.name));
            u2(&mut members, cp.utf8(&method.descriptor));
            if method.access & (access::ACC_ABSTRACT | access::ACC_NATIVE) != 0 {
                u2(&mut members, 0);
            } else {
                let code_name = cp.utf8("Code");
                u2(&mut members, 1);
                u2(&mut members, code_name);
                let mut code = Vec::new();
                u2(&mut code, 1); // max_stack
                u2(&mut code, 1); // max_locals
                u4(&mut code, 1);
                code.push(0xB1); // return
                u2(&mut code, 0); // exception table
                u2(&mut code, 0); // attributes
                u4(&mut members, code.len() as u32);
                members.extend_from_slice(&code);
            }
        }

        let mut bytes = Vec::new();
        u4(&mut bytes, 0xCAFEBABE);
        u2(&mut bytes, 0);
        u2(&mut bytes, 52);
        cp.write(&mut bytes);
        u2(&mut bytes, self.access);
        u2(&mut bytes, this_class);
        u2(&mut bytes, super_class);
        u2(&mut bytes, 0); // interfaces
        bytes.extend_from_slice(&members);
        u2(&mut bytes, 0); // attributes
        bytes
    }
}

/// A plain public class with a constructor.
pub fn simple_class(internal_name: &str) -> Vec<u8> {
    ClassBuilder::new(internal_name).method(access::ACC_PUBLIC, "<init>", "()V").build()
}

pub fn parse(bytes: &[u8]) -> ClassFile {
    ClassFile::parse(bytes).expect("parse class file")
}

pub fn rewritten(result: Result<Transformed, TransformError>) -> ClassFile {
    match result.expect("transform") {
        Transformed::Rewritten { bytes, .. } => parse(&bytes),
        Transformed::Unchanged => panic!("expected the class to be rewritten"),
    }
}

pub fn environment(phase: Phase, options: Options, bundles: Vec<BundleDeclaration>) -> MixinEnvironment {
    MixinEnvironment::new(phase, options, Arc::new(StaticBundles(bundles)))
}

pub fn transformer(bundles: Vec<BundleDeclaration>, applicator: Arc<dyn Applicator>) -> Transformer {
    Transformer::create(environment(Phase::Default, Options::default(), bundles), applicator)
}

pub fn transform(t: &Transformer, dotted_name: &str, bytes: &[u8]) -> Result<Transformed, TransformError> {
    let internal = dotted_name.replace('.', "/");
    t.transform(&internal, Some(dotted_name), Some(bytes))
}

/// What one `apply` call saw.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub mixin: String,
    pub target: String,
    pub methods_before: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum Step {
    /// Add a native method with this name and `()V`.
    AddMethod(&'static str),
    Fail(&'static str),
    Noop,
}

/// Applicator scripted per mixin class name. Records every call.
#[derive(Default)]
pub struct ScriptedApplicator {
    steps: HashMap<String, Step>,
    pub observed: Mutex<Vec<Observation>>,
    pub sessions: Mutex<Vec<uuid::Uuid>>,
}

impl ScriptedApplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, mixin: &str, step: Step) -> Self {
        self.steps.insert(mixin.to_string(), step);
        self
    }

    pub fn applied(&self) -> Vec<String> {
        self.observed.lock().unwrap().iter().map(|o| o.mixin.clone()).collect()
    }
}

impl Applicator for ScriptedApplicator {
    fn apply(&self, ctx: &MergeContext<'_>, target: &mut ClassFile, mixin: &MixinInfo) -> Result<(), MergeError> {
        self.observed.lock().unwrap().push(Observation {
            mixin: mixin.class_name.clone(),
            target: ctx.target.to_string(),
            methods_before: target.method_names().into_iter().map(String::from).collect(),
        });
        self.sessions.lock().unwrap().push(ctx.session_id);
        match self.steps.get(&mixin.class_name).cloned().unwrap_or(Step::Noop) {
            Step::AddMethod(name) => {
                target.add_method(access::ACC_PUBLIC | access::ACC_NATIVE, name, "()V", Vec::new())?;
                Ok(())
            }
            Step::Fail(message) => Err(MergeError::new(message)),
            Step::Noop => Ok(()),
        }
    }
}

/// Loads another class through the transformer from inside `apply`, the
/// way resolving a referenced type would during a real merge.
pub struct NestedLoadApplicator {
    transformer: OnceLock<Weak<Transformer>>,
    nested_name: String,
    nested_bytes: Vec<u8>,
    pub nested_result: Mutex<Option<Result<Transformed, TransformError>>>,
}

impl NestedLoadApplicator {
    pub fn new(nested_name: &str, nested_bytes: Vec<u8>) -> Self {
        Self {
            transformer: OnceLock::new(),
            nested_name: nested_name.to_string(),
            nested_bytes,
            nested_result: Mutex::new(None),
        }
    }

    pub fn attach(&self, transformer: &Arc<Transformer>) {
        let _ = self.transformer.set(Arc::downgrade(transformer));
    }
}

impl Applicator for NestedLoadApplicator {
    fn apply(&self, _ctx: &MergeContext<'_>, _target: &mut ClassFile, _mixin: &MixinInfo) -> Result<(), MergeError> {
        let transformer = self
            .transformer
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| MergeError::new("transformer not attached"))?;
        // Only the outermost merge triggers a load.
        if self.nested_result.lock().unwrap().is_some() {
            return Ok(());
        }
        let result = transform(&transformer, &self.nested_name, &self.nested_bytes);
        *self.nested_result.lock().unwrap() = Some(result);
        Ok(())
    }
}
