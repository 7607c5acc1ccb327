//! Hooks that run around the merge of a mixin set.

use std::collections::BTreeSet;

use tracing::warn;

use crate::classfile::{access, ClassFile, ClassFileError, CpInfo, MemberInfo};
use crate::mixin::error::ModuleError;
use crate::mixin::info::MixinSet;

/// Observer of one class's merge.
///
/// Both hooks may mutate the class. The mixin set is read-only.
pub trait TransformerModule: Send + Sync {
    fn name(&self) -> &str;

    fn pre_apply(&self, _target: &str, _class: &mut ClassFile, _mixins: &MixinSet) -> Result<(), ModuleError> {
        Ok(())
    }

    fn post_apply(&self, _target: &str, _class: &mut ClassFile, _mixins: &MixinSet) -> Result<(), ModuleError> {
        Ok(())
    }
}

/// Structural verification of the merged class.
#[derive(Debug, Default, Clone, Copy)]
pub struct VerifyModule;

impl TransformerModule for VerifyModule {
    fn name(&self) -> &str {
        "verify"
    }

    fn post_apply(&self, _target: &str, class: &mut ClassFile, _mixins: &MixinSet) -> Result<(), ModuleError> {
        VerifyModule::verify(class)
    }
}

impl VerifyModule {
    pub fn verify(class: &ClassFile) -> Result<(), ModuleError> {
        verify_constant_pool(class)?;
        expect_class(class, class.this_class, "this_class")?;
        if class.super_class != 0 {
            expect_class(class, class.super_class, "super_class")?;
        }
        for &index in &class.interfaces {
            expect_class(class, index, "interface")?;
        }

        let mut seen = BTreeSet::new();
        for field in &class.fields {
            let (name, descriptor) = member_signature(class, field)?;
            if !is_field_descriptor(descriptor) {
                return Err(fail(format!("field {name} has malformed descriptor {descriptor}")));
            }
            if !seen.insert((name, descriptor)) {
                return Err(fail(format!("duplicate field {name} {descriptor}")));
            }
        }

        seen.clear();
        for method in &class.methods {
            let (name, descriptor) = member_signature(class, method)?;
            if !is_method_descriptor(descriptor) {
                return Err(fail(format!("method {name} has malformed descriptor {descriptor}")));
            }
            if !seen.insert((name, descriptor)) {
                return Err(fail(format!("duplicate method {name}{descriptor}")));
            }

            let code_count = method
                .attributes
                .iter()
                .filter(|a| class.attribute_name(a).map_or(false, |n| n == "Code"))
                .count();
            let bodyless = method.has_flag(access::ACC_ABSTRACT) || method.has_flag(access::ACC_NATIVE);
            match (bodyless, code_count) {
                (true, 0) | (false, 1) => {}
                (true, _) => return Err(fail(format!("method {name}{descriptor} is abstract or native but has code"))),
                (false, 0) => return Err(fail(format!("method {name}{descriptor} has no code"))),
                (false, n) => return Err(fail(format!("method {name}{descriptor} has {n} Code attributes"))),
            }
        }
        Ok(())
    }
}

fn fail(message: String) -> ModuleError {
    ModuleError::Verification(message)
}

fn member_signature<'a>(class: &'a ClassFile, member: &MemberInfo) -> Result<(&'a str, &'a str), ModuleError> {
    Ok((class.member_name(member)?, class.member_descriptor(member)?))
}

fn expect_class(class: &ClassFile, index: u16, what: &str) -> Result<(), ModuleError> {
    match class.constant_pool.get(index)? {
        CpInfo::Class { .. } => Ok(()),
        _ => Err(fail(format!("{what} index #{index} is not a Class constant"))),
    }
}

fn verify_constant_pool(class: &ClassFile) -> Result<(), ModuleError> {
    let pool = &class.constant_pool;
    let utf8 = |index: u16| -> Result<(), ModuleError> {
        pool.get_utf8(index).map(|_| ()).map_err(ModuleError::from)
    };
    let kind = |index: u16, ok: fn(&CpInfo) -> bool, what: &str| -> Result<(), ModuleError> {
        if ok(pool.get(index)?) {
            Ok(())
        } else {
            Err(fail(format!("constant #{index} is not a {what}")))
        }
    };
    let is_class: fn(&CpInfo) -> bool = |e| matches!(e, CpInfo::Class { .. });
    let is_nat: fn(&CpInfo) -> bool = |e| matches!(e, CpInfo::NameAndType { .. });
    let is_ref: fn(&CpInfo) -> bool =
        |e| matches!(e, CpInfo::Fieldref { .. } | CpInfo::Methodref { .. } | CpInfo::InterfaceMethodref { .. });

    for (_, entry) in pool.iter() {
        match *entry {
            CpInfo::Class { name_index } => utf8(name_index)?,
            CpInfo::String { string_index } => utf8(string_index)?,
            CpInfo::Fieldref { class_index, name_and_type_index }
            | CpInfo::Methodref { class_index, name_and_type_index }
            | CpInfo::InterfaceMethodref { class_index, name_and_type_index } => {
                kind(class_index, is_class, "Class")?;
                kind(name_and_type_index, is_nat, "NameAndType")?;
            }
            CpInfo::NameAndType { name_index, descriptor_index } => {
                utf8(name_index)?;
                utf8(descriptor_index)?;
            }
            CpInfo::MethodHandle { reference_kind, reference_index } => {
                if !(1..=9).contains(&reference_kind) {
                    return Err(fail(format!("method handle kind {reference_kind} out of range")));
                }
                kind(reference_index, is_ref, "member reference")?;
            }
            CpInfo::MethodType { descriptor_index } => utf8(descriptor_index)?,
            CpInfo::Dynamic { name_and_type_index, .. } | CpInfo::InvokeDynamic { name_and_type_index, .. } => {
                kind(name_and_type_index, is_nat, "NameAndType")?;
            }
            CpInfo::Module { name_index } | CpInfo::Package { name_index } => utf8(name_index)?,
            CpInfo::Utf8(_) | CpInfo::Integer(_) | CpInfo::Float(_) | CpInfo::Long(_) | CpInfo::Double(_) => {}
        }
    }
    Ok(())
}

/// Parses one field type starting at `s`, returning the rest.
fn field_type(s: &str) -> Option<&str> {
    let mut chars = s.chars();
    match chars.next()? {
        'B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z' => Some(chars.as_str()),
        'L' => {
            let rest = chars.as_str();
            let end = rest.find(';')?;
            if end == 0 {
                return None;
            }
            Some(&rest[end + 1..])
        }
        '[' => field_type(chars.as_str()),
        _ => None,
    }
}

pub fn is_field_descriptor(s: &str) -> bool {
    field_type(s) == Some("")
}

pub fn is_method_descriptor(s: &str) -> bool {
    let Some(mut rest) = s.strip_prefix('(') else { return false };
    while !rest.starts_with(')') {
        match field_type(rest) {
            Some(next) => rest = next,
            None => return false,
        }
    }
    let ret = &rest[1..];
    ret == "V" || is_field_descriptor(ret)
}

/// Reports abstract methods left on a concrete class after merging.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterfaceCheckModule;

impl InterfaceCheckModule {
    /// `name descriptor` of every abstract method on a concrete class.
    pub fn check(class: &ClassFile) -> Result<Vec<String>, ClassFileError> {
        if class.has_flag(access::ACC_ABSTRACT) || class.has_flag(access::ACC_INTERFACE) {
            return Ok(Vec::new());
        }
        let mut missing = Vec::new();
        for method in class.methods.iter().filter(|m| m.has_flag(access::ACC_ABSTRACT)) {
            missing.push(format!("{}{}", class.member_name(method)?, class.member_descriptor(method)?));
        }
        Ok(missing)
    }
}

impl TransformerModule for InterfaceCheckModule {
    fn name(&self) -> &str {
        "check-implements"
    }

    fn post_apply(&self, target: &str, class: &mut ClassFile, _mixins: &MixinSet) -> Result<(), ModuleError> {
        let missing = InterfaceCheckModule::check(class)?;
        if !missing.is_empty() {
            warn!(class = target, methods = ?missing, "concrete class has unimplemented abstract methods");
        }
        Ok(())
    }
}
