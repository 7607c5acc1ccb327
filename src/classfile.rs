//! Class file model used as the merge target.
//!
//! Classes are parsed into a structural form (constant pool, members, raw
//! attributes), mutated in place by mixin application, and written back with
//! [`ClassFile::to_bytes`]. Attributes are kept as raw bytes so anything the
//! transformer does not touch survives the round trip unchanged.

use thiserror::Error;

pub const MAGIC: u32 = 0xCAFEBABE;

/// Access flag bits shared by classes, fields and methods.
pub mod access {
    pub const ACC_PUBLIC: u16 = 0x0001;
    pub const ACC_PRIVATE: u16 = 0x0002;
    pub const ACC_PROTECTED: u16 = 0x0004;
    pub const ACC_STATIC: u16 = 0x0008;
    pub const ACC_FINAL: u16 = 0x0010;
    pub const ACC_SUPER: u16 = 0x0020;
    pub const ACC_NATIVE: u16 = 0x0100;
    pub const ACC_INTERFACE: u16 = 0x0200;
    pub const ACC_ABSTRACT: u16 = 0x0400;
    pub const ACC_SYNTHETIC: u16 = 0x1000;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<RawAttribute>,
}

/// A field or method entry.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<RawAttribute>,
}

impl MemberInfo {
    pub fn has_flag(&self, flag: u16) -> bool {
        self.access_flags & flag != 0
    }

    /// True when neither private nor protected nor public.
    pub fn is_package_private(&self) -> bool {
        self.access_flags & (access::ACC_PUBLIC | access::ACC_PRIVATE | access::ACC_PROTECTED) == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    pub name_index: u16,
    pub info: Vec<u8>,
}

/// A `CONSTANT_Utf8` value kept in its encoded form.
///
/// Class files may hold unpaired surrogates, which have no `str` form. Such
/// entries still round-trip; they just have no [`as_str`](Self::as_str) view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utf8Constant {
    bytes: Vec<u8>,
    text: Option<String>,
}

impl Utf8Constant {
    /// Checks the modified UTF-8 framing and decodes the text where it can.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ClassFileError> {
        let units = decode_utf16_units(&bytes)?;
        let text = String::from_utf16(&units).ok();
        Ok(Self { bytes, text })
    }

    pub fn as_str(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// The encoded bytes, as they appear in the class file.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<&str> for Utf8Constant {
    fn from(value: &str) -> Self {
        Self { bytes: encode_modified_utf8(value), text: Some(value.to_string()) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CpInfo {
    Utf8(Utf8Constant),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name_index: u16 },
    String { string_index: u16 },
    Fieldref { class_index: u16, name_and_type_index: u16 },
    Methodref { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodref { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
}

impl CpInfo {
    fn tag(&self) -> u8 {
        match self {
            CpInfo::Utf8(_) => 1,
            CpInfo::Integer(_) => 3,
            CpInfo::Float(_) => 4,
            CpInfo::Long(_) => 5,
            CpInfo::Double(_) => 6,
            CpInfo::Class { .. } => 7,
            CpInfo::String { .. } => 8,
            CpInfo::Fieldref { .. } => 9,
            CpInfo::Methodref { .. } => 10,
            CpInfo::InterfaceMethodref { .. } => 11,
            CpInfo::NameAndType { .. } => 12,
            CpInfo::MethodHandle { .. } => 15,
            CpInfo::MethodType { .. } => 16,
            CpInfo::Dynamic { .. } => 17,
            CpInfo::InvokeDynamic { .. } => 18,
            CpInfo::Module { .. } => 19,
            CpInfo::Package { .. } => 20,
        }
    }

    /// Long and Double take two constant pool slots.
    fn is_wide(&self) -> bool {
        matches!(self, CpInfo::Long(_) | CpInfo::Double(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantPool {
    entries: Vec<Option<CpInfo>>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self { entries: vec![None] }
    }
}

impl ConstantPool {
    pub fn get(&self, index: u16) -> Result<&CpInfo, ClassFileError> {
        if index == 0 {
            return Err(ClassFileError::InvalidConstantPoolIndex(index));
        }
        self.entries
            .get(index as usize)
            .and_then(|e| e.as_ref())
            .ok_or(ClassFileError::InvalidConstantPoolIndex(index))
    }

    pub fn get_utf8(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.get(index)? {
            CpInfo::Utf8(value) => value.as_str().ok_or(ClassFileError::InvalidUtf8),
            _ => Err(ClassFileError::InvalidConstantPoolIndex(index)),
        }
    }

    /// Resolves a `Class` entry to its internal name.
    pub fn get_class_name(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.get(index)? {
            CpInfo::Class { name_index } => self.get_utf8(*name_index),
            _ => Err(ClassFileError::InvalidConstantPoolIndex(index)),
        }
    }

    /// The `constant_pool_count` value, one past the last usable index.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Iterates over populated slots with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &CpInfo)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i as u16, e)))
    }

    pub fn push(&mut self, entry: CpInfo) -> Result<u16, ClassFileError> {
        let slots = if entry.is_wide() { 2 } else { 1 };
        if self.entries.len() + slots > u16::MAX as usize {
            return Err(ClassFileError::ConstantPoolOverflow);
        }
        let index = self.entries.len() as u16;
        let wide = entry.is_wide();
        self.entries.push(Some(entry));
        if wide {
            self.entries.push(None);
        }
        Ok(index)
    }

    pub fn find_utf8(&self, value: &str) -> Option<u16> {
        self.iter().find_map(|(i, e)| match e {
            CpInfo::Utf8(entry) if entry.as_str() == Some(value) => Some(i),
            _ => None,
        })
    }

    /// Returns the index of a `Utf8` entry, adding one if needed.
    pub fn utf8(&mut self, value: &str) -> Result<u16, ClassFileError> {
        match self.find_utf8(value) {
            Some(index) => Ok(index),
            None => self.push(CpInfo::Utf8(value.into())),
        }
    }

    /// Returns the index of a `Class` entry for an internal name, adding one if needed.
    pub fn class(&mut self, internal_name: &str) -> Result<u16, ClassFileError> {
        let existing = self.iter().find_map(|(i, e)| match e {
            CpInfo::Class { name_index } => match self.get_utf8(*name_index) {
                Ok(name) if name == internal_name => Some(i),
                _ => None,
            },
            _ => None,
        });
        match existing {
            Some(index) => Ok(index),
            None => {
                let name_index = self.utf8(internal_name)?;
                self.push(CpInfo::Class { name_index })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassFileError {
    #[error("unexpected end of file")]
    UnexpectedEof,
    #[error("invalid magic: {0:#x}")]
    InvalidMagic(u32),
    #[error("invalid constant pool index: {0}")]
    InvalidConstantPoolIndex(u16),
    #[error("invalid constant pool tag: {0}")]
    InvalidConstantPoolTag(u8),
    #[error("invalid modified UTF-8")]
    InvalidUtf8,
    #[error("{0} trailing bytes after class file")]
    TrailingBytes(usize),
    #[error("constant pool is full")]
    ConstantPoolOverflow,
    #[error("too many {0} to encode")]
    TooMany(&'static str),
    #[error("duplicate member {name}{descriptor}")]
    DuplicateMember { name: String, descriptor: String },
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn read_u1(&mut self) -> Result<u8, ClassFileError> {
        if self.remaining() < 1 {
            return Err(ClassFileError::UnexpectedEof);
        }
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    fn read_u2(&mut self) -> Result<u16, ClassFileError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u4(&mut self) -> Result<u32, ClassFileError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ClassFileError> {
        if self.remaining() < len {
            return Err(ClassFileError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

struct Writer {
    out: Vec<u8>,
}

impl Writer {
    fn u1(&mut self, v: u8) {
        self.out.push(v);
    }

    fn u2(&mut self, v: u16) {
        self.out.extend_from_slice(&v.to_be_bytes());
    }

    fn u4(&mut self, v: u32) {
        self.out.extend_from_slice(&v.to_be_bytes());
    }

    fn count(&mut self, len: usize, what: &'static str) -> Result<(), ClassFileError> {
        let len = u16::try_from(len).map_err(|_| ClassFileError::TooMany(what))?;
        self.u2(len);
        Ok(())
    }

    fn attributes(&mut self, attributes: &[RawAttribute]) -> Result<(), ClassFileError> {
        self.count(attributes.len(), "attributes")?;
        for attr in attributes {
            self.u2(attr.name_index);
            let len = u32::try_from(attr.info.len()).map_err(|_| ClassFileError::TooMany("attribute bytes"))?;
            self.u4(len);
            self.out.extend_from_slice(&attr.info);
        }
        Ok(())
    }

    fn members(&mut self, members: &[MemberInfo], what: &'static str) -> Result<(), ClassFileError> {
        self.count(members.len(), what)?;
        for m in members {
            self.u2(m.access_flags);
            self.u2(m.name_index);
            self.u2(m.descriptor_index);
            self.attributes(&m.attributes)?;
        }
        Ok(())
    }
}

impl ClassFile {
    pub fn parse(bytes: &[u8]) -> Result<Self, ClassFileError> {
        let mut r = Reader::new(bytes);
        let magic = r.read_u4()?;
        if magic != MAGIC {
            return Err(ClassFileError::InvalidMagic(magic));
        }

        let minor_version = r.read_u2()?;
        let major_version = r.read_u2()?;

        let constant_pool = parse_constant_pool(&mut r)?;

        let access_flags = r.read_u2()?;
        let this_class = r.read_u2()?;
        let super_class = r.read_u2()?;

        let interfaces_count = r.read_u2()?;
        let mut interfaces = Vec::with_capacity(interfaces_count as usize);
        for _ in 0..interfaces_count {
            interfaces.push(r.read_u2()?);
        }

        let fields = parse_members(&mut r)?;
        let methods = parse_members(&mut r)?;
        let attributes = parse_attributes(&mut r)?;

        if r.remaining() > 0 {
            return Err(ClassFileError::TrailingBytes(r.remaining()));
        }

        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ClassFileError> {
        let mut w = Writer { out: Vec::with_capacity(1024) };
        w.u4(MAGIC);
        w.u2(self.minor_version);
        w.u2(self.major_version);

        w.count(self.constant_pool.count(), "constant pool entries")?;
        for (_, entry) in self.constant_pool.iter() {
            write_constant(&mut w, entry)?;
        }

        w.u2(self.access_flags);
        w.u2(self.this_class);
        w.u2(self.super_class);
        w.count(self.interfaces.len(), "interfaces")?;
        for &i in &self.interfaces {
            w.u2(i);
        }

        w.members(&self.fields, "fields")?;
        w.members(&self.methods, "methods")?;
        w.attributes(&self.attributes)?;
        Ok(w.out)
    }

    /// Internal (slash-separated) name of this class.
    pub fn name(&self) -> Result<&str, ClassFileError> {
        self.constant_pool.get_class_name(self.this_class)
    }

    pub fn super_name(&self) -> Result<Option<&str>, ClassFileError> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool.get_class_name(self.super_class).map(Some)
    }

    pub fn interface_names(&self) -> Result<Vec<&str>, ClassFileError> {
        self.interfaces
            .iter()
            .map(|&i| self.constant_pool.get_class_name(i))
            .collect()
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        self.access_flags & flag != 0
    }

    pub fn member_name(&self, member: &MemberInfo) -> Result<&str, ClassFileError> {
        self.constant_pool.get_utf8(member.name_index)
    }

    pub fn member_descriptor(&self, member: &MemberInfo) -> Result<&str, ClassFileError> {
        self.constant_pool.get_utf8(member.descriptor_index)
    }

    pub fn attribute_name(&self, attribute: &RawAttribute) -> Result<&str, ClassFileError> {
        self.constant_pool.get_utf8(attribute.name_index)
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&MemberInfo> {
        find_member(&self.constant_pool, &self.methods, name, descriptor)
    }

    pub fn find_field(&self, name: &str, descriptor: &str) -> Option<&MemberInfo> {
        find_member(&self.constant_pool, &self.fields, name, descriptor)
    }

    /// Names of all declared methods, in declaration order.
    pub fn method_names(&self) -> Vec<&str> {
        self.methods
            .iter()
            .filter_map(|m| self.constant_pool.get_utf8(m.name_index).ok())
            .collect()
    }

    pub fn add_field(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        attributes: Vec<RawAttribute>,
    ) -> Result<(), ClassFileError> {
        if self.find_field(name, descriptor).is_some() {
            return Err(ClassFileError::DuplicateMember { name: name.into(), descriptor: descriptor.into() });
        }
        let member = self.new_member(access_flags, name, descriptor, attributes)?;
        self.fields.push(member);
        Ok(())
    }

    pub fn add_method(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        attributes: Vec<RawAttribute>,
    ) -> Result<(), ClassFileError> {
        if self.find_method(name, descriptor).is_some() {
            return Err(ClassFileError::DuplicateMember { name: name.into(), descriptor: descriptor.into() });
        }
        let member = self.new_member(access_flags, name, descriptor, attributes)?;
        self.methods.push(member);
        Ok(())
    }

    fn new_member(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        attributes: Vec<RawAttribute>,
    ) -> Result<MemberInfo, ClassFileError> {
        let name_index = self.constant_pool.utf8(name)?;
        let descriptor_index = self.constant_pool.utf8(descriptor)?;
        Ok(MemberInfo { access_flags, name_index, descriptor_index, attributes })
    }
}

fn find_member<'a>(cp: &ConstantPool, members: &'a [MemberInfo], name: &str, descriptor: &str) -> Option<&'a MemberInfo> {
    members.iter().find(|m| {
        cp.get_utf8(m.name_index).map_or(false, |n| n == name)
            && cp.get_utf8(m.descriptor_index).map_or(false, |d| d == descriptor)
    })
}

fn parse_constant_pool(r: &mut Reader) -> Result<ConstantPool, ClassFileError> {
    let count = r.read_u2()? as usize;
    let mut entries: Vec<Option<CpInfo>> = Vec::with_capacity(count);
    entries.push(None); // index 0 is unused

    let mut i = 1;
    while i < count {
        let tag = r.read_u1()?;
        let entry = match tag {
            1 => {
                let len = r.read_u2()? as usize;
                CpInfo::Utf8(Utf8Constant::from_bytes(r.read_bytes(len)?.to_vec())?)
            }
            3 => CpInfo::Integer(r.read_u4()? as i32),
            4 => CpInfo::Float(f32::from_bits(r.read_u4()?)),
            5 => {
                let high = r.read_u4()? as u64;
                let low = r.read_u4()? as u64;
                CpInfo::Long(((high << 32) | low) as i64)
            }
            6 => {
                let high = r.read_u4()? as u64;
                let low = r.read_u4()? as u64;
                CpInfo::Double(f64::from_bits((high << 32) | low))
            }
            7 => CpInfo::Class { name_index: r.read_u2()? },
            8 => CpInfo::String { string_index: r.read_u2()? },
            9 => CpInfo::Fieldref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            10 => CpInfo::Methodref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            11 => CpInfo::InterfaceMethodref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            12 => CpInfo::NameAndType { name_index: r.read_u2()?, descriptor_index: r.read_u2()? },
            15 => CpInfo::MethodHandle { reference_kind: r.read_u1()?, reference_index: r.read_u2()? },
            16 => CpInfo::MethodType { descriptor_index: r.read_u2()? },
            17 => CpInfo::Dynamic { bootstrap_method_attr_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            18 => CpInfo::InvokeDynamic { bootstrap_method_attr_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            19 => CpInfo::Module { name_index: r.read_u2()? },
            20 => CpInfo::Package { name_index: r.read_u2()? },
            _ => return Err(ClassFileError::InvalidConstantPoolTag(tag)),
        };

        let wide = entry.is_wide();
        entries.push(Some(entry));
        if wide {
            entries.push(None);
            i += 2;
        } else {
            i += 1;
        }
    }

    Ok(ConstantPool { entries })
}

fn write_constant(w: &mut Writer, entry: &CpInfo) -> Result<(), ClassFileError> {
    w.u1(entry.tag());
    match entry {
        CpInfo::Utf8(value) => {
            let bytes = value.as_bytes();
            w.count(bytes.len(), "utf8 bytes")?;
            w.out.extend_from_slice(bytes);
        }
        CpInfo::Integer(v) => w.u4(*v as u32),
        CpInfo::Float(v) => w.u4(v.to_bits()),
        CpInfo::Long(v) => {
            let v = *v as u64;
            w.u4((v >> 32) as u32);
            w.u4(v as u32);
        }
        CpInfo::Double(v) => {
            let v = v.to_bits();
            w.u4((v >> 32) as u32);
            w.u4(v as u32);
        }
        CpInfo::Class { name_index } => w.u2(*name_index),
        CpInfo::String { string_index } => w.u2(*string_index),
        CpInfo::Fieldref { class_index, name_and_type_index }
        | CpInfo::Methodref { class_index, name_and_type_index }
        | CpInfo::InterfaceMethodref { class_index, name_and_type_index } => {
            w.u2(*class_index);
            w.u2(*name_and_type_index);
        }
        CpInfo::NameAndType { name_index, descriptor_index } => {
            w.u2(*name_index);
            w.u2(*descriptor_index);
        }
        CpInfo::MethodHandle { reference_kind, reference_index } => {
            w.u1(*reference_kind);
            w.u2(*reference_index);
        }
        CpInfo::MethodType { descriptor_index } => w.u2(*descriptor_index),
        CpInfo::Dynamic { bootstrap_method_attr_index, name_and_type_index }
        | CpInfo::InvokeDynamic { bootstrap_method_attr_index, name_and_type_index } => {
            w.u2(*bootstrap_method_attr_index);
            w.u2(*name_and_type_index);
        }
        CpInfo::Module { name_index } | CpInfo::Package { name_index } => w.u2(*name_index),
    }
    Ok(())
}

fn parse_members(r: &mut Reader) -> Result<Vec<MemberInfo>, ClassFileError> {
    let count = r.read_u2()? as usize;
    let mut members = Vec::with_capacity(count);
    for _ in 0..count {
        let access_flags = r.read_u2()?;
        let name_index = r.read_u2()?;
        let descriptor_index = r.read_u2()?;
        let attributes = parse_attributes(r)?;
        members.push(MemberInfo { access_flags, name_index, descriptor_index, attributes });
    }
    Ok(members)
}

fn parse_attributes(r: &mut Reader) -> Result<Vec<RawAttribute>, ClassFileError> {
    let count = r.read_u2()? as usize;
    let mut attrs = Vec::with_capacity(count);
    for _ in 0..count {
        let name_index = r.read_u2()?;
        let length = r.read_u4()? as usize;
        let info = r.read_bytes(length)?.to_vec();
        attrs.push(RawAttribute { name_index, info });
    }
    Ok(attrs)
}

/// Decodes the JVM's modified UTF-8 (`C0 80` for NUL, surrogate pairs for
/// supplementary characters). Unpaired surrogates are an error here; see
/// [`Utf8Constant`] for the lossless form.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, ClassFileError> {
    let units = decode_utf16_units(bytes)?;
    String::from_utf16(&units).map_err(|_| ClassFileError::InvalidUtf8)
}

fn decode_utf16_units(bytes: &[u8]) -> Result<Vec<u16>, ClassFileError> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i];
        if b0 & 0x80 == 0 {
            if b0 == 0 {
                return Err(ClassFileError::InvalidUtf8);
            }
            units.push(b0 as u16);
            i += 1;
        } else if b0 & 0xE0 == 0xC0 {
            let b1 = *bytes.get(i + 1).ok_or(ClassFileError::InvalidUtf8)?;
            if b1 & 0xC0 != 0x80 {
                return Err(ClassFileError::InvalidUtf8);
            }
            units.push((((b0 & 0x1F) as u16) << 6) | (b1 & 0x3F) as u16);
            i += 2;
        } else if b0 & 0xF0 == 0xE0 {
            let b1 = *bytes.get(i + 1).ok_or(ClassFileError::InvalidUtf8)?;
            let b2 = *bytes.get(i + 2).ok_or(ClassFileError::InvalidUtf8)?;
            if b1 & 0xC0 != 0x80 || b2 & 0xC0 != 0x80 {
                return Err(ClassFileError::InvalidUtf8);
            }
            units.push((((b0 & 0x0F) as u16) << 12) | (((b1 & 0x3F) as u16) << 6) | (b2 & 0x3F) as u16);
            i += 3;
        } else {
            return Err(ClassFileError::InvalidUtf8);
        }
    }
    Ok(units)
}

pub fn encode_modified_utf8(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}
