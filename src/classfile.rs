//! Class-file access over `rust-asm`'s node model.
//!
//! Decoding and encoding are delegated to the crate. This module adds the
//! constant-pool lookups and insertions the passes share, plus the nest
//! attributes the crate surfaces only as raw `Unknown` payloads.

use rust_asm::class_reader::ClassReader;
use rust_asm::class_writer::ClassWriter;

use crate::error::ClassFileError;

pub(crate) use rust_asm::class_reader::{AttributeInfo, CodeAttribute, CpInfo};
pub(crate) use rust_asm::nodes::ClassNode;

pub(crate) const ACC_PUBLIC: u16 = 0x0001;
pub(crate) const ACC_PRIVATE: u16 = 0x0002;
pub(crate) const ACC_STATIC: u16 = 0x0008;
pub(crate) const ACC_FINAL: u16 = 0x0010;
pub(crate) const ACC_NATIVE: u16 = 0x0100;
pub(crate) const ACC_INTERFACE: u16 = 0x0200;
pub(crate) const ACC_ABSTRACT: u16 = 0x0400;

pub(crate) const NEST_HOST: &str = "NestHost";
pub(crate) const NEST_MEMBERS: &str = "NestMembers";

/// Entries a constant pool can hold, counting the unusable slot 0.
const CONSTANT_POOL_LIMIT: usize = u16::MAX as usize;

pub(crate) fn decode(data: &[u8]) -> Result<ClassNode, ClassFileError> {
    ClassReader::new(data)
        .to_class_node()
        .map_err(|err| ClassFileError::Decode(format!("{err:?}")))
}

/// Encodes with the class's own `max_*` values and frames; nothing is recomputed.
pub(crate) fn encode(class: &ClassNode) -> Result<Vec<u8>, ClassFileError> {
    if let Some(index) = unencodable_utf8(&class.constant_pool) {
        return Err(ClassFileError::Encode(format!(
            "constant {index} cannot be written as modified UTF-8"
        )));
    }
    ClassWriter::write_class_node(class, 0)
        .map_err(|err| ClassFileError::Encode(format!("{err:?}")))
}

/// First Utf8 constant holding a NUL or a supplementary character.
///
/// The writer emits standard UTF-8, which agrees with modified UTF-8 only
/// outside those two cases.
fn unencodable_utf8(pool: &[CpInfo]) -> Option<usize> {
    pool.iter().position(|entry| match entry {
        CpInfo::Utf8(value) => value.chars().any(|c| c == '\0' || c as u32 > 0xFFFF),
        _ => false,
    })
}

/// Owner, name and descriptor of a field or method reference.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) struct MemberKey {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

impl MemberKey {
    pub(crate) fn new(owner: &str, name: &str, descriptor: &str) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }
}

fn entry(pool: &[CpInfo], index: u16) -> Result<&CpInfo, ClassFileError> {
    match pool.get(index as usize) {
        Some(CpInfo::Unusable) | None => Err(ClassFileError::InvalidConstantPoolIndex(index)),
        Some(entry) => Ok(entry),
    }
}

pub(crate) fn utf8(pool: &[CpInfo], index: u16) -> Result<&str, ClassFileError> {
    match entry(pool, index)? {
        CpInfo::Utf8(value) => Ok(value),
        _ => Err(ClassFileError::ConstantPoolTypeMismatch {
            index,
            expected: "Utf8",
        }),
    }
}

pub(crate) fn class_name(pool: &[CpInfo], index: u16) -> Result<&str, ClassFileError> {
    match entry(pool, index)? {
        CpInfo::Class { name_index } => utf8(pool, *name_index),
        _ => Err(ClassFileError::ConstantPoolTypeMismatch {
            index,
            expected: "Class",
        }),
    }
}

pub(crate) fn name_and_type(pool: &[CpInfo], index: u16) -> Result<(&str, &str), ClassFileError> {
    match entry(pool, index)? {
        CpInfo::NameAndType {
            name_index,
            descriptor_index,
        } => Ok((utf8(pool, *name_index)?, utf8(pool, *descriptor_index)?)),
        _ => Err(ClassFileError::ConstantPoolTypeMismatch {
            index,
            expected: "NameAndType",
        }),
    }
}

/// Resolves a `Class` index and a `NameAndType` index into a member key.
pub(crate) fn member_key(
    pool: &[CpInfo],
    class_index: u16,
    name_and_type_index: u16,
) -> Result<MemberKey, ClassFileError> {
    let owner = class_name(pool, class_index)?;
    let (name, descriptor) = name_and_type(pool, name_and_type_index)?;
    Ok(MemberKey::new(owner, name, descriptor))
}

/// Resolves a `Fieldref`, `Methodref` or `InterfaceMethodref` entry.
pub(crate) fn member_ref(pool: &[CpInfo], index: u16) -> Result<MemberKey, ClassFileError> {
    match entry(pool, index)? {
        CpInfo::Fieldref {
            class_index,
            name_and_type_index,
        }
        | CpInfo::Methodref {
            class_index,
            name_and_type_index,
        }
        | CpInfo::InterfaceMethodref {
            class_index,
            name_and_type_index,
        } => member_key(pool, *class_index, *name_and_type_index),
        _ => Err(ClassFileError::ConstantPoolTypeMismatch {
            index,
            expected: "member reference",
        }),
    }
}

/// Appends a constant and returns its index.
pub(crate) fn push_constant(pool: &mut Vec<CpInfo>, constant: CpInfo) -> Result<u16, ClassFileError> {
    if pool.len() >= CONSTANT_POOL_LIMIT {
        return Err(ClassFileError::ConstantPoolFull);
    }
    pool.push(constant);
    Ok((pool.len() - 1) as u16)
}

pub(crate) fn ensure_utf8(pool: &mut Vec<CpInfo>, value: &str) -> Result<u16, ClassFileError> {
    let existing = pool
        .iter()
        .position(|entry| matches!(entry, CpInfo::Utf8(current) if current == value));
    match existing {
        Some(index) => Ok(index as u16),
        None => push_constant(pool, CpInfo::Utf8(value.to_string())),
    }
}

pub(crate) fn ensure_name_and_type(
    pool: &mut Vec<CpInfo>,
    name: &str,
    descriptor: &str,
) -> Result<u16, ClassFileError> {
    let name_index = ensure_utf8(pool, name)?;
    let descriptor_index = ensure_utf8(pool, descriptor)?;
    let existing = pool.iter().position(|entry| {
        matches!(
            entry,
            CpInfo::NameAndType { name_index: n, descriptor_index: d }
                if *n == name_index && *d == descriptor_index
        )
    });
    match existing {
        Some(index) => Ok(index as u16),
        None => push_constant(
            pool,
            CpInfo::NameAndType {
                name_index,
                descriptor_index,
            },
        ),
    }
}

/// Finds or adds a `Methodref` on an existing `Class` entry.
pub(crate) fn ensure_method_ref(
    pool: &mut Vec<CpInfo>,
    class_index: u16,
    name: &str,
    descriptor: &str,
) -> Result<u16, ClassFileError> {
    let name_and_type_index = ensure_name_and_type(pool, name, descriptor)?;
    let existing = pool.iter().position(|entry| {
        matches!(
            entry,
            CpInfo::Methodref { class_index: c, name_and_type_index: n }
                if *c == class_index && *n == name_and_type_index
        )
    });
    match existing {
        Some(index) => Ok(index as u16),
        None => push_constant(
            pool,
            CpInfo::Methodref {
                class_index,
                name_and_type_index,
            },
        ),
    }
}

/// Raw payload of the first attribute the crate kept undecoded under `name`.
fn raw_attribute<'a>(attributes: &'a [AttributeInfo], name: &str) -> Option<&'a [u8]> {
    attributes.iter().find_map(|attribute| match attribute {
        AttributeInfo::Unknown { name: current, info } if current == name => {
            Some(info.as_slice())
        }
        _ => None,
    })
}

pub(crate) fn has_attribute(attributes: &[AttributeInfo], name: &str) -> bool {
    raw_attribute(attributes, name).is_some()
}

/// Drops every attribute named `name`, returning how many were removed.
pub(crate) fn remove_attribute(attributes: &mut Vec<AttributeInfo>, name: &str) -> usize {
    let before = attributes.len();
    attributes.retain(
        |attribute| !matches!(attribute, AttributeInfo::Unknown { name: current, .. } if current == name),
    );
    before - attributes.len()
}

fn read_u2(bytes: &[u8], offset: usize) -> Option<u16> {
    let pair = bytes.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([pair[0], pair[1]]))
}

/// Host named by the class's `NestHost` attribute.
pub(crate) fn nest_host(class: &ClassNode) -> Result<Option<String>, ClassFileError> {
    let Some(info) = raw_attribute(&class.attributes, NEST_HOST) else {
        return Ok(None);
    };
    let host = match (info.len(), read_u2(info, 0)) {
        (2, Some(index)) => class_name(&class.constant_pool, index)?,
        _ => return Err(ClassFileError::MalformedAttribute(NEST_HOST)),
    };
    Ok(Some(host.to_string()))
}

/// Members listed by the class's `NestMembers` attribute.
pub(crate) fn nest_members(class: &ClassNode) -> Result<Vec<String>, ClassFileError> {
    let Some(info) = raw_attribute(&class.attributes, NEST_MEMBERS) else {
        return Ok(Vec::new());
    };
    let count = read_u2(info, 0).ok_or(ClassFileError::MalformedAttribute(NEST_MEMBERS))? as usize;
    if info.len() != 2 + 2 * count {
        return Err(ClassFileError::MalformedAttribute(NEST_MEMBERS));
    }
    (0..count)
        .map(|slot| {
            let index = read_u2(info, 2 + 2 * slot)
                .ok_or(ClassFileError::MalformedAttribute(NEST_MEMBERS))?;
            Ok(class_name(&class.constant_pool, index)?.to_string())
        })
        .collect()
}
