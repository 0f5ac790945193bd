use std::str::FromStr;

use anyhow::{Context, Result};
use jdescriptor::{MethodDescriptor, TypeDescriptor};

/// Return kind of a JVM method descriptor, split by the return opcode it needs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ReturnKind {
    Void,
    Int,
    Long,
    Float,
    Double,
    Reference,
}

/// Determine the return kind from a JVM method descriptor.
pub(crate) fn method_return_kind(descriptor: &str) -> Result<ReturnKind> {
    let descriptor =
        MethodDescriptor::from_str(descriptor).context("parse method descriptor")?;
    let kind = match descriptor.return_type() {
        TypeDescriptor::Void => ReturnKind::Void,
        TypeDescriptor::Object(_) | TypeDescriptor::Array(_, _) => ReturnKind::Reference,
        TypeDescriptor::Long => ReturnKind::Long,
        TypeDescriptor::Float => ReturnKind::Float,
        TypeDescriptor::Double => ReturnKind::Double,
        _ => ReturnKind::Int,
    };
    Ok(kind)
}

/// Local variable slots taken by the parameters of a JVM method descriptor.
pub(crate) fn parameter_slots(descriptor: &str) -> Result<u16> {
    let descriptor =
        MethodDescriptor::from_str(descriptor).context("parse method descriptor")?;
    let slots = descriptor
        .parameter_types()
        .iter()
        .map(|ty| match ty {
            TypeDescriptor::Long | TypeDescriptor::Double => 2u16,
            _ => 1,
        })
        .sum();
    Ok(slots)
}
