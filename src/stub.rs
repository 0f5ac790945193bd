use rust_asm::insn::{Insn, LdcValue, MemberRef};
use rust_asm::opcodes;

use crate::classfile::{
    self, ACC_ABSTRACT, ACC_NATIVE, ACC_STATIC, ClassNode, CodeAttribute, CpInfo,
};
use crate::descriptor::{ReturnKind, method_return_kind, parameter_slots};
use crate::engine::{Change, ClassContext, ClassPass, PassMetadata};
use crate::error::{ClassFileError, DesugarError};

const METHOD_HANDLE: &str = "java/lang/invoke/MethodHandle";
const VAR_HANDLE: &str = "java/lang/invoke/VarHandle";
const INSTANCE_INIT: &str = "<init>";

/// Replaces method bodies that depend on `java.lang.invoke` machinery with
/// default-value stubs, for classes named by the skip list.
///
/// Constructors keep the one thing the verifier insists on: they call the
/// superclass's no-argument constructor before returning.
pub(crate) struct MethodHandleStubPass;

impl ClassPass for MethodHandleStubPass {
    fn metadata(&self) -> PassMetadata {
        PassMetadata {
            id: "METHOD_HANDLE_STUB",
            description: "Stub method bodies that use invokedynamic or method handles",
        }
    }

    fn apply(
        &self,
        class: &mut ClassNode,
        context: &ClassContext<'_>,
    ) -> Result<Vec<Change>, DesugarError> {
        if !context.skip_list.matches(&class.name) {
            return Ok(Vec::new());
        }

        let mut changes = Vec::new();
        for index in 0..class.methods.len() {
            let method = &class.methods[index];
            if method.access_flags & (ACC_ABSTRACT | ACC_NATIVE) != 0 {
                continue;
            }
            let Some(code) = &method.code else {
                continue;
            };
            let uses_handles = contains_method_handle_instruction(code, &class.constant_pool)
                .map_err(|err| context.malformed(err))?;
            if !uses_handles {
                continue;
            }

            let name = method.name.clone();
            let descriptor = method.descriptor.clone();
            let is_static = method.access_flags & ACC_STATIC != 0;
            let stub_error = |reason: String| DesugarError::StubGeneration {
                class: class.name.clone(),
                method: name.clone(),
                descriptor: descriptor.clone(),
                reason,
            };
            let body = if name == INSTANCE_INIT && class.super_class != 0 {
                let super_init = classfile::ensure_method_ref(
                    &mut class.constant_pool,
                    class.super_class,
                    INSTANCE_INIT,
                    "()V",
                )
                .map_err(|err| context.malformed(err))?;
                constructor_stub(&descriptor, super_init)
            } else {
                build_stub(&descriptor, is_static)
            }
            .map_err(|err| stub_error(format!("{err:#}")))?;

            if let Some(code) = class.methods[index].code.as_mut() {
                body.install(code);
            }
            changes.push(Change::StubbedMethod { name, descriptor });
        }
        Ok(changes)
    }
}

/// Whether a method body calls through `invokedynamic`, invokes a method or
/// var handle, or loads a handle-shaped constant.
pub(crate) fn contains_method_handle_instruction(
    code: &CodeAttribute,
    constant_pool: &[CpInfo],
) -> Result<bool, ClassFileError> {
    for instruction in &code.instructions {
        let found = match instruction {
            Insn::InvokeDynamic(_) => true,
            Insn::Method(node) if node.insn.opcode == opcodes::INVOKEVIRTUAL => {
                match &node.method_ref {
                    MemberRef::Index(index) => {
                        is_handle_class(&classfile::member_ref(constant_pool, *index)?.owner)
                    }
                    MemberRef::Symbolic { owner, .. } => is_handle_class(owner),
                }
            }
            Insn::Ldc(node) => match &node.value {
                LdcValue::Index(index) => matches!(
                    constant_pool.get(*index as usize),
                    Some(
                        CpInfo::MethodHandle { .. }
                            | CpInfo::MethodType { .. }
                            | CpInfo::Dynamic { .. }
                    )
                ),
                _ => false,
            },
            _ => false,
        };
        if found {
            return Ok(true);
        }
    }
    Ok(false)
}

fn is_handle_class(owner: &str) -> bool {
    owner == METHOD_HANDLE || owner == VAR_HANDLE
}

/// Replacement body for a stubbed method.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct StubBody {
    pub(crate) code: Vec<u8>,
    pub(crate) max_stack: u16,
    pub(crate) max_locals: u16,
}

impl StubBody {
    /// Swaps the body in. Exception handlers and nested attributes such as
    /// line numbers and frames describe the old body and are dropped.
    fn install(self, code: &mut CodeAttribute) {
        code.max_stack = self.max_stack;
        code.max_locals = self.max_locals;
        code.code = self.code;
        code.instructions.clear();
        code.insn_nodes.clear();
        code.exception_table.clear();
        code.try_catch_blocks.clear();
        code.attributes.clear();
    }
}

/// Minimal body returning the default value for the descriptor's return type.
pub(crate) fn build_stub(descriptor: &str, is_static: bool) -> anyhow::Result<StubBody> {
    let (code, max_stack) = match method_return_kind(descriptor)? {
        ReturnKind::Void => (vec![opcodes::RETURN], 0),
        ReturnKind::Int => (vec![opcodes::ICONST_0, opcodes::IRETURN], 1),
        ReturnKind::Long => (vec![opcodes::LCONST_0, opcodes::LRETURN], 2),
        ReturnKind::Float => (vec![opcodes::FCONST_0, opcodes::FRETURN], 1),
        ReturnKind::Double => (vec![opcodes::DCONST_0, opcodes::DRETURN], 2),
        ReturnKind::Reference => (vec![opcodes::ACONST_NULL, opcodes::ARETURN], 1),
    };
    let receiver = if is_static { 0 } else { 1 };
    Ok(StubBody {
        code,
        max_stack,
        max_locals: parameter_slots(descriptor)? + receiver,
    })
}

/// `aload_0; invokespecial <super_init>; return`.
///
/// The superclass must have an accessible no-argument constructor for the
/// stub to link when it runs.
pub(crate) fn constructor_stub(descriptor: &str, super_init: u16) -> anyhow::Result<StubBody> {
    let [high, low] = super_init.to_be_bytes();
    Ok(StubBody {
        code: vec![
            opcodes::ALOAD_0,
            opcodes::INVOKESPECIAL,
            high,
            low,
            opcodes::RETURN,
        ],
        max_stack: 1,
        max_locals: parameter_slots(descriptor)? + 1,
    })
}

/// Whether a body has the shape of a generated stub.
pub(crate) fn is_stub_body(code: &[u8]) -> bool {
    match code {
        [opcodes::RETURN] => true,
        [value, ret] => matches!(
            (*value, *ret),
            (opcodes::ICONST_0, opcodes::IRETURN)
                | (opcodes::LCONST_0, opcodes::LRETURN)
                | (opcodes::FCONST_0, opcodes::FRETURN)
                | (opcodes::DCONST_0, opcodes::DRETURN)
                | (opcodes::ACONST_NULL, opcodes::ARETURN)
        ),
        [opcodes::ALOAD_0, opcodes::INVOKESPECIAL, _, _, opcodes::RETURN] => true,
        _ => false,
    }
}
