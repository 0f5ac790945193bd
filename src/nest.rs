use tracing::debug;

use crate::classfile::{
    self, ACC_FINAL, ACC_INTERFACE, ACC_PRIVATE, ACC_PUBLIC, ACC_STATIC, AttributeInfo, ClassNode,
    CpInfo, MemberKey, NEST_HOST, NEST_MEMBERS,
};
use crate::engine::{Change, ClassContext, ClassPass, PassMetadata};
use crate::error::{ClassFileError, DesugarError};

const CLASS_INIT: &str = "<clinit>";
const INSTANCE_INIT: &str = "<init>";

/// Replaces nest-based private access with package access so the class loads
/// on runtimes that predate nestmates.
///
/// Members of a nest lose `ACC_PRIVATE`. Private instance methods of a class
/// become `final`, and private interface methods become `public` because
/// interfaces cannot hold package-private methods. A private method whose
/// name and descriptor are shared with a related class in the archive is
/// renamed first, and every reference to it in the nest follows the rename,
/// so the widened method can neither override nor be overridden. The
/// `NestHost` and `NestMembers` attributes are dropped afterwards.
pub(crate) struct NestAccessPass;

impl ClassPass for NestAccessPass {
    fn metadata(&self) -> PassMetadata {
        PassMetadata {
            id: "NEST_ACCESS",
            description: "Widen private nest members and drop nest attributes",
        }
    }

    fn apply(
        &self,
        class: &mut ClassNode,
        context: &ClassContext<'_>,
    ) -> Result<Vec<Change>, DesugarError> {
        let host = classfile::nest_host(class).map_err(|err| context.malformed(err))?;
        let members = classfile::nest_members(class).map_err(|err| context.malformed(err))?;
        if host.is_none() && members.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(host) = host
            && !context.class_index.contains(&host)
        {
            return Err(DesugarError::UnresolvedNestReference {
                class: class.name.clone(),
                host,
            });
        }
        for member in members
            .iter()
            .filter(|member| !context.class_index.contains(member))
        {
            debug!(class = %class.name, member = %member, "nest member not in archive");
        }

        // Fallible edits first; widening cannot fail.
        let mut renames = rename_colliding_methods(class, context)
            .map_err(|err| context.malformed(err))?;
        renames.extend(retarget_references(class, context).map_err(|err| context.malformed(err))?);

        let mut changes = widen_members(class);
        changes.extend(renames);
        for attribute in [NEST_HOST, NEST_MEMBERS] {
            if classfile::remove_attribute(&mut class.attributes, attribute) > 0 {
                changes.push(Change::RemovedAttribute {
                    name: attribute.to_string(),
                });
            }
        }
        Ok(changes)
    }
}

fn widen_members(class: &mut ClassNode) -> Vec<Change> {
    let mut changes = Vec::new();
    for field in &mut class.fields {
        if field.access_flags & ACC_PRIVATE == 0 {
            continue;
        }
        field.access_flags &= !ACC_PRIVATE;
        changes.push(Change::WidenedField {
            name: field.name.clone(),
        });
    }

    let is_interface = class.access_flags & ACC_INTERFACE != 0;
    for method in &mut class.methods {
        if method.access_flags & ACC_PRIVATE == 0 || method.name == CLASS_INIT {
            continue;
        }
        method.access_flags &= !ACC_PRIVATE;
        if is_interface {
            method.access_flags |= ACC_PUBLIC;
        } else if method.access_flags & ACC_STATIC == 0 && method.name != INSTANCE_INIT {
            method.access_flags |= ACC_FINAL;
        }
        changes.push(Change::WidenedMethod {
            name: method.name.clone(),
            descriptor: method.descriptor.clone(),
        });
    }
    changes
}

/// Gives each colliding private method of this class its archive-unique name.
fn rename_colliding_methods(
    class: &mut ClassNode,
    context: &ClassContext<'_>,
) -> Result<Vec<Change>, ClassFileError> {
    let mut changes = Vec::new();
    for method in &mut class.methods {
        let key = MemberKey::new(&class.name, &method.name, &method.descriptor);
        let Some(renamed) = context.class_index.renamed(&key) else {
            continue;
        };
        method.name_index = classfile::ensure_utf8(&mut class.constant_pool, renamed)?;
        let name = std::mem::replace(&mut method.name, renamed.to_string());
        changes.push(Change::RenamedMethod {
            name,
            descriptor: key.descriptor,
            renamed: renamed.to_string(),
        });
    }
    Ok(changes)
}

/// Points method references and `EnclosingMethod` at renamed methods.
fn retarget_references(
    class: &mut ClassNode,
    context: &ClassContext<'_>,
) -> Result<Vec<Change>, ClassFileError> {
    let mut changes = Vec::new();
    let pool_len = class.constant_pool.len();
    for index in 0..pool_len {
        let (class_index, name_and_type_index) = match &class.constant_pool[index] {
            CpInfo::Methodref {
                class_index,
                name_and_type_index,
            }
            | CpInfo::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index),
            _ => continue,
        };
        let key = classfile::member_key(&class.constant_pool, class_index, name_and_type_index)?;
        let Some(renamed) = context.class_index.renamed(&key) else {
            continue;
        };
        let retargeted =
            classfile::ensure_name_and_type(&mut class.constant_pool, renamed, &key.descriptor)?;
        if let CpInfo::Methodref {
            name_and_type_index,
            ..
        }
        | CpInfo::InterfaceMethodref {
            name_and_type_index,
            ..
        } = &mut class.constant_pool[index]
        {
            *name_and_type_index = retargeted;
        }
        changes.push(Change::RetargetedReference {
            owner: key.owner,
            name: key.name,
            descriptor: key.descriptor,
        });
    }

    for attribute in &mut class.attributes {
        let AttributeInfo::EnclosingMethod {
            class_index,
            method_index,
        } = attribute
        else {
            continue;
        };
        if *method_index == 0 {
            continue;
        }
        let key = classfile::member_key(&class.constant_pool, *class_index, *method_index)?;
        let Some(renamed) = context.class_index.renamed(&key) else {
            continue;
        };
        *method_index =
            classfile::ensure_name_and_type(&mut class.constant_pool, renamed, &key.descriptor)?;
        changes.push(Change::RetargetedReference {
            owner: key.owner,
            name: key.name,
            descriptor: key.descriptor,
        });
    }
    Ok(changes)
}
