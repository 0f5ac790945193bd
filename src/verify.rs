use jclassfile::attributes::Attribute;
use jclassfile::class_file;
use jclassfile::constant_pool::ConstantPool;
use tracing::debug;

use crate::error::DesugarError;
use crate::stub::is_stub_body;

/// Re-reads a rewritten class with `jclassfile`, a parser independent of the
/// one that wrote it, and checks it against the original: same method count,
/// and every stubbed method reduced to a stub body.
///
/// Classes the parser cannot read in their original form are not checked.
pub(crate) fn cross_check(
    class_name: &str,
    original: &[u8],
    rewritten: &[u8],
    stubbed: &[(&str, &str)],
) -> Result<(), DesugarError> {
    let original = match class_file::parse(original) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!(class = %class_name, error = %err, "skipping cross-check");
            return Ok(());
        }
    };
    let fail = |reason: String| DesugarError::Verification {
        class: class_name.to_string(),
        reason,
    };
    let rewritten = class_file::parse(rewritten).map_err(|err| fail(format!("{err}")))?;

    if original.methods().len() != rewritten.methods().len() {
        return Err(fail(format!(
            "method count changed from {} to {}",
            original.methods().len(),
            rewritten.methods().len()
        )));
    }

    let constant_pool = rewritten.constant_pool();
    for method in rewritten.methods() {
        let name = utf8(constant_pool, method.name_index());
        let descriptor = utf8(constant_pool, method.descriptor_index());
        let (Some(name), Some(descriptor)) = (name, descriptor) else {
            return Err(fail("unresolvable method name or descriptor".to_string()));
        };
        if !stubbed.contains(&(name, descriptor)) {
            continue;
        }
        let code = method
            .attributes()
            .iter()
            .find_map(|attribute| match attribute {
                Attribute::Code { code, .. } => Some(code),
                _ => None,
            })
            .ok_or_else(|| fail(format!("stubbed method {name}{descriptor} has no Code")))?;
        if !is_stub_body(code) {
            return Err(fail(format!(
                "stubbed method {name}{descriptor} still carries its original body"
            )));
        }
    }
    Ok(())
}

fn utf8(constant_pool: &[ConstantPool], index: u16) -> Option<&str> {
    match constant_pool.get(index as usize)? {
        ConstantPool::Utf8 { value } => Some(value.as_str()),
        _ => None,
    }
}
