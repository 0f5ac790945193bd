use serde::Serialize;
use tracing::{debug, warn};

use crate::classfile::{self, ClassNode};
use crate::error::{ClassFileError, DesugarError};
use crate::hierarchy::ClassIndex;
use crate::nest::NestAccessPass;
use crate::skip_list::SkipList;
use crate::stub::MethodHandleStubPass;
use crate::verify::cross_check;

/// Read-only inputs shared by every class transform in a run.
pub(crate) struct ClassContext<'a> {
    pub(crate) entry_name: &'a str,
    pub(crate) skip_list: &'a SkipList,
    pub(crate) class_index: &'a ClassIndex,
}

impl ClassContext<'_> {
    pub(crate) fn malformed(&self, source: ClassFileError) -> DesugarError {
        DesugarError::MalformedClass {
            entry: self.entry_name.to_string(),
            source,
        }
    }
}

/// Metadata describing a class pass.
#[derive(Clone, Debug)]
pub(crate) struct PassMetadata {
    pub(crate) id: &'static str,
    pub(crate) description: &'static str,
}

/// One rewrite over a decoded class.
///
/// A pass that returns an error must leave the class untouched.
pub(crate) trait ClassPass: Send + Sync {
    fn metadata(&self) -> PassMetadata;
    fn apply(
        &self,
        class: &mut ClassNode,
        context: &ClassContext<'_>,
    ) -> Result<Vec<Change>, DesugarError>;
}

/// A single observable edit made to a class.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum Change {
    WidenedField { name: String },
    WidenedMethod { name: String, descriptor: String },
    RenamedMethod {
        name: String,
        descriptor: String,
        renamed: String,
    },
    RetargetedReference {
        owner: String,
        name: String,
        descriptor: String,
    },
    RemovedAttribute { name: String },
    StubbedMethod { name: String, descriptor: String },
    UnresolvedNestHost { host: String },
}

impl Change {
    /// Whether the change alters the encoded class.
    pub(crate) fn rewrites_class(&self) -> bool {
        !matches!(self, Change::UnresolvedNestHost { .. })
    }
}

/// Per-class result of the visitor chain.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct ClassReport {
    pub(crate) class: String,
    pub(crate) entry: String,
    pub(crate) changes: Vec<Change>,
}

pub(crate) enum ClassOutcome {
    /// Nothing changed; the original bytes are kept.
    Unchanged { report: Option<ClassReport> },
    Rewritten { bytes: Vec<u8>, report: ClassReport },
}

/// Fixed-order composition of the class passes over one decode/encode pair.
pub(crate) struct VisitorChain {
    passes: Vec<Box<dyn ClassPass>>,
}

impl VisitorChain {
    pub(crate) fn new() -> Self {
        Self {
            passes: vec![Box::new(NestAccessPass), Box::new(MethodHandleStubPass)],
        }
    }

    pub(crate) fn pass_ids(&self) -> Vec<&'static str> {
        self.passes.iter().map(|pass| pass.metadata().id).collect()
    }

    pub(crate) fn desugar(
        &self,
        data: &[u8],
        context: &ClassContext<'_>,
    ) -> Result<ClassOutcome, DesugarError> {
        let mut class = classfile::decode(data).map_err(|err| context.malformed(err))?;
        let class_name = class.name.clone();

        let mut changes = Vec::new();
        for pass in &self.passes {
            let metadata = pass.metadata();
            match pass.apply(&mut class, context) {
                Ok(pass_changes) => {
                    if !pass_changes.is_empty() {
                        debug!(
                            class = %class_name,
                            pass = metadata.id,
                            changes = pass_changes.len(),
                            "{}",
                            metadata.description
                        );
                    }
                    changes.extend(pass_changes);
                }
                Err(err) if err.is_recoverable() => {
                    warn!(class = %class_name, pass = metadata.id, "{err}; pass skipped");
                    if let DesugarError::UnresolvedNestReference { host, .. } = err {
                        changes.push(Change::UnresolvedNestHost { host });
                    }
                }
                Err(err) => return Err(err),
            }
        }

        let report = ClassReport {
            class: class_name.clone(),
            entry: context.entry_name.to_string(),
            changes,
        };
        if !report.changes.iter().any(Change::rewrites_class) {
            let report = (!report.changes.is_empty()).then_some(report);
            return Ok(ClassOutcome::Unchanged { report });
        }

        let bytes = classfile::encode(&class).map_err(|err| DesugarError::Verification {
            class: class_name.clone(),
            reason: err.to_string(),
        })?;
        let stubbed: Vec<(&str, &str)> = report
            .changes
            .iter()
            .filter_map(|change| match change {
                Change::StubbedMethod { name, descriptor } => {
                    Some((name.as_str(), descriptor.as_str()))
                }
                _ => None,
            })
            .collect();
        cross_check(&class_name, data, &bytes, &stubbed)?;
        Ok(ClassOutcome::Rewritten { bytes, report })
    }
}
