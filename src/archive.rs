use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use opentelemetry::{Context as OtelContext, KeyValue};
use rayon::prelude::*;
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::engine::{Change, ClassContext, ClassOutcome, ClassReport, VisitorChain};
use crate::error::DesugarError;
use crate::hierarchy::ClassIndex;
use crate::skip_list::SkipList;
use crate::telemetry::{Telemetry, record_unresolved_nest_host, with_class_span, with_span};

const MANIFEST_DIR: &str = "META-INF/";
const MANIFEST: &str = "META-INF/MANIFEST.MF";
/// Upper bound on the buffer reserved from an entry's declared size.
const MAX_PREALLOCATION: u64 = 1 << 20;

/// Inputs of one desugar run.
pub(crate) struct DesugarOptions {
    pub(crate) input: PathBuf,
    pub(crate) output: PathBuf,
    pub(crate) skip_list: SkipList,
    /// Parent directory for the staging directory; the system temp dir when unset.
    pub(crate) staging_parent: Option<PathBuf>,
}

/// Counts and per-class changes of a finished run.
#[derive(Debug, Default)]
pub(crate) struct RunSummary {
    pub(crate) entries: usize,
    pub(crate) classes: usize,
    pub(crate) rewritten_classes: usize,
    pub(crate) copied_resources: usize,
    pub(crate) class_reports: Vec<ClassReport>,
}

/// A fully written jar waiting next to its destination.
///
/// Dropping it without [`PendingArchive::commit`] deletes the jar, so the
/// destination is only ever replaced by a complete run.
pub(crate) struct PendingArchive {
    summary: RunSummary,
    jar: NamedTempFile,
    output: PathBuf,
}

impl PendingArchive {
    pub(crate) fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Renames the jar onto the output path.
    pub(crate) fn commit(self) -> Result<RunSummary, DesugarError> {
        self.jar
            .persist(&self.output)
            .map_err(|err| DesugarError::ArchiveWrite {
                path: self.output.clone(),
                source: ZipError::Io(err.error),
            })?;
        info!(output = %self.output.display(), "wrote archive");
        Ok(self.summary)
    }
}

struct ArchiveEntry {
    name: String,
    data: Vec<u8>,
}

impl ArchiveEntry {
    fn is_class(&self) -> bool {
        self.name.ends_with(".class")
    }
}

enum StagedKind {
    Resource,
    Class { rewritten: bool },
}

struct StagedEntry {
    name: String,
    kind: StagedKind,
    report: Option<ClassReport>,
}

/// Desugars `options.input` into a jar staged beside `options.output`.
///
/// The jar exists only when every entry was processed, and reaches the output
/// path only on [`PendingArchive::commit`]. The staging directory is removed
/// on both success and failure.
pub(crate) fn desugar_archive(
    options: &DesugarOptions,
    telemetry: Option<&Telemetry>,
) -> Result<PendingArchive, DesugarError> {
    let read_attributes = [KeyValue::new(
        "desugar.input",
        options.input.display().to_string(),
    )];
    let entries = with_span(telemetry, "archive.read", &read_attributes, || {
        read_entries(&options.input)
    })?;
    let class_entries: Vec<(&str, &[u8])> = entries
        .iter()
        .filter(|entry| entry.is_class())
        .map(|entry| (entry.name.as_str(), entry.data.as_slice()))
        .collect();
    let class_index = with_span(telemetry, "archive.index", &read_attributes, || {
        ClassIndex::build(&class_entries)
    })?;
    info!(
        input = %options.input.display(),
        entries = entries.len(),
        classes = class_index.len(),
        renamed_methods = class_index.rename_count(),
        "read archive"
    );

    let staging = create_staging_dir(options.staging_parent.as_deref())?;
    let staged = stage_entries(
        &entries,
        &class_index,
        &options.skip_list,
        staging.path(),
        telemetry,
    );
    let staged = match staged {
        Ok(staged) => staged,
        Err(err) => {
            remove_staging_dir(staging);
            return Err(err);
        }
    };

    let write_attributes = [KeyValue::new(
        "desugar.output",
        options.output.display().to_string(),
    )];
    let built = with_span(telemetry, "archive.write", &write_attributes, || {
        build_archive(staging.path(), &staged, &options.output)
    });
    remove_staging_dir(staging);
    let jar = built?;

    let mut summary = RunSummary {
        entries: entries.len(),
        ..RunSummary::default()
    };
    for entry in staged {
        match entry.kind {
            StagedKind::Resource => summary.copied_resources += 1,
            StagedKind::Class { rewritten } => {
                summary.classes += 1;
                if rewritten {
                    summary.rewritten_classes += 1;
                }
            }
        }
        summary.class_reports.extend(entry.report);
    }
    summary
        .class_reports
        .sort_by(|left, right| left.entry.cmp(&right.entry));
    Ok(PendingArchive {
        summary,
        jar,
        output: options.output.clone(),
    })
}

fn read_entries(path: &Path) -> Result<Vec<ArchiveEntry>, DesugarError> {
    let read_error = |source: ZipError| DesugarError::ArchiveRead {
        path: path.to_path_buf(),
        source,
    };
    let file = fs::File::open(path).map_err(|err| read_error(ZipError::Io(err)))?;
    let mut archive = ZipArchive::new(file).map_err(read_error)?;

    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(read_error)?;
        let name = entry.name().to_string();
        if entry.enclosed_name().is_none() {
            return Err(DesugarError::UnsafeEntry {
                path: path.to_path_buf(),
                entry: name,
            });
        }
        // Directories are recreated from file paths when the jar is packed.
        if entry.is_dir() {
            continue;
        }
        if !seen.insert(name.clone()) {
            debug!(entry = %name, "skipping duplicate archive entry");
            continue;
        }
        let mut data = Vec::with_capacity(preallocation(entry.size()));
        entry
            .read_to_end(&mut data)
            .map_err(|err| read_error(ZipError::Io(err)))?;
        entries.push(ArchiveEntry { name, data });
    }
    Ok(entries)
}

/// Buffer size to reserve for an entry; the declared size comes from the
/// archive and is only a hint.
fn preallocation(declared: u64) -> usize {
    usize::try_from(declared.min(MAX_PREALLOCATION)).unwrap_or(0)
}

fn create_staging_dir(parent: Option<&Path>) -> Result<TempDir, DesugarError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("desugar-");
    let staging = match parent {
        Some(parent) => builder.tempdir_in(parent),
        None => builder.tempdir(),
    };
    staging.map_err(|source| DesugarError::StagingWrite {
        path: parent.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir),
        source,
    })
}

fn remove_staging_dir(staging: TempDir) {
    let path = staging.path().to_path_buf();
    if let Err(err) = staging.close() {
        warn!(path = %path.display(), error = %err, "failed to remove staging directory");
    }
}

fn stage_entries(
    entries: &[ArchiveEntry],
    class_index: &ClassIndex,
    skip_list: &SkipList,
    staging_root: &Path,
    telemetry: Option<&Telemetry>,
) -> Result<Vec<StagedEntry>, DesugarError> {
    let chain = VisitorChain::new();
    let transform_attributes = [KeyValue::new("desugar.passes", chain.pass_ids().join(","))];
    with_span(telemetry, "archive.transform", &transform_attributes, || {
        let parent_cx = OtelContext::current();
        entries
            .par_iter()
            .map(|entry| {
                if !entry.is_class() {
                    return stage_resource(entry, staging_root);
                }
                with_class_span(telemetry, &entry.name, &parent_cx, || {
                    let context = ClassContext {
                        entry_name: &entry.name,
                        skip_list,
                        class_index,
                    };
                    stage_class(entry, &chain, &context, staging_root)
                })
            })
            .collect()
    })
}

fn stage_resource(entry: &ArchiveEntry, staging_root: &Path) -> Result<StagedEntry, DesugarError> {
    write_staged(&staging_root.join(&entry.name), &entry.data)?;
    Ok(StagedEntry {
        name: entry.name.clone(),
        kind: StagedKind::Resource,
        report: None,
    })
}

fn stage_class(
    entry: &ArchiveEntry,
    chain: &VisitorChain,
    context: &ClassContext<'_>,
    staging_root: &Path,
) -> Result<StagedEntry, DesugarError> {
    let target = staging_root.join(&entry.name);
    let (rewritten, report) = match chain.desugar(&entry.data, context)? {
        ClassOutcome::Unchanged { report } => {
            write_staged(&target, &entry.data)?;
            (false, report)
        }
        ClassOutcome::Rewritten { bytes, report } => {
            write_staged(&target, &bytes)?;
            (true, Some(report))
        }
    };
    if let Some(report) = &report {
        for change in &report.changes {
            if let Change::UnresolvedNestHost { host } = change {
                record_unresolved_nest_host(&report.class, host);
            }
        }
    }
    Ok(StagedEntry {
        name: entry.name.clone(),
        kind: StagedKind::Class { rewritten },
        report,
    })
}

fn write_staged(target: &Path, data: &[u8]) -> Result<(), DesugarError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|source| staging_error(parent, source))?;
    }
    fs::write(target, data).map_err(|source| staging_error(target, source))
}

fn staging_error(path: &Path, source: io::Error) -> DesugarError {
    DesugarError::StagingWrite {
        path: path.to_path_buf(),
        source,
    }
}

/// Packs the staged tree into a temporary jar in `output`'s directory.
///
/// Entries are sorted with the manifest first and carry fixed timestamps, so
/// the same staged tree always yields the same bytes.
fn build_archive(
    staging_root: &Path,
    staged: &[StagedEntry],
    output: &Path,
) -> Result<NamedTempFile, DesugarError> {
    let write_error = |source: ZipError| DesugarError::ArchiveWrite {
        path: output.to_path_buf(),
        source,
    };
    let output_dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = tempfile::Builder::new()
        .prefix(".desugar-")
        .suffix(".jar")
        .tempfile_in(output_dir)
        .map_err(|err| write_error(ZipError::Io(err)))?;

    let directories: BTreeSet<&str> = staged
        .iter()
        .flat_map(|entry| parent_directories(&entry.name))
        .collect();
    let mut names: Vec<(&str, bool)> = directories
        .into_iter()
        .map(|name| (name, true))
        .chain(staged.iter().map(|entry| (entry.name.as_str(), false)))
        .collect();
    names.sort_by(|(left, _), (right, _)| entry_order(left, right));

    let mut writer = ZipWriter::new(temp.as_file_mut());
    for (name, is_dir) in names {
        if is_dir {
            writer
                .add_directory(name, entry_options(0o755))
                .map_err(write_error)?;
            continue;
        }
        let data = fs::read(staging_root.join(name))
            .map_err(|err| write_error(ZipError::Io(err)))?;
        writer
            .start_file(name, entry_options(0o644))
            .map_err(write_error)?;
        writer
            .write_all(&data)
            .map_err(|err| write_error(ZipError::Io(err)))?;
    }
    writer.finish().map_err(write_error)?;
    Ok(temp)
}

/// `a/b/C.class` yields `a/` and `a/b/`.
fn parent_directories(name: &str) -> impl Iterator<Item = &str> {
    name.match_indices('/').map(move |(index, _)| &name[..=index])
}

fn entry_options(permissions: u32) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(permissions)
}

fn entry_order(left: &str, right: &str) -> std::cmp::Ordering {
    let rank = |name: &str| match name {
        MANIFEST_DIR => 0,
        MANIFEST => 1,
        _ => 2,
    };
    rank(left).cmp(&rank(right)).then_with(|| left.cmp(right))
}
