use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::archive::{DesugarOptions, RunSummary};
use crate::engine::ClassReport;

/// JSON summary of a desugar run.
#[derive(Debug, Serialize)]
pub(crate) struct RunReport<'a> {
    input: String,
    output: String,
    prefixes: &'a [String],
    counts: Counts,
    duration_ms: u128,
    classes: &'a [ClassReport],
}

#[derive(Debug, Serialize)]
struct Counts {
    entries: usize,
    classes: usize,
    rewritten_classes: usize,
    copied_resources: usize,
}

impl<'a> RunReport<'a> {
    pub(crate) fn new(
        options: &'a DesugarOptions,
        summary: &'a RunSummary,
        duration_ms: u128,
    ) -> Self {
        Self {
            input: options.input.display().to_string(),
            output: options.output.display().to_string(),
            prefixes: options.skip_list.prefixes(),
            counts: Counts {
                entries: summary.entries,
                classes: summary.classes,
                rewritten_classes: summary.rewritten_classes,
                copied_resources: summary.copied_resources,
            },
            duration_ms,
            classes: &summary.class_reports,
        }
    }
}

/// Write the report as pretty JSON; `-` writes to stdout.
pub(crate) fn write_report(report: &RunReport<'_>, path: &Path) -> Result<()> {
    let mut writer: Box<dyn Write> = if path == Path::new("-") {
        Box::new(io::stdout())
    } else {
        Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )
    };
    serde_json::to_writer_pretty(&mut writer, report).context("failed to serialize report")?;
    writer
        .write_all(b"\n")
        .context("failed to write report")?;
    Ok(())
}
