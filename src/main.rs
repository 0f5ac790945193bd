mod archive;
mod classfile;
mod descriptor;
mod engine;
mod error;
mod hierarchy;
mod nest;
mod report;
mod skip_list;
mod stub;
mod telemetry;
#[cfg(test)]
mod test_support;
mod verify;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use opentelemetry::KeyValue;
use tracing::{info, warn};

use crate::archive::{DesugarOptions, desugar_archive};
use crate::report::{RunReport, write_report};
use crate::skip_list::SkipList;
use crate::telemetry::{Telemetry, init_logging, with_span};

/// CLI arguments for a desugar run.
#[derive(Parser, Debug)]
#[command(
    name = "desugar",
    about = "Rewrite the class files of a JAR so nestmate access and dynamic call sites no longer get in the way of analysis.",
    version
)]
struct Cli {
    /// JAR to read.
    #[arg(value_name = "INPUT")]
    input: PathBuf,
    /// JAR to write; replaced atomically.
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,
    /// File of class-name prefixes, one per line, whose method-handle bodies are stubbed.
    #[arg(value_name = "SKIP_LIST")]
    skip_list: Option<PathBuf>,
    /// Directory to create the staging directory in.
    #[arg(long, value_name = "DIR")]
    staging_dir: Option<PathBuf>,
    /// Write a JSON run report to PATH (`-` for stdout).
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
    /// Worker threads for class rewriting.
    #[arg(long, value_name = "N")]
    threads: Option<usize>,
    /// OTLP/HTTP collector endpoint for tracing spans.
    #[arg(long, value_name = "URL")]
    otel: Option<String>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let telemetry = cli.otel.as_deref().map(Telemetry::new).transpose()?;
    let result = run(cli, telemetry.as_ref());
    if let Some(telemetry) = &telemetry
        && let Err(err) = telemetry.shutdown()
    {
        warn!("{err:#}");
    }
    result
}

fn run(cli: Cli, telemetry: Option<&Telemetry>) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("failed to configure worker threads")?;
    }

    let started_at = Instant::now();
    let run_attributes = [
        KeyValue::new("desugar.input", cli.input.display().to_string()),
        KeyValue::new("desugar.output", cli.output.display().to_string()),
    ];
    with_span(telemetry, "desugar", &run_attributes, || -> Result<()> {
        let skip_list = match &cli.skip_list {
            Some(path) => {
                let attributes = [KeyValue::new("desugar.skip_list", path.display().to_string())];
                with_span(telemetry, "skip_list.load", &attributes, || SkipList::load(path))?
            }
            None => SkipList::default(),
        };

        if !cli.quiet {
            println!(
                "Desugaring file {} into file {}",
                cli.input.display(),
                cli.output.display()
            );
            if let Some(path) = &cli.skip_list {
                println!("User-configured skipped file: {}", path.display());
                println!("Methods in classes with the following prefixes will be made empty.");
                for prefix in skip_list.prefixes() {
                    println!("{prefix}");
                }
            }
        }
        info!(
            input = %cli.input.display(),
            output = %cli.output.display(),
            prefixes = skip_list.prefixes().len(),
            "starting desugar"
        );

        let options = DesugarOptions {
            input: cli.input.clone(),
            output: cli.output.clone(),
            skip_list,
            staging_parent: cli.staging_dir.clone(),
        };
        let pending = desugar_archive(&options, telemetry)?;
        let summary = pending.summary();
        let duration_ms = started_at.elapsed().as_millis();
        info!(
            classes = summary.classes,
            rewritten = summary.rewritten_classes,
            resources = summary.copied_resources,
            duration_ms,
            "desugar finished"
        );

        // A report that cannot be written fails the run before the output
        // path is touched.
        if let Some(path) = &cli.report {
            write_report(&RunReport::new(&options, summary, duration_ms), path)?;
        }
        let summary = pending.commit()?;
        if cli.timing && !cli.quiet {
            eprintln!(
                "timing: total_ms={} entries={} classes={} rewritten={}",
                duration_ms, summary.entries, summary.classes, summary.rewritten_classes
            );
        }
        Ok(())
    })
}
