use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use globset::Glob;
use rayon::prelude::*;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use pdfrecon_core::cache::ReportCache;
use pdfrecon_core::config::ConfigFile;
use pdfrecon_core::model::{FileReport, RiskLevel};
use pdfrecon_core::revisions::extract_revisions_from_file;
use pdfrecon_core::ScanConfig;

const MAX_WALK_DEPTH: usize = 10;
const MAX_BATCH_FILES: usize = 10_000;
const MAX_BATCH_BYTES: u64 = 50 * 1024 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "pdfrecon", about = "Scan PDFs for forensic indicators of alteration")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Scan a PDF file or a folder tree and report findings per file")]
    Scan {
        #[arg(value_name = "PATH")]
        path: PathBuf,
        #[arg(long, default_value = "*.pdf")]
        glob: String,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        jsonl: bool,
        #[arg(long, alias = "seq")]
        sequential: bool,
        #[arg(long)]
        no_cache: bool,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        revision_dir: Option<PathBuf>,
        #[arg(long, default_value_t = 64 * 1024 * 1024)]
        max_stream_size: usize,
    },
    #[command(about = "Extract prior revisions of a PDF without running the indicator scan")]
    Revisions {
        pdf: PathBuf,
        #[arg(short, long, default_value = "Altered_files")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    match args.command {
        Command::Scan {
            path,
            glob,
            json,
            jsonl,
            sequential,
            no_cache,
            config,
            revision_dir,
            max_stream_size,
        } => {
            let mut scan_config = ScanConfig { max_stream_size, ..ScanConfig::default() };
            if let Some(config_path) = config {
                ConfigFile::load(&config_path)?.apply(&mut scan_config);
            }
            if let Some(dir) = revision_dir {
                scan_config.revision_output_dir = dir;
            }
            if path.is_dir() {
                run_scan_batch(&path, &glob, scan_config, json, jsonl, sequential, no_cache)
            } else {
                let report = pdfrecon_detectors::scan(&path, &scan_config)
                    .map_err(|_| anyhow!("scan cancelled"))?;
                emit_report(&report, json || jsonl)?;
                Ok(())
            }
        }
        Command::Revisions { pdf, out } => {
            let out = if out.is_absolute() {
                out
            } else {
                pdf.parent().unwrap_or_else(|| Path::new(".")).join(out)
            };
            let revisions = extract_revisions_from_file(&pdf, &out)?;
            if revisions.is_empty() {
                println!("no prior revisions found");
            }
            for revision in revisions {
                match revision.output_path {
                    Some(path) => println!(
                        "revision {} ({} bytes) -> {}",
                        revision.index,
                        revision.byte_range.end,
                        path.display()
                    ),
                    None => println!("revision {} could not be written", revision.index),
                }
            }
            Ok(())
        }
    }
}

fn run_scan_batch(
    dir: &Path,
    glob: &str,
    config: ScanConfig,
    json: bool,
    jsonl: bool,
    sequential: bool,
    no_cache: bool,
) -> Result<()> {
    let matcher = Glob::new(glob)?.compile_matcher();
    let mut paths = Vec::new();
    let mut total_bytes = 0u64;
    for entry in WalkDir::new(dir)
        .follow_links(false)
        .max_depth(MAX_WALK_DEPTH)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() || !matcher.is_match(entry.path()) {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            total_bytes = total_bytes.saturating_add(meta.len());
            if total_bytes > MAX_BATCH_BYTES {
                return Err(anyhow!("batch size exceeds {} bytes", MAX_BATCH_BYTES));
            }
        }
        paths.push(entry.path().to_path_buf());
        if paths.len() > MAX_BATCH_FILES {
            return Err(anyhow!("batch file count exceeds {}", MAX_BATCH_FILES));
        }
    }
    if paths.is_empty() {
        return Err(anyhow!("no files matched {} in {}", glob, dir.display()));
    }
    paths.sort();

    let cache = (!no_cache).then(|| Arc::new(ReportCache::new()));
    let scan_one = |path: &PathBuf| -> Option<Arc<FileReport>> {
        if let Some(cache) = &cache {
            if let Some(hit) = cache.get(path) {
                return Some(hit);
            }
        }
        match pdfrecon_detectors::scan(path, &config) {
            Ok(report) => {
                let report = Arc::new(report);
                if let Some(cache) = &cache {
                    cache.store(path, report.clone());
                }
                Some(report)
            }
            Err(_) => None,
        }
    };

    let reports: Vec<Arc<FileReport>> = if sequential {
        paths.iter().filter_map(scan_one).collect()
    } else {
        paths.par_iter().filter_map(scan_one).collect()
    };

    for report in &reports {
        emit_report(report, json || jsonl)?;
    }
    if !json && !jsonl {
        let red = reports.iter().filter(|r| r.classification == RiskLevel::Red).count();
        let yellow = reports.iter().filter(|r| r.classification == RiskLevel::Yellow).count();
        let green = reports.iter().filter(|r| r.classification == RiskLevel::Green).count();
        println!("\n{} file(s): {red} red, {yellow} yellow, {green} green", reports.len());
    }
    Ok(())
}

fn emit_report(report: &FileReport, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }
    println!("{}  [{}]", report.path.display(), risk_label(report.classification));
    println!("  md5 {}  size {} bytes", report.md5, report.size);
    for finding in &report.findings {
        println!("  - {:?}: {}", finding.kind, finding.summary);
    }
    for revision in &report.revisions {
        let status = match &revision.status {
            pdfrecon_core::model::RevisionStatus::Valid => "valid".to_string(),
            pdfrecon_core::model::RevisionStatus::VisuallyIdentical => {
                "visually identical".to_string()
            }
            pdfrecon_core::model::RevisionStatus::Corrupt(reason) => {
                format!("corrupt: {reason}")
            }
        };
        match &revision.output_path {
            Some(path) => {
                println!("  revision {} ({status}) -> {}", revision.index, path.display())
            }
            None => println!("  revision {} ({status})", revision.index),
        }
    }
    for event in &report.timeline {
        let stamp = event
            .when
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| format!("unparsed: {}", event.raw));
        println!("  @ {stamp}  {} ({})", event.event, event.source);
    }
    for error in &report.errors {
        println!("  ! {error}");
    }
    Ok(())
}

fn risk_label(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Red => "RED",
        RiskLevel::Yellow => "YELLOW",
        RiskLevel::Green => "GREEN",
    }
}
