use std::{
    env, fs,
    path::{Path, PathBuf},
    process, thread,
};

use anyhow::{Context, bail};
use vrm_import::{
    ImportSettings, import_vrm,
    report::{ImportSummary, write_import_report},
    settings::{load_import_settings, load_rig_convention},
};

const USAGE: &str =
    "Usage: vrm-import [--settings <settings.json>] [--rig <rig.json>] [--report <report.json>] <input.vrm>...";

#[derive(Debug, Default)]
struct Args {
    settings: Option<PathBuf>,
    rig: Option<PathBuf>,
    report: Option<PathBuf>,
    inputs: Vec<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match run() {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(err) => {
            eprintln!("{err:#}");
            process::exit(2);
        }
    }
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args::default();
    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        let slot = match arg.as_str() {
            "--settings" => &mut args.settings,
            "--rig" => &mut args.rig,
            "--report" => &mut args.report,
            "-h" | "--help" => {
                println!("{USAGE}");
                process::exit(0);
            }
            flag if flag.starts_with("--") => bail!("unknown option {flag}\n{USAGE}"),
            _ => {
                args.inputs.push(PathBuf::from(&arg));
                continue;
            }
        };
        let value = iter
            .next()
            .with_context(|| format!("{arg} expects a path\n{USAGE}"))?;
        *slot = Some(PathBuf::from(value));
    }
    if args.inputs.is_empty() {
        bail!("{USAGE}");
    }
    Ok(args)
}

/// Returns `Ok(false)` when at least one input failed to import.
fn run() -> anyhow::Result<bool> {
    let args = parse_args()?;

    let mut settings = match &args.settings {
        Some(path) => load_import_settings(path)?,
        None => ImportSettings::default(),
    };
    if let Some(path) = &args.rig {
        settings.rig = load_rig_convention(path)?;
    }

    let settings = &settings;
    let summaries: Vec<ImportSummary> = thread::scope(|scope| {
        let workers: Vec<_> = args
            .inputs
            .iter()
            .map(|path| scope.spawn(move || import_file(path, settings)))
            .collect();
        workers
            .into_iter()
            .zip(&args.inputs)
            .map(|(worker, path)| match worker.join() {
                Ok(summary) => summary,
                Err(_) => {
                    ImportSummary::unreadable(path.display().to_string(), "import worker panicked")
                }
            })
            .collect()
    });

    for summary in &summaries {
        print_summary(summary);
    }

    if let Some(path) = &args.report {
        write_import_report(path, &summaries)?;
    }

    Ok(summaries.iter().all(ImportSummary::succeeded))
}

/// A file that cannot be read becomes a failed summary so the rest of the
/// batch still runs.
fn import_file(path: &Path, settings: &ImportSettings) -> ImportSummary {
    let source = path.display().to_string();
    let bytes = match fs::read(path)
        .with_context(|| format!("failed to read input file: {}", path.display()))
    {
        Ok(bytes) => bytes,
        Err(err) => {
            log::error!("{err:#}");
            return ImportSummary::unreadable(source, format!("{err:#}"));
        }
    };
    match import_vrm(&bytes, settings) {
        Ok(outcome) => ImportSummary::from_outcome(source, &outcome),
        Err(failure) => {
            log::error!("{}: {failure}", path.display());
            ImportSummary::from_failure(source, &failure)
        }
    }
}

fn print_summary(summary: &ImportSummary) {
    println!("== {}", summary.source);
    if let Some(message) = &summary.read_error {
        println!("Unreadable: {message}");
        return;
    }
    if let Some(kind) = summary.error {
        println!("Failed: {kind:?}");
        for entry in &summary.diagnostics {
            println!("  [{}] {}: {}", entry.code, entry.entity, entry.message);
        }
        return;
    }
    println!(
        "Model: {} ({})",
        summary.model_name.as_deref().unwrap_or("<unnamed>"),
        summary.vrm_version
    );
    if !summary.authors.is_empty() {
        println!("Authors: {}", summary.authors.join(", "));
    }
    println!(
        "Nodes: {}, Meshes: {} ({} vertices, {} triangles)",
        summary.node_count, summary.mesh_count, summary.vertex_count, summary.triangle_count
    );
    println!(
        "Materials: {}, Textures: {}",
        summary.material_count, summary.texture_count
    );
    println!(
        "Mapped bones: {} ({} retargeted)",
        summary.mapped_bones.len(),
        summary
            .mapped_bones
            .iter()
            .filter(|bone| bone.retargeted)
            .count()
    );
    println!(
        "Clips: {}, Tracks: {}",
        summary.clip_count, summary.track_count
    );
    println!("Warnings: {}", summary.warning_count);
}
