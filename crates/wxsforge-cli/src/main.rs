use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use wxsforge_core::diagnostics::{Diagnostic, Report};
use wxsforge_core::doc::{load_document, NodeKind};
use wxsforge_core::emit::emit_document_json;
use wxsforge_core::guid::{default_guid_base, GuidAllocator, GuidMode};
use wxsforge_core::ids::IdAllocator;
use wxsforge_core::options::{load_config, OutputType, PathMode};
use wxsforge_core::{build_document, BuildContext, BuildOptions};

#[derive(Parser, Debug)]
#[command(name = "wxsforge")]
#[command(about = "Rewrites an installer document into complete, compilable WiX source.", long_about = None)]
struct Cli {
    /// Tracing filter, e.g. `info` or `wxsforge_core=debug`.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build WiX source from a document JSON file.
    Build(BuildArgs),
    /// Print component GUIDs for the given seeds.
    Guid(GuidArgs),
    /// Print the identifiers generated for a sequence of names.
    Id(IdArgs),
}

#[derive(clap::Args, Debug)]
struct BuildArgs {
    /// Document JSON (`wxsforge.document@0.1.0`).
    #[arg(long)]
    input: PathBuf,
    /// Config file (`wxsforge.config@0.1.0`).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Output `.wxs` path. Writes to stdout when absent.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Also write the rewritten document as JSON.
    #[arg(long)]
    emit_json: Option<PathBuf>,
    /// Write the build report (diagnostics and automatic insertions).
    #[arg(long)]
    report_json: Option<PathBuf>,
    /// If set, fail if `--out` differs; do not write.
    #[arg(long, default_value_t = false, requires = "out")]
    check: bool,
    #[arg(long, value_enum)]
    path_mode: Option<PathModeArg>,
    #[arg(long, value_enum)]
    output_type: Option<OutputTypeArg>,
    #[arg(long, value_enum)]
    guid_mode: Option<GuidModeArg>,
    /// Directory relative `Source` paths are resolved against.
    #[arg(long)]
    source_base_dir: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct GuidArgs {
    /// Seed text, usually a component id. Repeatable.
    #[arg(long = "seed")]
    seeds: Vec<String>,
    /// Allocator base GUID.
    #[arg(long)]
    base: Option<Uuid>,
    #[arg(long, default_value_t = false)]
    sequential: bool,
    /// Number of GUIDs to print in sequential mode when no seed is given.
    #[arg(long, default_value_t = 1)]
    count: usize,
}

#[derive(clap::Args, Debug)]
struct IdArgs {
    /// Element kind, e.g. `Directory`, `File` or `Component`.
    #[arg(long, default_value = "File")]
    kind: String,
    names: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PathModeArg {
    Absolute,
    Relative,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputTypeArg {
    Msi,
    Msm,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GuidModeArg {
    Default,
    Sequential,
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Command::Build(args) => run_build(&args),
        Command::Guid(args) => run_guid(&args),
        Command::Id(args) => run_id(&args),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn build_options(args: &BuildArgs) -> Result<BuildOptions> {
    let mut opts = match &args.config {
        Some(path) => load_config(path)?,
        None => BuildOptions::default(),
    };
    if let Some(mode) = args.path_mode {
        opts.output.path_mode = match mode {
            PathModeArg::Absolute => PathMode::Absolute,
            PathModeArg::Relative => PathMode::Relative,
        };
    }
    if let Some(kind) = args.output_type {
        opts.output.output_type = match kind {
            OutputTypeArg::Msi => OutputType::Msi,
            OutputTypeArg::Msm => OutputType::Msm,
        };
    }
    if let Some(mode) = args.guid_mode {
        opts.guid.mode = match mode {
            GuidModeArg::Default => GuidMode::Default,
            GuidModeArg::Sequential => GuidMode::Sequential,
        };
    }
    if let Some(dir) = &args.source_base_dir {
        opts.output.source_base_dir = Some(dir.clone());
    }
    Ok(opts)
}

fn run_build(args: &BuildArgs) -> Result<ExitCode> {
    let opts = build_options(args)?;
    let doc = load_document(&args.input)?;
    let mut ctx = BuildContext::new(&opts.guid);

    let output = match build_document(doc, &mut ctx, &opts) {
        Ok(output) => output,
        Err(err) => {
            if let Some(path) = &args.report_json {
                let report = Report::ok().with_diagnostics(vec![Diagnostic::from_build_error(&err)]);
                write_json(path, &report)?;
            }
            return Err(err).with_context(|| format!("build {}", args.input.display()));
        }
    };

    if let Some(path) = &args.report_json {
        write_json(path, &output.report)?;
    }
    if let Some(path) = &args.emit_json {
        let json = emit_document_json(&output.document)?;
        write_text(path, &json, args.check)?;
    }
    match &args.out {
        Some(path) => write_text(path, &output.wxs, args.check)?,
        None => print!("{}", output.wxs),
    }
    Ok(ExitCode::SUCCESS)
}

fn run_guid(args: &GuidArgs) -> Result<ExitCode> {
    let mode = if args.sequential {
        GuidMode::Sequential
    } else {
        GuidMode::Default
    };
    let mut guids = GuidAllocator::new(args.base.unwrap_or_else(default_guid_base), mode);
    if args.seeds.is_empty() {
        if mode == GuidMode::Default {
            anyhow::bail!("--seed is required unless --sequential is set");
        }
        for _ in 0..args.count {
            println!("{}", guids.next_guid(""));
        }
    } else {
        for seed in &args.seeds {
            println!("{}", guids.next_guid(seed));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_id(args: &IdArgs) -> Result<ExitCode> {
    let kind = NodeKind::from_name(&args.kind);
    let mut ids = IdAllocator::new();
    for name in &args.names {
        println!("{}", ids.allocate(&kind, name));
    }
    Ok(ExitCode::SUCCESS)
}

fn write_json(path: &Path, value: &impl serde::Serialize) -> Result<()> {
    let mut out = serde_json::to_string_pretty(value).context("serialize JSON")?;
    out.push('\n');
    write_text(path, &out, false)
}

fn write_text(path: &Path, text: &str, check: bool) -> Result<()> {
    if check {
        let cur = std::fs::read_to_string(path)
            .with_context(|| format!("read existing output: {}", path.display()))?;
        if cur != text {
            anyhow::bail!("generated output differs: {}", path.display());
        }
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create output dir: {}", parent.display()))?;
        }
    }
    std::fs::write(path, text.as_bytes())
        .with_context(|| format!("write output: {}", path.display()))?;
    tracing::info!(path = %path.display(), bytes = text.len(), "wrote output");
    Ok(())
}
