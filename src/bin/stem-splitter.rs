use clap::{Parser, Subcommand};
use std::{
    fs,
    path::{Path, PathBuf},
    process,
};
use stem_splitter::{
    copy_stems, io::paths::workspace_root, model::registry::Registry, ort_separator,
    prepare_model, publish_batch, set_download_progress_callback, set_split_progress_callback,
    types::is_supported_input, DevicePreference, ItemStatus, OutputFormat, SeparationRequest,
    SplitProgress, StemLabel, WorkspaceManager,
};
use tracing_subscriber::EnvFilter;

const EXIT_OK: i32 = 0;
const EXIT_FAILED: i32 = 1;

#[derive(Parser)]
#[command(name = "stem-splitter")]
#[command(about = "AI-powered audio stem separation tool", long_about = None)]
#[command(version)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a file, or every supported file in a directory with --batch
    Split {
        #[arg(short, long)]
        input: PathBuf,

        /// Defaults to `<input>_stems` next to the input
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Registry model name; empty uses the registry default
        #[arg(short, long, default_value = "")]
        model: String,

        /// cpu, gpu or auto
        #[arg(short, long, default_value = "auto")]
        device: DevicePreference,

        /// wav, mp3 or flac
        #[arg(short, long, default_value = "wav")]
        format: OutputFormat,

        #[arg(short, long)]
        batch: bool,

        #[arg(long)]
        manifest_url: Option<String>,

        #[arg(short, long)]
        quiet: bool,
    },

    /// Download, verify and load a model
    Prepare {
        #[arg(short, long, default_value = "")]
        model: String,

        #[arg(short, long, default_value = "auto")]
        device: DevicePreference,

        #[arg(long)]
        manifest_url: Option<String>,

        #[arg(short, long)]
        quiet: bool,
    },

    /// List available models
    List,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Split {
            input,
            output,
            model,
            device,
            format,
            batch,
            manifest_url,
            quiet,
        } => {
            let output = output.unwrap_or_else(|| default_output_dir(&input));
            let opts = SplitArgs {
                model,
                device,
                format,
                manifest_url,
                quiet,
            };
            if batch {
                handle_batch(&input, &output, opts)
            } else {
                handle_split(&input, &output, opts).map(|()| EXIT_OK)
            }
        }
        Commands::Prepare {
            model,
            device,
            manifest_url,
            quiet,
        } => handle_prepare(model, device, manifest_url, quiet).map(|()| EXIT_OK),
        Commands::List => handle_list().map(|()| EXIT_OK),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(EXIT_FAILED);
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "stem_splitter=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

struct SplitArgs {
    model: String,
    device: DevicePreference,
    format: OutputFormat,
    manifest_url: Option<String>,
    quiet: bool,
}

fn default_output_dir(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let parent = input.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{stem}_stems"))
}

fn handle_split(input: &Path, output: &Path, args: SplitArgs) -> CliResult<()> {
    if !input.is_file() {
        return Err(format!("Input file not found: {}", input.display()).into());
    }

    if !args.quiet {
        setup_progress_callbacks();
        eprintln!("🎵 Stem Splitter");
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!("Input:  {}", input.display());
        eprintln!("Output: {}", output.display());
        eprintln!("Model:  {}", display_model(&args.model));
        eprintln!("Device: {}", args.device);
        eprintln!("Format: {}", args.format);
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!();
    }

    let separator = ort_separator(args.manifest_url.clone(), None)?;
    let workspaces = WorkspaceManager::new(workspace_root())?;
    let workspace = workspaces.acquire()?;

    let request = SeparationRequest::new(input, args.model.as_str(), args.device, args.format);
    let stems = separator.separate(&request, &workspace.output_dir)?;
    let copied = copy_stems(&stems, output)?;
    workspace.release()?;

    if !args.quiet {
        eprintln!();
        eprintln!("✅ Split completed successfully!");
        eprintln!();
        eprintln!("Output files:");
        for (label, path) in &copied {
            eprintln!("  {} {:<7} {}", stem_icon(*label), format!("{label}:"), path.display());
        }
    } else {
        // Quiet mode: just print paths
        for path in copied.values() {
            println!("{}", path.display());
        }
    }

    Ok(())
}

fn collect_inputs(dir: &Path) -> CliResult<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_supported_input(p))
        .collect();
    files.sort();
    Ok(files)
}

fn handle_batch(input: &Path, output: &Path, args: SplitArgs) -> CliResult<i32> {
    if !input.is_dir() {
        return Err(format!("Batch input must be a directory: {}", input.display()).into());
    }
    let files = collect_inputs(input)?;
    if !args.quiet {
        setup_progress_callbacks();
        eprintln!("🎵 Stem Splitter (batch)");
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!("Input:  {} ({} files)", input.display(), files.len());
        eprintln!("Output: {}", output.display());
        eprintln!("Model:  {}", display_model(&args.model));
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!();
    }

    let separator = ort_separator(args.manifest_url.clone(), None)?;
    let workspaces = WorkspaceManager::new(workspace_root())?;
    let workspace = workspaces.acquire()?;

    let requests: Vec<SeparationRequest> = files
        .iter()
        .map(|f| SeparationRequest::new(f, args.model.as_str(), args.device, args.format))
        .collect();
    let result = separator.separate_batch(&requests, &workspace.output_dir);

    let manifest = publish_batch(&result, &workspace.output_dir, output)?;
    workspace.release()?;

    let manifest_path = manifest.write(output)?;

    if args.quiet {
        for entry in &manifest.entries {
            let status = match entry.status {
                ItemStatus::Success => "success",
                ItemStatus::Failed => "failed",
            };
            println!("{}\t{}", status, entry.input_path.display());
        }
    } else {
        eprintln!();
        for entry in &manifest.entries {
            match &entry.error {
                None => eprintln!("  ✅ {}", entry.input_path.display()),
                Some(e) => eprintln!("  ❌ {}: {}", entry.input_path.display(), e),
            }
        }
        eprintln!();
        eprintln!(
            "{} succeeded, {} failed. Manifest: {}",
            manifest.succeeded,
            manifest.failed,
            manifest_path.display()
        );
    }

    Ok(manifest.outcome.exit_code())
}

fn handle_prepare(
    model: String,
    device: DevicePreference,
    manifest_url: Option<String>,
    quiet: bool,
) -> CliResult<()> {
    if !quiet {
        eprintln!("📦 Preparing model: {}", display_model(&model));
        eprintln!();
        set_download_progress_callback(print_download_progress);
    }

    let device = prepare_model(&model, manifest_url.as_deref(), device)?;

    if !quiet {
        eprintln!("✅ Model prepared successfully on {device}!");
    }

    Ok(())
}

fn handle_list() -> CliResult<()> {
    let registry = Registry::bundled()?;

    eprintln!("📋 Available Models");
    eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for name in registry.names() {
        let marker = if name == registry.default { " (default)" } else { "" };
        eprintln!("  • {}{}", name, marker);
    }
    eprintln!();
    eprintln!("Use --model <name> to specify a model");

    Ok(())
}

fn display_model(model: &str) -> &str {
    if model.trim().is_empty() {
        "(registry default)"
    } else {
        model
    }
}

fn stem_icon(label: StemLabel) -> &'static str {
    match label {
        StemLabel::Vocals => "🎤",
        StemLabel::Drums => "🥁",
        StemLabel::Bass => "🎸",
        StemLabel::Other => "🎹",
    }
}

fn print_download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let percent = (downloaded as f64 / total as f64 * 100.0).round() as u64;
        let downloaded_mb = downloaded as f64 / 1_000_000.0;
        let total_mb = total as f64 / 1_000_000.0;
        eprint!(
            "\r📥 Downloading model: {:>3}% ({:.2} MB / {:.2} MB)",
            percent, downloaded_mb, total_mb
        );
        if downloaded >= total {
            eprintln!();
        }
    } else {
        eprint!("\r📥 Downloading model: {:.2} MB", downloaded as f64 / 1_000_000.0);
    }
}

fn setup_progress_callbacks() {
    set_download_progress_callback(print_download_progress);

    set_split_progress_callback(|progress| match progress {
        SplitProgress::Stage(stage) => {
            let stage_name = match stage {
                "resolve_model" => "Resolving model",
                "engine_preload" => "Loading model",
                "read_audio" => "Reading audio file",
                "infer" => "Processing audio",
                "write_stems" => "Writing stems",
                "finalize" => "Finalizing",
                _ => stage,
            };
            eprintln!("⏳ {}", stage_name);
        }
        SplitProgress::Chunks {
            done,
            total,
            percent,
        } => {
            eprint!("\r🔄 Processing: {}/{} chunks ({:.0}%)", done, total, percent);
            if done >= total {
                eprintln!();
            }
        }
        SplitProgress::Writing {
            stem,
            done,
            total,
            percent,
        } => {
            eprint!("\r💾 Writing {}: {}/{} ({:.0}%)", stem, done, total, percent);
            if done >= total {
                eprintln!();
            }
        }
        SplitProgress::Finished => {}
    });
}
