//! Command-line interface for batch archive decompression.
//!
//! Scans a file or directory for archives (including SFX executables),
//! extracts them through the 7z binary and applies the configured layout,
//! success and fail policies.

use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, warn};
use unpack::{
    CancelToken, Config, DecompressPolicy, FailPolicy, Orchestrator, Outcome, SevenZip,
    SuccessPolicy, Summary,
};

#[derive(Parser)]
#[command(name = "unpack")]
#[command(version, about = "Batch-extract archives with layout policies", long_about = None)]
struct Cli {
    /// File or directory to scan for archives
    path: PathBuf,

    /// Output directory for extracted content
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Password for encrypted archives
    #[arg(short, long)]
    password: Option<String>,

    /// Password file, one candidate per line
    #[arg(long)]
    password_file: Option<PathBuf>,

    /// Filename codepage for ZIP archives (e.g. 936)
    #[arg(long)]
    zip_codepage: Option<u32>,

    /// Number of concurrent extraction workers
    #[arg(short = 't', long, default_value = "1")]
    threads: usize,

    /// Layout policy: separate, direct, only-content, content-with-folder
    /// or N-collect
    #[arg(long, default_value = "2-collect")]
    decompress_policy: String,

    /// Source disposition on success: asis, delete or move
    #[arg(long, default_value = "asis")]
    success_policy: String,

    /// Directory for --success-policy move
    #[arg(long)]
    success_to: Option<PathBuf>,

    /// Source disposition on failure: asis or move
    #[arg(long, default_value = "asis")]
    fail_policy: String,

    /// Directory for --fail-policy move
    #[arg(long)]
    fail_to: Option<PathBuf>,

    /// Report planned actions without touching disk
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Verbose logging (debug level)
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Path of the 7z binary
    #[arg(long, default_value = "7z")]
    engine: String,
}

fn build_config(cli: &Cli) -> Result<Config, String> {
    if !cli.path.exists() {
        return Err(format!("path does not exist: {}", cli.path.display()));
    }

    let decompress_policy: DecompressPolicy = cli.decompress_policy.parse()?;

    // move policies take their directory from the dedicated flag
    let success_policy = match cli.success_policy.as_str() {
        "move" => match &cli.success_to {
            Some(dir) => SuccessPolicy::Move(dir.clone()),
            None => return Err("--success-to is required with --success-policy move".into()),
        },
        other => other.parse::<SuccessPolicy>()?,
    };
    let fail_policy = match cli.fail_policy.as_str() {
        "move" => match &cli.fail_to {
            Some(dir) => FailPolicy::Move(dir.clone()),
            None => return Err("--fail-to is required with --fail-policy move".into()),
        },
        other => other.parse::<FailPolicy>()?,
    };

    let mut config = Config::new(&cli.path);
    config.output = cli.output.clone();
    config.password = cli.password.clone();
    config.password_file = cli.password_file.clone();
    config.zip_codepage = cli.zip_codepage;
    config.workers = cli.threads.max(1);
    config.decompress_policy = decompress_policy;
    config.success_policy = success_policy;
    config.fail_policy = fail_policy;
    config.dry_run = cli.dry_run;
    Ok(config)
}

fn print_summary(summary: &Summary, json: bool) {
    if json {
        match serde_json::to_string_pretty(summary) {
            Ok(text) => println!("{text}"),
            Err(e) => error!("could not serialize summary: {e}"),
        }
        return;
    }

    println!();
    println!("==================================================");
    println!("PROCESSING SUMMARY");
    println!("==================================================");
    println!("Total archives:  {}", summary.dispositions.len());
    println!("Succeeded:       {}", summary.succeeded().count());
    println!("Failed:          {}", summary.failed().count());
    println!("Skipped:         {}", summary.skipped().count());

    let failed: Vec<_> = summary.failed().collect();
    if !failed.is_empty() {
        println!("\nFailed archives:");
        for d in failed {
            if let Outcome::Failed { stage, reason } = &d.outcome {
                println!("  - {} ({stage:?}: {reason})", d.archive.display());
            }
        }
    }

    let skipped: Vec<_> = summary.skipped().collect();
    if !skipped.is_empty() {
        println!("\nSkipped archives:");
        for d in skipped {
            if let Outcome::Skipped { reason } = &d.outcome {
                println!("  - {} ({reason})", d.archive.display());
            }
        }
    }

    for d in &summary.dispositions {
        if d.residue {
            warn!(
                archive = %d.archive.display(),
                "residue left after placement"
            );
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for the summary (--json pipes)
    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    let engine = SevenZip::new(&cli.engine);
    if !engine.is_available() {
        eprintln!(
            "Error: {} not found. Please install p7zip or 7-Zip.",
            cli.engine
        );
        process::exit(1);
    }

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            eprintln!("\ninterrupted, terminating in-flight extractions...");
            cancel.cancel();
        }) {
            warn!("could not install interrupt handler: {e}");
        }
    }

    let json = cli.json;
    let orchestrator = Arc::new(Orchestrator::new(config, Arc::new(engine), cancel));

    let progress = indicatif::ProgressBar::new_spinner();
    progress.set_style(
        indicatif::ProgressStyle::with_template("{spinner} {pos} archive(s) done: {msg}")
            .expect("valid template"),
    );

    let result = orchestrator
        .run_with(|disposition| {
            progress.inc(1);
            progress.set_message(disposition.archive.display().to_string());
        })
        .await;
    progress.finish_and_clear();

    match result {
        Ok(summary) => {
            print_summary(&summary, json);
            if summary.failed().count() > 0 {
                process::exit(2);
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
