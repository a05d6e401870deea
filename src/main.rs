use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};

use diachronic::archive::Archive;
use diachronic::conf::{Conf, SampleMode};
use diachronic::orchestrator::Orchestrator;
use diachronic::pipeline;
use diachronic::source::HttpDumpSource;
use diachronic::store::FsStore;

#[derive(Parser)]
#[command(name = "diachronic", about = "Longitudinal sampling of MediaWiki history dumps")]
struct Cli {
    /// Path to a config file; DIACHRONIC_* env vars override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download, convert and publish every pending archive
    Run {
        /// Re-run archives whose artifact already exists
        #[arg(long)]
        overwrite: bool,
    },
    /// Show what a run would do without downloading anything
    Plan,
    /// Convert one already-downloaded archive in place
    Convert {
        /// Local `.7z` or `.xml` dump file
        file: PathBuf,
        /// Project name used in the artifact path
        #[arg(short, long, default_value = "local")]
        project: String,
        /// full-text or delta
        #[arg(short, long)]
        mode: Option<SampleMode>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut conf = Conf::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Run { overwrite } => {
            conf.overwrite = overwrite || conf.overwrite;
            let orchestrator = build_orchestrator(conf)?;
            let report = orchestrator.run().await?;
            println!(
                "Done: {} converted, {} failed, {} already present.",
                report.succeeded,
                report.failures.len(),
                report.skipped
            );
            for failure in &report.failures {
                println!("  {} [{}]: {}", failure.archive, failure.category, failure.message);
            }
            Ok(())
        }
        Commands::Plan => {
            let orchestrator = build_orchestrator(conf)?;
            let (to_run, skipped) = orchestrator.plan().await?;
            if to_run.is_empty() {
                println!("Nothing to do; {} artifacts already present.", skipped.len());
                return Ok(());
            }
            println!("{} archives pending, {} already present:", to_run.len(), skipped.len());
            for archive in &to_run {
                println!("  {}", archive.file_name);
            }
            Ok(())
        }
        Commands::Convert { file, project, mode } => {
            if let Some(mode) = mode {
                conf.mode = mode;
            }
            let file_name = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow::anyhow!("not a file: {}", file.display()))?
                .to_string();
            // Point staging at the file where it already sits; the artifact
            // lands next to it.
            let dir = file.parent().unwrap_or_else(|| std::path::Path::new("."));
            conf.input_path = dir.to_path_buf();
            conf.output_path = dir.to_path_buf();
            let archive = Archive::new(&conf, &project, &file_name);

            let rows = tokio::task::spawn_blocking(move || {
                pipeline::convert_archive(&archive, &conf)
            })
            .await??;
            println!("Wrote {} rows.", rows);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn build_orchestrator(conf: Conf) -> anyhow::Result<Orchestrator> {
    let source = Arc::new(HttpDumpSource::new(&conf)?);
    let store = Arc::new(FsStore::new(&conf.bucket));
    Ok(Orchestrator::new(conf, source, store))
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
