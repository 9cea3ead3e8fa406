//! mindgraph CLI: periodic mind agents over a shared knowledge hypergraph.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use mindgraph::config::MindConfig;
use mindgraph::export;
use mindgraph::handle::Handle;
use mindgraph::store::{DurableImage, KnowledgeStore};

#[derive(Parser)]
#[command(name = "mindgraph", version, about = "Periodic mind agents over a shared knowledge hypergraph")]
struct Cli {
    /// Data directory for the persistent store image.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new data directory.
    Init,

    /// Ingest atoms from a JSON file (the `export` format).
    Ingest {
        /// Path to JSON file with atom records.
        #[arg(long)]
        file: PathBuf,
    },

    /// Run the configured agents for a number of ticks.
    Run {
        /// TOML configuration file.
        #[arg(long)]
        config: PathBuf,

        /// Number of ticks to run.
        #[arg(long, default_value = "1")]
        ticks: u64,
    },

    /// Show store statistics.
    Info,

    /// Export all atoms as JSON.
    Export,

    /// Retract an atom (and every link pointing at it).
    Retract {
        /// Handle, e.g. `h:3.1`.
        handle: String,
    },

    /// Tick the configured agents on a timer until Ctrl+C.
    #[cfg(feature = "daemon")]
    Serve {
        /// TOML configuration file.
        #[arg(long)]
        config: PathBuf,
    },
}

const DEFAULT_DATA_DIR: &str = ".mindgraph";

fn data_dir(cli: Option<PathBuf>, config: Option<&MindConfig>) -> PathBuf {
    cli.or_else(|| config.and_then(|c| c.store.data_dir.clone()))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

fn open_store(dir: &Path) -> Result<(DurableImage, KnowledgeStore)> {
    let image = DurableImage::open(dir).into_diagnostic()?;
    let store = image.load_or_new().into_diagnostic()?;
    Ok((image, store))
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            let dir = data_dir(cli.data_dir, None);
            let (image, store) = open_store(&dir)?;
            image.save(&store).into_diagnostic()?;
            println!("Initialized mindgraph at {}", dir.display());
            println!("{}", store.stats().into_diagnostic()?);
        }

        Commands::Ingest { file } => {
            let dir = data_dir(cli.data_dir, None);
            let (image, store) = open_store(&dir)?;
            let content = std::fs::read_to_string(&file).into_diagnostic()?;
            let before = store.len().into_diagnostic()?;
            let handles = export::import_json(&store, &content).into_diagnostic()?;
            image.save(&store).into_diagnostic()?;
            println!(
                "Ingested {} records ({} new atoms) from {}",
                handles.len(),
                store.len().into_diagnostic()? - before,
                file.display()
            );
            println!("{}", store.stats().into_diagnostic()?);
        }

        Commands::Run { config, ticks } => {
            let config = MindConfig::load(&config).into_diagnostic()?;
            let dir = data_dir(cli.data_dir, Some(&config));
            let (image, store) = open_store(&dir)?;
            let (scheduler, _) = config.build_scheduler(Arc::new(store))?;

            for report in scheduler.run_ticks(ticks).into_diagnostic()? {
                println!(
                    "tick {}: {} runs, {} asserted, {} failed",
                    report.tick,
                    report.runs.len(),
                    report.asserted(),
                    report.failures()
                );
            }
            image.save(scheduler.store()).into_diagnostic()?;

            println!("\nAgents:");
            for status in scheduler.agents().into_diagnostic()? {
                println!("  {status}");
            }
            println!("\n{}", scheduler.store().stats().into_diagnostic()?);
        }

        Commands::Info => {
            let (image, store) = open_store(&data_dir(cli.data_dir, None))?;
            println!("image: {}", image.path().display());
            println!("{}", store.stats().into_diagnostic()?);
        }

        Commands::Export => {
            let (_, store) = open_store(&data_dir(cli.data_dir, None))?;
            println!("{}", export::export_json(&store).into_diagnostic()?);
        }

        Commands::Retract { handle } => {
            let handle: Handle = handle.parse().map_err(|e: String| miette::miette!(e))?;
            let (image, store) = open_store(&data_dir(cli.data_dir, None))?;
            let before = store.len().into_diagnostic()?;
            store.retract(handle).into_diagnostic()?;
            image.save(&store).into_diagnostic()?;
            println!("Retracted {handle} ({} atoms removed)", before - store.len().into_diagnostic()?);
        }

        #[cfg(feature = "daemon")]
        Commands::Serve { config } => {
            use mindgraph::scheduler::daemon::{DaemonConfig, SchedulerDaemon};

            let config = MindConfig::load(&config).into_diagnostic()?;
            let dir = data_dir(cli.data_dir, Some(&config));
            let (image, store) = open_store(&dir)?;
            let (scheduler, _) = config.build_scheduler(Arc::new(store))?;
            let daemon = SchedulerDaemon::new(
                Arc::new(scheduler),
                Some(image),
                DaemonConfig {
                    tick_interval: std::time::Duration::from_millis(
                        config.scheduler.tick_interval_ms.max(1),
                    ),
                    ..DaemonConfig::default()
                },
            );
            let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
            rt.block_on(daemon.run())?;
        }
    }

    Ok(())
}
