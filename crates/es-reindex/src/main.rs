//! es-reindex CLI
//!
//! Scrolls an Elasticsearch index, runs every document through an optional
//! filter command and bulks the result into another (or the same) index.

// CLI tool - relax pedantic lints for ergonomics
#![allow(clippy::pedantic)]

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use es_reindex::{Dump, Pipeline, ReindexConfig};

#[derive(Parser)]
#[command(name = "es-reindex")]
#[command(version)]
#[command(about = "Reindex Elasticsearch documents through an optional filter command", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "ES_REINDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Dry run mode (build bulk bodies, never send them)
    #[arg(long)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Worker count override
    #[arg(short, long)]
    workers: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reindex from a config file
    Run {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Dump the origin index as JSON lines
    Dump {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate example configuration
    Init {
        /// Output file path
        #[arg(short, long, default_value = "es_reindex.yaml")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        // Keep stdout clean for `dump`.
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Run { config }) => {
            run_reindex(config, &cli).await?;
        }
        Some(Commands::Validate { config }) => {
            init_logging(cli.verbose)?;
            validate_config(config)?;
        }
        Some(Commands::Dump { config, output }) => {
            run_dump(config, output.as_deref(), cli.verbose).await?;
        }
        Some(Commands::Init { output }) => {
            generate_config(output)?;
        }
        None => {
            // Default: run the reindex if config provided
            if let Some(config) = &cli.config {
                run_reindex(config, &cli).await?;
            } else {
                eprintln!("Usage: es-reindex --config <FILE> or es-reindex <COMMAND>");
                eprintln!("Try 'es-reindex --help' for more information.");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_config(config_path: &Path) -> anyhow::Result<ReindexConfig> {
    let config = ReindexConfig::from_file(config_path)?;
    Ok(config)
}

async fn run_reindex(config_path: &Path, cli: &Cli) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    init_logging(cli.verbose || config.options.debug)?;
    info!("Loaded configuration from {:?}", config_path);

    if cli.dry_run {
        config.options.dry_run = true;
    }
    if let Some(workers) = cli.workers {
        config.options.workers = workers;
    }

    let resolved = config.resolve()?;
    let pipeline = Pipeline::connect(resolved).await?;
    let stats = pipeline.run().await?;

    println!("\n✅ Reindex Complete!");
    println!("   Read:      {}/{}", stats.read, stats.total);
    println!("   Skipped:   {}", stats.skipped);
    println!("   Written:   {}", stats.written);
    println!("   Succeeded: {}", stats.succeeded);
    println!("   Failed:    {}", stats.failed);
    println!("   Duration:  {:.2}s", stats.elapsed.as_secs_f64());

    Ok(())
}

async fn run_dump(config_path: &Path, output: Option<&Path>, verbose: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    init_logging(verbose || config.options.debug)?;

    let dump = Dump::connect(config.resolve()?).await?;
    let stats = match output {
        Some(path) => {
            let mut file = tokio::fs::File::create(path).await?;
            dump.run(&mut file).await?
        }
        None => dump.run(&mut tokio::io::stdout()).await?,
    };
    info!("dumped {} records", stats.written);
    Ok(())
}

fn validate_config(config_path: &Path) -> anyhow::Result<()> {
    info!("Validating configuration from {:?}", config_path);

    let config = load_config(config_path)?;
    let resolved = config.resolve()?;

    println!("✅ Configuration is valid!");
    println!("   Origin:      {}", resolved.origin.index_uri());
    println!("   Destination: {}", resolved.destination.index_uri());
    println!("   Same index:  {}", resolved.same_index);
    println!("   Workers:     {}", resolved.options.workers);
    println!(
        "   Filter:      {}",
        resolved.filter_cmd.as_deref().unwrap_or("(none)")
    );

    Ok(())
}

fn generate_config(output: &Path) -> anyhow::Result<()> {
    std::fs::write(output, CONFIG_TEMPLATE)?;
    println!("✅ Generated configuration: {:?}", output);
    println!("   Edit the file and run: es-reindex run --config {:?}", output);
    Ok(())
}

const CONFIG_TEMPLATE: &str = r#"# es-reindex configuration
origin_index:
  host:
    addr: http://127.0.0.1:9200
    # header:
    #   X-Team: search
    # user: elastic
    # password: changeme
  type:
    index: my_index
    type: doc

# Optional; every missing part falls back to origin_index
new_index:
  type:
    index: my_index_v2

scan_query:
  query:
    match_all: {}

scan_time: 120s

# Added to every document that lacks the field
fields_default: {}

# One JSON record per line in, one line out (empty line drops the record).
# A leading '#' disables the command.
# data_fix_cmd: php ./fix.php

options:
  workers: 3
  debug: false
  dry_run: false
  scroll_retries: 100
  retry_delay_ms: 1000
  progress_interval_secs: 5
  filter_retry:
    # max_attempts: 10
    pause_ms: 1000
    # deadline_secs: 60
"#;
