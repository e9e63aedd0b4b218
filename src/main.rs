use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pymirror::closure::ExclusionPolicy;
use pymirror::mirror::MirrorOptions;
use pymirror::{sweep, CancelToken, Config, HttpTransport, Store};

#[derive(Parser)]
#[command(name = "pymirror")]
#[command(about = "Incremental package-index mirror")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync the catalog and package metadata from upstream
    Sync,

    /// Download release files selected by policy
    Mirror {
        /// Report what would be downloaded without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Whitelist a package (name or name==version), repeatable
        #[arg(short, long = "add")]
        add: Vec<String>,

        /// Read whitelist entries from a file, one per line, repeatable
        #[arg(short = 'A', long = "add-list")]
        add_list: Vec<std::path::PathBuf>,

        /// Mirror only whitelisted packages, ignoring the blacklist
        #[arg(long)]
        only_whitelist: bool,
    },

    /// Reclaim disk space
    Sweep {
        #[command(subcommand)]
        sweep_command: SweepCommands,
    },

    /// Show store and mirror statistics
    Status,
}

#[derive(Subcommand)]
enum SweepCommands {
    /// Delete files no release record references anymore
    Orphans {
        /// Report without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete files the selection policy would prune now
    Unwanted {
        /// Report without deleting
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;
    info!("Starting pymirror v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(cli.config)?;
    config.expand_paths()?;
    for problem in config.validate() {
        warn!("{}", problem);
    }

    match cli.command {
        Commands::Sync => cmd_sync(&config).await,
        Commands::Mirror {
            dry_run,
            add,
            add_list,
            only_whitelist,
        } => cmd_mirror(dry_run, add, add_list, only_whitelist, &config).await,
        Commands::Sweep { sweep_command } => cmd_sweep(sweep_command, &config),
        Commands::Status => cmd_status(&config),
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<std::path::PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(&path),
        None => Config::load_or_default(),
    }
}

/// Sync the catalog and package metadata from upstream
async fn cmd_sync(config: &Config) -> Result<()> {
    let mut store = Store::open_at(config.database_path())?;
    let transport = HttpTransport::new(&config.index_url, config.timeout())
        .context("Failed to build index transport")?;

    let cancel = CancelToken::new();
    cancel.listen_for_ctrl_c();

    let summary = pymirror::sync::reconcile(&transport, &mut store, &cancel).await?;

    if summary.up_to_date {
        println!("✅ Already up to date");
        return Ok(());
    }

    println!("\n📊 Sync summary:");
    println!("   Catalog entries: {}", summary.listed);
    println!("   Changed upstream: {}", summary.advanced);
    println!("   Orphans removed: {}", summary.orphans_removed);
    println!("   Metadata fetched: {}", summary.fetched);
    println!("   Failed (ignored): {}", summary.failed);

    if summary.cancelled {
        println!("⚠️  Interrupted before completion");
        std::process::exit(1);
    }
    Ok(())
}

/// Download release files selected by policy
async fn cmd_mirror(
    dry_run: bool,
    add: Vec<String>,
    add_list: Vec<std::path::PathBuf>,
    only_whitelist: bool,
    config: &Config,
) -> Result<()> {
    let mut whitelist = config.whitelist.clone();
    whitelist.extend(add);
    for path in &add_list {
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read whitelist file {}", path.display()))?;
        whitelist.extend(
            body.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        );
    }

    if only_whitelist && whitelist.is_empty() {
        warn!("--only-whitelist with an empty whitelist mirrors nothing");
    }

    let store = Store::open_at(config.database_path())?;
    let fetcher = HttpTransport::new(&config.index_url, config.timeout())
        .context("Failed to build artifact fetcher")?;
    let mut policy = ExclusionPolicy::new(config.rules.clone());

    let cancel = CancelToken::new();
    cancel.listen_for_ctrl_c();

    let options = MirrorOptions {
        dry_run,
        whitelist,
        only_whitelist,
    };
    let summary =
        pymirror::mirror::mirror(&fetcher, &store, config, &mut policy, &options, &cancel).await?;

    println!("\n📊 Mirror summary{}:", if dry_run { " (dry run)" } else { "" });
    println!("   Packages: {}", summary.packages);
    println!("   Files kept by policy: {}", summary.files_kept);
    println!("   Already on disk: {}", summary.existing);
    println!("   Downloaded: {}", summary.downloaded);
    println!("   Failed: {}", summary.failed);
    println!("   Bytes: {}", summary.bytes);

    if summary.cancelled {
        println!("⚠️  Interrupted before completion");
        std::process::exit(1);
    }
    Ok(())
}

/// Reclaim disk space
fn cmd_sweep(sweep_command: SweepCommands, config: &Config) -> Result<()> {
    let store = Store::open_at(config.database_path())?;

    let (summary, dry_run) = match sweep_command {
        SweepCommands::Orphans { dry_run } => {
            (sweep::sweep_orphans(&store, config, dry_run)?, dry_run)
        }
        SweepCommands::Unwanted { dry_run } => {
            let mut policy = ExclusionPolicy::new(config.rules.clone());
            (
                sweep::sweep_unwanted(&store, config, &mut policy, dry_run)?,
                dry_run,
            )
        }
    };

    println!("\n📊 Sweep summary{}:", if dry_run { " (dry run)" } else { "" });
    println!("   Files examined: {}", summary.scanned);
    println!("   Removed: {}", summary.removed);
    println!("   Bytes reclaimed: {}", summary.bytes);
    Ok(())
}

/// Show store and mirror statistics
fn cmd_status(config: &Config) -> Result<()> {
    let store = Store::open_at(config.database_path())?;
    let counts = store.counts()?;

    println!("📊 pymirror status");
    println!("   Database: {}", config.database_path().display());
    println!("   Mirror root: {}", config.mirror_root);
    match counts.last_serial {
        Some(serial) => println!("   Upstream serial: {}", serial),
        None => println!("   Upstream serial: never synced"),
    }
    println!("   Catalog entries: {}", counts.catalog_entries);
    println!("   Ignored: {}", counts.ignored);
    println!("   Packages with metadata: {}", counts.packages);
    println!("   Release files known: {}", counts.files);
    println!("   Total recorded size: {} bytes", counts.total_bytes);
    Ok(())
}
