// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! foldwise: watch a folder and sort arriving files into classified folders

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use foldwise::cache::ResultCache;
use foldwise::classifier::ClassificationRequest;
use foldwise::config::AppConfig;
use foldwise::extract::{Extractor, PlainTextExtractor};
use foldwise::history::{reapply, revert, UndoManager};
use foldwise::provider::create_provider;
use foldwise::watcher::{existing_files, wait_for_stable, FileWatcher};
use foldwise::worker::{Pipeline, Worker};

/// foldwise CLI - classify and sort files as they arrive
#[derive(Parser, Debug)]
#[command(name = "foldwise")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Sorts newly arrived files into folders chosen by rules or an AI model", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch directories and sort files as they arrive
    Watch {
        /// Directories to watch (overrides config)
        #[arg(short, long)]
        dir: Vec<PathBuf>,

        /// Process files already present on startup
        #[arg(long)]
        process_existing: bool,

        /// Skip the provider health check on startup
        #[arg(long)]
        skip_health_check: bool,
    },

    /// Classify a single file
    Classify {
        /// File to classify
        path: PathBuf,

        /// Also move the file into its folder
        #[arg(long = "move")]
        move_file: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Undo history operations
    History {
        #[command(subcommand)]
        action: HistoryCommands,
    },

    /// Classification cache operations
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show provider, cache and history status
    Status,

    /// Initialize a new foldwise setup
    Init {
        /// Directory to initialize (default: current)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum HistoryCommands {
    /// List recorded moves
    List {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },

    /// Move files back to where they came from
    Undo {
        /// Number of moves to undo
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,
    },

    /// Redo undone moves
    Redo {
        /// Number of moves to redo
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,
    },

    /// Clear all history
    Clear {
        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommands {
    /// Show cache statistics
    Stats,

    /// Remove every cached classification
    Clear {
        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },

    /// Vacuum the cache database (reclaim space)
    Vacuum,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    match cli.command {
        Some(Commands::Watch { dir, process_existing, skip_health_check }) => {
            run_watch(config, dir, process_existing, skip_health_check, cli.quiet).await
        }
        Some(Commands::Classify { path, move_file, format }) => {
            run_classify(config, path, move_file, format).await
        }
        Some(Commands::History { action }) => run_history_command(&config, action),
        Some(Commands::Cache { action }) => run_cache_command(&config, action),
        Some(Commands::Config { action }) => run_config_command(&config, action, &cli.config),
        Some(Commands::Status) => run_status(&config).await,
        Some(Commands::Init { dir, force }) => run_init(dir, force),
        None => run_watch(config, vec![], false, false, cli.quiet).await,
    }
}

/// Watch mode: watcher -> queue -> worker
async fn run_watch(
    config: AppConfig,
    dir_overrides: Vec<PathBuf>,
    process_existing: bool,
    skip_health_check: bool,
    quiet: bool,
) -> anyhow::Result<()> {
    config.validate()?;

    let watch_paths: Vec<PathBuf> = if dir_overrides.is_empty() {
        config.watch_paths.iter().map(PathBuf::from).collect()
    } else {
        dir_overrides
    };
    info!("Watch directories: {:?}", watch_paths);
    info!("Sorting into: {}", config.base_path().display());

    let provider = create_provider(&config.provider)?;
    if skip_health_check {
        warn!("Skipping provider health check");
    } else {
        info!("Checking {} availability...", provider.name());
        provider
            .health_check()
            .await
            .with_context(|| format!("{} is not reachable", provider.name()))?;
        info!("{} is available", provider.name());
    }

    let history = UndoManager::open(&config.history.path).shared();
    let pipeline = Arc::new(Pipeline::from_config(&config, provider, history)?);
    let (worker, handle) = Worker::new(pipeline, &config.worker);
    let worker = worker.on_file_processed(move |filename, folder, glyph| {
        if !quiet {
            if folder.is_empty() {
                println!("{} {}", glyph, filename);
            } else {
                println!("{} {} -> {}", glyph, filename, folder);
            }
        }
    });
    let running = tokio::spawn(worker.run());

    let mut watcher = FileWatcher::new()?;
    for path in &watch_paths {
        watcher.watch(path)?;
    }
    watcher.ignore(&config.base_path());

    if process_existing {
        for dir in &watch_paths {
            let files = existing_files(dir)?;
            info!("Queueing {} existing files from {:?}", files.len(), dir);
            for file in files {
                handle.enqueue(file).await?;
            }
        }
    }

    let (tx, mut arrivals) = mpsc::unbounded_channel();
    let stop_watching = Arc::new(AtomicBool::new(false));
    let watch_task = tokio::task::spawn_blocking({
        let stop = stop_watching.clone();
        move || watcher.forward(tx, stop)
    });

    let settle = Duration::from_secs(config.worker.settle_secs);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("Watching for files. Press Ctrl+C to stop.");
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            arrival = arrivals.recv() => {
                let Some(path) = arrival else { break };
                let handle = handle.clone();
                tokio::spawn(async move {
                    if !wait_for_stable(&path, settle).await {
                        debug!("File disappeared during stability check: {:?}", path);
                        return;
                    }
                    if let Err(e) = handle.enqueue(path).await {
                        warn!("Could not queue file: {}", e);
                    }
                });
            }
        }
    }

    stop_watching.store(true, Ordering::Relaxed);
    info!("Finishing in-flight files...");
    handle.stop().await;
    running.await.context("worker task failed")??;
    if let Err(e) = watch_task.await {
        warn!("Watcher thread failed: {}", e);
    }

    let stats = handle.stats();
    info!(
        "Processed {} files ({} successful, {} failed)",
        stats.total_processed, stats.successful, stats.failed
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

/// Classify one file, optionally moving it
async fn run_classify(
    config: AppConfig,
    path: PathBuf,
    move_file: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if !path.is_file() {
        bail!("{} is not a file", path.display());
    }

    let provider = create_provider(&config.provider)?;
    let history = UndoManager::open(&config.history.path).shared();
    let pipeline = Pipeline::from_config(&config, provider, history)?;

    let (classification, movement) = if move_file {
        let outcome = pipeline
            .process(path.clone())
            .await?
            .with_context(|| format!("{} disappeared", path.display()))?;
        (outcome.classification, Some(outcome.movement))
    } else {
        let extraction = PlainTextExtractor::new().extract(&path);
        let request = ClassificationRequest::for_path(&path, extraction.content);
        (pipeline.classifier().classify(&request).await, None)
    };

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "path": path.to_string_lossy(),
                "classification": classification,
                "move": movement,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            let source = if classification.cached { " [cached]" } else { "" };
            println!(
                "{} -> {} ({:.0}%){}",
                path.display(),
                classification.folder_name,
                classification.confidence * 100.0,
                source
            );
            if !classification.reason.is_empty() {
                println!("  {}", classification.reason);
            }
            if let Some(movement) = movement {
                match (&movement.destination_path, &movement.error) {
                    (Some(dest), None) => println!("  Moved to {}", dest.display()),
                    (_, Some(err)) => println!("  Not moved: {}", err),
                    (None, None) => {}
                }
            }
        }
    }

    Ok(())
}

fn run_history_command(config: &AppConfig, action: HistoryCommands) -> anyhow::Result<()> {
    let mut history = UndoManager::open(&config.history.path);

    match action {
        HistoryCommands::List { count } => {
            let applied = history.current_index();
            let entries = history.history();
            println!("History ({} entries):", entries.len());
            let start = entries.len().saturating_sub(count);
            for (i, entry) in entries.iter().enumerate().skip(start).rev() {
                let marker = if i as i64 > applied { "[undone]" } else { "" };
                println!(
                    "  {} {} -> {} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.source_path.display(),
                    entry.destination_path.display(),
                    marker
                );
            }
        }
        HistoryCommands::Undo { count } => {
            for _ in 0..count {
                let Some(action) = history.undo()? else {
                    println!("Nothing to undo");
                    break;
                };
                match revert(&action) {
                    Ok(()) => println!(
                        "Undone: {} -> {}",
                        action.destination_path.display(),
                        action.source_path.display()
                    ),
                    Err(e) => {
                        history.restore_undone()?;
                        bail!("Could not undo {}: {}", action.filename, e);
                    }
                }
            }
        }
        HistoryCommands::Redo { count } => {
            for _ in 0..count {
                let Some(action) = history.redo()? else {
                    println!("Nothing to redo");
                    break;
                };
                match reapply(&action) {
                    Ok(()) => println!(
                        "Redone: {} -> {}",
                        action.source_path.display(),
                        action.destination_path.display()
                    ),
                    Err(e) => {
                        // Step the cursor back over the action we could not apply
                        history.undo()?;
                        bail!("Could not redo {}: {}", action.filename, e);
                    }
                }
            }
        }
        HistoryCommands::Clear { force } => {
            if !force {
                eprintln!("Use --force to confirm clearing history");
                return Ok(());
            }
            history.clear()?;
            println!("History cleared");
        }
    }

    Ok(())
}

fn run_cache_command(config: &AppConfig, action: CacheCommands) -> anyhow::Result<()> {
    let cache = ResultCache::open(&config.cache.path)
        .with_context(|| format!("opening cache {}", config.cache.path))?;

    match action {
        CacheCommands::Stats => {
            let stats = cache.stats()?;
            println!("Cache Statistics ({}):", config.cache.path);
            println!("  Entries: {}", stats.entry_count);
            println!("  Folders: {}", stats.folder_count);
            println!("  Bytes covered: {}", stats.total_bytes);
        }
        CacheCommands::Clear { force } => {
            if !force {
                eprintln!("Use --force to confirm clearing the cache");
                return Ok(());
            }
            let removed = cache.clear()?;
            println!("Removed {} cached classifications", removed);
        }
        CacheCommands::Vacuum => {
            cache.vacuum()?;
            println!("Cache vacuumed successfully");
        }
    }

    Ok(())
}

fn run_config_command(config: &AppConfig, action: ConfigCommands, config_path: &Path) -> anyhow::Result<()> {
    match action {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Watch paths: {:?}", config.watch_paths);
            println!("  Base path: {}", config.base_path);
            println!("  Provider: {} ({})", config.provider.kind, config.provider.model);
            println!(
                "  Rules: {} keyword, {} extension",
                config.rules.keywords.len(),
                config.rules.extensions.len()
            );
        }
    }

    Ok(())
}

async fn run_status(config: &AppConfig) -> anyhow::Result<()> {
    println!("foldwise v{} Status", env!("CARGO_PKG_VERSION"));
    println!("======================");

    match create_provider(&config.provider) {
        Ok(provider) => {
            println!("Provider: {} (model {})", provider.name(), provider.model());
            println!("  Vision: {}", if provider.supports_vision() { "yes" } else { "no" });
            match provider.health_check().await {
                Ok(()) => println!("  Health: OK"),
                Err(e) => println!("  Health: ✗ {}", e),
            }
        }
        Err(e) => println!("Provider: ✗ {}", e),
    }

    if config.cache.enabled {
        match ResultCache::open(&config.cache.path).and_then(|c| c.stats()) {
            Ok(stats) => println!(
                "\nCache ({}): {} entries, {} folders",
                config.cache.path, stats.entry_count, stats.folder_count
            ),
            Err(e) => println!("\nCache: ✗ {}", e),
        }
    } else {
        println!("\nCache: disabled");
    }

    let history = UndoManager::open(&config.history.path);
    println!(
        "History ({}): {} moves, {} undoable",
        config.history.path,
        history.len(),
        history.applied().len()
    );

    println!("\nConfiguration:");
    println!("  Watch paths: {:?}", config.watch_paths);
    println!("  Base path: {}", config.base_path);
    println!("  Concurrency: {}", config.worker.max_concurrent);
    println!("  Duplicates: {:?}", config.mover.duplicate_strategy);

    Ok(())
}

fn run_init(dir: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let target = dir.unwrap_or_else(|| PathBuf::from("."));
    let config_path = target.join("config.json");

    if config_path.exists() && !force {
        bail!("config.json already exists. Use --force to overwrite");
    }

    let watch_dir = target.join("watch");
    let sorted_dir = target.join("sorted");
    std::fs::create_dir_all(&watch_dir)?;
    std::fs::create_dir_all(&sorted_dir)?;

    let config = AppConfig {
        watch_paths: vec![watch_dir.to_string_lossy().to_string()],
        base_path: sorted_dir.to_string_lossy().to_string(),
        ..AppConfig::default()
    };
    config.save(&config_path)?;

    println!("foldwise initialized in {:?}", target);
    println!("\nCreated:");
    println!("  - config.json");
    println!("  - watch/");
    println!("  - sorted/");
    println!("\nNext steps:");
    println!("  1. Set provider.api_key in config.json (or the provider's API key variable)");
    println!("  2. Start sorting: foldwise watch");

    Ok(())
}
