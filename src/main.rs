use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

use watchpost::{WatchpostConfig, WatchpostOrchestrator};

#[derive(Parser, Debug)]
#[command(name = "watchpost")]
#[command(about = "Camera monitoring appliance with motion triggers and GPIO, camera and mail actions")]
#[command(version)]
#[command(long_about = "Watchpost watches a camera for motion and GPIO inputs for edges, \
and runs the configured actions (LEDs and relays, photos and videos, mail notifications) \
for every trigger that fires. Every event and action is journaled and stored in SQLite.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "watchpost.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    #[arg(long, help = "Validate configuration file and exit without starting the system")]
    validate_config: bool,

    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// In-memory pins, logged mail and an in-memory store; nothing touches hardware
    #[arg(long, help = "Run against simulated devices without persisting anything")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<String>,

    #[arg(long, help = "Read SPACE (motion) and q (quit) from the terminal")]
    keyboard: bool,

    /// Run a single configured action and exit
    #[arg(long, value_name = "ACTION_ID")]
    run_action: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        println!("# Watchpost Configuration File");
        println!("# Default values for every option; add [[device]], [[action]] and [[trigger]] tables");
        println!();
        println!("{}", WatchpostConfig::default_toml()?);
        return Ok(());
    }

    // the guard flushes the file writer when dropped
    let _log_guard = init_logging(&args)?;

    info!("Starting watchpost v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = WatchpostConfig::load_from_file(&args.config).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    if args.dry_run {
        info!("Dry run mode - simulated devices, nothing persisted");
    }

    let mut orchestrator = WatchpostOrchestrator::new(config, args.dry_run).map_err(|e| {
        error!("Failed to create orchestrator: {}", e);
        e
    })?;

    if let Some(action_id) = args.run_action.as_deref() {
        let outcome = orchestrator
            .run_action(action_id)
            .await
            .with_context(|| format!("action {} could not be run", action_id))?;
        println!("{}: {}", action_id, outcome.message);
        orchestrator.engine().registry().close_all().await;
        std::process::exit(if outcome.done { 0 } else { 1 });
    }

    orchestrator.set_keyboard_enabled(args.keyboard);
    orchestrator.initialize().await.map_err(|e| {
        error!("Failed to initialize system: {}", e);
        e
    })?;

    if let Err(e) = orchestrator.start().await {
        error!("Failed to start system: {}", e);
        // release whatever did start before bailing out
        let _ = orchestrator.shutdown().await;
        return Err(e.into());
    }

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("watchpost exited with code: {}", exit_code);
    drop(_log_guard);

    // Exit with appropriate code for systemd
    std::process::exit(exit_code);
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("watchpost={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match args.log_dir.as_deref() {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("log directory {} could not be created", dir))?;
            let appender = tracing_appender::rolling::daily(dir, "watchpost.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}
