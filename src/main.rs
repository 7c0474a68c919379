use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use sentrycam::{
    CaptureProducer, CommandPoller, ConnectivityMonitor, DetectionGate, EventBus, FileBlobStore,
    FrameSource, NullAuxLight, NullWakeLock, OfflineQueue, RemoteTransport, Scheduler,
    SentrycamConfig, StubFrameSource, SyncEngine, SystemContext, TelegramTransport, ZipPacker,
};

/// Cadence of the background reachability probe
const PROBE_PERIOD: Duration = Duration::from_secs(30);
const PROBE_URL: &str = "https://api.telegram.org";

#[derive(Parser, Debug)]
#[command(name = "sentrycam")]
#[command(about = "Store-and-forward camera capture pipeline with offline queueing and remote command polling")]
#[command(version)]
#[command(long_about = "A store-and-forward capture pipeline that samples a camera source on a \
schedule, optionally filters captures through an object-detection gate, queues them durably \
while the upload destination is unreachable, and reconciles the queue once connectivity \
returns. Operators can trigger captures and query status over a pull-based command channel.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "sentrycam.toml", help = "Path to TOML configuration file")]
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

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without arming the pipeline")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting sentrycam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match SentrycamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate()?;

    if !config.has_credentials() {
        info!("No delivery credentials configured; captures will queue locally");
    }

    let event_bus = EventBus::new(64);
    let context = Arc::new(SystemContext::with_persistence(config.clone(), &args.config));

    let store = Arc::new(FileBlobStore::open(&config.storage.path).await?);
    let queue = Arc::new(OfflineQueue::new(store));
    let occupied_mb = queue.occupied_mb().await?;
    info!(
        "Offline queue at {}: {:.2} MB used of {} MB advisory ceiling",
        config.storage.path, occupied_mb, config.storage.ceiling_mb
    );

    let transport: Arc<dyn RemoteTransport> = Arc::new(TelegramTransport::new()?);
    let sync = Arc::new(SyncEngine::new(
        Arc::clone(&queue),
        Arc::clone(&transport),
        Some(Arc::new(ZipPacker)),
        Arc::clone(&context),
        event_bus.clone(),
    ));

    let frame_source: Arc<dyn FrameSource> = Arc::new(StubFrameSource::default());
    // No detector backend is wired in the reference binary; the gate fails
    // open until one is attached
    let gate = DetectionGate::new(None);

    let producer = Arc::new(CaptureProducer::new(
        Arc::clone(&frame_source),
        gate,
        Arc::new(NullAuxLight),
        Arc::clone(&queue),
        Arc::clone(&sync),
        Arc::clone(&context),
        event_bus.clone(),
    ));
    let poller = Arc::new(CommandPoller::new(
        Arc::clone(&transport),
        Arc::clone(&producer),
        Arc::clone(&queue),
        Arc::clone(&context),
        event_bus.clone(),
    ));

    let monitor = Arc::new(ConnectivityMonitor::new(
        Arc::clone(&context),
        event_bus.clone(),
    ));
    let probe = monitor.spawn_probe(PROBE_URL.to_string(), PROBE_PERIOD)?;

    let mut scheduler = Scheduler::new(
        context,
        producer,
        sync,
        poller,
        frame_source,
        Arc::new(NullWakeLock),
        event_bus,
    );

    scheduler.arm().await;
    info!("Pipeline armed; press Ctrl-C to disarm and exit");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    scheduler.disarm().await;
    probe.abort();

    info!("Sentrycam exited cleanly");
    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
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
        .unwrap_or_else(|_| EnvFilter::new(format!("sentrycam={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().with_target(true).boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Sentrycam configuration file");
    println!("# Defaults shown; uncomment and edit as needed");
    println!();
    println!("{}", toml::to_string_pretty(&SentrycamConfig::default())?);
    Ok(())
}
