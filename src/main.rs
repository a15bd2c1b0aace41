use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use camd::config::CamdConfig;
use camd::context::SharedContext;
use camd::{camera, capture, control_server, mjpeg_server, ring_buffer};

#[derive(Parser, Debug)]
#[command(name = "camd")]
#[command(about = "Always-on camera capture daemon with ring-buffered history and day/night adaptation")]
#[command(version)]
struct Args {
    /// Path to JSON configuration file
    #[arg(short, long, default_value = "config.json", help = "Path to JSON configuration file")]
    config: String,

    /// Enable debug level logging
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose (info) logging
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Quiet mode: errors only
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Load + validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the system")]
    validate_config: bool,

    /// Print the effective configuration and exit
    #[arg(long, help = "Print effective configuration as JSON and exit")]
    print_config: bool,

    /// Wire up components without starting the capture loop or servers
    #[arg(long, help = "Initialize components but don't start them")]
    dry_run: bool,

    /// Override log output format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        let config = CamdConfig::default();
        println!("{}", config.to_pretty_json()?);
        return Ok(());
    }

    init_logging(&args)?;

    info!("starting camd v{}", env!("CARGO_PKG_VERSION"));
    info!(config = %args.config, "loading configuration");

    let config = match CamdConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("configuration validation failed: {e}");
        eprintln!("configuration validation failed: {e}");
        std::process::exit(1);
    }

    if args.validate_config {
        println!("configuration is valid");
        return Ok(());
    }

    let (ring_width, ring_height) = if config.ring.downscale.enable {
        (config.ring.downscale.width, config.ring.downscale.height)
    } else {
        (config.camera.width, config.camera.height)
    };
    let ring = ring_buffer::Ring::new(camd::capacity::plan_capacity(
        config.ring.size,
        ring_width,
        ring_height,
    ))
    .map_err(|e| anyhow::anyhow!(e))?;

    let camera = camera::build_adapter(&config);
    let network_port = config.network.trigger_port;
    let mjpeg_port = config.mjpeg_server.port;
    let mjpeg_enabled = config.mjpeg_server.enable;

    let ctx = SharedContext::new(ring, config, camera, std::path::PathBuf::from(&args.config));

    if args.dry_run {
        info!("dry run complete, components initialized but not started");
        println!("dry run completed successfully - all components initialized");
        return Ok(());
    }

    let capture_ctx = ctx.clone();
    tokio::spawn(async move {
        capture::run(capture_ctx).await;
    });

    let control_ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = control_server::run(control_ctx, network_port).await {
            error!("control server exited: {e}");
        }
    });

    if mjpeg_enabled {
        let mjpeg_ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = mjpeg_server::run(mjpeg_ctx, mjpeg_port).await {
                error!("MJPEG server exited: {e}");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
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

    let env_filter = std::env::var("CAMD_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(format!("camd={log_level}")));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer().json().with_target(true).boxed(),
        Some("compact") => fmt::layer().compact().with_target(false).boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("unknown log format '{format}', using default");
            fmt::layer().boxed()
        }
    };

    tracing_subscriber::registry().with(fmt_layer).with(env_filter).init();
    Ok(())
}
