use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use camd::overlay::{self, OverlayConfig};

/// Annotates and re-serves an upstream MJPEG stream as its own HTTP
/// endpoint. Follows the same CLI/config/logging conventions as `camd`
/// itself, but with a narrower surface: one upstream, one listen port, an
/// optional archive directory.
#[derive(Parser, Debug)]
#[command(name = "camd-overlay")]
#[command(about = "Annotated MJPEG overlay proxy for camd")]
#[command(version)]
struct Args {
    #[arg(short, long, default_value = "overlay.json", help = "Path to JSON configuration file")]
    config: String,

    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    #[arg(long, help = "Print effective configuration as JSON and exit")]
    print_config: bool,

    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        let config = OverlayConfig::default();
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    init_logging(&args)?;

    info!("starting camd-overlay v{}", env!("CARGO_PKG_VERSION"));
    info!(config = %args.config, "loading overlay configuration");

    let config = match OverlayConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load overlay configuration: {e}");
            return Err(e.into());
        }
    };

    if let Err(e) = overlay::run(config).await {
        error!("overlay proxy exited: {e}");
        return Err(e.into());
    }

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
        .unwrap_or_else(|| EnvFilter::new(format!("camd_overlay={log_level}")));

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
