use anyhow::{bail, Context, Result};
use clap::Parser;
use proxy_sieve::{
    config::{Settings, DEFAULT_CONFIG_PATH},
    console,
    proxy::{Coordinator, OutputSink, ProxyLoader},
    tui::Dashboard,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Concurrent HTTP proxy validator with latency filtering
#[derive(Parser)]
#[command(name = "proxy-sieve")]
#[command(about = "Concurrent HTTP proxy validator with latency filtering")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Show the interactive dashboard instead of line output
    #[arg(long)]
    tui: bool,

    /// Do not update the terminal window title
    #[arg(long)]
    no_title: bool,
}

fn init_tracing(tui: bool) {
    // The dashboard owns the screen; only surface problems there.
    let default_level = if tui { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(!tui)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.tui);

    if Settings::ensure_file(&cli.config)? {
        bail!(
            "created default configuration at {}; review it and run again",
            cli.config.display()
        );
    }
    let settings = Settings::load(&cli.config)?;

    if !cli.tui {
        console::print_banner();
        console::print_settings(&settings);
    }

    let proxies = ProxyLoader::load(&settings.import)?;
    let total = proxies.len();

    let sink = OutputSink::create(&settings.export).with_context(|| {
        format!("Failed to prepare export file {}", settings.export.display())
    })?;
    info!(path = %settings.export.display(), "export file truncated");

    let coordinator = Coordinator::new(settings.probe_config(), settings.threads)?;
    info!(total, workers = coordinator.workers(), "checking proxies");

    let (mut events, handle) = coordinator.dispatch_stream(proxies, sink);
    let titles = !cli.no_title && !cli.tui;
    if titles {
        console::set_title(&format!("Proxy Checker | Checked: 0/{total} | Good: 0"));
    }

    if cli.tui {
        let drained = Dashboard::new(events, total).run().await?;
        if !drained {
            warn!("dashboard closed early, waiting for in-flight checks to finish");
        }
    } else {
        while let Some(event) = events.recv().await {
            console::print_report(&event.report);
            if titles {
                console::set_title(&console::title_for(&event.progress));
            }
        }
    }

    let summary = handle.await?;
    console::print_summary(&summary, settings.max_ms);
    if titles {
        console::set_title("Proxy Checker | Done");
    }

    Ok(())
}
