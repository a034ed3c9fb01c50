//! spyglass-console — entry point.
//!
//! ```text
//! spyglass-console --host 10.0.3.7 --port 5901        Probe a console
//! spyglass-console --config <path>                    Use a config TOML
//! spyglass-console --gen-config                       Dump defaults and exit
//! ```

mod config;
mod view;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use spyglass_core::session::{ConnectOptions, Session};
use spyglass_core::tls::TlsOptions;
use spyglass_core::tunnel::TunnelOptions;

use config::ConsoleConfig;
use view::ProbeSink;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "spyglass-console", about = "Hypervisor VNC console probe")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "spyglass-console.toml")]
    config: PathBuf,

    /// VNC server host (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// VNC server port (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// VNC password (overrides config).
    #[arg(long)]
    password: Option<String>,

    /// Wrap the session in TLS.
    #[arg(long)]
    tls: bool,

    /// Accept any server certificate.
    #[arg(long)]
    insecure: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ConsoleConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ConsoleConfig::load(&cli.config);
    if let Some(host) = cli.host {
        config.network.host = host;
    }
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(password) = cli.password {
        config.security.password = Some(password);
    }
    if cli.tls {
        config.security.tls = true;
    }
    if cli.insecure {
        config.security.insecure = true;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("spyglass-console v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Build connect options ────────────────────────────────

    let mut options = ConnectOptions::new(config.network.host.clone(), config.network.port);
    options.connect_timeout = Duration::from_millis(config.network.timeout_ms);
    if let Some(password) = config.security.password.clone() {
        options = options.with_password(password);
    }
    if config.security.tls {
        options = options.with_tls(TlsOptions {
            insecure: config.security.insecure,
        });
    }
    if config.tunnel.enabled {
        options = options.with_tunnel(TunnelOptions {
            host: config.tunnel.host.clone(),
            port: config.tunnel.port,
            path: config.tunnel.path.clone(),
            session: config.tunnel.session.clone(),
        });
    }

    // ── 2. Open the session ─────────────────────────────────────

    // The sink sizes its framebuffer on the first resize call below.
    let sink = ProbeSink::new(4);
    let mut session = Session::connect(options, Box::new(sink)).await?;
    let (width, height) = session.screen().size();
    info!(
        width,
        height,
        desktop = %session.screen().desktop_name(),
        preferred_format = session.screen().is_preferred_format(),
        "connected"
    );
    // ── 3. Run until the session ends or the operator interrupts ──

    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        result = session.wait() => {
            match result {
                Ok(()) => info!("session ended"),
                Err(e) => error!("session failed: {e}"),
            }
            false
        }
    };

    if interrupted {
        info!("interrupt, closing session");
        session.shutdown();
        let _ = session.wait().await;
    }

    Ok(())
}
