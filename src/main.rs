//! Sockshade - Encrypted TCP/UDP relay
//!
//! This is the main entry point for the Sockshade application.

use anyhow::Result;
use clap::{CommandFactory, Parser};
use sockshade::cipher::{generate_key, list_ciphers};
use sockshade::config::{load_config, ClientConfig, Config, ServerConfig};
use sockshade::Orchestrator;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Sockshade - encrypted relay with SOCKS5, tunnel and redirect front-ends
#[derive(Parser, Debug)]
#[command(name = "sockshade")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Client connect address or ss:// URL
    #[arg(short = 'c', long)]
    client: Option<String>,

    /// Server listen address or ss:// URL
    #[arg(short = 's', long)]
    server: Option<String>,

    /// Cipher name (see --list-ciphers)
    #[arg(long, default_value = "AEAD_CHACHA20_POLY1305")]
    cipher: String,

    /// Base64url-encoded key (derived from the password if empty)
    #[arg(long, default_value = "")]
    key: String,

    /// Password
    #[arg(long, default_value = "")]
    password: String,

    /// Print a base64url-encoded random key of this many bytes and exit
    #[arg(long, default_value_t = 0)]
    keygen: usize,

    /// Print the supported ciphers and exit
    #[arg(long)]
    list_ciphers: bool,

    /// (client-only) SOCKS listen address
    #[arg(long)]
    socks: Option<String>,

    /// (client-only) Enable UDP support for SOCKS
    #[arg(short = 'u', long)]
    udp_socks: bool,

    /// (client-only) Redirect TCP from this address
    #[arg(long)]
    redir: Option<String>,

    /// (client-only) Redirect TCP IPv6 from this address
    #[arg(long)]
    redir6: Option<String>,

    /// (client-only) TCP tunnels (laddr1=raddr1,laddr2=raddr2,...)
    #[arg(long)]
    tcptun: Option<String>,

    /// (client-only) UDP tunnels (laddr1=raddr1,laddr2=raddr2,...)
    #[arg(long)]
    udptun: Option<String>,

    /// UDP idle timeout in seconds
    #[arg(long, default_value_t = sockshade::helper::DEFAULT_UDP_TIMEOUT_SECS)]
    udptimeout: u64,

    /// Verbose mode (same as --log-level debug)
    #[arg(long)]
    verbose: bool,

    /// Path to a TOML configuration file (replaces the flags above)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

impl Args {
    /// Build the configuration record from flags
    fn to_config(&self) -> Config {
        Config {
            cipher: self.cipher.clone(),
            key: self.key.clone(),
            password: self.password.clone(),
            udp_timeout: self.udptimeout,
            verbose: self.verbose,
            client: self.client.as_ref().map(|server| ClientConfig {
                server: server.clone(),
                socks: self.socks.clone(),
                udp_socks: self.udp_socks,
                redir: self.redir.clone(),
                redir6: self.redir6.clone(),
                tcp_tun: self.tcptun.clone(),
                udp_tun: self.udptun.clone(),
            }),
            server: self.server.as_ref().map(|listen| ServerConfig {
                listen: listen.clone(),
            }),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.keygen > 0 {
        println!("{}", generate_key(args.keygen));
        return Ok(());
    }

    if args.list_ciphers {
        println!("{}", list_ciphers().join(" "));
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => args.to_config(),
    };

    if config.client.is_none() && config.server.is_none() {
        Args::command().print_help()?;
        return Ok(());
    }

    // Setup logging
    let level = if args.verbose || config.verbose {
        "debug"
    } else {
        args.log_level.as_str()
    };
    setup_logging(level, args.json_log)?;

    info!("Sockshade v{}", sockshade::VERSION);
    if let Some(path) = &args.config {
        info!("Configuration loaded from: {:?}", path);
    }

    let orchestrator = Orchestrator::start(&config).await?;

    wait_for_signal().await;
    orchestrator.shutdown().await;
    Ok(())
}

/// Wait for Ctrl+C or, on unix, SIGTERM
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down...");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down...");
                    }
                }
            }
            Err(e) => {
                error!("Failed to setup SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        // On Windows, only handle Ctrl+C
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down...");
    }
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
