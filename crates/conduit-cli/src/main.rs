//! CONDUIT CLI
//!
//! Diagnostics for the CONDUIT network stream layer: URL parsing, proxy
//! selection, and one-shot client and server exchanges.

mod config;

use clap::{Parser, Subcommand};
use conduit_core::{
    ConnectOptions, ConnectRequest, Connector, EnvProxyDiscovery, NetError, NetStream, Protocol,
    UrlType, detect_proxy, parse_url, resolve_proxy_endpoint,
};
use conduit_transport::TransportError;
use std::path::PathBuf;
use std::time::Duration;

use config::Config;

/// Largest reply printed by `connect` and echoed by `listen`
const MAX_MESSAGE: usize = 16 * 1024;

/// CONDUIT - proxy-aware network streams for PKI exchanges
#[derive(Parser)]
#[command(name = "conduit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a URL and show its parts
    ParseUrl {
        /// URL to parse
        #[arg(required = true)]
        url: String,

        /// Require an HTTP URL
        #[arg(long)]
        http: bool,
    },

    /// Show which proxy, if any, a connection would use
    Proxy {
        /// Target host
        #[arg(required = true)]
        host: String,

        /// Stream protocol (tcp, udp, http)
        #[arg(long, default_value = "http")]
        protocol: Protocol,

        /// Ask for host-based routing through an HTTP proxy
        #[arg(long)]
        tunnel: bool,
    },

    /// Connect to a host, optionally send a message and print the reply
    Connect {
        /// Host name, address or URL
        #[arg(required = true)]
        host: String,

        /// Port, if the host doesn't carry one
        #[arg(short, long, default_value_t = 0)]
        port: u16,

        /// Stream protocol (tcp, udp, http)
        #[arg(long, default_value = "tcp")]
        protocol: Protocol,

        /// Text to send once connected
        #[arg(long)]
        send: Option<String>,

        /// Connect timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Accept one peer and echo its first message back
    Listen {
        /// Interface to bind
        #[arg(short, long)]
        interface: Option<String>,

        /// Port to bind, 0 for any
        #[arg(short, long, default_value_t = 0)]
        port: u16,

        /// Stream protocol (tcp, udp)
        #[arg(long, default_value = "tcp")]
        protocol: Protocol,
    },

    /// Print the effective configuration
    Config {
        /// Also write it to the default config path
        #[arg(long)]
        save: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose {
            "debug"
        } else {
            config.logging.level.as_str()
        })
        .init();

    match cli.command {
        Commands::ParseUrl { url, http } => show_url(&url, http)?,
        Commands::Proxy {
            host,
            protocol,
            tunnel,
        } => show_proxy(&host, protocol, tunnel, &config)?,
        Commands::Connect {
            host,
            port,
            protocol,
            send,
            timeout,
        } => connect(host, port, protocol, send, timeout, &config)?,
        Commands::Listen {
            interface,
            port,
            protocol,
        } => listen(interface, port, protocol, &config)?,
        Commands::Config { save } => show_config(&config, save)?,
    }

    Ok(())
}

/// Parse and print a URL
fn show_url(url: &str, http: bool) -> anyhow::Result<()> {
    let url_type = if http { UrlType::Http } else { UrlType::None };
    let info = parse_url(url.as_bytes(), url_type)?;

    println!("Scheme:   {}", info.scheme().map_or("-".to_string(), |s| format!("{s:?}")));
    println!("User:     {}", if info.user_info().is_some() { "<set>" } else { "-" });
    println!("Host:     {}", info.host());
    println!("Port:     {}", info.port().map_or("-".to_string(), |p| p.to_string()));
    println!("Location: {}", info.location().unwrap_or("-"));
    Ok(())
}

/// Print the proxy decision for a target
fn show_proxy(host: &str, protocol: Protocol, tunnel: bool, config: &Config) -> anyhow::Result<()> {
    let Some(route) = detect_proxy(protocol, host, tunnel, &config.network) else {
        println!("{host}: direct connection");
        return Ok(());
    };

    let endpoint = resolve_proxy_endpoint(&route, host, &EnvProxyDiscovery::new())?;
    println!(
        "{host}: via {:?} at {}:{}",
        route.kind(),
        endpoint.host(),
        endpoint.port().unwrap_or(conduit_core::HTTP_PROXY_DEFAULT_PORT)
    );
    Ok(())
}

/// Open a client stream, send and print the reply
fn connect(
    host: String,
    port: u16,
    protocol: Protocol,
    send: Option<String>,
    timeout: Option<u64>,
    config: &Config,
) -> anyhow::Result<()> {
    let connector = Connector::new(config.network.clone());
    let mut request = ConnectRequest::host(protocol, host).with_port(port);
    if let Some(secs) = timeout {
        request = request.with_connect_timeout(Duration::from_secs(secs));
    }

    let mut stream = connector.connect(request)?;
    println!(
        "Connected to {}:{} ({}){}",
        stream.host(),
        stream.port(),
        stream.protocol(),
        if stream.flags().is_proxied() { " via HTTP proxy" } else { "" }
    );
    if let Some(addr) = stream.local_addr() {
        println!("Local address: {addr}");
    }

    if let Some(text) = send {
        stream.write_all_flush(text.as_bytes())?;
        let reply = read_message(&mut stream)?;
        println!("{}", String::from_utf8_lossy(&reply));
    }

    stream.disconnect();
    Ok(())
}

/// Bind, accept one peer and echo its first message
fn listen(
    interface: Option<String>,
    port: u16,
    protocol: Protocol,
    config: &Config,
) -> anyhow::Result<()> {
    if protocol == Protocol::Http {
        anyhow::bail!("listen supports tcp and udp only");
    }

    let connector = Connector::new(config.network.clone());
    let request = ConnectRequest::new(protocol, ConnectOptions::HostName(interface)).with_port(port);
    let mut stream = connector.listen(request)?;
    match stream.local_addr() {
        Some(addr) => println!("Listening on {addr}"),
        None => println!("Listening on port {port}"),
    }

    let message = read_message(&mut stream)?;
    println!("Received {} bytes", message.len());
    stream.write_all_flush(&message)?;

    stream.disconnect();
    Ok(())
}

/// Read whatever the peer sends in one go
fn read_message(stream: &mut NetStream) -> anyhow::Result<Vec<u8>> {
    let mut buf = vec![0u8; MAX_MESSAGE];
    match stream.read(&mut buf) {
        Ok(n) => {
            buf.truncate(n);
            Ok(buf)
        }
        Err(NetError::Transport(TransportError::Closed)) => {
            tracing::info!("Peer closed the connection");
            Ok(Vec::new())
        }
        Err(e) => {
            let info = stream.error_info();
            anyhow::bail!("{} (code {})", e, info.code().as_i32());
        }
    }
}

/// Print, and optionally save, the effective configuration
fn show_config(config: &Config, save: bool) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    if save {
        let path = Config::default_path();
        config.save(&path)?;
        println!("# saved to {}", path.display());
    }
    Ok(())
}
