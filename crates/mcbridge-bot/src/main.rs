//! mcbridge: chat bridge for game servers.
//!
//! Relays chat between a chat platform and every registered game server,
//! forwards authorized commands to servers, and keeps the server list and
//! permission tree in a JSON state file. The bundled platform is the
//! terminal: stdin lines are chat messages, replies go to stdout.

mod authorizer;
mod commands;
mod config;
mod echo;
mod platform;
mod relay;
mod state;

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use mcbridge_client::WebSocketDialer;

use config::BotConfig;
use echo::EchoServer;
use platform::{Author, ConsoleIdentity, ConsolePlatform};
use relay::Relay;
use state::StateFile;

/// mcbridge: chat bridge for game servers
#[derive(Parser, Debug)]
#[command(name = "mcbridge", version, about = "Chat bridge for game servers")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config file path
    #[arg(long, default_value = "~/.mcbridge/config.toml")]
    config: String,

    /// State file path (overrides config)
    #[arg(long)]
    state_file: Option<String>,

    /// Command prefix (overrides config)
    #[arg(long)]
    control_char: Option<String>,

    /// Grant the console user every permission
    #[arg(long)]
    admin: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge with the console as chat platform (default)
    Run,
    /// Run a WebSocket server that echoes every envelope back
    EchoServer {
        /// Listen port
        #[arg(short, long, default_value_t = echo::DEFAULT_PORT)]
        port: u16,
    },
}

/// Capacity of the console-to-relay message queue.
const CONSOLE_QUEUE_CAPACITY: usize = 64;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Some(Command::EchoServer { port }) => run_echo(*port).await,
        Some(Command::Run) | None => run_bridge(&cli).await,
    }
}

async fn run_echo(port: u16) {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let server = match EchoServer::bind(addr).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to start echo server");
            std::process::exit(1);
        }
    };
    tokio::select! {
        _ = server.run() => {}
        _ = shutdown_signal() => info!("received shutdown signal"),
    }
    info!("echo server stopped");
}

async fn run_bridge(cli: &Cli) {
    info!(version = env!("CARGO_PKG_VERSION"), "starting mcbridge");

    let config_path = PathBuf::from(&cli.config);
    let cfg = match BotConfig::load(
        Some(&config_path),
        cli.state_file.as_deref(),
        cli.control_char.as_deref(),
        cli.admin,
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let state = match StateFile::load(&cfg.state_path) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "failed to load state");
            std::process::exit(1);
        }
    };

    let console = Arc::new(ConsolePlatform::stdout());
    let dialer = Arc::new(WebSocketDialer::with_local_origin());
    info!(origin = dialer.origin(), "dialing servers");

    let (relay, server_chat) = match Relay::new(
        console,
        dialer,
        state.chat,
        cfg.control_char.clone(),
        cfg.state_path.clone(),
    ) {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "failed to create relay");
            std::process::exit(1);
        }
    };

    if let Err(e) = relay.register_commands().await {
        error!(error = %e, "failed to register commands");
        std::process::exit(1);
    }
    if cfg.console.admin {
        if let Err(e) = relay.grant_admin(&cfg.guild, &cfg.console.user_id).await {
            warn!(error = %e, "failed to grant console admin");
        }
    }
    relay.restore_servers(state.servers).await;
    relay.persist().await;

    if relay.channel_id().await.is_empty() {
        info!(
            "no relay channel bound; type {}setchannel to relay chat from the console",
            cfg.control_char
        );
    }

    tokio::spawn(Arc::clone(&relay).forward_server_chat(server_chat));
    let (tx, rx) = mpsc::channel(CONSOLE_QUEUE_CAPACITY);
    tokio::spawn(Arc::clone(&relay).run(rx));

    let identity = ConsoleIdentity {
        channel: cfg.channel.clone(),
        guild: cfg.guild.clone(),
        author: Author {
            id: cfg.console.user_id.clone(),
            name: cfg.console.user_name.clone(),
            roles: cfg.console.roles.clone(),
        },
    };
    let input = platform::read_messages(BufReader::new(tokio::io::stdin()), identity, tx);

    tokio::select! {
        result = input => match result {
            Ok(()) => info!("console input closed"),
            Err(e) => warn!(error = %e, "console input failed"),
        },
        _ = shutdown_signal() => info!("received shutdown signal"),
    }

    relay.shutdown().await;
    info!("mcbridge stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_run() {
        let cli = Cli::try_parse_from(["mcbridge"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, "~/.mcbridge/config.toml");
        assert_eq!(cli.log_level, "info");
        assert!(!cli.admin);
    }

    #[test]
    fn echo_server_port() {
        let cli = Cli::try_parse_from(["mcbridge", "echo-server"]).unwrap();
        assert!(matches!(cli.command, Some(Command::EchoServer { port: 3553 })));
        let cli = Cli::try_parse_from(["mcbridge", "echo-server", "-p", "9000"]).unwrap();
        assert!(matches!(cli.command, Some(Command::EchoServer { port: 9000 })));
    }

    #[test]
    fn overrides_parse() {
        let cli = Cli::try_parse_from([
            "mcbridge",
            "--state-file",
            "/tmp/s.json",
            "--control-char",
            "?",
            "--admin",
            "run",
        ])
        .unwrap();
        assert_eq!(cli.state_file.as_deref(), Some("/tmp/s.json"));
        assert_eq!(cli.control_char.as_deref(), Some("?"));
        assert!(cli.admin);
        assert!(matches!(cli.command, Some(Command::Run)));
    }
}
