//! chat-relay daemon
//!
//! Relays every byte received from one TCP client to all other connected
//! clients.
//!
//! # Usage
//!
//! ```bash
//! chat-relay
//! chat-relay --port 4000 --host 127.0.0.1
//! chat-relay --max-connections 100 --no-greeting
//! ```
//!
//! Try it with two terminals running `nc localhost 3333`.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use chat_relay::server::config::DEFAULT_PORT;
use chat_relay::{RelayServer, ServerConfig};

/// Broadcast relay over raw TCP byte streams
#[derive(Parser, Debug)]
#[command(name = "chat-relay")]
#[command(about = "Relay bytes from each TCP client to every other client")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Maximum concurrent connections (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_connections: usize,

    /// Greeting sent to each new client
    #[arg(long, conflicts_with = "no_greeting")]
    greeting: Option<String>,

    /// Don't greet new clients
    #[arg(long)]
    no_greeting: bool,

    /// Per-destination write timeout in milliseconds (0 = none)
    #[arg(long, default_value_t = 10_000)]
    write_timeout_ms: u64,

    /// Read buffer size in bytes
    #[arg(long, default_value_t = 8 * 1024)]
    read_buffer_size: usize,

    /// Leave Nagle's algorithm enabled
    #[arg(long)]
    no_nodelay: bool,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let write_timeout =
            (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms));

        let mut config = ServerConfig::with_addr(SocketAddr::new(self.host, self.port))
            .max_connections(self.max_connections)
            .read_buffer_size(self.read_buffer_size)
            .write_timeout(write_timeout)
            .tcp_nodelay(!self.no_nodelay);

        if self.no_greeting {
            config = config.disable_greeting();
        } else if let Some(greeting) = self.greeting {
            config = config.greeting(format!("{}\n", greeting));
        }

        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chat_relay=info")),
        )
        .init();

    let config = Args::parse().into_config();
    let bind_addr = config.bind_addr;

    let server = RelayServer::bind(config)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    let metrics = std::sync::Arc::clone(server.metrics());

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    let stats = metrics.snapshot();
    tracing::info!(
        connections = stats.total_connections,
        rejected = stats.rejected_connections,
        bytes_received = stats.bytes_received,
        bytes_relayed = stats.bytes_relayed,
        write_failures = stats.write_failures,
        uptime_secs = stats.uptime.as_secs(),
        "Final stats"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let config = Args::parse_from(["chat-relay"]).into_config();

        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert!(config.greeting.is_some());
        assert!(config.tcp_nodelay);
        assert_eq!(config.write_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_custom_args() {
        let config = Args::parse_from([
            "chat-relay",
            "--port",
            "4000",
            "--host",
            "127.0.0.1",
            "--max-connections",
            "8",
            "--greeting",
            "hey",
            "--write-timeout-ms",
            "0",
            "--no-nodelay",
        ])
        .into_config();

        assert_eq!(config.bind_addr, "127.0.0.1:4000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.greeting.as_deref(), Some(&b"hey\n"[..]));
        assert!(config.write_timeout.is_none());
        assert!(!config.tcp_nodelay);
    }

    #[test]
    fn test_no_greeting() {
        let config = Args::parse_from(["chat-relay", "--no-greeting"]).into_config();

        assert!(config.greeting.is_none());
    }
}
