//! Simple SSH Server Example
//!
//! Runs the transport on one port, accepts `ssh-userauth` and declines
//! every login. Useful for watching a real client negotiate keys.
//!
//! Usage:
//!   cargo run --example simple_server [config.toml]
//!
//! Example config:
//!   listen_addr = "127.0.0.1:2222"
//!   banner = "Authorised use only"
//!
//! Then connect with a client:
//!   ssh -vv -p 2222 -o Ciphers=chacha20-poly1305@openssh.com \
//!       -o KexAlgorithms=curve25519-sha256 user@127.0.0.1

use ember_platform::TracingSink;
use ember_proto::ssh::config::SshServerConfig;
use ember_proto::ssh::server::SshServer;
use std::env;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match env::args().nth(1) {
        Some(path) => SshServerConfig::from_file(path)?,
        None => SshServerConfig {
            listen_addr: "127.0.0.1:2222".to_string(),
            ..SshServerConfig::default()
        },
    };

    let server = SshServer::bind(config, Arc::new(TracingSink)).await?;
    println!("SSH server listening on {}", server.local_addr()?);
    println!("Host key SHA256 (hex): {}", server.host_key_fingerprint());
    println!("Press Ctrl+C to stop");

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
