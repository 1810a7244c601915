//! The `forward` subcommand: a local TCP listener whose accepted
//! connections are each spliced through their own tunnel to one internal
//! server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::net::TcpStream;
use tokio::time::sleep;
use tracing::{error, info};

use crate::bastion::BastionClient;
use crate::cli::ForwardArgs;
use crate::config::RunConfig;
use crate::net;
use crate::tunnel;

pub async fn run(config: Arc<RunConfig>, args: ForwardArgs) -> Result<()> {
    let Some((server_host, server_port)) = args.server.rsplit_once(':') else {
        bail!("server address invalid, format: 'host:port'");
    };
    if server_host.is_empty() || server_port.is_empty() {
        bail!("server address invalid, format: 'host:port'");
    }
    if args.remote.is_empty() {
        bail!("remote host is empty");
    }

    let listen = resolve_listen(server_port, args.listen.as_deref());

    let client = Arc::new(BastionClient::connect(config.clone()).await?);

    let listener = net::listen_tcp4(&listen).await?;
    info!(listen = %listen, server = %args.server, remote = %args.remote, "forwarding");

    loop {
        match listener.accept().await {
            Ok((conn, peer)) => {
                let client = client.clone();
                let config = config.clone();
                let remote = args.remote.clone();
                let host = server_host.to_string();
                let port = server_port.to_string();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(client, config, remote, host, port, conn).await
                    {
                        error!(peer = %peer, error = %e, "forward connection");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "local accept");
                // Keep the loop out of a hot spin on persistent failures.
                sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_connection(
    client: Arc<BastionClient>,
    config: Arc<RunConfig>,
    remote: String,
    server_host: String,
    server_port: String,
    conn: TcpStream,
) -> Result<()> {
    let mut session = client.open_session(&remote).await?;
    let middle = tunnel::forward_middle(config.wait, &server_host, &server_port);
    tunnel::splice(conn, &mut session, &config, &middle).await
}

/// Defaults the listen address to the server's port on loopback; a bare
/// port gets the `127.0.0.1:` prefix.
fn resolve_listen(server_port: &str, listen: Option<&str>) -> String {
    let listen = listen.unwrap_or(server_port);
    if listen.contains(':') {
        listen.to_string()
    } else {
        format!("127.0.0.1:{listen}")
    }
}
