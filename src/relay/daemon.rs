// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Core of the `sncd` relay daemon.
//!
//! Each accepted initiator gets a fresh ephemeral rendezvous port; the
//! initiator learns the port from a one-line greeting, a single peer is
//! accepted on it, and the two connections are spliced with the codec
//! keyed by that port. One listener, one peer, one initiator per
//! rendezvous.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::codec::StreamCodec;

/// Deadline for pushing the greeting line to the initiator.
const GREETING_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RelayDaemon {
    rendezvous_timeout: Duration,
}

impl RelayDaemon {
    pub fn new(rendezvous_timeout: Duration) -> Self {
        Self { rendezvous_timeout }
    }

    /// Binds `0.0.0.0:<port>` and serves forever.
    pub async fn run(&self, port: u16) -> Result<()> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .with_context(|| format!("listen on tcp4 port {port}"))?;
        info!(port, "relay listening");
        self.run_on(listener).await
    }

    /// Serves rendezvous on an already-bound listener.
    pub async fn run_on(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((conn, peer)) => {
                    let rendezvous_timeout = self.rendezvous_timeout;
                    tokio::spawn(async move {
                        if let Err(e) = handle_initiator(conn, peer, rendezvous_timeout).await {
                            warn!(initiator = %peer, error = %e, "rendezvous failed");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept initiator");
                }
            }
        }
    }
}

async fn handle_initiator(
    mut initiator: TcpStream,
    initiator_addr: SocketAddr,
    rendezvous_timeout: Duration,
) -> Result<()> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .context("listen on a fresh rendezvous port")?;
    let port = listener
        .local_addr()
        .context("rendezvous listener address")?
        .port();

    timeout(
        GREETING_TIMEOUT,
        initiator.write_all(format!("{port}\n").as_bytes()),
    )
    .await
    .context("write rendezvous port: deadline exceeded")?
    .context("write rendezvous port")?;

    let (peer, peer_addr) = match timeout(rendezvous_timeout, listener.accept()).await {
        Ok(accepted) => accepted.context("accept rendezvous peer")?,
        Err(_) => {
            // Abandoned: the initiator never told anyone to dial in.
            anyhow::bail!(
                "no peer on port {port} within {}s",
                rendezvous_timeout.as_secs()
            );
        }
    };
    drop(listener);

    info!(initiator = %initiator_addr, port, peer = %peer_addr, "pipe established");
    let started = Instant::now();
    let key = port.to_string();

    let (initiator_rx, initiator_tx) = initiator.into_split();
    let (peer_rx, peer_tx) = peer.into_split();

    let down_codec = StreamCodec::new(&key);
    let down = tokio::spawn(pump(peer_rx, initiator_tx, down_codec));

    let up_codec = StreamCodec::new(&key);
    let up_bytes = pump(initiator_rx, peer_tx, up_codec).await;
    let down_bytes = down.await.unwrap_or(0);

    info!(
        initiator = %initiator_addr,
        port,
        peer = %peer_addr,
        up = up_bytes,
        down = down_bytes,
        elapsed = ?started.elapsed(),
        "pipe closed"
    );
    Ok(())
}

/// Moves bytes from `reader` to `writer` with the codec applied, then
/// half-closes the writer so EOF reaches the other side.
async fn pump<R, W>(mut reader: R, mut writer: W, mut codec: StreamCodec) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 8192];
    let mut total = 0u64;
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                codec.apply(&mut buf[..n]);
                if let Err(e) = writer.write_all(&buf[..n]).await {
                    debug!(error = %e, "pipe write");
                    break;
                }
                total += n as u64;
            }
            Err(e) => {
                debug!(error = %e, "pipe read");
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
    total
}
