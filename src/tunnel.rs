//! The tunnel splicer: two one-way relay rendezvous stitched through a
//! target-host `nc` pipeline into one bidirectional byte stream.
//!
//! Each tunnel leg is unidirectional on purpose. A single `nc` in the
//! middle of a pipeline cannot half-close one direction of a duplex
//! socket, so EOF would never propagate cleanly; `--recv-only` and
//! `--send-only` legs drain and close independently.

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::bastion::BastionSession;
use crate::codec::{copy_with_codec, StreamCodec};
use crate::config::RunConfig;
use crate::relay::{alloc_rendezvous, RelayRendezvous};

/// Composes the target-side command line for one tunnel.
///
/// `middle` is what sits between the two `nc` legs: another `nc` dialing
/// the forwarded server, or the exec command rsync asked for. The line
/// ends in `\r` so the shell runs it as typed.
pub fn pipeline_command(
    wait: u64,
    recv: &RelayRendezvous,
    send: &RelayRendezvous,
    middle: &str,
) -> String {
    format!(
        "nc -4 -w {wait} --recv-only {} {} | {middle} | nc -4 -w {wait} --send-only {} {}\r",
        recv.host, recv.port, send.host, send.port
    )
}

/// The middle of a forward-mode pipeline: a plain `nc` to the server.
pub fn forward_middle(wait: u64, host: &str, port: &str) -> String {
    format!("nc -4 -w {wait} {host} {port}")
}

/// Couples `local` to `middle` running on the target host.
///
/// Allocates the two rendezvous, starts the pipeline through the session
/// without waiting for a prompt (the command runs until its pipes close),
/// then copies both directions until they drain. Local EOF closes
/// the receive leg, which ends the target's first `nc`; the target side
/// closing ends the ingress copy. Copy errors are logged and never abort
/// the opposite direction.
pub async fn splice<S>(
    local: S,
    session: &mut BastionSession,
    config: &RunConfig,
    middle: &str,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let recv = alloc_rendezvous(config).await?;
    let send = alloc_rendezvous(config).await?;

    let cmd = pipeline_command(config.wait, &recv, &send, middle);
    if config.debug {
        println!("{}", cmd.trim_end_matches('\r'));
    }
    session
        .send(cmd.as_bytes())
        .await
        .context("write pipeline command")?;

    let (mut local_rx, mut local_tx) = tokio::io::split(local);
    let mut egress_codec = StreamCodec::new(&recv.port);
    let mut ingress_codec = StreamCodec::new(&send.port);
    let mut recv_conn = recv.conn;
    let mut send_conn = send.conn;

    let egress = tokio::spawn(async move {
        if let Err(e) = copy_with_codec(&mut local_rx, &mut recv_conn, &mut egress_codec).await {
            warn!(error = %e, "local -> tunnel");
        }
        let _ = recv_conn.shutdown().await;
    });

    if let Err(e) = copy_with_codec(&mut send_conn, &mut local_tx, &mut ingress_codec).await {
        warn!(error = %e, "tunnel -> local");
    }
    let _ = local_tx.shutdown().await;

    let _ = egress.await;
    Ok(())
}
