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

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::RunConfig;
use crate::net;

/// Deadline for the relay's one-line greeting.
const GREETING_TIMEOUT: Duration = Duration::from_secs(10);

/// One reserved rendezvous on the relay.
///
/// `conn` is the locally held leg; the peer end must dial `host:port` to be
/// spliced with it. Dropping `conn` tears the rendezvous down, and `port`
/// keys the codec for this leg.
pub struct RelayRendezvous {
    pub conn: TcpStream,
    pub host: String,
    pub port: String,
}

/// Reserves a fresh rendezvous port on the relay.
///
/// Dials the relay, then reads the newline-terminated decimal port it just
/// started listening on. The port line is never echoed in debug mode, so
/// rendezvous ports stay out of the operator's terminal.
pub async fn alloc_rendezvous(config: &RunConfig) -> Result<RelayRendezvous> {
    let Some((host, _)) = config.proxy.rsplit_once(':') else {
        bail!("proxy address {:?} invalid, format: 'host:port'", config.proxy);
    };
    if host.is_empty() {
        bail!("proxy address {:?} has no host", config.proxy);
    }

    let mut conn = net::dial_tcp4(&config.proxy, config.wait_duration()).await?;

    let line = timeout(GREETING_TIMEOUT, read_port_line(&mut conn))
        .await
        .context("read allocated port: deadline exceeded")?
        .context("read allocated port")?;
    if line.is_empty() {
        bail!("relay sent an empty port line");
    }

    Ok(RelayRendezvous {
        conn,
        host: host.to_string(),
        port: line,
    })
}

async fn read_port_line<R>(reader: &mut R) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(8);
    loop {
        let byte = reader.read_u8().await?;
        if byte == b'\n' {
            return Ok(String::from_utf8_lossy(&line).into_owned());
        }
        line.push(byte);
    }
}
