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

//! IPv4-only dial and listen helpers.
//!
//! The relay protocol and the target-side `nc -4` pipelines are pinned to
//! IPv4, so every socket on the local side resolves to an IPv4 address as
//! well.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::time::timeout;

async fn resolve_v4(addr: &str) -> Result<SocketAddr> {
    lookup_host(addr)
        .await
        .with_context(|| format!("resolve {addr:?}"))?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| anyhow!("no IPv4 address for {addr:?}"))
}

/// Connects to `addr` over IPv4, giving up after `wait`.
pub async fn dial_tcp4(addr: &str, wait: Duration) -> Result<TcpStream> {
    let target = resolve_v4(addr).await?;
    let stream = timeout(wait, TcpStream::connect(target))
        .await
        .map_err(|_| anyhow!("dial {addr:?}: timed out after {}s", wait.as_secs()))?
        .with_context(|| format!("dial {addr:?}"))?;
    Ok(stream)
}

/// Binds an IPv4 listener on `addr`.
pub async fn listen_tcp4(addr: &str) -> Result<TcpListener> {
    let target = resolve_v4(addr).await?;
    TcpListener::bind(target)
        .await
        .with_context(|| format!("listen on {addr:?}"))
}
