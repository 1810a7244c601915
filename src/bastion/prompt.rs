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

//! Byte-level primitives for driving the jumper's prompt.
//!
//! The jumper is a menu shell, not a protocol: the only reliable framing
//! is the final character of its prompt lines (`>` at the menu, `$` on a
//! target host). These helpers scan the shell output one byte at a time
//! so a prompt character embedded mid-stream is never missed.

use std::io::Write;

use anyhow::{anyhow, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound for a single drain read after a prompt.
const DRAIN_BUFFER_SIZE: usize = 1024 * 1024;

/// Reads until one of `stops` appears, returning everything consumed
/// including the stop byte. With `debug` the consumed bytes are echoed to
/// the local terminal once the scan ends.
pub async fn discard_until<R>(reader: &mut R, stops: &[u8], debug: bool) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut consumed = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    let mut error = None;
    loop {
        match reader.read(&mut byte).await {
            Ok(0) => {
                error = Some(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "shell output ended before a prompt",
                ));
                break;
            }
            Ok(_) => {
                consumed.push(byte[0]);
                if stops.contains(&byte[0]) {
                    break;
                }
            }
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }
    if debug && !consumed.is_empty() {
        dump(&consumed);
    }
    match error {
        Some(e) => Err(e),
        None => Ok(consumed),
    }
}

/// Performs one read of up to 1 MiB, discarding whatever arrives.
///
/// Used to swallow the whitespace the shell emits right after a prompt
/// character, so the next scan starts on fresh output.
pub async fn drain_pending<R>(reader: &mut R, debug: bool) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; DRAIN_BUFFER_SIZE];
    let n = reader.read(&mut buf).await?;
    if debug && n > 0 {
        dump(&buf[..n]);
    }
    Ok(n)
}

/// Scans the output following a hop command.
///
/// `$` means the jumper connected us to the target host. `>` means the hop
/// failed and we are back at the menu; everything printed before the final
/// prompt line is the jumper's error message.
pub async fn hop_outcome<R>(reader: &mut R, debug: bool) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let output = discard_until(reader, b"$>", debug).await?;
    if output.ends_with(b"$") {
        return Ok(());
    }
    let lines: Vec<&[u8]> = output.split(|&b| b == b'\n').collect();
    let message = lines[..lines.len() - 1].join(&b'\n');
    Err(anyhow!("{}", String::from_utf8_lossy(&message)))
}

fn dump(bytes: &[u8]) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(bytes);
    let _ = stdout.flush();
}
