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

use anyhow::{Context, Result};
use russh::{client, ChannelStream};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};

use super::prompt;

const EOT: u8 = 0x04;
const ETX: u8 = 0x03;

/// One interactive shell on the jumper.
///
/// After a successful hop the shell sits at the target host's `$` prompt
/// with echo disabled, so commands written here do not re-emerge in the
/// output stream. Callers must not interleave writes; the session is
/// single-caller by construction.
pub struct BastionSession {
    reader: ReadHalf<ChannelStream<client::Msg>>,
    writer: WriteHalf<ChannelStream<client::Msg>>,
    debug: bool,
}

impl BastionSession {
    pub(crate) fn new(stream: ChannelStream<client::Msg>, debug: bool) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader,
            writer,
            debug,
        }
    }

    /// Consumes the banner up to the menu prompt `>` plus any trailing
    /// whitespace the menu emits after it.
    pub(crate) async fn wait_menu_prompt(&mut self) -> Result<()> {
        prompt::discard_until(&mut self.reader, b">", self.debug)
            .await
            .context("wait for jumper prompt")?;
        prompt::drain_pending(&mut self.reader, self.debug)
            .await
            .context("drain after jumper prompt")?;
        Ok(())
    }

    /// Types the target host name at the menu and waits for the outcome;
    /// on success disables echo on the target shell.
    pub(crate) async fn hop(&mut self, target: &str) -> Result<()> {
        self.send(format!("{target}\r").as_bytes())
            .await
            .context("send target host")?;
        prompt::hop_outcome(&mut self.reader, self.debug)
            .await
            .with_context(|| format!("connect to {target:?}"))?;
        prompt::drain_pending(&mut self.reader, self.debug)
            .await
            .context("drain after hop")?;
        self.run_quiet("stty -echo\r").await?;
        Ok(())
    }

    /// Writes raw bytes into the shell's stdin.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Runs a command line (must end in `\r`) and waits for the next `$`.
    pub async fn run(&mut self, cmd: &str) -> Result<()> {
        if self.debug {
            println!("{}", cmd.trim_end_matches('\r'));
        }
        self.send(cmd.as_bytes())
            .await
            .with_context(|| format!("write command {cmd:?}"))?;
        self.wait_ps1().await
    }

    async fn run_quiet(&mut self, cmd: &str) -> Result<()> {
        self.send(cmd.as_bytes())
            .await
            .with_context(|| format!("write command {cmd:?}"))?;
        self.wait_ps1().await
    }

    /// Consumes output until the target prompt `$` reappears.
    pub async fn wait_ps1(&mut self) -> Result<()> {
        prompt::discard_until(&mut self.reader, b"$", self.debug)
            .await
            .context("wait for target prompt")?;
        prompt::drain_pending(&mut self.reader, self.debug)
            .await
            .context("drain after target prompt")?;
        Ok(())
    }

    /// Sends EOT (`^D`).
    pub async fn send_eof(&mut self) -> Result<()> {
        if self.debug {
            println!("^D");
        }
        self.send(&[EOT]).await.context("send EOF")
    }

    /// Sends ETX (`^C`), the emergency abort for a running pipeline.
    pub async fn send_term(&mut self) -> Result<()> {
        if self.debug {
            println!("^C");
        }
        self.send(&[ETX]).await.context("send TERM")
    }

    /// Leaves the target shell and then the jumper menu: wait for `$`,
    /// EOT out of the target, wait for `>`, EOT out of the menu.
    pub async fn quit(&mut self) -> Result<()> {
        self.wait_ps1().await?;
        self.send_eof().await?;
        prompt::discard_until(&mut self.reader, b">", self.debug)
            .await
            .context("wait for jumper prompt")?;
        prompt::drain_pending(&mut self.reader, self.debug)
            .await
            .context("drain after jumper prompt")?;
        self.send_eof().await
    }
}
