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

//! The embedded SSH server that the locally spawned rsync connects to.
//!
//! rsync-over-SSH only needs one session channel, `env`, `exec` and a byte
//! pipe, so this server speaks exactly that much of the protocol and feeds
//! the exec channel into a tunnel instead of a local shell. The bastion
//! never sees SSH; it just runs `nc | rsync --server ... | nc`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use russh::keys::HashAlg;
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId, MethodKind, MethodSet};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::bastion::{BastionClient, BastionSession};
use crate::config::RunConfig;
use crate::tunnel;

pub struct ShimHandler {
    config: Arc<RunConfig>,
    bastion: Arc<BastionClient>,
    /// Host name typed at the jumper menu.
    remote_host: String,
    /// The hopped shell backing this connection's channels. Exec holds the
    /// lock for the whole splice, serializing any late requests behind it.
    shell: Arc<Mutex<Option<BastionSession>>>,
    channels: HashMap<ChannelId, Channel<Msg>>,
}

impl ShimHandler {
    pub fn new(config: Arc<RunConfig>, bastion: Arc<BastionClient>, remote_host: String) -> Self {
        Self {
            config,
            bastion,
            remote_host,
            shell: Arc::new(Mutex::new(None)),
            channels: HashMap::new(),
        }
    }
}

impl russh::server::Handler for ShimHandler {
    type Error = anyhow::Error;

    async fn auth_none(&mut self, _user: &str) -> Result<Auth> {
        let mut methods = MethodSet::empty();
        methods.push(MethodKind::PublicKey);
        Ok(Auth::Reject {
            proceed_with_methods: Some(methods),
            partial_success: false,
        })
    }

    /// Any key the local rsync presents is fine; the fingerprint is only
    /// recorded.
    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &russh::keys::PublicKey,
    ) -> Result<Auth> {
        debug!(
            user,
            fingerprint = %public_key.fingerprint(HashAlg::Sha256),
            "accepting rsync client key"
        );
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool> {
        // One hop per connection, made as soon as rsync asks for a channel
        // so env/exec find the target shell ready.
        let mut shell = self.shell.lock().await;
        if shell.is_none() {
            *shell = Some(self.bastion.open_session(&self.remote_host).await?);
        }
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn env_request(
        &mut self,
        channel_id: ChannelId,
        variable_name: &str,
        variable_value: &str,
        session: &mut Session,
    ) -> Result<()> {
        let cmd = format!("export {variable_name}=\"{variable_value}\"\r");
        let mut shell = self.shell.lock().await;
        let shell = shell
            .as_mut()
            .ok_or_else(|| anyhow!("env request before a session channel"))?;
        shell.run(&cmd).await?;
        let _ = session.channel_success(channel_id);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<()> {
        let command = match std::str::from_utf8(data) {
            Ok(cmd) => cmd.to_string(),
            Err(e) => {
                warn!(error = %e, "exec command is not UTF-8");
                let _ = session.channel_failure(channel_id);
                return Ok(());
            }
        };
        let Some(channel) = self.channels.remove(&channel_id) else {
            warn!("exec request for unknown channel");
            let _ = session.channel_failure(channel_id);
            return Ok(());
        };

        debug!(command = %command, "exec through tunnel");

        let config = self.config.clone();
        let shell = self.shell.clone();
        let handle = session.handle();

        // Success goes out before the copy starts; the real exit status of
        // the target command is not recoverable through the nc pipeline.
        let _ = session.channel_success(channel_id);

        tokio::spawn(async move {
            let mut shell = shell.lock().await;
            let status = match shell.as_mut() {
                Some(shell) => {
                    match tunnel::splice(channel.into_stream(), shell, &config, &command).await {
                        Ok(()) => 0,
                        Err(e) => {
                            warn!(error = %e, "exec splice");
                            1
                        }
                    }
                }
                None => {
                    warn!("exec request before a session channel");
                    1
                }
            };
            let _ = handle.exit_status_request(channel_id, status).await;
            let _ = handle.eof(channel_id).await;
            let _ = handle.close(channel_id).await;
        });

        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel_id: ChannelId,
        _session: &mut Session,
    ) -> Result<()> {
        self.channels.remove(&channel_id);
        Ok(())
    }
}
