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

//! The `rsync` subcommand: run the stock rsync binary against an embedded
//! SSH server that tunnels its one exec channel through the jumper.

use std::process::Stdio;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use owo_colors::OwoColorize;
use russh::keys::load_secret_key;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::bastion::BastionClient;
use crate::cli::RsyncArgs;
use crate::config::RunConfig;
use crate::net;
use crate::shim::ShimHandler;

/// Which way the transfer goes and where, normalized so `remote` is always
/// the `host:path` side and `target` the local side.
#[derive(Debug, PartialEq, Eq)]
pub struct TransferPlan {
    pub upload: bool,
    pub remote: String,
    pub target: String,
}

impl TransferPlan {
    /// Decides upload vs download from the argument shapes.
    ///
    /// A `:` marks the remote side. With no `:` anywhere, an existing
    /// local path in `remote` means upload; otherwise there is nothing to
    /// transfer.
    pub fn resolve(remote: &str, target: &str) -> Result<Self> {
        if remote.contains(':') {
            return Ok(Self {
                upload: false,
                remote: remote.to_string(),
                target: target.to_string(),
            });
        }
        if target.contains(':') {
            std::fs::metadata(remote)
                .with_context(|| format!("local path {remote:?} does not exist"))?;
            return Ok(Self {
                upload: true,
                remote: target.to_string(),
                target: remote.to_string(),
            });
        }
        if std::fs::metadata(remote).is_ok() {
            if target.is_empty() {
                bail!("no remote specified");
            }
            return Ok(Self {
                upload: true,
                remote: target.to_string(),
                target: remote.to_string(),
            });
        }
        bail!("no file specified");
    }

    /// The host name to type at the jumper menu.
    pub fn menu_host(&self) -> &str {
        match self.remote.split_once(':') {
            Some((host, _)) => host,
            None => &self.remote,
        }
    }

    /// The path on the remote side.
    fn remote_path(&self) -> &str {
        match self.remote.split_once(':') {
            Some((_, path)) => path,
            None => "",
        }
    }
}

/// Builds the argument list for the local rsync subprocess.
///
/// rsync is pointed at `127.0.0.1` on the shim's port, so its `ssh` child
/// lands on the embedded server instead of a real sshd.
pub fn rsync_args(plan: &TransferPlan, shim_port: u16, update: bool) -> Vec<String> {
    let mut args = vec![
        "-avzhP".to_string(),
        "-e".to_string(),
        format!("ssh -p {shim_port}"),
    ];
    if update {
        args.push("-u".to_string());
    }
    let remote_spec = format!("127.0.0.1:{}", plan.remote_path());
    if plan.upload {
        args.push(plan.target.clone());
        args.push(remote_spec);
    } else {
        args.push(remote_spec);
        if plan.target.is_empty() {
            args.push(".".to_string());
        } else {
            args.push(plan.target.clone());
        }
    }
    args
}

pub async fn run(config: Arc<RunConfig>, args: RsyncArgs) -> Result<()> {
    let plan = TransferPlan::resolve(&args.remote, args.target.as_deref().unwrap_or(""))?;

    // The operator's key doubles as the shim host key; rsync's ssh has
    // never seen this "host" before anyway.
    let host_key = load_secret_key(&config.ssh_key, None)
        .with_context(|| format!("unable to read private key {:?}", config.ssh_key))?;

    let bastion = Arc::new(BastionClient::connect(config.clone()).await?);

    let listener = net::listen_tcp4(&format!("127.0.0.1:{}", args.listen))
        .await
        .context("bind embedded ssh server")?;
    let shim_port = listener.local_addr().context("shim listener address")?.port();

    let mut child = spawn_rsync(&config, &plan, shim_port, args.update)?;

    // Exactly one connection: the ssh that rsync spawns. The listener goes
    // away as soon as it arrives.
    let accepted = listener.accept().await;
    drop(listener);
    let (stream, peer) = match accepted {
        Ok(pair) => pair,
        Err(e) => {
            finish_rsync(&mut child).await;
            return Err(e).context("accept rsync connection");
        }
    };
    info!(peer = %peer, "rsync connected to embedded ssh server");

    let server_config = Arc::new(russh::server::Config {
        keys: vec![host_key],
        ..Default::default()
    });
    let handler = ShimHandler::new(config.clone(), bastion, plan.menu_host().to_string());

    match russh::server::run_stream(server_config, stream, handler).await {
        Ok(session) => {
            if let Err(e) = session.await {
                warn!(error = %e, "embedded ssh session");
            }
        }
        Err(e) => warn!(error = %e, "embedded ssh handshake"),
    }

    finish_rsync(&mut child).await;
    Ok(())
}

fn spawn_rsync(
    config: &RunConfig,
    plan: &TransferPlan,
    shim_port: u16,
    update: bool,
) -> Result<Child> {
    let args = rsync_args(plan, shim_port, update);
    if config.debug {
        println!("{} rsync {}", "$".green().bold(), args.join(" "));
    }
    Command::new("rsync")
        .args(&args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .context("start rsync")
}

/// Stops the subprocess if it is still running and reaps it.
async fn finish_rsync(child: &mut Child) {
    let _ = child.start_kill();
    match child.wait().await {
        Ok(status) => info!(%status, "rsync finished"),
        Err(e) => warn!(error = %e, "wait for rsync"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colon_in_remote_means_download() {
        let plan = TransferPlan::resolve("web01:/var/log/app", "./logs").unwrap();
        assert!(!plan.upload);
        assert_eq!(plan.remote, "web01:/var/log/app");
        assert_eq!(plan.target, "./logs");
        assert_eq!(plan.menu_host(), "web01");
    }

    #[test]
    fn colon_in_target_means_upload_and_swaps() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("payload.bin");
        std::fs::write(&local, b"data").unwrap();
        let local = local.to_string_lossy().into_owned();

        let plan = TransferPlan::resolve(&local, "web01:/tmp/payload.bin").unwrap();
        assert!(plan.upload);
        assert_eq!(plan.remote, "web01:/tmp/payload.bin");
        assert_eq!(plan.target, local);
    }

    #[test]
    fn upload_requires_the_local_path_to_exist() {
        let err =
            TransferPlan::resolve("/definitely/not/here", "web01:/tmp/x").unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn existing_local_path_without_colon_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().to_string_lossy().into_owned();

        let err = TransferPlan::resolve(&local, "").unwrap_err();
        assert_eq!(err.to_string(), "no remote specified");
    }

    #[test]
    fn nothing_resolvable_is_an_error() {
        let err = TransferPlan::resolve("/definitely/not/here", "").unwrap_err();
        assert_eq!(err.to_string(), "no file specified");
    }

    #[test]
    fn download_args_default_target_to_cwd() {
        let plan = TransferPlan {
            upload: false,
            remote: "web01:/var/log/app".to_string(),
            target: String::new(),
        };
        assert_eq!(
            rsync_args(&plan, 65222, false),
            ["-avzhP", "-e", "ssh -p 65222", "127.0.0.1:/var/log/app", "."]
        );
    }

    #[test]
    fn upload_args_put_the_local_path_first() {
        let plan = TransferPlan {
            upload: true,
            remote: "web01:/tmp/payload".to_string(),
            target: "./payload".to_string(),
        };
        assert_eq!(
            rsync_args(&plan, 50000, true),
            ["-avzhP", "-e", "ssh -p 50000", "-u", "./payload", "127.0.0.1:/tmp/payload"]
        );
    }
}
