use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use owo_colors::OwoColorize;
use russh::client;
use russh::keys::{load_secret_key, PrivateKeyWithHashAlg, PublicKey};
use russh::Pty;
use tokio::time::timeout;
use tracing::debug;

use crate::config::RunConfig;

use super::session::BastionSession;

/// One authenticated SSH transport to the jumper.
///
/// Lives for the length of an operation (the forward loop or one rsync
/// invocation); any number of interactive sessions can be opened from it.
pub struct BastionClient {
    handle: client::Handle<JumperHandler>,
    config: Arc<RunConfig>,
}

/// Accepts whatever host key the jumper presents.
struct JumperHandler;

impl client::Handler for JumperHandler {
    type Error = anyhow::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool> {
        Ok(true)
    }
}

impl BastionClient {
    /// Dials the jumper and authenticates with the configured private key.
    pub async fn connect(config: Arc<RunConfig>) -> Result<Self> {
        let (host, port) = config.jumper_addr()?;
        if config.debug {
            println!(
                "{} ssh -p {} {}@{}",
                "$".green().bold(),
                port,
                config.user,
                host
            );
        }

        let key = load_secret_key(&config.ssh_key, None)
            .with_context(|| format!("unable to read private key {:?}", config.ssh_key))?;

        let ssh_config = Arc::new(client::Config::default());
        let mut handle = timeout(
            config.wait_duration(),
            client::connect(ssh_config, (host.as_str(), port), JumperHandler),
        )
        .await
        .map_err(|_| anyhow!("dial {host}:{port}: timed out after {}s", config.wait))?
        .with_context(|| format!("dial {host}:{port}"))?;

        let hash = handle.best_supported_rsa_hash().await?.flatten();
        let auth = handle
            .authenticate_publickey(
                &config.user,
                PrivateKeyWithHashAlg::new(Arc::new(key), hash),
            )
            .await
            .context("publickey authentication")?;
        if !auth.success() {
            bail!("publickey authentication refused for user {:?}", config.user);
        }

        debug!(host, port, user = %config.user, "jumper transport established");
        Ok(Self { handle, config })
    }

    /// Opens an interactive shell on the jumper and hops to `target`.
    ///
    /// The shell gets an xterm PTY with echo disabled; once the menu prompt
    /// appears the target host name is typed in, and after a successful hop
    /// the session sits quiescent at the target's `$` prompt.
    pub async fn open_session(&self, target: &str) -> Result<BastionSession> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .context("open session channel")?;

        let modes = [
            (Pty::ECHO, 0),
            (Pty::TTY_OP_ISPEED, 14400),
            (Pty::TTY_OP_OSPEED, 14400),
        ];
        channel
            .request_pty(false, "xterm", 80, 40, 0, 0, &modes)
            .await
            .context("request pseudo terminal")?;
        channel
            .request_shell(false)
            .await
            .context("start login shell")?;

        let mut session = BastionSession::new(channel.into_stream(), self.config.debug);
        session.wait_menu_prompt().await?;
        session.hop(target).await?;
        Ok(session)
    }
}
