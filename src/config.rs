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

//! Process-wide run configuration.
//!
//! Resolved once at startup from the CLI and the environment, then shared
//! read-only behind an `Arc`. Components take it as a parameter; there is
//! no mutable global.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::cli::Cli;

const DEFAULT_SSH_PORT: u16 = 22;

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Jump server address, `host[:port]`.
    pub jumper: String,
    /// SSH user on the jump server.
    pub user: String,
    /// Private key used both for jumper auth and as the shim host key.
    pub ssh_key: PathBuf,
    /// Relay server address, `host:port`.
    pub proxy: String,
    /// Dial and `nc -w` inactivity timeout, seconds.
    pub wait: u64,
    pub debug: bool,
}

impl RunConfig {
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let user = match &cli.user {
            Some(user) => user.clone(),
            None => std::env::var("USER").unwrap_or_default(),
        };

        let ssh_key = match &cli.ssh_key {
            Some(path) => path.clone(),
            None => {
                let home = std::env::var("HOME")
                    .context("ENV: `HOME` not found and no --ssh-key given")?;
                PathBuf::from(home).join(".ssh/id_rsa")
            }
        };

        Ok(Self {
            jumper: cli.jumper.clone(),
            user,
            ssh_key,
            proxy: cli.proxy.clone(),
            wait: cli.wait,
            debug: cli.debug,
        })
    }

    /// Splits the jumper address into host and port, defaulting to 22.
    pub fn jumper_addr(&self) -> Result<(String, u16)> {
        match self.jumper.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port
                    .parse()
                    .with_context(|| format!("jumper port in {:?} is not a number", self.jumper))?;
                if host.is_empty() {
                    bail!("jumper address {:?} has no host", self.jumper);
                }
                Ok((host.to_string(), port))
            }
            None => {
                if self.jumper.is_empty() {
                    bail!("jumper address is empty");
                }
                Ok((self.jumper.clone(), DEFAULT_SSH_PORT))
            }
        }
    }

    pub fn wait_duration(&self) -> Duration {
        Duration::from_secs(self.wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_jumper(jumper: &str) -> RunConfig {
        RunConfig {
            jumper: jumper.to_string(),
            user: "ops".to_string(),
            ssh_key: PathBuf::from("/home/ops/.ssh/id_rsa"),
            proxy: "relay:65533".to_string(),
            wait: 3,
            debug: false,
        }
    }

    #[test]
    fn jumper_port_defaults_to_22() {
        let (host, port) = config_with_jumper("gw.corp").jumper_addr().unwrap();
        assert_eq!(host, "gw.corp");
        assert_eq!(port, 22);
    }

    #[test]
    fn explicit_jumper_port_is_kept() {
        let (host, port) = config_with_jumper("gw.corp:2222").jumper_addr().unwrap();
        assert_eq!(host, "gw.corp");
        assert_eq!(port, 2222);
    }

    #[test]
    fn bad_jumper_port_is_rejected() {
        assert!(config_with_jumper("gw.corp:ssh").jumper_addr().is_err());
        assert!(config_with_jumper(":22").jumper_addr().is_err());
        assert!(config_with_jumper("").jumper_addr().is_err());
    }
}
