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

//! sncd binary - the data-plane relay daemon.
//!
//! Deployed on a host reachable from both the operator's machine and the
//! jumper's target network; everything else lives in `snc::relay`.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use snc::relay::RelayDaemon;

#[derive(Parser, Debug)]
#[command(
    name = "sncd",
    version,
    about = "Pairs two inbound TCP connections into one ciphered pipe",
    long_about = None
)]
struct Cli {
    #[arg(short = 'p', long, default_value_t = 65533, help = "Listen port")]
    port: u16,

    #[arg(
        short = 't',
        long,
        default_value_t = 60,
        help = "Rendezvous listen timeout in seconds"
    )]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging();

    RelayDaemon::new(Duration::from_secs(cli.timeout))
        .run(cli.port)
        .await
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_writer(std::io::stderr)
        .init();
}
