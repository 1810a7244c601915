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

//! End-to-end tests for the relay daemon and its client-side allocator.

use std::path::PathBuf;
use std::time::Duration;

use snc::codec::StreamCodec;
use snc::relay::{alloc_rendezvous, RelayDaemon};
use snc::RunConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Starts a relay on an ephemeral port and returns its address.
async fn start_relay(rendezvous_timeout: Duration) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = RelayDaemon::new(rendezvous_timeout).run_on(listener).await;
    });
    addr
}

async fn read_port_line(conn: &mut TcpStream) -> String {
    let mut line = Vec::new();
    loop {
        let byte = conn.read_u8().await.unwrap();
        if byte == b'\n' {
            break;
        }
        line.push(byte);
    }
    String::from_utf8(line).unwrap()
}

fn transform(port: &str, data: &[u8]) -> Vec<u8> {
    let mut codec = StreamCodec::new(port);
    let mut out = data.to_vec();
    codec.apply(&mut out);
    out
}

fn config_with_proxy(addr: std::net::SocketAddr) -> RunConfig {
    RunConfig {
        jumper: "gw.corp".to_string(),
        user: "ops".to_string(),
        ssh_key: PathBuf::from("/dev/null"),
        proxy: addr.to_string(),
        wait: 3,
        debug: false,
    }
}

/// The initiator speaks ciphertext; the peer speaks plaintext. The relay
/// applies the port-keyed codec in both directions, so each end decodes
/// what it reads with one codec instance of its own.
#[tokio::test]
async fn relay_pairs_and_splices_both_directions() {
    let relay = start_relay(Duration::from_secs(60)).await;

    let mut initiator = TcpStream::connect(relay).await.unwrap();
    let port = read_port_line(&mut initiator).await;
    assert!(!port.is_empty());

    let mut peer = TcpStream::connect(("127.0.0.1", port.parse::<u16>().unwrap()))
        .await
        .unwrap();

    // initiator -> peer: the relay decodes, the peer decodes once more.
    initiator.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    peer.read_exact(&mut buf).await.unwrap();
    assert_eq!(transform(&port, &buf), b"hello");

    // peer -> initiator, symmetric.
    peer.write_all(b"world").await.unwrap();
    let mut buf = [0u8; 5];
    initiator.read_exact(&mut buf).await.unwrap();
    assert_eq!(transform(&port, &buf), b"world");

    // Half-closes propagate independently in each direction.
    initiator.shutdown().await.unwrap();
    assert_eq!(peer.read(&mut [0u8; 1]).await.unwrap(), 0);
    peer.shutdown().await.unwrap();
    assert_eq!(initiator.read(&mut [0u8; 1]).await.unwrap(), 0);
}

#[tokio::test]
async fn concurrent_rendezvous_get_distinct_ports() {
    let relay = start_relay(Duration::from_secs(60)).await;

    let mut first = TcpStream::connect(relay).await.unwrap();
    let mut second = TcpStream::connect(relay).await.unwrap();

    let first_port = read_port_line(&mut first).await;
    let second_port = read_port_line(&mut second).await;
    assert_ne!(first_port, second_port);
}

#[tokio::test]
async fn abandoned_rendezvous_times_out() {
    let relay = start_relay(Duration::from_secs(1)).await;

    let mut initiator = TcpStream::connect(relay).await.unwrap();
    let port: u16 = read_port_line(&mut initiator).await.parse().unwrap();

    // Nobody dials the rendezvous port; after the timeout it is gone.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn allocator_reserves_a_dialable_rendezvous() {
    let relay = start_relay(Duration::from_secs(60)).await;
    let config = config_with_proxy(relay);

    let rendezvous = alloc_rendezvous(&config).await.unwrap();
    assert_eq!(rendezvous.host, "127.0.0.1");

    let mut peer = TcpStream::connect((
        rendezvous.host.as_str(),
        rendezvous.port.parse::<u16>().unwrap(),
    ))
    .await
    .unwrap();

    // The held leg and the dialed peer are now one pipe.
    let mut conn = rendezvous.conn;
    conn.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    peer.read_exact(&mut buf).await.unwrap();
    assert_eq!(transform(&rendezvous.port, &buf), b"ping");
}

#[tokio::test]
async fn dropping_the_held_leg_tears_the_rendezvous_down() {
    let relay = start_relay(Duration::from_secs(60)).await;
    let config = config_with_proxy(relay);

    let rendezvous = alloc_rendezvous(&config).await.unwrap();
    let addr = (
        rendezvous.host.clone(),
        rendezvous.port.parse::<u16>().unwrap(),
    );

    let mut peer = TcpStream::connect(addr).await.unwrap();
    drop(rendezvous);

    // With the initiator gone the peer's read half drains immediately.
    let mut buf = [0u8; 1];
    assert_eq!(peer.read(&mut buf).await.unwrap(), 0);
}
