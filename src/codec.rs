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

//! Obfuscating stream codec for tunnel payloads.
//!
//! A middlebox on the path between the local machine and the relay resets
//! any connection that carries the byte sequence `*2\r\n$4\r\n`, so every
//! tunnel leg XORs its payload with a keystream derived from the leg's
//! rendezvous port. Both ends of a leg construct the same keystream from
//! the port alone; there is no IV, no authentication and no rekeying.
//! This is an obfuscator, not a confidentiality primitive.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Byte pattern that trips the middlebox connection reset.
pub const FORBIDDEN_SEQUENCE: &[u8] = b"*2\r\n$4\r\n";

/// Copy buffer size, sized to typical SSH channel windows.
const COPY_BUFFER_SIZE: usize = 8192;

/// RC4-style keystream generator keyed by a rendezvous port string.
///
/// The ASCII digits of the port, right-padded with zeros to 32 bytes, seed
/// a ChaCha8 generator; its first 256 bytes form the RC4 key schedule.
/// Encoding and decoding are the same XOR operation, so a single `apply`
/// covers both directions as long as each side keeps its own instance.
pub struct StreamCodec {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl StreamCodec {
    pub fn new(port: &str) -> Self {
        let mut seed = [0u8; 32];
        let bytes = port.as_bytes();
        let n = bytes.len().min(seed.len());
        seed[..n].copy_from_slice(&bytes[..n]);

        let mut rng = ChaCha8Rng::from_seed(seed);
        let mut key = [0u8; 256];
        rng.fill_bytes(&mut key);

        let mut state = [0u8; 256];
        for (i, slot) in state.iter_mut().enumerate() {
            *slot = i as u8;
        }
        let mut j: u8 = 0;
        for i in 0..256 {
            j = j.wrapping_add(state[i]).wrapping_add(key[i]);
            state.swap(i, j as usize);
        }

        Self { state, i: 0, j: 0 }
    }

    /// XORs the keystream over `data` in place, advancing the stream.
    pub fn apply(&mut self, data: &mut [u8]) {
        for byte in data {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.state[self.i as usize]);
            self.state.swap(self.i as usize, self.j as usize);
            let k = self.state[self.i as usize].wrapping_add(self.state[self.j as usize]);
            *byte ^= self.state[k as usize];
        }
    }
}

/// Copies `reader` to `writer`, applying `codec` to every chunk in flight.
///
/// Returns the number of bytes moved. EOF on the reader ends the copy; the
/// first I/O error aborts it.
pub async fn copy_with_codec<R, W>(
    reader: &mut R,
    writer: &mut W,
    codec: &mut StreamCodec,
) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        codec.apply(&mut buf[..n]);
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform(port: &str, data: &[u8]) -> Vec<u8> {
        let mut codec = StreamCodec::new(port);
        let mut out = data.to_vec();
        codec.apply(&mut out);
        out
    }

    #[test]
    fn round_trip_restores_plaintext() {
        let plaintext: Vec<u8> = (0..=255u8).cycle().take(256 * 16).collect();

        let ciphertext = transform("12345", &plaintext);
        assert_ne!(ciphertext, plaintext);

        let decoded = transform("12345", &ciphertext);
        assert_eq!(decoded, plaintext);
    }

    #[test]
    fn same_port_produces_identical_keystreams() {
        let data = b"the quick brown fox jumps over the lazy dog";
        assert_eq!(transform("65533", data), transform("65533", data));
    }

    #[test]
    fn distinct_ports_produce_distinct_keystreams() {
        let data = vec![0u8; 64];
        assert_ne!(transform("10001", &data), transform("10002", &data));
    }

    #[test]
    fn chunked_and_whole_application_agree() {
        let data: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();
        let whole = transform("40000", &data);

        let mut codec = StreamCodec::new("40000");
        let mut chunked = data.clone();
        for chunk in chunked.chunks_mut(7) {
            codec.apply(chunk);
        }
        assert_eq!(chunked, whole);
    }

    #[test]
    fn forbidden_sequence_does_not_survive_encoding() {
        let mut plaintext = vec![b'x'; 200];
        plaintext[100..100 + FORBIDDEN_SEQUENCE.len()].copy_from_slice(FORBIDDEN_SEQUENCE);

        // The keystream is not guaranteed to perturb every alignment, so
        // allow a single unlucky port out of sixteen.
        let mut clean = 0;
        for port in 65520..65536u32 {
            let ciphertext = transform(&port.to_string(), &plaintext);
            let leaked = ciphertext
                .windows(FORBIDDEN_SEQUENCE.len())
                .any(|w| w == FORBIDDEN_SEQUENCE);
            if !leaked {
                clean += 1;
            }
        }
        assert!(clean >= 15, "only {clean} of 16 ports masked the sequence");
    }

    #[tokio::test]
    async fn copy_with_codec_transforms_the_stream() {
        let input = b"hello through the tunnel".to_vec();
        let mut reader = &input[..];
        let mut out = Vec::new();

        let mut codec = StreamCodec::new("23456");
        let moved = copy_with_codec(&mut reader, &mut out, &mut codec)
            .await
            .unwrap();

        assert_eq!(moved, input.len() as u64);
        assert_eq!(out, transform("23456", &input));
    }
}
