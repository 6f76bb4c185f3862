// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Minimal Lumberjack v2 client, the framed protocol Beats shippers speak.
//!
//! A batch is written as a window frame announcing the number of events, followed by one
//! JSON data frame per event (sequence numbers start at 1), optionally wrapped in a single
//! zlib compressed frame. The server acknowledges with ACK frames carrying the highest
//! sequence it has processed; a batch completes once the last sequence is acknowledged.
//!
//! ```text
//! window:     '2' 'W' <u32 count>
//! json:       '2' 'J' <u32 seq> <u32 len> <len bytes>
//! compressed: '2' 'C' <u32 len> <len bytes of zlib>
//! ack:        '2' 'A' <u32 seq>
//! ```

use std::io::{self, Write};
use std::time::Duration;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::trace;

pub const PROTOCOL_VERSION: u8 = b'2';
pub const FRAME_WINDOW: u8 = b'W';
pub const FRAME_JSON: u8 = b'J';
pub const FRAME_COMPRESSED: u8 = b'C';
pub const FRAME_ACK: u8 = b'A';

#[derive(Debug, thiserror::Error)]
pub enum LumberjackError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("unable to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("client is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    pub compression_level: u32,
    pub timeout: Duration,
}

/// Lumberjack v2 client over any byte stream (plain TCP, TLS, or an in-memory pipe).
pub struct Client<S> {
    stream: Option<S>,
    config: ClientConfig,
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, config: ClientConfig) -> Self {
        Self {
            stream: Some(stream),
            config,
        }
    }

    /// Sends `events` as one window and waits for its final ACK.
    /// Returns the number of acknowledged events.
    pub async fn send(&mut self, events: &[Value]) -> Result<usize, LumberjackError> {
        if events.is_empty() {
            return Ok(0);
        }
        let frame = encode_batch(events, self.config.compression_level)?;
        let io_timeout = self.config.timeout;
        let stream = self.stream.as_mut().ok_or(LumberjackError::Closed)?;

        timeout(io_timeout, async {
            stream.write_all(&frame).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| LumberjackError::Timeout("write"))??;

        let expected = u32::try_from(events.len())
            .map_err(|_| LumberjackError::Protocol("batch too large".to_string()))?;
        timeout(io_timeout, await_ack(stream, expected))
            .await
            .map_err(|_| LumberjackError::Timeout("waiting for ACK"))??;

        Ok(events.len())
    }

    /// Shuts the stream down. Further calls are no-ops.
    pub async fn close(&mut self) -> Result<(), LumberjackError> {
        match self.stream.take() {
            Some(mut stream) => Ok(stream.shutdown().await?),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

async fn await_ack<S>(stream: &mut S, expected: u32) -> Result<(), LumberjackError>
where
    S: AsyncRead + Unpin,
{
    loop {
        let mut header = [0u8; 6];
        stream.read_exact(&mut header).await?;
        if header[0] != PROTOCOL_VERSION || header[1] != FRAME_ACK {
            return Err(LumberjackError::Protocol(format!(
                "expected ACK frame, got {:?}",
                &header[..2]
            )));
        }
        let seq = u32::from_be_bytes([header[2], header[3], header[4], header[5]]);
        trace!("Received ACK {seq}/{expected}");
        if seq == expected {
            return Ok(());
        }
        if seq > expected {
            return Err(LumberjackError::Protocol(format!(
                "ACK {seq} beyond window of {expected}"
            )));
        }
        // partial ACKs double as keep-alives while the server is busy
    }
}

/// Encodes a full batch: window frame, then data frames (compressed when `level > 0`).
pub fn encode_batch(events: &[Value], level: u32) -> Result<Vec<u8>, LumberjackError> {
    let count = u32::try_from(events.len())
        .map_err(|_| LumberjackError::Protocol("batch too large".to_string()))?;

    let mut body = Vec::new();
    for (seq, event) in (1u32..).zip(events) {
        let payload = serde_json::to_vec(event)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| LumberjackError::Protocol("event too large".to_string()))?;
        body.extend_from_slice(&[PROTOCOL_VERSION, FRAME_JSON]);
        body.extend_from_slice(&seq.to_be_bytes());
        body.extend_from_slice(&len.to_be_bytes());
        body.extend_from_slice(&payload);
    }

    let mut frame = Vec::with_capacity(body.len() + 12);
    frame.extend_from_slice(&[PROTOCOL_VERSION, FRAME_WINDOW]);
    frame.extend_from_slice(&count.to_be_bytes());

    if level == 0 {
        frame.extend_from_slice(&body);
        return Ok(frame);
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.min(9)));
    encoder.write_all(&body)?;
    let compressed = encoder.finish()?;
    let len = u32::try_from(compressed.len())
        .map_err(|_| LumberjackError::Protocol("compressed frame too large".to_string()))?;
    frame.extend_from_slice(&[PROTOCOL_VERSION, FRAME_COMPRESSED]);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&compressed);
    Ok(frame)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use serde_json::json;
    use std::io::Read;
    use tokio::io::duplex;

    fn config(level: u32) -> ClientConfig {
        ClientConfig {
            compression_level: level,
            timeout: Duration::from_secs(2),
        }
    }

    fn read_u32(bytes: &[u8], at: usize) -> u32 {
        u32::from_be_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    fn decode_data_frames(mut bytes: &[u8]) -> Vec<(u32, Value)> {
        let mut events = Vec::new();
        while !bytes.is_empty() {
            assert_eq!(&bytes[..2], b"2J");
            let seq = read_u32(bytes, 2);
            let len = read_u32(bytes, 6) as usize;
            events.push((seq, serde_json::from_slice(&bytes[10..10 + len]).unwrap()));
            bytes = &bytes[10 + len..];
        }
        events
    }

    #[test]
    fn test_uncompressed_batch_layout() {
        let frame = encode_batch(&[json!({"message": "a"}), json!({"message": "b"})], 0).unwrap();

        assert_eq!(&frame[..2], b"2W");
        assert_eq!(read_u32(&frame, 2), 2);
        let events = decode_data_frames(&frame[6..]);
        assert_eq!(events[0], (1, json!({"message": "a"})));
        assert_eq!(events[1], (2, json!({"message": "b"})));
    }

    #[test]
    fn test_compressed_batch_layout() {
        let frame = encode_batch(&[json!({"message": "zipped"})], 3).unwrap();

        assert_eq!(&frame[..2], b"2W");
        assert_eq!(read_u32(&frame, 2), 1);
        assert_eq!(&frame[6..8], b"2C");
        let len = read_u32(&frame, 8) as usize;
        assert_eq!(frame.len(), 12 + len);

        let mut body = Vec::new();
        ZlibDecoder::new(&frame[12..]).read_to_end(&mut body).unwrap();
        assert_eq!(decode_data_frames(&body), vec![(1, json!({"message": "zipped"}))]);
    }

    #[tokio::test]
    async fn test_send_waits_for_final_ack() {
        let (client_side, mut server_side) = duplex(64 * 1024);
        let mut client = Client::new(client_side, config(0));

        let server = tokio::spawn(async move {
            let mut header = [0u8; 6];
            server_side.read_exact(&mut header).await.unwrap();
            assert_eq!(&header[..2], b"2W");
            let mut frame_header = [0u8; 10];
            server_side.read_exact(&mut frame_header).await.unwrap();
            let len = read_u32(&frame_header, 6) as usize;
            let mut payload = vec![0u8; len];
            server_side.read_exact(&mut payload).await.unwrap();
            // keep-alive first, then the real ACK
            server_side.write_all(b"2A\0\0\0\0").await.unwrap();
            server_side.write_all(b"2A\0\0\0\x01").await.unwrap();
            serde_json::from_slice::<Value>(&payload).unwrap()
        });

        let sent = client.send(&[json!({"message": "x"})]).await.unwrap();
        assert_eq!(sent, 1);
        assert_eq!(server.await.unwrap(), json!({"message": "x"}));
    }

    #[tokio::test]
    async fn test_missing_ack_times_out() {
        let (client_side, _server_side) = duplex(64 * 1024);
        let mut client = Client::new(
            client_side,
            ClientConfig {
                compression_level: 0,
                timeout: Duration::from_millis(50),
            },
        );

        let result = client.send(&[json!({"message": "x"})]).await;
        assert!(matches!(result, Err(LumberjackError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_unexpected_frame_is_a_protocol_error() {
        let (client_side, mut server_side) = duplex(64 * 1024);
        let mut client = Client::new(client_side, config(0));
        server_side.write_all(b"2W\0\0\0\x01").await.unwrap();

        let result = client.send(&[json!({"message": "x"})]).await;
        assert!(matches!(result, Err(LumberjackError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client_side, _server_side) = duplex(1024);
        let mut client = Client::new(client_side, config(3));

        client.close().await.unwrap();
        client.close().await.unwrap();
        assert!(client.is_closed());
        assert!(matches!(
            client.send(&[json!({})]).await,
            Err(LumberjackError::Closed)
        ));
    }
}
