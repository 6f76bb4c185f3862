// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collectors standing in for the destination of a replay.

#![allow(dead_code)]

use std::io::Read;
use std::sync::Arc;

use flate2::read::ZlibDecoder;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;

/// Listener on an ephemeral port of 127.0.0.1.
pub async fn bind() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("unable to bind listener");
    let port = listener.local_addr().expect("no local address").port();
    (listener, port)
}

/// Accepts `connections` connections and returns the lines each one received, in
/// connection order.
pub async fn collect_lines(listener: TcpListener, connections: usize) -> Vec<Vec<String>> {
    let mut handles = Vec::with_capacity(connections);
    for _ in 0..connections {
        let (socket, _) = listener.accept().await.expect("accept failed");
        handles.push(tokio::spawn(read_lines(socket)));
    }
    let mut received = Vec::with_capacity(connections);
    for handle in handles {
        received.push(handle.await.expect("reader panicked"));
    }
    received
}

/// Accepts a single TLS connection and returns its lines.
pub async fn collect_tls_lines(listener: TcpListener, acceptor: TlsAcceptor) -> Vec<String> {
    let (socket, _) = listener.accept().await.expect("accept failed");
    let stream = acceptor.accept(socket).await.expect("TLS accept failed");
    read_lines(stream).await
}

async fn read_lines<S: AsyncRead + Unpin>(stream: S) -> Vec<String> {
    let mut reader = BufReader::new(stream).lines();
    let mut lines = Vec::new();
    while let Ok(Some(line)) = reader.next_line().await {
        lines.push(line);
    }
    lines
}

/// Lumberjack v2 collector: decodes every batch, forwards the events and ACKs them.
pub fn spawn_lumberjack_collector(listener: TcpListener) -> mpsc::UnboundedReceiver<Value> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = serve_lumberjack(socket, tx).await;
            });
        }
    });
    rx
}

async fn serve_lumberjack<S>(mut stream: S, tx: mpsc::UnboundedSender<Value>) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let mut header = [0u8; 6];
        stream.read_exact(&mut header).await?;
        assert_eq!(&header[..2], b"2W", "batch must start with a window frame");
        let window = u32::from_be_bytes([header[2], header[3], header[4], header[5]]);

        let mut kind = [0u8; 2];
        stream.read_exact(&mut kind).await?;
        let body = match &kind {
            b"2C" => {
                let len = stream.read_u32().await? as usize;
                let mut compressed = vec![0u8; len];
                stream.read_exact(&mut compressed).await?;
                let mut body = Vec::new();
                ZlibDecoder::new(compressed.as_slice()).read_to_end(&mut body)?;
                body
            }
            b"2J" => {
                let mut body = kind.to_vec();
                let mut fixed = [0u8; 8];
                stream.read_exact(&mut fixed).await?;
                body.extend_from_slice(&fixed);
                let len = u32::from_be_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]) as usize;
                let mut payload = vec![0u8; len];
                stream.read_exact(&mut payload).await?;
                body.extend_from_slice(&payload);
                body
            }
            other => panic!("unexpected frame {other:?}"),
        };

        let mut last_seq = 0;
        let mut rest = body.as_slice();
        while !rest.is_empty() {
            assert_eq!(&rest[..2], b"2J");
            last_seq = u32::from_be_bytes([rest[2], rest[3], rest[4], rest[5]]);
            let len = u32::from_be_bytes([rest[6], rest[7], rest[8], rest[9]]) as usize;
            let event: Value = serde_json::from_slice(&rest[10..10 + len]).expect("invalid JSON");
            let _ = tx.send(event);
            rest = &rest[10 + len..];
        }
        assert_eq!(last_seq, window);

        let mut ack = b"2A".to_vec();
        ack.extend_from_slice(&last_seq.to_be_bytes());
        stream.write_all(&ack).await?;
    }
}

/// Self-signed server material plus a client certificate, written to a temp dir.
pub struct TlsMaterial {
    pub dir: tempfile::TempDir,
    pub ca: std::path::PathBuf,
    pub cert: std::path::PathBuf,
    pub key: std::path::PathBuf,
    pub acceptor: TlsAcceptor,
}

pub fn tls_material() -> TlsMaterial {
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

    let server = rcgen::generate_simple_self_signed(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
    ])
    .expect("server certificate");
    let client = rcgen::generate_simple_self_signed(vec!["replay-client".to_string()])
        .expect("client certificate");

    let dir = tempfile::TempDir::new().expect("temp dir");
    let ca = dir.path().join("ca.pem");
    let cert = dir.path().join("client.pem");
    let key = dir.path().join("client.key");
    std::fs::write(&ca, server.cert.pem()).expect("write ca");
    std::fs::write(&cert, client.cert.pem()).expect("write cert");
    std::fs::write(&key, client.key_pair.serialize_pem()).expect("write key");

    let server_config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .expect("protocol versions")
    .with_no_client_auth()
    .with_single_cert(
        vec![CertificateDer::from(server.cert.der().to_vec())],
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(server.key_pair.serialize_der())),
    )
    .expect("server config");

    TlsMaterial {
        dir,
        ca,
        cert,
        key,
        acceptor: TlsAcceptor::from(Arc::new(server_config)),
    }
}
