// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Outbound transports.
//!
//! A [`Transport`] is opened once per worker and carries every line of the source. The
//! stream variant writes newline delimited lines to a TCP (optionally TLS) or UDP socket;
//! the batch variant wraps each line into a Lumberjack v2 batch of one event.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::errors::ReplayError;
use crate::policy::{format_address, BatchSettings};
use crate::source::Protocol;

pub mod batch;
pub mod stream;

pub use batch::BatchTransport;
pub use stream::StreamTransport;

/// Byte stream a transport can write to, plain or TLS wrapped.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxedIo = Box<dyn Io>;

pub enum Transport {
    Stream(StreamTransport),
    Batch(BatchTransport),
}

impl Transport {
    /// Connects to `host:port` with the strategy of `protocol`.
    pub async fn open(
        protocol: Protocol,
        host: &str,
        port: u16,
        tls: Option<Arc<ClientConfig>>,
        batch: BatchSettings,
    ) -> Result<Self, ReplayError> {
        match protocol {
            Protocol::Tcp => Ok(Self::Stream(
                StreamTransport::connect_tcp(host, port, tls).await?,
            )),
            Protocol::Udp => {
                if tls.is_some() {
                    return Err(ReplayError::Configuration(
                        "TLS is not supported over udp".to_string(),
                    ));
                }
                Ok(Self::Stream(StreamTransport::connect_udp(host, port).await?))
            }
            Protocol::Batch => Ok(Self::Batch(
                BatchTransport::connect(host, port, tls, batch).await?,
            )),
        }
    }

    pub async fn send_line(&mut self, line: &str) -> Result<(), ReplayError> {
        match self {
            Self::Stream(stream) => stream.send_line(line).await,
            Self::Batch(batch) => batch.send_line(line).await,
        }
    }

    /// Best-effort release of the connection; safe after a failed send and when repeated.
    pub async fn close(&mut self) {
        match self {
            Self::Stream(stream) => stream.close().await,
            Self::Batch(batch) => batch.close().await,
        }
    }

    pub fn address(&self) -> &str {
        match self {
            Self::Stream(stream) => stream.address(),
            Self::Batch(batch) => batch.address(),
        }
    }
}

/// Opens a TCP connection, wrapping it in TLS when a configuration is given.
pub(crate) async fn connect_stream(
    host: &str,
    port: u16,
    tls: Option<Arc<ClientConfig>>,
) -> Result<BoxedIo, ReplayError> {
    let address = format_address(host, port);
    let connect_error = |reason: String| ReplayError::Connect {
        address: address.clone(),
        reason,
    };

    let tcp = TcpStream::connect((host.trim_start_matches('[').trim_end_matches(']'), port))
        .await
        .map_err(|e| connect_error(e.to_string()))?;
    // lines are small, do not let Nagle hold them back
    tcp.set_nodelay(true)
        .map_err(|e| connect_error(e.to_string()))?;

    match tls {
        None => Ok(Box::new(tcp)),
        Some(config) => {
            let server_name = server_name(host).map_err(connect_error)?;
            let stream = TlsConnector::from(config)
                .connect(server_name, tcp)
                .await
                .map_err(|e| connect_error(format!("TLS handshake failed: {e}")))?;
            Ok(Box::new(stream))
        }
    }
}

fn server_name(host: &str) -> Result<ServerName<'static>, String> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(bare.to_string()).map_err(|e| format!("invalid server name {host}: {e}"))
}
