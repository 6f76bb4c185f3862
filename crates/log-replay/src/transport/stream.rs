// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use rustls::ClientConfig;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tracing::debug;

use super::{connect_stream, BoxedIo};
use crate::errors::ReplayError;
use crate::policy::format_address;

enum Connection {
    Tcp(BoxedIo),
    Udp(UdpSocket),
    Closed,
}

/// Newline delimited delivery without batching or acknowledgment.
pub struct StreamTransport {
    address: String,
    connection: Connection,
}

impl StreamTransport {
    pub async fn connect_tcp(
        host: &str,
        port: u16,
        tls: Option<Arc<ClientConfig>>,
    ) -> Result<Self, ReplayError> {
        let secure = tls.is_some();
        let io = connect_stream(host, port, tls).await?;
        let address = format_address(host, port);
        debug!("Connected to {address} over tcp (tls: {secure})");
        Ok(Self {
            address,
            connection: Connection::Tcp(io),
        })
    }

    pub async fn connect_udp(host: &str, port: u16) -> Result<Self, ReplayError> {
        let address = format_address(host, port);
        let connect_error = |e: std::io::Error| ReplayError::Connect {
            address: address.clone(),
            reason: e.to_string(),
        };
        let bind = if host.contains(':') {
            "[::]:0"
        } else {
            "0.0.0.0:0"
        };
        let socket = UdpSocket::bind(bind).await.map_err(connect_error)?;
        socket
            .connect((host.trim_start_matches('[').trim_end_matches(']'), port))
            .await
            .map_err(connect_error)?;
        debug!("Connected to {address} over udp");
        Ok(Self {
            address,
            connection: Connection::Udp(socket),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn send_line(&mut self, line: &str) -> Result<(), ReplayError> {
        let mut payload = Vec::with_capacity(line.len() + 1);
        payload.extend_from_slice(line.as_bytes());
        payload.push(b'\n');

        let result = match &mut self.connection {
            Connection::Tcp(io) => match io.write_all(&payload).await {
                // TLS sessions buffer records until flushed
                Ok(()) => io.flush().await,
                Err(e) => Err(e),
            },
            Connection::Udp(socket) => socket.send(&payload).await.map(|_| ()),
            Connection::Closed => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "transport is closed",
            )),
        };
        result.map_err(|e| ReplayError::Send {
            address: self.address.clone(),
            reason: e.to_string(),
        })
    }

    pub async fn close(&mut self) {
        match std::mem::replace(&mut self.connection, Connection::Closed) {
            Connection::Tcp(mut io) => {
                if let Err(e) = io.shutdown().await {
                    debug!("Error shutting down connection to {}: {e}", self.address);
                }
            }
            Connection::Udp(_) | Connection::Closed => {}
        }
    }
}
