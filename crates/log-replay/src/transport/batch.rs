// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use chrono::Local;
use rustls::ClientConfig;
use serde_json::{Map, Value};
use tokio::time::timeout;
use tracing::debug;

use super::{connect_stream, BoxedIo};
use crate::errors::ReplayError;
use crate::lumberjack;
use crate::policy::{format_address, BatchSettings};

pub const TIMESTAMP_FIELD: &str = "@timestamp";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Lumberjack v2 delivery, one freshly stamped JSON event per batch.
pub struct BatchTransport {
    address: String,
    client: lumberjack::Client<BoxedIo>,
}

impl BatchTransport {
    pub async fn connect(
        host: &str,
        port: u16,
        tls: Option<Arc<ClientConfig>>,
        settings: BatchSettings,
    ) -> Result<Self, ReplayError> {
        let address = format_address(host, port);
        let io = timeout(settings.timeout, connect_stream(host, port, tls))
            .await
            .map_err(|_| ReplayError::Connect {
                address: address.clone(),
                reason: format!("timed out after {:?}", settings.timeout),
            })??;
        debug!("Connected to {address} over lumberjack");

        let config = lumberjack::ClientConfig {
            compression_level: settings.compression_level,
            timeout: settings.timeout,
        };
        Ok(Self {
            address,
            client: lumberjack::Client::new(io, config),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn send_line(&mut self, line: &str) -> Result<(), ReplayError> {
        let event = stamp_event(line, &current_timestamp())?;
        self.client
            .send(&[event])
            .await
            .map(|_| ())
            .map_err(|e| ReplayError::Send {
                address: self.address.clone(),
                reason: e.to_string(),
            })
    }

    pub async fn close(&mut self) {
        if let Err(e) = self.client.close().await {
            debug!("Error closing lumberjack client for {}: {e}", self.address);
        }
    }
}

pub fn current_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Parses `line` as a JSON object and overwrites its `@timestamp` with `now`.
///
/// The line must be an object that already carries the field; everything else about it
/// is left untouched, including field order.
pub fn stamp_event(line: &str, now: &str) -> Result<Value, ReplayError> {
    let mut event: Map<String, Value> = serde_json::from_str(line)
        .map_err(|e| ReplayError::Payload(format!("line is not a JSON object: {e}")))?;

    match event.get_mut(TIMESTAMP_FIELD) {
        Some(timestamp) => *timestamp = Value::String(now.to_string()),
        None => {
            return Err(ReplayError::Payload(format!(
                "{TIMESTAMP_FIELD} field not found in the event to overwrite"
            )))
        }
    }
    Ok(Value::Object(event))
}
