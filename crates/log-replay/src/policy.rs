// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::errors::ReplayError;
use crate::source::SourceRecord;

pub const DEFAULT_COMPRESSION_LEVEL: u32 = 3;
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings of the batch transport. The stream transport has no timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    /// zlib level 0-9, 0 disables the compressed frame
    pub compression_level: u32,
    pub timeout: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            timeout: DEFAULT_BATCH_TIMEOUT,
        }
    }
}

/// Pacing and fan-out of one invocation, shared read-only by every worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayPolicy {
    pub destination_host: String,
    /// Replaces every source's own port when set.
    pub port_override: Option<u16>,
    pub loop_forever: bool,
    /// Pause between two passes when looping.
    pub inter_turn_delay: Duration,
    /// Independent duplicate workers started per source.
    pub concurrency_per_source: usize,
    pub batch: BatchSettings,
}

impl Default for ReplayPolicy {
    fn default() -> Self {
        Self {
            destination_host: "127.0.0.1".to_string(),
            port_override: None,
            loop_forever: false,
            inter_turn_delay: Duration::ZERO,
            concurrency_per_source: 1,
            batch: BatchSettings::default(),
        }
    }
}

impl ReplayPolicy {
    pub fn validate(&self) -> Result<(), ReplayError> {
        if self.destination_host.trim().is_empty() {
            return Err(ReplayError::Configuration(
                "destination host cannot be empty".to_string(),
            ));
        }
        if self.concurrency_per_source == 0 {
            return Err(ReplayError::Configuration(
                "concurrency per source must be at least 1".to_string(),
            ));
        }
        if self.batch.compression_level > 9 {
            return Err(ReplayError::Configuration(format!(
                "compression level {} is out of range 0-9",
                self.batch.compression_level
            )));
        }
        if self.port_override == Some(0) {
            return Err(ReplayError::Configuration(
                "destination port must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn port_for(&self, source: &SourceRecord) -> u16 {
        self.port_override.unwrap_or_else(|| source.port())
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn address_for(&self, source: &SourceRecord) -> String {
        format_address(&self.destination_host, self.port_for(source))
    }
}

pub fn format_address(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
