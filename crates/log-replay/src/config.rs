// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use crate::dispatcher::FailureMode;
use crate::errors::ReplayError;
use crate::policy::{BatchSettings, ReplayPolicy};
use crate::source::CredentialPaths;
use crate::tls::CredentialProvider;

pub const DEFAULT_MANIFEST: &str = "sources.json";

/// Operator settings for one replay invocation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Manifest describing the sources
    pub manifest: PathBuf,
    /// Destination host every source is replayed to
    pub destination_host: String,
    /// Port used instead of each source's own port
    pub port_override: Option<u16>,
    /// Source names to replay; empty replays everything
    pub sources: Vec<String>,
    pub loop_forever: bool,
    pub inter_turn_delay: Duration,
    /// Duplicate workers per source
    pub concurrency: usize,
    /// Default TLS credentials
    pub credentials: CredentialPaths,
    /// Resolve no TLS material at all
    pub skip_verify: bool,
    pub failure_mode: FailureMode,
    pub batch: BatchSettings,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from(DEFAULT_MANIFEST),
            destination_host: "127.0.0.1".to_string(),
            port_override: None,
            sources: Vec::new(),
            loop_forever: false,
            inter_turn_delay: Duration::ZERO,
            concurrency: 1,
            credentials: CredentialPaths::default(),
            skip_verify: false,
            failure_mode: FailureMode::Abort,
            batch: BatchSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl RunConfig {
    /// Splits a comma separated selection, dropping blanks.
    pub fn parse_selection(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn validate(&self) -> Result<(), ReplayError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ReplayError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }
        if self.skip_verify && !self.credentials.is_empty() {
            return Err(ReplayError::Configuration(
                "credential paths cannot be combined with skipping verification".to_string(),
            ));
        }
        self.policy().validate()
    }

    pub fn policy(&self) -> ReplayPolicy {
        ReplayPolicy {
            destination_host: self.destination_host.clone(),
            port_override: self.port_override,
            loop_forever: self.loop_forever,
            inter_turn_delay: self.inter_turn_delay,
            concurrency_per_source: self.concurrency,
            batch: self.batch,
        }
    }

    pub fn credential_provider(&self) -> CredentialProvider {
        if self.skip_verify {
            CredentialProvider::skip_verify()
        } else {
            CredentialProvider::new(self.credentials.clone())
        }
    }
}
