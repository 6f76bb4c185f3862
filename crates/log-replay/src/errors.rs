// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

/// Fatal replay errors. None of them are retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReplayError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to load credential {}: {reason}", path.display())]
    CredentialLoad { path: PathBuf, reason: String },

    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("failed to send to {address}: {reason}")]
    Send { address: String, reason: String },

    #[error("worker task did not complete: {0}")]
    Worker(String),
}

/// Errors raised while turning a manifest into a source registry.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("unable to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse manifest: {0}")]
    Parse(String),

    #[error("source {name}: unknown protocol '{protocol}', expected tcp, udp or batch")]
    UnknownProtocol { name: String, protocol: String },

    #[error("source {0} is declared more than once")]
    DuplicateSource(String),

    #[error("source {0} has neither a log path nor inline logs")]
    MissingLogs(String),

    #[error("source {0} requests TLS over udp, which is not supported")]
    SecureDatagram(String),
}
