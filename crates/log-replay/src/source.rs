// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Source records and the registry the dispatcher resolves selections against.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

/// Delivery strategy of a source, resolved once when the manifest is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Newline delimited lines over a TCP stream, optionally TLS wrapped.
    Tcp,
    /// One datagram per line.
    Udp,
    /// Lumberjack v2 batches, one JSON event per batch.
    Batch,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Batch => "batch",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            // shippers built on beats call the protocol by their name
            "batch" | "beats" | "lumberjack" => Ok(Self::Batch),
            other => Err(other.to_string()),
        }
    }
}

/// CA bundle, client certificate and private key locations.
///
/// Any field may be absent; absent fields of a per-source override are filled
/// from the process defaults one by one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CredentialPaths {
    pub ca: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

impl CredentialPaths {
    pub fn new(
        ca: impl Into<PathBuf>,
        cert: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ca: Some(ca.into()),
            cert: Some(cert.into()),
            key: Some(key.into()),
        }
    }

    /// Builds paths from possibly empty strings, treating "" as absent.
    pub fn from_optional(ca: Option<&str>, cert: Option<&str>, key: Option<&str>) -> Self {
        fn non_empty(value: Option<&str>) -> Option<PathBuf> {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        }
        Self {
            ca: non_empty(ca),
            cert: non_empty(cert),
            key: non_empty(key),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ca.is_none() && self.cert.is_none() && self.key.is_none()
    }

    /// Resolves relative paths against `base`; absolute paths are kept.
    #[must_use]
    pub fn relative_to(&self, base: &Path) -> CredentialPaths {
        let resolve = |path: &Option<PathBuf>| path.as_ref().map(|p| base.join(p));
        CredentialPaths {
            ca: resolve(&self.ca),
            cert: resolve(&self.cert),
            key: resolve(&self.key),
        }
    }

    /// Field by field fallback: every absent field is taken from `defaults`.
    #[must_use]
    pub fn or(&self, defaults: &CredentialPaths) -> CredentialPaths {
        CredentialPaths {
            ca: self.ca.clone().or_else(|| defaults.ca.clone()),
            cert: self.cert.clone().or_else(|| defaults.cert.clone()),
            key: self.key.clone().or_else(|| defaults.key.clone()),
        }
    }
}

/// One replay target. Immutable once built.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    name: String,
    protocol: Protocol,
    port: u16,
    secure: bool,
    credential_override: Option<CredentialPaths>,
    lines: Arc<[String]>,
}

impl SourceRecord {
    pub fn new(
        name: impl Into<String>,
        protocol: Protocol,
        port: u16,
        lines: impl Into<Arc<[String]>>,
    ) -> Self {
        Self {
            name: name.into(),
            protocol,
            port,
            secure: false,
            credential_override: None,
            lines: lines.into(),
        }
    }

    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: CredentialPaths) -> Self {
        self.credential_override = if credentials.is_empty() {
            None
        } else {
            Some(credentials)
        };
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn credential_override(&self) -> Option<&CredentialPaths> {
        self.credential_override.as_ref()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

/// Row of the sources listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub name: String,
    pub protocol: Protocol,
    pub port: u16,
    pub secure: bool,
    pub line_count: usize,
}

/// Read-only map of source name to record, ordered by name.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, Arc<SourceRecord>>,
}

impl SourceRegistry {
    /// Builds a registry, rejecting duplicate names with the offending name.
    pub fn new(records: impl IntoIterator<Item = SourceRecord>) -> Result<Self, String> {
        let mut sources = BTreeMap::new();
        for record in records {
            let name = record.name.clone();
            if sources.insert(name.clone(), Arc::new(record)).is_some() {
                return Err(name);
            }
        }
        Ok(Self { sources })
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<SourceRecord>> {
        self.sources.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SourceRecord>> {
        self.sources.values()
    }

    /// Resolves an operator selection. An empty selection means every source;
    /// unknown names are skipped. A name listed twice is scheduled once.
    pub fn resolve(&self, selection: &[String]) -> Vec<Arc<SourceRecord>> {
        if selection.is_empty() {
            return self.sources.values().cloned().collect();
        }

        let mut resolved: Vec<Arc<SourceRecord>> = Vec::with_capacity(selection.len());
        for name in selection {
            match self.sources.get(name.as_str()) {
                Some(record) => {
                    if !resolved.iter().any(|r| r.name == record.name) {
                        resolved.push(Arc::clone(record));
                    }
                }
                None => debug!("Ignoring unknown source {name}"),
            }
        }
        resolved
    }

    pub fn summaries(&self) -> Vec<SourceSummary> {
        self.sources
            .values()
            .map(|s| SourceSummary {
                name: s.name.clone(),
                protocol: s.protocol,
                port: s.port,
                secure: s.secure,
                line_count: s.lines.len(),
            })
            .collect()
    }
}
