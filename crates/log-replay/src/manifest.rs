// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Source manifest loading.
//!
//! A manifest lists the sources to replay, either as JSON or YAML (picked by file
//! extension):
//!
//! ```json
//! {
//!   "sources": [
//!     { "name": "web", "proto": "tcp", "port": 9000, "tls": false, "path": "logs/web.log" },
//!     { "name": "winlog", "proto": "beats", "port": 5044, "tls": true,
//!       "cert": "certs/winlog.crt", "key": "certs/winlog.key",
//!       "logs": ["{\"@timestamp\": \"\", \"message\": \"logon\"}"] }
//!   ]
//! }
//! ```
//!
//! Log files are read once, here; relative paths resolve against the manifest directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::errors::ManifestError;
use crate::source::{CredentialPaths, Protocol, SourceRecord, SourceRegistry};

#[derive(Debug, Deserialize)]
struct Manifest {
    sources: Vec<SourceEntry>,
}

#[derive(Debug, Deserialize)]
struct SourceEntry {
    name: String,
    #[serde(alias = "protocol")]
    proto: String,
    port: u16,
    #[serde(default, alias = "secure")]
    tls: bool,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    logs: Option<Vec<String>>,
    #[serde(default)]
    ca: Option<String>,
    #[serde(default)]
    cert: Option<String>,
    #[serde(default)]
    key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
}

impl Format {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                Self::Yaml
            }
            _ => Self::Json,
        }
    }
}

/// Reads the manifest at `path` and every log file it references.
pub fn load(path: &Path) -> Result<SourceRegistry, ManifestError> {
    let contents = fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let registry = parse(&contents, Format::from_path(path), base)?;
    debug!(
        "Loaded {} sources from {}",
        registry.len(),
        path.display()
    );
    Ok(registry)
}

/// Parses a JSON manifest; relative log paths resolve against `base`.
pub fn from_json(contents: &str, base: &Path) -> Result<SourceRegistry, ManifestError> {
    parse(contents, Format::Json, base)
}

/// Parses a YAML manifest; relative log paths resolve against `base`.
pub fn from_yaml(contents: &str, base: &Path) -> Result<SourceRegistry, ManifestError> {
    parse(contents, Format::Yaml, base)
}

fn parse(contents: &str, format: Format, base: &Path) -> Result<SourceRegistry, ManifestError> {
    let manifest: Manifest = match format {
        Format::Json => {
            serde_json::from_str(contents).map_err(|e| ManifestError::Parse(e.to_string()))?
        }
        Format::Yaml => {
            serde_yaml::from_str(contents).map_err(|e| ManifestError::Parse(e.to_string()))?
        }
    };

    let records = manifest
        .sources
        .into_iter()
        .map(|entry| into_record(entry, base))
        .collect::<Result<Vec<_>, _>>()?;

    SourceRegistry::new(records).map_err(ManifestError::DuplicateSource)
}

fn into_record(entry: SourceEntry, base: &Path) -> Result<SourceRecord, ManifestError> {
    let protocol: Protocol =
        entry
            .proto
            .parse()
            .map_err(|protocol| ManifestError::UnknownProtocol {
                name: entry.name.clone(),
                protocol,
            })?;

    if entry.tls && protocol == Protocol::Udp {
        return Err(ManifestError::SecureDatagram(entry.name));
    }

    let lines = match (entry.logs, entry.path) {
        (Some(logs), _) => logs,
        (None, Some(path)) => read_lines(&base.join(path))?,
        (None, None) => return Err(ManifestError::MissingLogs(entry.name)),
    };

    let credentials = CredentialPaths::from_optional(
        entry.ca.as_deref(),
        entry.cert.as_deref(),
        entry.key.as_deref(),
    )
    .relative_to(base);

    Ok(SourceRecord::new(entry.name, protocol, entry.port, lines)
        .secure(entry.tls)
        .with_credentials(credentials))
}

/// One payload per line; a trailing newline does not produce an empty last payload.
fn read_lines(path: &Path) -> Result<Vec<String>, ManifestError> {
    let contents = fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(contents.lines().map(str::to_string).collect())
}
