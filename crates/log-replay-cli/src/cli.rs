// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Command line surface of `log-replay`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};

use log_replay::config::{RunConfig, DEFAULT_MANIFEST};
use log_replay::dispatcher::FailureMode;
use log_replay::source::{CredentialPaths, SourceSummary};

/// Replays recorded log sources towards a log collector.
#[derive(Debug, Parser)]
#[command(name = "log-replay", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Source manifest (JSON, or YAML by extension)
    #[arg(long, global = true, env = "LOG_REPLAY_CONFIG", default_value = DEFAULT_MANIFEST)]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LOG_REPLAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Replay the selected sources
    Run(RunArgs),
    /// List the sources of the manifest
    List,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Destination host
    #[arg(short = 'c', long, env = "LOG_REPLAY_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Comma separated source names; every source when omitted
    #[arg(short = 's', long, env = "LOG_REPLAY_SOURCES", default_value = "")]
    pub sources: String,

    /// Replay the sources forever
    #[arg(short = 'i', long = "loop", env = "LOG_REPLAY_LOOP")]
    pub loop_forever: bool,

    /// Delay between passes in milliseconds
    #[arg(short = 'd', long, env = "LOG_REPLAY_DELAY_MS", default_value_t = 0)]
    pub delay: u64,

    /// Workers per source
    #[arg(short = 't', long, env = "LOG_REPLAY_THREADS", default_value_t = 1)]
    pub threads: usize,

    /// Send every source to this port instead of its own
    #[arg(long, env = "LOG_REPLAY_PORT")]
    pub port: Option<u16>,

    /// CA bundle used to verify the collector
    #[arg(long, env = "LOG_REPLAY_CA")]
    pub ca: Option<String>,

    /// Client certificate chain
    #[arg(long, env = "LOG_REPLAY_CERT")]
    pub cert: Option<String>,

    /// Client private key
    #[arg(long, env = "LOG_REPLAY_KEY")]
    pub key: Option<String>,

    /// Do not load any TLS material
    #[arg(long, env = "LOG_REPLAY_SKIP_VERIFY")]
    pub skip_verify: bool,

    /// Keep healthy workers running when another one fails
    #[arg(long, env = "LOG_REPLAY_ISOLATE_FAILURES")]
    pub isolate_failures: bool,
}

impl RunArgs {
    pub fn into_config(self, manifest: PathBuf, log_level: String) -> RunConfig {
        RunConfig {
            manifest,
            destination_host: self.host,
            port_override: self.port,
            sources: RunConfig::parse_selection(&self.sources),
            loop_forever: self.loop_forever,
            inter_turn_delay: Duration::from_millis(self.delay),
            concurrency: self.threads,
            credentials: CredentialPaths::from_optional(
                self.ca.as_deref(),
                self.cert.as_deref(),
                self.key.as_deref(),
            ),
            skip_verify: self.skip_verify,
            failure_mode: if self.isolate_failures {
                FailureMode::Isolate
            } else {
                FailureMode::Abort
            },
            log_level,
            ..Default::default()
        }
    }
}

/// Builds the source listing table. Summaries come sorted by name.
pub fn listing_table(summaries: &[SourceSummary]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Name").fg(Color::Cyan),
        Cell::new("Protocol").fg(Color::Cyan),
        Cell::new("Port").fg(Color::Cyan),
        Cell::new("TLS").fg(Color::Cyan),
        Cell::new("LogsCount").fg(Color::Cyan),
    ]);

    for summary in summaries {
        let tls = if summary.secure {
            Cell::new("Yes").fg(Color::Green)
        } else {
            Cell::new("No")
        };
        table.add_row(vec![
            Cell::new(&summary.name),
            Cell::new(summary.protocol),
            Cell::new(summary.port),
            tls,
            Cell::new(summary.line_count),
        ]);
    }
    table
}
