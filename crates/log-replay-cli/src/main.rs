// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use log_replay::{config::RunConfig, dispatcher::Dispatcher, manifest};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_level) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }
    debug!("Logging subsystem enabled");

    let result = match cli.command {
        Commands::List => list(&cli.config),
        Commands::Run(args) => run(args.into_config(cli.config, cli.log_level)).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(log_level: &str) -> Result<()> {
    let env_filter = format!("rustls=off,tokio_rustls=off,{}", log_level.to_lowercase());

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).context("could not parse log level in configuration")?,
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")
}

fn list(manifest_path: &std::path::Path) -> Result<()> {
    let registry = manifest::load(manifest_path)?;
    println!("{}", cli::listing_table(&registry.summaries()));
    Ok(())
}

async fn run(config: RunConfig) -> Result<()> {
    config.validate()?;

    let registry = manifest::load(&config.manifest)
        .with_context(|| format!("unable to load sources from {}", config.manifest.display()))?;
    if registry.is_empty() {
        warn!("No sources defined in {}", config.manifest.display());
    }

    let cancel = CancellationToken::new();
    let dispatcher = Dispatcher::new(Arc::new(registry), Arc::new(config.credential_provider()))
        .with_failure_mode(config.failure_mode)
        .with_cancellation(cancel.clone());

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping replay workers");
            shutdown.cancel();
        }
    });

    let summary = dispatcher.run(config.policy(), &config.sources).await?;
    info!(
        "Replay finished: {} workers, {} lines sent",
        summary.scheduled,
        summary.lines_sent()
    );

    if !summary.is_success() {
        bail!("{} of {} workers failed", summary.failures.len(), summary.scheduled);
    }
    Ok(())
}
