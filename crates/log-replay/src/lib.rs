// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Log Replay
//!
//! Re-transmits pre-recorded log lines towards a log-ingestion endpoint, emulating
//! shipping agents so collectors can be exercised under load or behind TLS.
//!
//! ## Architecture
//!
//! - [`source`]: immutable source records and the registry they live in
//! - [`manifest`]: loads a JSON/YAML manifest into a [`source::SourceRegistry`]
//! - [`tls`]: client credential resolution and caching
//! - [`transport`]: stream (TCP/UDP) and batch (Lumberjack v2) delivery
//! - [`worker`]: replays one source through one transport
//! - [`dispatcher`]: fans sources out into concurrent workers and joins them

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod lumberjack;
pub mod manifest;
pub mod policy;
pub mod source;
pub mod tls;
pub mod transport;
pub mod worker;
