// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Tracing subscriber setup for the datanode

use tracing_subscriber::EnvFilter;

use super::config::LoggingConfig;

/// Install the global fmt subscriber. `RUST_LOG` wins over the configured level.
///
/// Returns false when a subscriber was already installed (tests, embedding hosts).
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_line_number(config.with_line_number)
        .try_init()
        .is_ok()
}
