// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Bounded retry with exponential backoff

use std::future::Future;
use tracing::{debug, warn};

use crate::core::RetryConfig;

/// Run `operation` until it succeeds or `max_attempts` is exhausted.
///
/// The error of the final attempt is returned. A zero attempt count still runs once.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, op_name: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!("🔁 {} succeeded after {} attempts", op_name, attempts);
                }
                return Ok(result);
            }
            Err(err) if attempts >= max_attempts => {
                warn!("❌ {} failed after {} attempts: {}", op_name, attempts, err);
                return Err(err);
            }
            Err(err) => {
                let delay = config.calculate_delay(attempts - 1);
                warn!(
                    "⚠️ {} attempt {}/{} failed: {} (retrying in {:?})",
                    op_name, attempts, max_attempts, err, delay
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
