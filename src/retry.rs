// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Bounded retry of KMS calls.

use std::future::Future;

use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::VaultError;

/// Runs `call` under the policy's per-call timeout, retrying
/// `KmsUnavailable` with exponential backoff until attempts run out.
///
/// A timed-out call is dropped, which cancels it, and is reported as
/// `KmsUnavailable`. Every other error is returned immediately.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> Result<T, VaultError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VaultError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let outcome = match tokio::time::timeout(policy.call_timeout, call()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(VaultError::KmsUnavailable(format!(
                "{} timed out after {:?}",
                operation, policy.call_timeout
            ))),
        };

        match outcome {
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "KMS call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                debug!(operation, attempt, error = %e, "KMS call failed");
                return Err(e);
            }
            Ok(value) => return Ok(value),
        }
    }
}
