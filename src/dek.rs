// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Data encryption key lifecycle.
//!
//! Generates ephemeral DEKs and moves them through the KMS. Nothing here
//! keeps a raw DEK past the call that produced it: the caller owns the
//! returned [`DataEncryptionKey`] and it is zeroized when dropped.

use std::sync::Arc;

use ring::rand::SystemRandom;
use tracing::{debug, instrument};

use crate::config::RetryPolicy;
use crate::error::VaultError;
use crate::kms::{DataEncryptionKey, KmsAdapter, WrappedDek};
use crate::retry::with_retry;

/// Stateless DEK manager on top of a KMS adapter.
pub struct DekManager<K: KmsAdapter + ?Sized> {
    kms: Arc<K>,
    retry: RetryPolicy,
    rng: SystemRandom,
}

impl<K: KmsAdapter + ?Sized> DekManager<K> {
    /// Creates a manager that calls `kms` under `retry`.
    pub fn new(kms: Arc<K>, retry: RetryPolicy) -> Self {
        Self {
            kms,
            retry,
            rng: SystemRandom::new(),
        }
    }

    /// Generates a fresh 256-bit DEK and wraps it under `master_key_id`.
    ///
    /// Use the raw key right away and let it drop.
    #[instrument(skip(self))]
    pub async fn generate_and_wrap(
        &self,
        master_key_id: &str,
    ) -> Result<(DataEncryptionKey, WrappedDek), VaultError> {
        let dek = DataEncryptionKey::generate(&self.rng)?;
        let kms = self.kms.as_ref();
        let wrapped = with_retry(&self.retry, "wrap_key", || {
            kms.wrap_key(master_key_id, &dek)
        })
        .await?;

        debug!(dek_id = %wrapped.dek_id, "Generated and wrapped DEK");
        Ok((dek, wrapped))
    }

    /// Unwraps a DEK previously wrapped under `master_key_id`.
    #[instrument(skip(self, wrapped), fields(wrapped_len = wrapped.len()))]
    pub async fn unwrap(
        &self,
        master_key_id: &str,
        wrapped: &[u8],
    ) -> Result<DataEncryptionKey, VaultError> {
        if wrapped.is_empty() {
            return Err(VaultError::InvalidCiphertextLength(
                "wrapped DEK is empty".into(),
            ));
        }
        let kms = self.kms.as_ref();
        with_retry(&self.retry, "unwrap_key", || {
            kms.unwrap_key(master_key_id, wrapped)
        })
        .await
    }

    /// Unwraps under the wrapped key's own master key and wraps again
    /// under `target_master_key_id`. The raw key never leaves this call.
    #[instrument(skip(self, wrapped), fields(dek_id = %wrapped.dek_id, from = %wrapped.master_key_id))]
    pub async fn rewrap(
        &self,
        wrapped: &WrappedDek,
        target_master_key_id: &str,
    ) -> Result<WrappedDek, VaultError> {
        let dek = self.unwrap(&wrapped.master_key_id, &wrapped.bytes).await?;
        let kms = self.kms.as_ref();
        with_retry(&self.retry, "wrap_key", || {
            kms.wrap_key(target_master_key_id, &dek)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::Environment;
    use crate::SimulatedKms;

    fn manager() -> (Arc<SimulatedKms>, DekManager<SimulatedKms>) {
        let kms = Arc::new(SimulatedKms::new(Environment::Test, "mk-1").unwrap());
        let retry = RetryPolicy::default()
            .with_backoff(Duration::from_millis(1), Duration::from_millis(2));
        (Arc::clone(&kms), DekManager::new(kms, retry))
    }

    #[tokio::test]
    async fn test_generate_and_wrap_round_trip() {
        let (_, manager) = manager();

        let (dek, wrapped) = manager.generate_and_wrap("mk-1").await.unwrap();
        let unwrapped = manager.unwrap("mk-1", &wrapped.bytes).await.unwrap();
        assert_eq!(unwrapped.key(), dek.key());
    }

    #[tokio::test]
    async fn test_fresh_key_each_call() {
        let (_, manager) = manager();

        let (a, _) = manager.generate_and_wrap("mk-1").await.unwrap();
        let (b, _) = manager.generate_and_wrap("mk-1").await.unwrap();
        assert_ne!(a.key(), b.key());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let (kms, manager) = manager();
        kms.inject_unavailable(2);

        assert!(manager.generate_and_wrap("mk-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let (kms, manager) = manager();
        kms.inject_unavailable(10);

        let result = manager.generate_and_wrap("mk-1").await;
        assert!(matches!(result, Err(VaultError::KmsUnavailable(_))));
    }

    #[tokio::test]
    async fn test_empty_wrapped_key_rejected() {
        let (_, manager) = manager();
        let result = manager.unwrap("mk-1", &[]).await;
        assert!(matches!(result, Err(VaultError::InvalidCiphertextLength(_))));
    }

    #[tokio::test]
    async fn test_rewrap_moves_to_target_key() {
        let (kms, manager) = manager();
        let (dek, wrapped) = manager.generate_and_wrap("mk-1").await.unwrap();
        let mk2 = kms.rotate_master_key().await.unwrap();

        let rewrapped = manager.rewrap(&wrapped, &mk2).await.unwrap();
        assert_eq!(rewrapped.master_key_id, mk2);

        let unwrapped = manager.unwrap(&mk2, &rewrapped.bytes).await.unwrap();
        assert_eq!(unwrapped.key(), dek.key());
    }
}
