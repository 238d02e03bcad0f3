// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Vault error types.

/// Errors that can occur in vault operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The KMS could not be reached or did not answer in time.
    ///
    /// This is the only retryable error.
    #[error("KMS unavailable: {0}")]
    KmsUnavailable(String),

    /// The referenced key does not exist or can no longer be used.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The KMS refused the operation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// AEAD tag verification failed.
    #[error("authentication failed")]
    AuthenticationFailure,

    /// Ciphertext, IV, tag or wrapped key has a malformed length.
    #[error("invalid ciphertext length: {0}")]
    InvalidCiphertextLength(String),

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    /// Key or nonce generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Producing a signature failed.
    #[error("signing failed: {0}")]
    Signature(String),

    /// A deletion certificate did not verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// The request itself was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The vault configuration is invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A simulated KMS was used in a production environment.
    #[error("simulated KMS cannot be used in a production environment")]
    SimulatedKmsInProduction,

    /// The object was protected by a different KMS provider.
    #[error("object was encrypted with provider {object}, vault uses {vault}")]
    ProviderMismatch { object: String, vault: String },

    /// The vault has been shut down.
    #[error("vault is shut down")]
    VaultClosed,

    /// Canonical payload serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VaultError {
    /// Returns true if the operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::KmsUnavailable(_))
    }
}

impl From<ring::error::Unspecified> for VaultError {
    fn from(_: ring::error::Unspecified) -> Self {
        VaultError::KeyGeneration("unspecified cryptographic error".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(VaultError::KmsUnavailable("timeout".into()).is_retryable());
        assert!(!VaultError::KeyNotFound("mk-1".into()).is_retryable());
        assert!(!VaultError::AccessDenied("mk-1".into()).is_retryable());
        assert!(!VaultError::AuthenticationFailure.is_retryable());
    }

    #[test]
    fn test_authentication_failure_reveals_nothing() {
        assert_eq!(
            VaultError::AuthenticationFailure.to_string(),
            "authentication failed"
        );
    }
}
