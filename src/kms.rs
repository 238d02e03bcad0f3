// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! KMS adapter trait and key types.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ring::rand::SecureRandom;
use ring::{hmac, signature};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::VaultError;

/// Size of AES-256 keys in bytes.
pub const AES_256_KEY_SIZE: usize = 32;

/// Size of AES-GCM nonce in bytes.
pub const AES_GCM_NONCE_SIZE: usize = 12;

/// Size of AES-GCM authentication tag in bytes.
pub const AES_GCM_TAG_SIZE: usize = 16;

/// Backend that holds the master keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KmsProvider {
    /// AWS Key Management Service.
    AwsKms,
    /// In-process simulation. Never safe for real data.
    Simulated,
}

impl KmsProvider {
    /// Returns the provider name.
    pub fn as_str(&self) -> &'static str {
        match self {
            KmsProvider::AwsKms => "aws_kms",
            KmsProvider::Simulated => "simulated",
        }
    }

    /// Returns true for the simulated provider.
    #[inline]
    pub fn is_simulated(&self) -> bool {
        matches!(self, KmsProvider::Simulated)
    }
}

impl fmt::Display for KmsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a master key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterKeyStatus {
    /// Used for new wraps.
    Active,
    /// Replacement is being provisioned.
    RotationScheduled,
    /// Superseded; still unwraps existing DEKs.
    Deprecated,
    /// Pending destruction; unusable.
    DeletionScheduled,
    /// Destroyed.
    Deleted,
}

impl MasterKeyStatus {
    /// Returns true if DEKs wrapped under this key can still be unwrapped.
    pub fn can_unwrap(&self) -> bool {
        matches!(
            self,
            MasterKeyStatus::Active
                | MasterKeyStatus::RotationScheduled
                | MasterKeyStatus::Deprecated
        )
    }
}

/// Handle to a root key held by the KMS. Never contains key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterKey {
    /// Opaque key identifier.
    pub id: String,
    /// Backend holding the key.
    pub provider: KmsProvider,
    /// Lifecycle state.
    pub status: MasterKeyStatus,
}

impl MasterKey {
    /// Creates a handle for an active key.
    pub fn active(id: impl Into<String>, provider: KmsProvider) -> Self {
        Self {
            id: id.into(),
            provider,
            status: MasterKeyStatus::Active,
        }
    }
}

/// A raw data encryption key (DEK).
///
/// Lives only for the duration of one vault call and is zeroized on
/// drop. Deliberately neither `Clone` nor serializable.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DataEncryptionKey {
    key: [u8; AES_256_KEY_SIZE],
}

impl DataEncryptionKey {
    /// Wraps existing key material.
    pub fn new(key: [u8; AES_256_KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Generates a fresh key from the given random source.
    pub fn generate(rng: &dyn SecureRandom) -> Result<Self, VaultError> {
        let mut dek = Self::new([0u8; AES_256_KEY_SIZE]);
        rng.fill(&mut dek.key)
            .map_err(|_| VaultError::KeyGeneration("failed to generate DEK".into()))?;
        Ok(dek)
    }

    /// Copies key material out of a slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, VaultError> {
        if bytes.len() != AES_256_KEY_SIZE {
            return Err(VaultError::InvalidKeyLength {
                expected: AES_256_KEY_SIZE,
                got: bytes.len(),
            });
        }
        let mut dek = Self::new([0u8; AES_256_KEY_SIZE]);
        dek.key.copy_from_slice(bytes);
        Ok(dek)
    }

    /// Returns the key material.
    ///
    /// # Security
    ///
    /// The returned slice references key material that will be
    /// zeroized when this DEK is dropped. Do not store copies.
    #[inline]
    pub fn key(&self) -> &[u8; AES_256_KEY_SIZE] {
        &self.key
    }
}

impl fmt::Debug for DataEncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataEncryptionKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// A DEK wrapped by a master key; safe to persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedDek {
    /// Identifier assigned by the adapter.
    pub dek_id: String,
    /// Master key that wrapped this DEK.
    pub master_key_id: String,
    /// Opaque wrapped key blob.
    pub bytes: Vec<u8>,
}

/// Health of the KMS backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    /// Backend reachable and the active key usable.
    Healthy,
    /// Backend unreachable or the active key unusable.
    Unhealthy,
}

/// Result of a KMS health probe. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KmsHealthStatus {
    /// Overall state.
    pub status: HealthState,
    /// Human-readable detail.
    pub message: String,
}

impl KmsHealthStatus {
    /// Creates a healthy status.
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthState::Healthy,
            message: message.into(),
        }
    }

    /// Creates an unhealthy status.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthState::Unhealthy,
            message: message.into(),
        }
    }

    /// Returns true if healthy.
    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

/// Algorithm behind a payload signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureAlgorithm {
    /// Ed25519 (simulated KMS with a signing key).
    Ed25519,
    /// ECDSA over P-256 with SHA-256, ASN.1 DER encoded (AWS KMS).
    EcdsaP256Sha256,
    /// HMAC-SHA256 (simulated KMS without a signing key).
    HmacSha256,
}

/// A signature produced by [`KmsAdapter::sign_payload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSignature {
    /// Signing algorithm.
    pub algorithm: SignatureAlgorithm,
    /// Identifier of the signing key.
    pub key_id: String,
    /// Raw signature bytes.
    pub bytes: Vec<u8>,
}

/// Key that checks payload signatures without involving the vault.
#[derive(Clone)]
pub enum VerificationKey {
    /// Ed25519 public key (32 bytes).
    Ed25519(Vec<u8>),
    /// Uncompressed P-256 public point (65 bytes).
    EcdsaP256(Vec<u8>),
    /// Shared MAC secret.
    HmacSha256(Zeroizing<Vec<u8>>),
}

impl VerificationKey {
    /// Verifies `sig` over `payload`.
    pub fn verify(&self, payload: &[u8], sig: &PayloadSignature) -> Result<(), VaultError> {
        match (self, sig.algorithm) {
            (VerificationKey::Ed25519(public), SignatureAlgorithm::Ed25519) => {
                signature::UnparsedPublicKey::new(&signature::ED25519, public)
                    .verify(payload, &sig.bytes)
                    .map_err(|_| VaultError::InvalidSignature)
            }
            (VerificationKey::EcdsaP256(public), SignatureAlgorithm::EcdsaP256Sha256) => {
                signature::UnparsedPublicKey::new(&signature::ECDSA_P256_SHA256_ASN1, public)
                    .verify(payload, &sig.bytes)
                    .map_err(|_| VaultError::InvalidSignature)
            }
            (VerificationKey::HmacSha256(secret), SignatureAlgorithm::HmacSha256) => {
                let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
                hmac::verify(&key, payload, &sig.bytes).map_err(|_| VaultError::InvalidSignature)
            }
            _ => Err(VaultError::InvalidSignature),
        }
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationKey::Ed25519(public) => f.debug_tuple("Ed25519").field(public).finish(),
            VerificationKey::EcdsaP256(public) => {
                f.debug_tuple("EcdsaP256").field(public).finish()
            }
            VerificationKey::HmacSha256(_) => f.debug_tuple("HmacSha256").field(&"[REDACTED]").finish(),
        }
    }
}

pub(crate) mod sealed {
    /// Restricts [`KmsAdapter`](super::KmsAdapter) to the adapters in this crate.
    pub trait Sealed {}
}

/// Capability set the vault needs from a key management service.
///
/// Implemented only by [`SimulatedKms`](crate::SimulatedKms) and, with the
/// `aws-kms` feature, `AwsKms`. The adapter is picked once when a vault is
/// built and never switched per call.
///
/// All operations are async because production backends are remote.
#[async_trait]
pub trait KmsAdapter: sealed::Sealed + Send + Sync {
    /// Backend behind this adapter.
    fn provider(&self) -> KmsProvider;

    /// Wraps (encrypts) a DEK under the given master key.
    async fn wrap_key(
        &self,
        master_key_id: &str,
        dek: &DataEncryptionKey,
    ) -> Result<WrappedDek, VaultError>;

    /// Unwraps a DEK previously wrapped under the given master key.
    async fn unwrap_key(
        &self,
        master_key_id: &str,
        wrapped: &[u8],
    ) -> Result<DataEncryptionKey, VaultError>;

    /// Signs an arbitrary payload.
    async fn sign_payload(&self, payload: &[u8]) -> Result<PayloadSignature, VaultError>;

    /// Creates a new master key and returns its id. Existing DEKs are
    /// not re-wrapped.
    async fn rotate_master_key(&self) -> Result<String, VaultError>;

    /// Schedules destruction of a master key after `wait_days`.
    ///
    /// The key becomes unusable immediately; the returned instant is when
    /// the material is destroyed.
    async fn schedule_key_deletion(
        &self,
        master_key_id: &str,
        wait_days: u32,
    ) -> Result<DateTime<Utc>, VaultError>;

    /// Aborts a pending deletion while the window is still open.
    async fn cancel_key_deletion(&self, master_key_id: &str) -> Result<(), VaultError>;

    /// Probes the backend.
    async fn health_check(&self) -> KmsHealthStatus;

    /// Returns the key that verifies [`KmsAdapter::sign_payload`] output.
    async fn verification_key(&self) -> Result<VerificationKey, VaultError>;
}
