// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Secure Vault: envelope encryption with KMS-wrapped data keys, crypto-erase
//! and signed deletion certificates.
//!
//! Every object is encrypted under its own ephemeral data encryption key
//! (DEK). The DEK is wrapped by a master key that never leaves the KMS and
//! then discarded. Destroying the master key makes every object wrapped
//! under it unrecoverable, which the vault attests with a signed
//! [`DeletionCertificate`].
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!   caller ──────▶│         SecureVault          │──────▶ EncryptedObject
//!                 └──────┬───────────────┬───────┘        (persisted by caller)
//!                        │               │
//!              ┌─────────▼──────┐  ┌─────▼─────────────┐
//!              │   DekManager   │  │ CertificateIssuer │
//!              └───┬────────┬───┘  └─────────┬─────────┘
//!                  │        │                │
//!         ┌────────▼──┐  ┌──▼────────────────▼──┐
//!         │ AeadEngine│  │      KmsAdapter      │
//!         └───────────┘  │  SimulatedKms │ AwsKms│
//!                        └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use secure_vault::{Environment, ObjectLocation, SecureVault, SimulatedKms, VaultConfig};
//!
//! # async fn run() -> Result<(), secure_vault::VaultError> {
//! let kms = SimulatedKms::new(Environment::Development, "mk-1")?;
//! let vault = SecureVault::new(Arc::new(kms), VaultConfig::new("mk-1"))?;
//!
//! let object = vault
//!     .encrypt_object(ObjectLocation::new("media", "cat.jpg"), b"meow")
//!     .await?;
//! assert_eq!(vault.decrypt_object(&object).await?, b"meow");
//!
//! let erasure = vault.crypto_erase(&object.object_id, &object.wrapped()).await?;
//! let certificate = vault.issue_certificate(&erasure, "alice", "user request").await?;
//! certificate.verify(&vault.verification_key().await?)?;
//! # Ok(())
//! # }
//! ```

pub mod aead;
pub mod audit;
#[cfg(feature = "aws-kms")]
pub mod aws_kms;
pub mod certificate;
pub mod config;
pub mod dek;
pub mod error;
pub mod kms;
mod retry;
pub mod rotation;
pub mod simulated_kms;
pub mod vault;

pub use aead::{AeadEngine, SealedPayload};
pub use audit::{AuditEvent, AuditLogger, AuditSeverity, VaultOperation};
#[cfg(feature = "aws-kms")]
pub use aws_kms::{AwsKms, AwsKmsConfig};
pub use certificate::{CertificateIssuer, DeletionCertificate};
pub use config::{Environment, RetryPolicy, VaultConfig};
pub use dek::DekManager;
pub use error::VaultError;
pub use kms::{
    DataEncryptionKey, HealthState, KmsAdapter, KmsHealthStatus, KmsProvider, MasterKey,
    MasterKeyStatus, PayloadSignature, SignatureAlgorithm, VerificationKey, WrappedDek,
};
pub use rotation::{KeyMigrator, MigrationReport};
pub use simulated_kms::SimulatedKms;
pub use vault::{CryptoErasure, EncryptedObject, MasterKeyRotation, ObjectLocation, SecureVault};
