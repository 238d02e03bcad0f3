// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Secure vault orchestrator.
//!
//! Object lifecycle:
//!
//! ```text
//!  NoObject ──encrypt_object──▶ Encrypted ──crypto_erase──▶ CryptoErased ──issue_certificate──▶ CertificateIssued
//!                                  │  ▲
//!                                  └──┘ re-encrypt / re-wrap (new EncryptedObject)
//! ```
//!
//! The vault holds no key material between calls. The only shared mutable
//! state is the master key ring: the active key is an `Arc` snapshot, so
//! an encryption that races a rotation finishes under one consistent key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::aead::AeadEngine;
use crate::audit::{AuditEvent, AuditLogger, VaultOperation};
use crate::certificate::{CertificateIssuer, DeletionCertificate};
use crate::config::{RetryPolicy, VaultConfig};
use crate::dek::DekManager;
use crate::error::VaultError;
use crate::kms::{
    KmsAdapter, KmsHealthStatus, KmsProvider, MasterKey, MasterKeyStatus, VerificationKey,
    WrappedDek, AES_GCM_NONCE_SIZE, AES_GCM_TAG_SIZE,
};
use crate::retry::with_retry;
use crate::rotation::KeyMigrator;

/// Where an object's ciphertext lives in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLocation {
    /// Bucket or container.
    pub bucket: String,
    /// Path inside the bucket.
    pub object_key: String,
}

impl ObjectLocation {
    /// Creates a location.
    pub fn new(bucket: impl Into<String>, object_key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object_key: object_key.into(),
        }
    }
}

/// Metadata and ciphertext of a protected object.
///
/// Handed to the caller for persistence. Treat as immutable: re-encrypting
/// or re-wrapping yields a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedObject {
    /// Random UUID, also bound as associated data.
    pub object_id: String,
    /// Bucket holding the ciphertext.
    pub bucket: String,
    /// Path of the ciphertext inside `bucket`.
    pub object_key: String,
    /// Master key that wrapped `wrapped_dek`.
    pub master_key_id: String,
    /// KMS backend that holds `master_key_id`.
    pub provider: KmsProvider,
    /// Identifier of the wrapped DEK.
    pub dek_id: String,
    /// DEK wrapped by the KMS; opaque.
    pub wrapped_dek: Vec<u8>,
    /// AES-256-GCM ciphertext, same length as the plaintext.
    pub ciphertext: Vec<u8>,
    /// 96-bit nonce.
    pub iv: Vec<u8>,
    /// 128-bit GCM tag.
    pub auth_tag: Vec<u8>,
    /// Encryption time.
    pub created_at: DateTime<Utc>,
}

impl EncryptedObject {
    /// The object's wrapped DEK.
    pub fn wrapped(&self) -> WrappedDek {
        WrappedDek {
            dek_id: self.dek_id.clone(),
            master_key_id: self.master_key_id.clone(),
            bytes: self.wrapped_dek.clone(),
        }
    }

    /// Storage location of the ciphertext.
    pub fn location(&self) -> ObjectLocation {
        ObjectLocation::new(self.bucket.clone(), self.object_key.clone())
    }

    fn check_lengths(&self) -> Result<(), VaultError> {
        if self.iv.len() != AES_GCM_NONCE_SIZE {
            return Err(VaultError::InvalidCiphertextLength(format!(
                "iv must be {} bytes, got {}",
                AES_GCM_NONCE_SIZE,
                self.iv.len()
            )));
        }
        if self.auth_tag.len() != AES_GCM_TAG_SIZE {
            return Err(VaultError::InvalidCiphertextLength(format!(
                "auth tag must be {} bytes, got {}",
                AES_GCM_TAG_SIZE,
                self.auth_tag.len()
            )));
        }
        if self.wrapped_dek.is_empty() {
            return Err(VaultError::InvalidCiphertextLength(
                "wrapped DEK is empty".into(),
            ));
        }
        Ok(())
    }
}

/// Receipt of a successful crypto-erase.
///
/// Only [`SecureVault::crypto_erase`] creates one, and
/// [`SecureVault::issue_certificate`] requires it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoErasure {
    object_id: String,
    master_key_id: String,
    deletion_date: DateTime<Utc>,
}

impl CryptoErasure {
    /// Erased object.
    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// Master key scheduled for deletion.
    pub fn master_key_id(&self) -> &str {
        &self.master_key_id
    }

    /// When the KMS destroys the key material.
    pub fn deletion_date(&self) -> DateTime<Utc> {
        self.deletion_date
    }
}

/// Outcome of a master key rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterKeyRotation {
    /// Key that was active before, now `Deprecated`.
    pub previous: MasterKey,
    /// New active key.
    pub current: MasterKey,
}

#[derive(Debug)]
struct KeyRing {
    active: Arc<MasterKey>,
    retired: HashMap<String, MasterKey>,
}

/// Envelope-encryption vault over a KMS adapter.
///
/// `K` is fixed at construction: either a concrete adapter, or
/// `dyn KmsAdapter` when the backend is picked from configuration.
pub struct SecureVault<K: KmsAdapter + ?Sized> {
    kms: Arc<K>,
    deks: DekManager<K>,
    issuer: CertificateIssuer<K>,
    aead: AeadEngine,
    config: VaultConfig,
    keys: RwLock<KeyRing>,
    /// Serializes rotations, erasures and cancellations.
    lifecycle: tokio::sync::Mutex<()>,
    audit: Option<Arc<AuditLogger>>,
    closed: AtomicBool,
}

impl<K: KmsAdapter + ?Sized> SecureVault<K> {
    /// Creates a vault that owns `kms` for its lifetime.
    ///
    /// Fails if the configuration is invalid or a simulated adapter is
    /// paired with a production environment.
    pub fn new(kms: Arc<K>, config: VaultConfig) -> Result<Self, VaultError> {
        config.validate()?;

        let provider = kms.provider();
        if provider.is_simulated() && config.environment.is_production() {
            return Err(VaultError::SimulatedKmsInProduction);
        }

        info!(
            provider = %provider,
            environment = %config.environment,
            master_key_id = %config.master_key_id,
            "Secure vault initialized"
        );

        Ok(Self {
            deks: DekManager::new(Arc::clone(&kms), config.retry.clone()),
            issuer: CertificateIssuer::new(Arc::clone(&kms), config.retry.clone()),
            keys: RwLock::new(KeyRing {
                active: Arc::new(MasterKey::active(config.master_key_id.clone(), provider)),
                retired: HashMap::new(),
            }),
            kms,
            aead: AeadEngine::new(),
            config,
            lifecycle: tokio::sync::Mutex::new(()),
            audit: None,
            closed: AtomicBool::new(false),
        })
    }

    /// Sets the audit logger.
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// The KMS adapter.
    pub fn kms(&self) -> &K {
        &self.kms
    }

    /// The vault configuration.
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Snapshot of the active master key.
    pub fn active_master_key(&self) -> MasterKey {
        self.keys.read().active.as_ref().clone()
    }

    /// All master keys this vault has used, active first.
    pub fn master_keys(&self) -> Vec<MasterKey> {
        let ring = self.keys.read();
        let mut retired: Vec<MasterKey> = ring.retired.values().cloned().collect();
        retired.sort_by(|a, b| a.id.cmp(&b.id));

        let mut keys = Vec::with_capacity(retired.len() + 1);
        keys.push(ring.active.as_ref().clone());
        keys.extend(retired);
        keys
    }

    /// Encrypts `plaintext` under a fresh DEK wrapped by the active key.
    pub async fn encrypt_object(
        &self,
        location: ObjectLocation,
        plaintext: &[u8],
    ) -> Result<EncryptedObject, VaultError> {
        let active = Arc::clone(&self.keys.read().active);
        self.encrypt_object_with_key(location, plaintext, &active.id)
            .await
    }

    /// Encrypts `plaintext` under a fresh DEK wrapped by `master_key_id`.
    #[instrument(skip(self, plaintext), fields(bucket = %location.bucket, plaintext_len = plaintext.len()))]
    pub async fn encrypt_object_with_key(
        &self,
        location: ObjectLocation,
        plaintext: &[u8],
        master_key_id: &str,
    ) -> Result<EncryptedObject, VaultError> {
        self.ensure_open()?;
        if location.bucket.is_empty() || location.object_key.is_empty() {
            return Err(VaultError::InvalidRequest(
                "bucket and object key are required".into(),
            ));
        }

        let object_id = uuid::Uuid::new_v4().to_string();
        let result = self
            .seal_object(&object_id, location, plaintext, master_key_id)
            .await;

        match &result {
            Ok(object) => self.audit_event(
                AuditEvent::new(VaultOperation::ObjectEncrypt, object_id.as_str()).with_details(
                    format!("master_key={} dek={}", object.master_key_id, object.dek_id),
                ),
            ),
            Err(e) => self.audit_error(VaultOperation::ObjectEncrypt, &object_id, e),
        }
        result
    }

    async fn seal_object(
        &self,
        object_id: &str,
        location: ObjectLocation,
        plaintext: &[u8],
        master_key_id: &str,
    ) -> Result<EncryptedObject, VaultError> {
        let (dek, wrapped) = self.deks.generate_and_wrap(master_key_id).await?;
        let sealed = self.aead.encrypt(&dek, plaintext, object_id.as_bytes())?;
        drop(dek);

        info!(
            object_id = %object_id,
            dek_id = %wrapped.dek_id,
            master_key_id = %master_key_id,
            ciphertext_len = sealed.ciphertext.len(),
            "Encrypted object"
        );

        Ok(EncryptedObject {
            object_id: object_id.to_string(),
            bucket: location.bucket,
            object_key: location.object_key,
            master_key_id: wrapped.master_key_id,
            provider: self.kms.provider(),
            dek_id: wrapped.dek_id,
            wrapped_dek: wrapped.bytes,
            ciphertext: sealed.ciphertext,
            iv: sealed.iv.to_vec(),
            auth_tag: sealed.tag.to_vec(),
            created_at: Utc::now(),
        })
    }

    /// Decrypts an object under the master key recorded in it.
    ///
    /// Fails with `AuthenticationFailure` on any tampering and never
    /// returns partial plaintext.
    #[instrument(skip(self, object), fields(object_id = %object.object_id, master_key_id = %object.master_key_id))]
    pub async fn decrypt_object(&self, object: &EncryptedObject) -> Result<Vec<u8>, VaultError> {
        self.ensure_open()?;

        let result = self.open_object(object).await;
        match &result {
            Ok(_) => self.audit_event(
                AuditEvent::new(VaultOperation::ObjectDecrypt, object.object_id.as_str())
                    .with_details(format!("master_key={}", object.master_key_id)),
            ),
            Err(e) => self.audit_error(VaultOperation::ObjectDecrypt, &object.object_id, e),
        }
        result
    }

    async fn open_object(&self, object: &EncryptedObject) -> Result<Vec<u8>, VaultError> {
        let provider = self.kms.provider();
        if object.provider != provider {
            return Err(VaultError::ProviderMismatch {
                object: object.provider.to_string(),
                vault: provider.to_string(),
            });
        }
        object.check_lengths()?;

        let dek = self
            .deks
            .unwrap(&object.master_key_id, &object.wrapped_dek)
            .await?;
        self.aead.decrypt(
            &dek,
            &object.ciphertext,
            &object.iv,
            &object.auth_tag,
            object.object_id.as_bytes(),
        )
    }

    /// Makes an object permanently unrecoverable by scheduling deletion of
    /// the master key that wrapped its DEK.
    ///
    /// Every DEK wrapped under that master key is erased with it. If it is
    /// the active key, the vault rotates first so new objects keep a
    /// usable key.
    #[instrument(skip(self, wrapped), fields(master_key_id = %wrapped.master_key_id))]
    pub async fn crypto_erase(
        &self,
        object_id: &str,
        wrapped: &WrappedDek,
    ) -> Result<CryptoErasure, VaultError> {
        self.ensure_open()?;
        if object_id.is_empty() {
            return Err(VaultError::InvalidRequest("object id is empty".into()));
        }

        let _guard = self.lifecycle.lock().await;
        let result = self.erase_locked(object_id, wrapped).await;
        match &result {
            Ok(erasure) => self.audit_event(
                AuditEvent::new(VaultOperation::CryptoErase, object_id).with_details(format!(
                    "master_key={} deletion_date={}",
                    erasure.master_key_id, erasure.deletion_date
                )),
            ),
            Err(e) => self.audit_error(VaultOperation::CryptoErase, object_id, e),
        }
        result
    }

    async fn erase_locked(
        &self,
        object_id: &str,
        wrapped: &WrappedDek,
    ) -> Result<CryptoErasure, VaultError> {
        let master_key_id = wrapped.master_key_id.as_str();
        let is_active = self.keys.read().active.id == master_key_id;
        if is_active {
            warn!(master_key_id = %master_key_id, "Erasing the active master key, rotating first");
            self.rotate_locked().await?;
        }

        let kms = self.kms.as_ref();
        let wait_days = self.config.deletion_window_days;
        let deletion_date = with_retry(&self.config.retry, "schedule_key_deletion", || {
            kms.schedule_key_deletion(master_key_id, wait_days)
        })
        .await?;

        self.set_retired_status(master_key_id, MasterKeyStatus::DeletionScheduled);

        warn!(
            object_id = %object_id,
            master_key_id = %master_key_id,
            deletion_date = %deletion_date,
            "Crypto-erase scheduled; all DEKs under this master key are unrecoverable"
        );

        Ok(CryptoErasure {
            object_id: object_id.to_string(),
            master_key_id: master_key_id.to_string(),
            deletion_date,
        })
    }

    /// Aborts a crypto-erase while the deletion window is open. The key
    /// comes back as `Deprecated`.
    #[instrument(skip(self))]
    pub async fn cancel_erasure(&self, master_key_id: &str) -> Result<(), VaultError> {
        self.ensure_open()?;
        let _guard = self.lifecycle.lock().await;

        let kms = self.kms.as_ref();
        let result = with_retry(&self.config.retry, "cancel_key_deletion", || {
            kms.cancel_key_deletion(master_key_id)
        })
        .await;

        match &result {
            Ok(()) => {
                self.set_retired_status(master_key_id, MasterKeyStatus::Deprecated);
                self.audit_event(AuditEvent::new(
                    VaultOperation::CryptoEraseCancel,
                    master_key_id,
                ));
            }
            Err(e) => self.audit_error(VaultOperation::CryptoEraseCancel, master_key_id, e),
        }
        result
    }

    /// Issues a signed deletion certificate for an erased object.
    #[instrument(skip(self, erasure, reason), fields(object_id = %erasure.object_id))]
    pub async fn issue_certificate(
        &self,
        erasure: &CryptoErasure,
        deleted_by: &str,
        reason: &str,
    ) -> Result<DeletionCertificate, VaultError> {
        self.ensure_open()?;

        let result = self
            .issuer
            .issue(&erasure.object_id, deleted_by, reason)
            .await;
        match &result {
            Ok(cert) => self.audit_event(
                AuditEvent::new(VaultOperation::CertificateIssue, erasure.object_id.as_str())
                    .with_principal(deleted_by)
                    .with_details(format!("signing_key={}", cert.signature.key_id)),
            ),
            Err(e) => self.audit_error(VaultOperation::CertificateIssue, &erasure.object_id, e),
        }
        result
    }

    /// Key that verifies deletion certificates issued by this vault.
    pub async fn verification_key(&self) -> Result<VerificationKey, VaultError> {
        self.ensure_open()?;
        let kms = self.kms.as_ref();
        with_retry(&self.config.retry, "verification_key", || {
            kms.verification_key()
        })
        .await
    }

    /// Creates a new active master key. Existing objects keep their
    /// original key until migrated.
    #[instrument(skip(self))]
    pub async fn rotate_master_key(&self) -> Result<MasterKeyRotation, VaultError> {
        self.ensure_open()?;
        let _guard = self.lifecycle.lock().await;

        let result = self.rotate_locked().await;
        match &result {
            Ok(rotation) => self.audit_event(
                AuditEvent::new(VaultOperation::MasterKeyRotation, rotation.current.id.as_str())
                    .with_details(format!("previous={}", rotation.previous.id)),
            ),
            Err(e) => {
                let active = self.keys.read().active.id.clone();
                self.audit_error(VaultOperation::MasterKeyRotation, &active, e)
            }
        }
        result
    }

    /// Rotation body; the caller holds `lifecycle`.
    async fn rotate_locked(&self) -> Result<MasterKeyRotation, VaultError> {
        // Key creation is not idempotent, so a single attempt.
        let once = RetryPolicy {
            max_attempts: 1,
            ..self.config.retry.clone()
        };
        let kms = self.kms.as_ref();
        let new_id = with_retry(&once, "rotate_master_key", || kms.rotate_master_key()).await?;

        let current = MasterKey::active(new_id, self.kms.provider());
        let mut ring = self.keys.write();
        let mut previous = ring.active.as_ref().clone();
        previous.status = MasterKeyStatus::Deprecated;
        ring.retired.insert(previous.id.clone(), previous.clone());
        ring.active = Arc::new(current.clone());
        drop(ring);

        info!(previous = %previous.id, current = %current.id, "Rotated master key");
        Ok(MasterKeyRotation { previous, current })
    }

    /// Probes the KMS. Used for readiness checks.
    pub async fn health_check(&self) -> KmsHealthStatus {
        if self.closed.load(Ordering::SeqCst) {
            return KmsHealthStatus::unhealthy("vault is shut down");
        }
        match tokio::time::timeout(self.config.retry.call_timeout, self.kms.health_check()).await {
            Ok(status) => status,
            Err(_) => KmsHealthStatus::unhealthy(format!(
                "health check timed out after {:?}",
                self.config.retry.call_timeout
            )),
        }
    }

    /// Re-wrap migration helper sharing this vault's adapter and policy.
    pub fn migrator(&self) -> KeyMigrator<K> {
        let migrator = KeyMigrator::new(Arc::clone(&self.kms), self.config.retry.clone());
        match &self.audit {
            Some(audit) => migrator.with_audit(Arc::clone(audit)),
            None => migrator,
        }
    }

    /// Stops accepting operations. Calls already in flight finish.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Secure vault shut down");
        }
    }

    /// Returns true once [`SecureVault::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), VaultError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(VaultError::VaultClosed)
        } else {
            Ok(())
        }
    }

    fn set_retired_status(&self, master_key_id: &str, status: MasterKeyStatus) {
        let provider = self.kms.provider();
        self.keys
            .write()
            .retired
            .entry(master_key_id.to_string())
            .and_modify(|key| key.status = status)
            .or_insert_with(|| MasterKey {
                id: master_key_id.to_string(),
                provider,
                status,
            });
    }

    fn audit_event(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.log(event);
        }
    }

    fn audit_error(&self, operation: VaultOperation, subject: &str, error: &VaultError) {
        let Some(audit) = &self.audit else {
            return;
        };
        let event = match error {
            VaultError::AccessDenied(_) => AuditEvent::new(VaultOperation::AccessDenied, subject),
            VaultError::AuthenticationFailure => {
                AuditEvent::new(VaultOperation::TamperDetected, subject)
            }
            _ => AuditEvent::new(operation, subject),
        };
        audit.log(
            event
                .with_details(format!("operation={}", operation.as_str()))
                .with_error(error.to_string()),
        );
    }
}
