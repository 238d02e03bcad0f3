// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! In-process simulated Key Management Service.
//!
//! Master keys are derived deterministically from a seed, so a simulated
//! vault restarted with the same seed can still unwrap its DEKs. This is
//! insecure by construction and refuses to start in a production
//! environment.
//!
//! # Wrapped key format
//!
//! ```text
//! ┌──────────────┬─────────┬──────────────┬───────────┬──────────────┬──────────┐
//! │ "SIMKMS01"   │ len (1) │ master key id │ nonce (12)│ sealed DEK 32 │ tag (16) │
//! └──────────────┴─────────┴──────────────┴───────────┴──────────────┴──────────┘
//! ```
//!
//! The magic prefix keeps simulated blobs from being mistaken for
//! production ciphertext.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{Ed25519KeyPair, KeyPair};
use tracing::{info, instrument, warn};
use zeroize::Zeroizing;

use crate::aead;
use crate::config::Environment;
use crate::error::VaultError;
use crate::kms::{
    sealed, DataEncryptionKey, KmsAdapter, KmsHealthStatus, KmsProvider, MasterKey,
    MasterKeyStatus, PayloadSignature, SignatureAlgorithm, VerificationKey, WrappedDek,
    AES_256_KEY_SIZE, AES_GCM_NONCE_SIZE, AES_GCM_TAG_SIZE,
};

/// Prefix of every simulated wrapped DEK.
pub const SIMULATED_WRAP_MAGIC: &[u8; 8] = b"SIMKMS01";

const DEFAULT_SEED: [u8; 32] = *b"secure-vault-simulated-kms-seed!";
const HMAC_SIGNING_KEY_ID: &str = "sim-hmac-signer";
const ED25519_SIGNING_KEY_ID: &str = "sim-ed25519-signer";

#[derive(Debug, Clone)]
struct SimulatedMasterKey {
    status: MasterKeyStatus,
    deletion_date: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct KeyTable {
    keys: HashMap<String, SimulatedMasterKey>,
    active: String,
}

/// Simulated KMS for development and tests.
pub struct SimulatedKms {
    seed: Zeroizing<[u8; 32]>,
    table: RwLock<KeyTable>,
    signer: Option<Ed25519KeyPair>,
    rng: SystemRandom,
    available: AtomicBool,
    injected_failures: AtomicU32,
}

impl sealed::Sealed for SimulatedKms {}

impl SimulatedKms {
    /// Creates a simulated KMS whose initial active master key is
    /// `master_key_id`.
    ///
    /// Fails with [`VaultError::SimulatedKmsInProduction`] in production.
    pub fn new(
        environment: Environment,
        master_key_id: impl Into<String>,
    ) -> Result<Self, VaultError> {
        if environment.is_production() {
            return Err(VaultError::SimulatedKmsInProduction);
        }

        let master_key_id = master_key_id.into();
        if master_key_id.is_empty() || master_key_id.len() > u8::MAX as usize {
            return Err(VaultError::InvalidRequest(format!(
                "master key id must be 1..=255 bytes, got {}",
                master_key_id.len()
            )));
        }

        warn!(
            environment = %environment,
            master_key_id = %master_key_id,
            "Simulated KMS in use; key material is not protected"
        );

        let mut keys = HashMap::new();
        keys.insert(
            master_key_id.clone(),
            SimulatedMasterKey {
                status: MasterKeyStatus::Active,
                deletion_date: None,
            },
        );

        Ok(Self {
            seed: Zeroizing::new(DEFAULT_SEED),
            table: RwLock::new(KeyTable {
                keys,
                active: master_key_id,
            }),
            signer: None,
            rng: SystemRandom::new(),
            available: AtomicBool::new(true),
            injected_failures: AtomicU32::new(0),
        })
    }

    /// Replaces the seed all master keys are derived from.
    pub fn with_seed(mut self, seed: [u8; 32]) -> Self {
        self.seed = Zeroizing::new(seed);
        self
    }

    /// Signs payloads with the given Ed25519 key (PKCS#8 v2 document).
    pub fn with_signing_key_pkcs8(mut self, pkcs8: &[u8]) -> Result<Self, VaultError> {
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8)
            .map_err(|e| VaultError::Configuration(format!("invalid Ed25519 key: {}", e)))?;
        self.signer = Some(pair);
        Ok(self)
    }

    /// Signs payloads with a freshly generated Ed25519 key.
    pub fn with_generated_signing_key(self) -> Result<Self, VaultError> {
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&self.rng)
            .map_err(|_| VaultError::KeyGeneration("failed to generate signing key".into()))?;
        self.with_signing_key_pkcs8(pkcs8.as_ref())
    }

    /// Returns the id of the master key new wraps go to.
    pub fn active_master_key_id(&self) -> String {
        self.table.read().active.clone()
    }

    /// Looks up a master key handle.
    pub fn master_key(&self, master_key_id: &str) -> Option<MasterKey> {
        self.table
            .read()
            .keys
            .get(master_key_id)
            .map(|key| MasterKey {
                id: master_key_id.to_string(),
                provider: KmsProvider::Simulated,
                status: key.status,
            })
    }

    /// Marks the backend reachable or unreachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Makes the next `count` calls fail with `KmsUnavailable`.
    pub fn inject_unavailable(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Moves keys whose deletion window has elapsed to `Deleted`.
    ///
    /// Returns the ids of the keys destroyed by this call.
    pub fn purge_due_keys(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut table = self.table.write();
        let mut purged = Vec::new();
        for (id, key) in table.keys.iter_mut() {
            if key.status == MasterKeyStatus::DeletionScheduled
                && key.deletion_date.is_some_and(|due| due <= now)
            {
                key.status = MasterKeyStatus::Deleted;
                purged.push(id.clone());
            }
        }
        if !purged.is_empty() {
            info!(count = purged.len(), "Purged simulated master keys");
        }
        purged
    }

    fn check_available(&self, operation: &str) -> Result<(), VaultError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(VaultError::KmsUnavailable(format!(
                "simulated KMS offline during {}",
                operation
            )));
        }
        let injected = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(VaultError::KmsUnavailable(format!(
                "injected failure during {}",
                operation
            )));
        }
        Ok(())
    }

    /// Fails unless the key exists and may unwrap.
    fn usable_key(&self, master_key_id: &str) -> Result<(), VaultError> {
        match self.table.read().keys.get(master_key_id) {
            None => Err(VaultError::KeyNotFound(format!(
                "master key {} does not exist",
                master_key_id
            ))),
            Some(key) if !key.status.can_unwrap() => Err(VaultError::KeyNotFound(format!(
                "master key {} is {:?}",
                master_key_id, key.status
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Derives key material for a purpose from the seed.
    fn derive(&self, label: &str, id: &str) -> Zeroizing<[u8; AES_256_KEY_SIZE]> {
        let key = hmac::Key::new(hmac::HMAC_SHA256, self.seed.as_ref());
        let mut ctx = hmac::Context::with_key(&key);
        ctx.update(label.as_bytes());
        ctx.update(&[0]);
        ctx.update(id.as_bytes());
        let tag = ctx.sign();

        let mut out = Zeroizing::new([0u8; AES_256_KEY_SIZE]);
        out.copy_from_slice(tag.as_ref());
        out
    }

    fn envelope_aad(master_key_id: &str) -> Vec<u8> {
        let mut aad = Vec::with_capacity(SIMULATED_WRAP_MAGIC.len() + master_key_id.len());
        aad.extend_from_slice(SIMULATED_WRAP_MAGIC);
        aad.extend_from_slice(master_key_id.as_bytes());
        aad
    }
}

/// Splits a simulated envelope into (master key id, nonce, sealed DEK, tag).
fn parse_envelope(wrapped: &[u8]) -> Result<(&str, &[u8], &[u8], &[u8]), VaultError> {
    let malformed = || VaultError::InvalidCiphertextLength("malformed simulated wrapped key".into());

    let rest = wrapped
        .strip_prefix(SIMULATED_WRAP_MAGIC.as_slice())
        .ok_or_else(malformed)?;
    let (&id_len, rest) = rest.split_first().ok_or_else(malformed)?;
    let id_len = id_len as usize;
    if rest.len() != id_len + AES_GCM_NONCE_SIZE + AES_256_KEY_SIZE + AES_GCM_TAG_SIZE {
        return Err(malformed());
    }

    let (id, rest) = rest.split_at(id_len);
    let id = std::str::from_utf8(id).map_err(|_| malformed())?;
    let (nonce, rest) = rest.split_at(AES_GCM_NONCE_SIZE);
    let (sealed, tag) = rest.split_at(AES_256_KEY_SIZE);
    Ok((id, nonce, sealed, tag))
}

#[async_trait]
impl KmsAdapter for SimulatedKms {
    fn provider(&self) -> KmsProvider {
        KmsProvider::Simulated
    }

    #[instrument(skip(self, dek), fields(kms = "simulated"))]
    async fn wrap_key(
        &self,
        master_key_id: &str,
        dek: &DataEncryptionKey,
    ) -> Result<WrappedDek, VaultError> {
        self.check_available("wrap_key")?;
        self.usable_key(master_key_id)?;
        if master_key_id.len() > u8::MAX as usize {
            return Err(VaultError::InvalidRequest("master key id too long".into()));
        }

        let mut nonce = [0u8; AES_GCM_NONCE_SIZE];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| VaultError::KeyGeneration("failed to generate nonce".into()))?;

        let kek = self.derive("master-key", master_key_id);
        let sealed = aead::seal(
            kek.as_ref(),
            nonce,
            dek.key(),
            &Self::envelope_aad(master_key_id),
        )?;

        let mut bytes = Vec::with_capacity(
            SIMULATED_WRAP_MAGIC.len()
                + 1
                + master_key_id.len()
                + AES_GCM_NONCE_SIZE
                + AES_256_KEY_SIZE
                + AES_GCM_TAG_SIZE,
        );
        bytes.extend_from_slice(SIMULATED_WRAP_MAGIC);
        bytes.push(master_key_id.len() as u8);
        bytes.extend_from_slice(master_key_id.as_bytes());
        bytes.extend_from_slice(&sealed.iv);
        bytes.extend_from_slice(&sealed.ciphertext);
        bytes.extend_from_slice(&sealed.tag);

        let dek_id = format!("sim-dek-{}", uuid::Uuid::new_v4());
        info!(dek_id = %dek_id, wrapped_len = bytes.len(), "Wrapped DEK");

        Ok(WrappedDek {
            dek_id,
            master_key_id: master_key_id.to_string(),
            bytes,
        })
    }

    #[instrument(skip(self, wrapped), fields(kms = "simulated", wrapped_len = wrapped.len()))]
    async fn unwrap_key(
        &self,
        master_key_id: &str,
        wrapped: &[u8],
    ) -> Result<DataEncryptionKey, VaultError> {
        self.check_available("unwrap_key")?;

        let (embedded_id, nonce, sealed, tag) = parse_envelope(wrapped)?;
        if embedded_id != master_key_id {
            return Err(VaultError::KeyNotFound(format!(
                "wrapped key belongs to master key {}, not {}",
                embedded_id, master_key_id
            )));
        }
        self.usable_key(master_key_id)?;

        let kek = self.derive("master-key", master_key_id);
        let raw = Zeroizing::new(aead::open(
            kek.as_ref(),
            sealed,
            nonce,
            tag,
            &Self::envelope_aad(master_key_id),
        )?);

        DataEncryptionKey::from_slice(&raw)
    }

    #[instrument(skip(self, payload), fields(kms = "simulated", payload_len = payload.len()))]
    async fn sign_payload(&self, payload: &[u8]) -> Result<PayloadSignature, VaultError> {
        self.check_available("sign_payload")?;

        match &self.signer {
            Some(pair) => Ok(PayloadSignature {
                algorithm: SignatureAlgorithm::Ed25519,
                key_id: ED25519_SIGNING_KEY_ID.to_string(),
                bytes: pair.sign(payload).as_ref().to_vec(),
            }),
            None => {
                let secret = self.derive("payload-signing", HMAC_SIGNING_KEY_ID);
                let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_ref());
                Ok(PayloadSignature {
                    algorithm: SignatureAlgorithm::HmacSha256,
                    key_id: HMAC_SIGNING_KEY_ID.to_string(),
                    bytes: hmac::sign(&key, payload).as_ref().to_vec(),
                })
            }
        }
    }

    #[instrument(skip(self), fields(kms = "simulated"))]
    async fn rotate_master_key(&self) -> Result<String, VaultError> {
        self.check_available("rotate_master_key")?;

        let new_id = format!("sim-mk-{}", uuid::Uuid::new_v4());
        let mut table = self.table.write();
        let previous = table.active.clone();
        if let Some(old) = table.keys.get_mut(&previous) {
            if old.status == MasterKeyStatus::Active {
                old.status = MasterKeyStatus::Deprecated;
            }
        }
        table.keys.insert(
            new_id.clone(),
            SimulatedMasterKey {
                status: MasterKeyStatus::Active,
                deletion_date: None,
            },
        );
        table.active = new_id.clone();

        info!(previous = %previous, current = %new_id, "Rotated simulated master key");
        Ok(new_id)
    }

    #[instrument(skip(self), fields(kms = "simulated"))]
    async fn schedule_key_deletion(
        &self,
        master_key_id: &str,
        wait_days: u32,
    ) -> Result<DateTime<Utc>, VaultError> {
        self.check_available("schedule_key_deletion")?;

        let mut table = self.table.write();
        let key = table.keys.get_mut(master_key_id).ok_or_else(|| {
            VaultError::KeyNotFound(format!("master key {} does not exist", master_key_id))
        })?;

        match (key.status, key.deletion_date) {
            (MasterKeyStatus::Deleted, _) => Err(VaultError::KeyNotFound(format!(
                "master key {} already deleted",
                master_key_id
            ))),
            (MasterKeyStatus::DeletionScheduled, Some(due)) => Ok(due),
            _ => {
                let due = Utc::now() + ChronoDuration::days(i64::from(wait_days));
                key.status = MasterKeyStatus::DeletionScheduled;
                key.deletion_date = Some(due);
                warn!(master_key_id = %master_key_id, deletion_date = %due, "Scheduled master key deletion");
                Ok(due)
            }
        }
    }

    #[instrument(skip(self), fields(kms = "simulated"))]
    async fn cancel_key_deletion(&self, master_key_id: &str) -> Result<(), VaultError> {
        self.check_available("cancel_key_deletion")?;

        let mut table = self.table.write();
        let key = table.keys.get_mut(master_key_id).ok_or_else(|| {
            VaultError::KeyNotFound(format!("master key {} does not exist", master_key_id))
        })?;

        match key.status {
            MasterKeyStatus::DeletionScheduled => {
                key.status = MasterKeyStatus::Deprecated;
                key.deletion_date = None;
                info!(master_key_id = %master_key_id, "Cancelled master key deletion");
                Ok(())
            }
            MasterKeyStatus::Deleted => Err(VaultError::KeyNotFound(format!(
                "master key {} already deleted",
                master_key_id
            ))),
            status => Err(VaultError::InvalidRequest(format!(
                "master key {} is {:?}, not pending deletion",
                master_key_id, status
            ))),
        }
    }

    async fn health_check(&self) -> KmsHealthStatus {
        // Reads availability only; injected failures are left for real calls.
        if !self.available.load(Ordering::SeqCst) {
            return KmsHealthStatus::unhealthy("simulated KMS offline");
        }

        let table = self.table.read();
        match table.keys.get(&table.active) {
            Some(key) if key.status == MasterKeyStatus::Active => KmsHealthStatus::healthy(
                format!("simulated KMS, {} master keys", table.keys.len()),
            ),
            Some(key) => KmsHealthStatus::unhealthy(format!(
                "active master key {} is {:?}",
                table.active, key.status
            )),
            None => KmsHealthStatus::unhealthy(format!(
                "active master key {} missing",
                table.active
            )),
        }
    }

    async fn verification_key(&self) -> Result<VerificationKey, VaultError> {
        match &self.signer {
            Some(pair) => Ok(VerificationKey::Ed25519(pair.public_key().as_ref().to_vec())),
            None => {
                let secret = self.derive("payload-signing", HMAC_SIGNING_KEY_ID);
                Ok(VerificationKey::HmacSha256(Zeroizing::new(secret.to_vec())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kms() -> SimulatedKms {
        SimulatedKms::new(Environment::Test, "mk-1").unwrap()
    }

    fn dek() -> DataEncryptionKey {
        DataEncryptionKey::generate(&SystemRandom::new()).unwrap()
    }

    #[test]
    fn test_refuses_production() {
        let result = SimulatedKms::new(Environment::Production, "mk-1");
        assert!(matches!(result, Err(VaultError::SimulatedKmsInProduction)));
    }

    #[tokio::test]
    async fn test_wrap_unwrap_dek() {
        let kms = kms();
        let dek = dek();

        let wrapped = kms.wrap_key("mk-1", &dek).await.unwrap();
        assert!(wrapped.dek_id.starts_with("sim-dek-"));
        assert_eq!(wrapped.master_key_id, "mk-1");
        assert!(wrapped.bytes.starts_with(SIMULATED_WRAP_MAGIC));
        assert!(!wrapped
            .bytes
            .windows(AES_256_KEY_SIZE)
            .any(|w| w == dek.key()));

        let unwrapped = kms.unwrap_key("mk-1", &wrapped.bytes).await.unwrap();
        assert_eq!(unwrapped.key(), dek.key());
    }

    #[tokio::test]
    async fn test_wrap_produces_different_ciphertext() {
        let kms = kms();
        let dek = dek();

        let a = kms.wrap_key("mk-1", &dek).await.unwrap();
        let b = kms.wrap_key("mk-1", &dek).await.unwrap();
        assert_ne!(a.bytes, b.bytes);
        assert_ne!(a.dek_id, b.dek_id);
    }

    #[tokio::test]
    async fn test_same_seed_unwraps_across_instances() {
        let dek = dek();
        let wrapped = kms().wrap_key("mk-1", &dek).await.unwrap();

        let restarted = kms();
        let unwrapped = restarted.unwrap_key("mk-1", &wrapped.bytes).await.unwrap();
        assert_eq!(unwrapped.key(), dek.key());

        let other_seed = kms().with_seed([9u8; 32]);
        let result = other_seed.unwrap_key("mk-1", &wrapped.bytes).await;
        assert!(matches!(result, Err(VaultError::AuthenticationFailure)));
    }

    #[tokio::test]
    async fn test_unwrap_under_wrong_master_key_fails() {
        let kms = kms();
        let wrapped = kms.wrap_key("mk-1", &dek()).await.unwrap();
        let mk2 = kms.rotate_master_key().await.unwrap();

        let result = kms.unwrap_key(&mk2, &wrapped.bytes).await;
        assert!(matches!(result, Err(VaultError::KeyNotFound(_))));
    }

    #[tokio::test]
    async fn test_tampered_wrapped_key_fails() {
        let kms = kms();
        let mut wrapped = kms.wrap_key("mk-1", &dek()).await.unwrap();
        let last = wrapped.bytes.len() - 1;
        wrapped.bytes[last] ^= 0x01;

        let result = kms.unwrap_key("mk-1", &wrapped.bytes).await;
        assert!(matches!(result, Err(VaultError::AuthenticationFailure)));

        let result = kms.unwrap_key("mk-1", &wrapped.bytes[..20]).await;
        assert!(matches!(result, Err(VaultError::InvalidCiphertextLength(_))));
    }

    #[tokio::test]
    async fn test_rotation_deprecates_previous_key() {
        let kms = kms();
        let wrapped = kms.wrap_key("mk-1", &dek()).await.unwrap();

        let new_id = kms.rotate_master_key().await.unwrap();
        assert_eq!(kms.active_master_key_id(), new_id);
        assert_eq!(
            kms.master_key("mk-1").unwrap().status,
            MasterKeyStatus::Deprecated
        );
        assert_eq!(
            kms.master_key(&new_id).unwrap().status,
            MasterKeyStatus::Active
        );

        // Deprecated keys still unwrap.
        assert!(kms.unwrap_key("mk-1", &wrapped.bytes).await.is_ok());
    }

    #[tokio::test]
    async fn test_scheduled_deletion_blocks_unwrap() {
        let kms = kms();
        let wrapped = kms.wrap_key("mk-1", &dek()).await.unwrap();

        let due = kms.schedule_key_deletion("mk-1", 7).await.unwrap();
        assert!(due > Utc::now());
        assert_eq!(
            kms.master_key("mk-1").unwrap().status,
            MasterKeyStatus::DeletionScheduled
        );

        let result = kms.unwrap_key("mk-1", &wrapped.bytes).await;
        assert!(matches!(result, Err(VaultError::KeyNotFound(_))));

        // Scheduling again is idempotent.
        assert_eq!(kms.schedule_key_deletion("mk-1", 30).await.unwrap(), due);
    }

    #[tokio::test]
    async fn test_cancel_deletion_restores_unwrap() {
        let kms = kms();
        let wrapped = kms.wrap_key("mk-1", &dek()).await.unwrap();

        kms.schedule_key_deletion("mk-1", 7).await.unwrap();
        kms.cancel_key_deletion("mk-1").await.unwrap();

        assert_eq!(
            kms.master_key("mk-1").unwrap().status,
            MasterKeyStatus::Deprecated
        );
        assert!(kms.unwrap_key("mk-1", &wrapped.bytes).await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_makes_deletion_final() {
        let kms = kms();
        let due = kms.schedule_key_deletion("mk-1", 7).await.unwrap();

        assert!(kms.purge_due_keys(Utc::now()).is_empty());
        assert_eq!(kms.purge_due_keys(due), vec!["mk-1".to_string()]);
        assert_eq!(
            kms.master_key("mk-1").unwrap().status,
            MasterKeyStatus::Deleted
        );

        let result = kms.cancel_key_deletion("mk-1").await;
        assert!(matches!(result, Err(VaultError::KeyNotFound(_))));
    }

    #[tokio::test]
    async fn test_hmac_fallback_signature() {
        let kms = kms();
        let sig = kms.sign_payload(b"payload").await.unwrap();
        assert_eq!(sig.algorithm, SignatureAlgorithm::HmacSha256);

        let key = kms.verification_key().await.unwrap();
        assert!(key.verify(b"payload", &sig).is_ok());
        assert!(key.verify(b"tampered", &sig).is_err());
    }

    #[tokio::test]
    async fn test_ed25519_signature() {
        let kms = kms().with_generated_signing_key().unwrap();
        let sig = kms.sign_payload(b"payload").await.unwrap();
        assert_eq!(sig.algorithm, SignatureAlgorithm::Ed25519);

        let key = kms.verification_key().await.unwrap();
        assert!(matches!(key, VerificationKey::Ed25519(ref pk) if pk.len() == 32));
        assert!(key.verify(b"payload", &sig).is_ok());
        assert!(key.verify(b"tampered", &sig).is_err());
    }

    #[tokio::test]
    async fn test_injected_failures_then_recovery() {
        let kms = kms();
        kms.inject_unavailable(2);

        for _ in 0..2 {
            let result = kms.wrap_key("mk-1", &dek()).await;
            assert!(matches!(result, Err(VaultError::KmsUnavailable(_))));
        }
        assert!(kms.wrap_key("mk-1", &dek()).await.is_ok());
    }

    #[tokio::test]
    async fn test_health_check() {
        let kms = kms();
        assert!(kms.health_check().await.is_healthy());

        kms.set_available(false);
        assert!(!kms.health_check().await.is_healthy());

        kms.set_available(true);
        kms.schedule_key_deletion("mk-1", 7).await.unwrap();
        assert!(!kms.health_check().await.is_healthy());
    }

    #[tokio::test]
    async fn test_health_check_leaves_injected_failures() {
        let kms = kms();
        kms.inject_unavailable(1);

        assert!(kms.health_check().await.is_healthy());
        assert!(kms.health_check().await.is_healthy());

        let result = kms.wrap_key("mk-1", &dek()).await;
        assert!(matches!(result, Err(VaultError::KmsUnavailable(_))));
        assert!(kms.wrap_key("mk-1", &dek()).await.is_ok());
    }

    #[tokio::test]
    async fn test_schedule_deletion_is_idempotent() {
        let kms = kms();
        let due = kms.schedule_key_deletion("mk-1", 7).await.unwrap();

        assert_eq!(kms.schedule_key_deletion("mk-1", 7).await.unwrap(), due);
        assert_eq!(kms.schedule_key_deletion("mk-1", 30).await.unwrap(), due);
    }

    #[tokio::test]
    async fn test_unknown_master_key() {
        let kms = kms();
        let result = kms.wrap_key("mk-missing", &dek()).await;
        assert!(matches!(result, Err(VaultError::KeyNotFound(_))));

        let result = kms.schedule_key_deletion("mk-missing", 7).await;
        assert!(matches!(result, Err(VaultError::KeyNotFound(_))));
    }
}
