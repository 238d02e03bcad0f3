// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! AWS KMS adapter for production deployments.
//!
//! Master keys never leave AWS KMS: wrapping, unwrapping and signing
//! happen server-side. Certificates are signed with an asymmetric
//! `ECC_NIST_P256` key so anyone holding its public half can verify them.

use async_trait::async_trait;
use aws_sdk_kms::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_kms::primitives::{Blob, DateTime as AwsDateTime};
use aws_sdk_kms::types::{
    KeyMetadata, KeySpec, KeyState, KeyUsageType, MessageType, SigningAlgorithmSpec,
};
use aws_sdk_kms::Client as KmsClient;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{info, instrument, warn};
use zeroize::Zeroizing;

use crate::error::VaultError;
use crate::kms::{
    sealed, DataEncryptionKey, KmsAdapter, KmsHealthStatus, KmsProvider, PayloadSignature,
    SignatureAlgorithm, VerificationKey, WrappedDek,
};

/// Length of an uncompressed P-256 point.
const P256_POINT_LEN: usize = 65;

/// DER prefix of a P-256 SubjectPublicKeyInfo: id-ecPublicKey, prime256v1,
/// then the BIT STRING header for the 65-byte point.
const P256_SPKI_PREFIX: [u8; 26] = [
    0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08, 0x2a,
    0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
];

/// Settings for [`AwsKms`].
#[derive(Debug, Clone)]
pub struct AwsKmsConfig {
    /// Key id, ARN or alias of the initial master key.
    pub master_key_id: String,
    /// Asymmetric `ECC_NIST_P256` key used for certificates.
    pub signing_key_id: String,
    /// Alias repointed at each new master key on rotation.
    pub alias: Option<String>,
    /// Description given to keys created on rotation.
    pub key_description: String,
}

impl AwsKmsConfig {
    /// Creates a config without an alias.
    pub fn new(master_key_id: impl Into<String>, signing_key_id: impl Into<String>) -> Self {
        Self {
            master_key_id: master_key_id.into(),
            signing_key_id: signing_key_id.into(),
            alias: None,
            key_description: "secure-vault master key".into(),
        }
    }

    /// Sets the alias to maintain on rotation.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

/// AWS KMS-backed adapter.
pub struct AwsKms {
    client: KmsClient,
    active_key_id: RwLock<String>,
    signing_key_id: String,
    alias: Option<String>,
    key_description: String,
}

impl AwsKms {
    /// Connects with the default AWS credential chain and checks that the
    /// master key is reachable.
    pub async fn new(config: AwsKmsConfig) -> Result<Self, VaultError> {
        let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let kms = Self::from_sdk_config(&sdk_config, config);

        let key_id = kms.active_key_id.read().clone();
        kms.client
            .describe_key()
            .key_id(&key_id)
            .send()
            .await
            .map_err(|e| map_sdk_error("describe_key", &key_id, e))?;

        info!(key_id = %key_id, "Connected to AWS KMS");
        Ok(kms)
    }

    /// Creates from an existing AWS SDK config without probing.
    pub fn from_sdk_config(sdk_config: &aws_config::SdkConfig, config: AwsKmsConfig) -> Self {
        Self {
            client: KmsClient::new(sdk_config),
            active_key_id: RwLock::new(config.master_key_id),
            signing_key_id: config.signing_key_id,
            alias: config.alias,
            key_description: config.key_description,
        }
    }

    /// Current active master key id.
    pub fn active_master_key_id(&self) -> String {
        self.active_key_id.read().clone()
    }

    /// Due date of a key already pending deletion, if it is.
    async fn existing_deletion_date(
        &self,
        master_key_id: &str,
    ) -> Result<Option<DateTime<Utc>>, VaultError> {
        let output = self
            .client
            .describe_key()
            .key_id(master_key_id)
            .send()
            .await
            .map_err(|e| map_sdk_error("describe_key", master_key_id, e))?;
        Ok(output.key_metadata().and_then(pending_deletion_date))
    }
}

fn to_utc(date: &AwsDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(date.secs(), date.subsec_nanos())
}

/// Deletion date of a key in `PendingDeletion`, `None` for any other state.
fn pending_deletion_date(metadata: &KeyMetadata) -> Option<DateTime<Utc>> {
    match metadata.key_state() {
        Some(KeyState::PendingDeletion) => metadata.deletion_date().and_then(to_utc),
        _ => None,
    }
}

/// AWS takes the pending window as an `i32`.
fn pending_window_days(wait_days: u32) -> Result<i32, VaultError> {
    i32::try_from(wait_days).map_err(|_| {
        VaultError::InvalidRequest(format!("deletion window of {} days is out of range", wait_days))
    })
}

impl sealed::Sealed for AwsKms {}

/// Maps an SDK failure onto the vault's error taxonomy.
fn map_sdk_error<E, R>(operation: &str, key_id: &str, err: SdkError<E, R>) -> VaultError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = format!("{} on {}: {}", operation, key_id, DisplayErrorContext(&err));

    let error = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            VaultError::KmsUnavailable(message)
        }
        _ => match err.code() {
            Some("NotFoundException" | "KMSInvalidStateException" | "DisabledException") => {
                VaultError::KeyNotFound(message)
            }
            Some("AccessDeniedException") => VaultError::AccessDenied(message),
            Some("InvalidCiphertextException" | "IncorrectKeyException") => {
                VaultError::AuthenticationFailure
            }
            Some(
                "KMSInternalException"
                | "DependencyTimeoutException"
                | "ThrottlingException"
                | "LimitExceededException",
            ) => VaultError::KmsUnavailable(message),
            _ => VaultError::InvalidRequest(message),
        },
    };

    warn!(operation, key_id = %key_id, error = %error, "AWS KMS call failed");
    error
}

#[async_trait]
impl KmsAdapter for AwsKms {
    fn provider(&self) -> KmsProvider {
        KmsProvider::AwsKms
    }

    #[instrument(skip(self, dek), fields(kms = "aws"))]
    async fn wrap_key(
        &self,
        master_key_id: &str,
        dek: &DataEncryptionKey,
    ) -> Result<WrappedDek, VaultError> {
        let output = self
            .client
            .encrypt()
            .key_id(master_key_id)
            .plaintext(Blob::new(dek.key().to_vec()))
            .send()
            .await
            .map_err(|e| map_sdk_error("encrypt", master_key_id, e))?;

        let bytes = output
            .ciphertext_blob()
            .ok_or_else(|| VaultError::KmsUnavailable("encrypt returned no ciphertext".into()))?
            .as_ref()
            .to_vec();

        Ok(WrappedDek {
            dek_id: uuid::Uuid::new_v4().to_string(),
            master_key_id: master_key_id.to_string(),
            bytes,
        })
    }

    #[instrument(skip(self, wrapped), fields(kms = "aws"))]
    async fn unwrap_key(
        &self,
        master_key_id: &str,
        wrapped: &[u8],
    ) -> Result<DataEncryptionKey, VaultError> {
        let mut output = self
            .client
            .decrypt()
            .key_id(master_key_id)
            .ciphertext_blob(Blob::new(wrapped.to_vec()))
            .send()
            .await
            .map_err(|e| map_sdk_error("decrypt", master_key_id, e))?;

        let plaintext = Zeroizing::new(
            output
                .plaintext
                .take()
                .map(Blob::into_inner)
                .ok_or_else(|| VaultError::KmsUnavailable("decrypt returned no plaintext".into()))?,
        );
        DataEncryptionKey::from_slice(&plaintext)
    }

    #[instrument(skip(self, payload), fields(kms = "aws", payload_len = payload.len()))]
    async fn sign_payload(&self, payload: &[u8]) -> Result<PayloadSignature, VaultError> {
        let output = self
            .client
            .sign()
            .key_id(&self.signing_key_id)
            .message(Blob::new(payload.to_vec()))
            .message_type(MessageType::Raw)
            .signing_algorithm(SigningAlgorithmSpec::EcdsaSha256)
            .send()
            .await
            .map_err(|e| map_sdk_error("sign", &self.signing_key_id, e))?;

        let bytes = output
            .signature()
            .ok_or_else(|| VaultError::Signature("sign returned no signature".into()))?
            .as_ref()
            .to_vec();

        Ok(PayloadSignature {
            algorithm: SignatureAlgorithm::EcdsaP256Sha256,
            key_id: self.signing_key_id.clone(),
            bytes,
        })
    }

    #[instrument(skip(self), fields(kms = "aws"))]
    async fn rotate_master_key(&self) -> Result<String, VaultError> {
        let previous = self.active_master_key_id();
        let output = self
            .client
            .create_key()
            .description(&self.key_description)
            .key_usage(KeyUsageType::EncryptDecrypt)
            .key_spec(KeySpec::SymmetricDefault)
            .send()
            .await
            .map_err(|e| map_sdk_error("create_key", &previous, e))?;

        let new_id = output
            .key_metadata()
            .map(|m| m.key_id().to_string())
            .ok_or_else(|| VaultError::KmsUnavailable("create_key returned no metadata".into()))?;

        if let Some(alias) = &self.alias {
            self.client
                .update_alias()
                .alias_name(alias)
                .target_key_id(&new_id)
                .send()
                .await
                .map_err(|e| map_sdk_error("update_alias", &new_id, e))?;
        }

        *self.active_key_id.write() = new_id.clone();
        info!(previous = %previous, current = %new_id, "Created new AWS KMS master key");
        Ok(new_id)
    }

    #[instrument(skip(self), fields(kms = "aws"))]
    async fn schedule_key_deletion(
        &self,
        master_key_id: &str,
        wait_days: u32,
    ) -> Result<DateTime<Utc>, VaultError> {
        let window = pending_window_days(wait_days)?;
        let result = self
            .client
            .schedule_key_deletion()
            .key_id(master_key_id)
            .pending_window_in_days(window)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            // A key already pending deletion keeps its original due date.
            Err(e) if e.code() == Some("KMSInvalidStateException") => {
                return match self.existing_deletion_date(master_key_id).await? {
                    Some(due) => {
                        info!(
                            master_key_id = %master_key_id,
                            deletion_date = %due,
                            "AWS KMS key already pending deletion"
                        );
                        Ok(due)
                    }
                    None => Err(map_sdk_error("schedule_key_deletion", master_key_id, e)),
                };
            }
            Err(e) => return Err(map_sdk_error("schedule_key_deletion", master_key_id, e)),
        };

        let deletion_date = output
            .deletion_date()
            .and_then(to_utc)
            .unwrap_or_else(|| Utc::now() + chrono::Duration::days(i64::from(wait_days)));

        warn!(
            master_key_id = %master_key_id,
            deletion_date = %deletion_date,
            "Scheduled AWS KMS key deletion"
        );
        Ok(deletion_date)
    }

    #[instrument(skip(self), fields(kms = "aws"))]
    async fn cancel_key_deletion(&self, master_key_id: &str) -> Result<(), VaultError> {
        self.client
            .cancel_key_deletion()
            .key_id(master_key_id)
            .send()
            .await
            .map_err(|e| map_sdk_error("cancel_key_deletion", master_key_id, e))?;

        // Cancelled keys come back disabled.
        self.client
            .enable_key()
            .key_id(master_key_id)
            .send()
            .await
            .map_err(|e| map_sdk_error("enable_key", master_key_id, e))?;

        info!(master_key_id = %master_key_id, "Cancelled AWS KMS key deletion");
        Ok(())
    }

    async fn health_check(&self) -> KmsHealthStatus {
        let key_id = self.active_master_key_id();
        match self.client.describe_key().key_id(&key_id).send().await {
            Ok(output) => match output.key_metadata().and_then(|m| m.key_state()) {
                Some(KeyState::Enabled) => {
                    KmsHealthStatus::healthy(format!("master key {} enabled", key_id))
                }
                Some(state) => KmsHealthStatus::unhealthy(format!(
                    "master key {} is {}",
                    key_id,
                    state.as_str()
                )),
                None => KmsHealthStatus::unhealthy(format!("master key {} has no state", key_id)),
            },
            Err(e) => KmsHealthStatus::unhealthy(map_sdk_error("describe_key", &key_id, e).to_string()),
        }
    }

    #[instrument(skip(self), fields(kms = "aws"))]
    async fn verification_key(&self) -> Result<VerificationKey, VaultError> {
        let output = self
            .client
            .get_public_key()
            .key_id(&self.signing_key_id)
            .send()
            .await
            .map_err(|e| map_sdk_error("get_public_key", &self.signing_key_id, e))?;

        let spki = output
            .public_key()
            .ok_or_else(|| VaultError::Signature("get_public_key returned no key".into()))?
            .as_ref();
        point_from_spki(spki).map(VerificationKey::EcdsaP256)
    }
}

/// Extracts the uncompressed point from a P-256 SubjectPublicKeyInfo.
fn point_from_spki(spki: &[u8]) -> Result<Vec<u8>, VaultError> {
    let point = spki.strip_prefix(&P256_SPKI_PREFIX[..]).ok_or_else(|| {
        VaultError::Signature("public key is not a P-256 SubjectPublicKeyInfo".into())
    })?;
    if point.len() != P256_POINT_LEN || point[0] != 0x04 {
        return Err(VaultError::Signature(
            "public key is not an uncompressed P-256 point".into(),
        ));
    }
    Ok(point.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from_env() -> AwsKmsConfig {
        AwsKmsConfig::new(
            std::env::var("AWS_KMS_KEY_ID").expect("AWS_KMS_KEY_ID not set"),
            std::env::var("AWS_KMS_SIGNING_KEY_ID").expect("AWS_KMS_SIGNING_KEY_ID not set"),
        )
    }

    fn p256_spki() -> Vec<u8> {
        let mut spki = P256_SPKI_PREFIX.to_vec();
        spki.push(0x04);
        spki.extend_from_slice(&[7u8; 64]);
        spki
    }

    #[test]
    fn test_point_from_spki() {
        let spki = p256_spki();
        assert_eq!(spki.len(), 91);

        let point = point_from_spki(&spki).unwrap();
        assert_eq!(point.len(), P256_POINT_LEN);
        assert_eq!(point[0], 0x04);

        assert!(point_from_spki(&[0x04; 10]).is_err());
        let mut compressed = spki;
        compressed[P256_SPKI_PREFIX.len()] = 0x02;
        assert!(point_from_spki(&compressed).is_err());
    }

    #[test]
    fn test_point_from_spki_rejects_other_curves() {
        // secp256k1 OID (1.3.132.0.10) in place of prime256v1, same length.
        let mut spki = vec![
            0x30, 0x56, 0x30, 0x10, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06,
            0x05, 0x2b, 0x81, 0x04, 0x00, 0x0a, 0x03, 0x42, 0x00,
        ];
        spki.push(0x04);
        spki.extend_from_slice(&[7u8; 64]);
        assert!(matches!(point_from_spki(&spki), Err(VaultError::Signature(_))));

        let mut trailing = p256_spki();
        trailing.push(0x00);
        assert!(point_from_spki(&trailing).is_err());
    }

    #[test]
    fn test_pending_window_days_range() {
        assert_eq!(pending_window_days(7).unwrap(), 7);
        assert_eq!(pending_window_days(30).unwrap(), 30);
        assert!(matches!(
            pending_window_days(u32::MAX),
            Err(VaultError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_pending_deletion_date_only_for_pending_keys() {
        let due = AwsDateTime::from_secs(1_800_000_000);
        let pending = KeyMetadata::builder()
            .key_id("mk-1")
            .key_state(KeyState::PendingDeletion)
            .deletion_date(due)
            .build()
            .unwrap();
        assert_eq!(
            pending_deletion_date(&pending),
            DateTime::<Utc>::from_timestamp(1_800_000_000, 0)
        );

        let enabled = KeyMetadata::builder()
            .key_id("mk-1")
            .key_state(KeyState::Enabled)
            .deletion_date(due)
            .build()
            .unwrap();
        assert_eq!(pending_deletion_date(&enabled), None);
    }

    #[tokio::test]
    #[ignore = "requires AWS credentials"]
    async fn test_aws_wrap_unwrap() {
        let kms = AwsKms::new(config_from_env()).await.unwrap();
        let key_id = kms.active_master_key_id();
        let dek = DataEncryptionKey::new([9u8; 32]);

        let wrapped = kms.wrap_key(&key_id, &dek).await.unwrap();
        let unwrapped = kms.unwrap_key(&key_id, &wrapped.bytes).await.unwrap();
        assert_eq!(unwrapped.key(), dek.key());
    }

    #[tokio::test]
    #[ignore = "requires AWS credentials"]
    async fn test_aws_sign_and_verify() {
        let kms = AwsKms::new(config_from_env()).await.unwrap();

        let signature = kms.sign_payload(b"certificate").await.unwrap();
        let key = kms.verification_key().await.unwrap();
        assert!(key.verify(b"certificate", &signature).is_ok());
        assert!(key.verify(b"certificatf", &signature).is_err());
    }

    #[tokio::test]
    #[ignore = "requires AWS credentials"]
    async fn test_aws_health_check() {
        let kms = AwsKms::new(config_from_env()).await.unwrap();
        assert!(kms.health_check().await.is_healthy());
    }
}
