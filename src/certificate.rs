// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Signed deletion certificates.
//!
//! A certificate attests that an object was crypto-erased. The signature
//! covers a canonical JSON payload with fixed key order:
//!
//! ```text
//! {"objectId":"…","deletedBy":"…","deletedAt":"2025-01-01T00:00:00.000Z","reason":"…"}
//! ```
//!
//! `deletedAt` is RFC 3339 UTC with millisecond precision. A verifier needs
//! only this rule and the [`VerificationKey`].

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::config::RetryPolicy;
use crate::error::VaultError;
use crate::kms::{KmsAdapter, PayloadSignature, VerificationKey};
use crate::retry::with_retry;

/// Proof that an object's key material was destroyed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionCertificate {
    /// Erased object.
    pub object_id: String,
    /// Principal that requested the erase.
    pub deleted_by: String,
    /// Issuance time, millisecond precision.
    pub deleted_at: DateTime<Utc>,
    /// Free-form reason.
    pub reason: String,
    /// Signature over [`DeletionCertificate::canonical_payload`].
    pub signature: PayloadSignature,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalPayload<'a> {
    object_id: &'a str,
    deleted_by: &'a str,
    deleted_at: String,
    reason: &'a str,
}

/// Builds the signed bytes for a certificate's fields.
pub fn canonical_payload(
    object_id: &str,
    deleted_by: &str,
    deleted_at: &DateTime<Utc>,
    reason: &str,
) -> Result<Vec<u8>, VaultError> {
    let payload = CanonicalPayload {
        object_id,
        deleted_by,
        deleted_at: deleted_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        reason,
    };
    Ok(serde_json::to_vec(&payload)?)
}

impl DeletionCertificate {
    /// Canonical payload rebuilt from this certificate's own fields.
    pub fn canonical_payload(&self) -> Result<Vec<u8>, VaultError> {
        canonical_payload(
            &self.object_id,
            &self.deleted_by,
            &self.deleted_at,
            &self.reason,
        )
    }

    /// Verifies the signature against the certificate's fields.
    ///
    /// `deleted_at` is signed at millisecond precision, so any finer
    /// component means the field was altered after issuance.
    pub fn verify(&self, key: &VerificationKey) -> Result<(), VaultError> {
        if self.deleted_at != self.deleted_at.trunc_subsecs(3) {
            return Err(VaultError::InvalidSignature);
        }
        key.verify(&self.canonical_payload()?, &self.signature)
    }
}

/// Issues deletion certificates signed by the KMS.
pub struct CertificateIssuer<K: KmsAdapter + ?Sized> {
    kms: Arc<K>,
    retry: RetryPolicy,
}

impl<K: KmsAdapter + ?Sized> CertificateIssuer<K> {
    /// Creates an issuer signing through `kms`.
    pub fn new(kms: Arc<K>, retry: RetryPolicy) -> Self {
        Self { kms, retry }
    }

    /// Issues a certificate dated now.
    #[instrument(skip(self, reason))]
    pub async fn issue(
        &self,
        object_id: &str,
        deleted_by: &str,
        reason: &str,
    ) -> Result<DeletionCertificate, VaultError> {
        if object_id.is_empty() {
            return Err(VaultError::InvalidRequest("object id is empty".into()));
        }
        if deleted_by.is_empty() {
            return Err(VaultError::InvalidRequest("deleted_by is empty".into()));
        }

        let deleted_at = Utc::now().trunc_subsecs(3);
        let payload = canonical_payload(object_id, deleted_by, &deleted_at, reason)?;

        let kms = self.kms.as_ref();
        let signature = with_retry(&self.retry, "sign_payload", || {
            kms.sign_payload(&payload)
        })
        .await?;

        info!(
            object_id = %object_id,
            signing_key = %signature.key_id,
            algorithm = ?signature.algorithm,
            "Issued deletion certificate"
        );

        Ok(DeletionCertificate {
            object_id: object_id.to_string(),
            deleted_by: deleted_by.to_string(),
            deleted_at,
            reason: reason.to_string(),
            signature,
        })
    }
}
