// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Re-wrap migration after a master key rotation.
//!
//! Rotation does not touch existing objects. Moving them onto the new
//! master key is a separate pass: each object's DEK is unwrapped and
//! wrapped again under the target key. The ciphertext is unchanged, so
//! migration costs one KMS round trip per object regardless of size.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::audit::{AuditEvent, AuditLogger, VaultOperation};
use crate::config::RetryPolicy;
use crate::dek::DekManager;
use crate::error::VaultError;
use crate::kms::KmsAdapter;
use crate::vault::EncryptedObject;

/// Result of a migration pass.
#[derive(Debug)]
pub struct MigrationReport {
    /// Master key the objects were moved to.
    pub target_master_key_id: String,
    /// Migrated objects, in input order.
    pub migrated: Vec<EncryptedObject>,
    /// Objects already under the target key.
    pub skipped: usize,
    /// Object ids that failed, with the error.
    pub failed: Vec<(String, VaultError)>,
}

impl MigrationReport {
    /// Returns true if no object failed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Moves objects' DEKs onto another master key.
pub struct KeyMigrator<K: KmsAdapter + ?Sized> {
    deks: DekManager<K>,
    audit: Option<Arc<AuditLogger>>,
}

impl<K: KmsAdapter + ?Sized> KeyMigrator<K> {
    /// Creates a migrator over `kms`.
    pub fn new(kms: Arc<K>, retry: RetryPolicy) -> Self {
        Self {
            deks: DekManager::new(kms, retry),
            audit: None,
        }
    }

    /// Sets the audit logger.
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Returns a copy of `object` whose DEK is wrapped under
    /// `target_master_key_id`. The input is left as it was.
    #[instrument(skip(self, object), fields(object_id = %object.object_id, from = %object.master_key_id))]
    pub async fn rewrap(
        &self,
        object: &EncryptedObject,
        target_master_key_id: &str,
    ) -> Result<EncryptedObject, VaultError> {
        let rewrapped = self
            .deks
            .rewrap(&object.wrapped(), target_master_key_id)
            .await;

        match rewrapped {
            Ok(wrapped) => {
                if let Some(audit) = &self.audit {
                    audit.log(
                        AuditEvent::new(VaultOperation::DekRewrap, object.object_id.as_str())
                            .with_details(format!(
                                "from={} to={}",
                                object.master_key_id, wrapped.master_key_id
                            )),
                    );
                }
                Ok(EncryptedObject {
                    master_key_id: wrapped.master_key_id,
                    dek_id: wrapped.dek_id,
                    wrapped_dek: wrapped.bytes,
                    ..object.clone()
                })
            }
            Err(e) => {
                if let Some(audit) = &self.audit {
                    audit.log_failure(
                        VaultOperation::DekRewrap,
                        object.object_id.as_str(),
                        e.to_string(),
                    );
                }
                Err(e)
            }
        }
    }

    /// Re-wraps every object not already under `target_master_key_id`.
    ///
    /// Failures are collected rather than aborting the pass; the failed
    /// objects stay valid under their old key.
    #[instrument(skip(self, objects), fields(target = %target_master_key_id, total = objects.len()))]
    pub async fn migrate(
        &self,
        objects: &[EncryptedObject],
        target_master_key_id: &str,
    ) -> MigrationReport {
        info!("Starting DEK migration");

        let mut report = MigrationReport {
            target_master_key_id: target_master_key_id.to_string(),
            migrated: Vec::new(),
            skipped: 0,
            failed: Vec::new(),
        };

        for object in objects {
            if object.master_key_id == target_master_key_id {
                report.skipped += 1;
                continue;
            }
            match self.rewrap(object, target_master_key_id).await {
                Ok(migrated) => report.migrated.push(migrated),
                Err(e) => {
                    error!(object_id = %object.object_id, error = %e, "Failed to re-wrap DEK");
                    report.failed.push((object.object_id.clone(), e));
                }
            }
        }

        if report.is_complete() {
            info!(
                migrated = report.migrated.len(),
                skipped = report.skipped,
                "DEK migration completed"
            );
        } else {
            warn!(
                migrated = report.migrated.len(),
                failed = report.failed.len(),
                "DEK migration completed with failures"
            );
        }
        report
    }
}
