// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Audit logging for vault operations.
//!
//! Emits structured events on the `audit` tracing target for every
//! operation that touches key lifecycle or protected payloads. Events carry
//! identifiers only; key material and plaintext never appear.
//!
//! # Example
//!
//! ```rust,no_run
//! use secure_vault::audit::{AuditEvent, AuditLogger, VaultOperation};
//!
//! let logger = AuditLogger::new("media-vault");
//! logger.log(AuditEvent::new(VaultOperation::ObjectEncrypt, "obj-123"));
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

/// Vault operations that are audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultOperation {
    /// An object was encrypted under a fresh DEK.
    ObjectEncrypt,
    /// An object was decrypted.
    ObjectDecrypt,
    /// An object's DEK was re-wrapped under another master key.
    DekRewrap,
    /// Deletion of an object's wrapping key was scheduled.
    CryptoErase,
    /// A pending crypto-erase was aborted.
    CryptoEraseCancel,
    /// A deletion certificate was issued.
    CertificateIssue,
    /// The active master key was rotated.
    MasterKeyRotation,
    /// The KMS refused access.
    AccessDenied,
    /// Decryption failed authentication.
    TamperDetected,
    /// An operation failed.
    OperationFailed,
}

impl VaultOperation {
    /// Returns the operation name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            VaultOperation::ObjectEncrypt => "object_encrypt",
            VaultOperation::ObjectDecrypt => "object_decrypt",
            VaultOperation::DekRewrap => "dek_rewrap",
            VaultOperation::CryptoErase => "crypto_erase",
            VaultOperation::CryptoEraseCancel => "crypto_erase_cancel",
            VaultOperation::CertificateIssue => "certificate_issue",
            VaultOperation::MasterKeyRotation => "master_key_rotation",
            VaultOperation::AccessDenied => "access_denied",
            VaultOperation::TamperDetected => "tamper_detected",
            VaultOperation::OperationFailed => "operation_failed",
        }
    }

    /// Returns the severity level for this operation.
    pub fn severity(&self) -> AuditSeverity {
        match self {
            VaultOperation::ObjectEncrypt
            | VaultOperation::ObjectDecrypt
            | VaultOperation::DekRewrap
            | VaultOperation::CertificateIssue => AuditSeverity::Info,
            VaultOperation::CryptoErase
            | VaultOperation::CryptoEraseCancel
            | VaultOperation::MasterKeyRotation => AuditSeverity::Warning,
            VaultOperation::OperationFailed => AuditSeverity::Error,
            VaultOperation::AccessDenied | VaultOperation::TamperDetected => {
                AuditSeverity::Critical
            }
        }
    }
}

/// Severity levels for audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuditSeverity {
    /// Informational event.
    Info,
    /// Warning event - unusual but not critical.
    Warning,
    /// Error event - operation failed.
    Error,
    /// Critical event - security violation.
    Critical,
}

impl AuditSeverity {
    /// Returns the severity as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSeverity::Info => "INFO",
            AuditSeverity::Warning => "WARN",
            AuditSeverity::Error => "ERROR",
            AuditSeverity::Critical => "CRITICAL",
        }
    }
}

/// An audit event for a vault operation.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: u64,
    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,
    /// The operation that occurred.
    pub operation: VaultOperation,
    /// Object or master key the operation concerned.
    pub subject: String,
    /// Optional additional details.
    pub details: Option<String>,
    /// Optional principal.
    pub principal: Option<String>,
    /// Optional error message if operation failed.
    pub error: Option<String>,
}

impl AuditEvent {
    /// Creates a new audit event.
    pub fn new(operation: VaultOperation, subject: impl Into<String>) -> Self {
        static EVENT_COUNTER: AtomicU64 = AtomicU64::new(0);

        Self {
            event_id: EVENT_COUNTER.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            operation,
            subject: subject.into(),
            details: None,
            principal: None,
            error: None,
        }
    }

    /// Adds details to the event.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Adds the principal (user/service) to the event.
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Adds an error message to the event.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Returns the severity of this event.
    pub fn severity(&self) -> AuditSeverity {
        let base = self.operation.severity();
        if self.error.is_some() {
            base.max(AuditSeverity::Error)
        } else {
            base
        }
    }
}

/// Audit logger for vault operations.
///
/// Thread-safe; emits through `tracing` so the subscriber decides where
/// audit records end up.
pub struct AuditLogger {
    /// Service name for log attribution.
    service_name: String,
    /// Minimum severity to log.
    min_severity: AuditSeverity,
}

impl AuditLogger {
    /// Creates a new audit logger.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            min_severity: AuditSeverity::Info,
        }
    }

    /// Sets the minimum severity level to log.
    pub fn with_min_severity(mut self, severity: AuditSeverity) -> Self {
        self.min_severity = severity;
        self
    }

    /// Returns true if an event would be emitted.
    pub fn would_log(&self, event: &AuditEvent) -> bool {
        event.severity() >= self.min_severity
    }

    /// Logs an audit event.
    pub fn log(&self, event: AuditEvent) {
        if !self.would_log(&event) {
            return;
        }

        let timestamp = event.timestamp.timestamp();

        match event.severity() {
            AuditSeverity::Info => {
                info!(
                    target: "audit",
                    event_id = event.event_id,
                    timestamp = timestamp,
                    service = %self.service_name,
                    operation = event.operation.as_str(),
                    subject = %event.subject,
                    details = ?event.details,
                    principal = ?event.principal,
                    "Vault operation completed"
                );
            }
            AuditSeverity::Warning => {
                warn!(
                    target: "audit",
                    event_id = event.event_id,
                    timestamp = timestamp,
                    service = %self.service_name,
                    operation = event.operation.as_str(),
                    subject = %event.subject,
                    details = ?event.details,
                    principal = ?event.principal,
                    "Vault key lifecycle change"
                );
            }
            AuditSeverity::Error | AuditSeverity::Critical => {
                error!(
                    target: "audit",
                    event_id = event.event_id,
                    timestamp = timestamp,
                    service = %self.service_name,
                    operation = event.operation.as_str(),
                    subject = %event.subject,
                    details = ?event.details,
                    principal = ?event.principal,
                    error = ?event.error,
                    severity = event.severity().as_str(),
                    "Vault operation failed or denied"
                );
            }
        }
    }

    /// Creates an event and logs it immediately.
    pub fn log_operation(&self, operation: VaultOperation, subject: impl Into<String>) {
        self.log(AuditEvent::new(operation, subject));
    }

    /// Logs a failed operation with an error.
    pub fn log_failure(
        &self,
        operation: VaultOperation,
        subject: impl Into<String>,
        error: impl Into<String>,
    ) {
        self.log(AuditEvent::new(operation, subject).with_error(error));
    }
}
