// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Configuration for the vault and its KMS retry behaviour.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::VaultError;

/// Shortest deletion window accepted by cloud KMS providers.
pub const MIN_DELETION_WINDOW_DAYS: u32 = 7;

/// Longest deletion window accepted by cloud KMS providers.
pub const MAX_DELETION_WINDOW_DAYS: u32 = 30;

/// Deployment environment the vault runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Real customer data. Simulated KMS is refused.
    Production,
    /// Pre-production deployment.
    Staging,
    /// Local development.
    #[default]
    Development,
    /// Automated tests.
    Test,
}

impl Environment {
    /// Returns true for the production environment.
    #[inline]
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    /// Returns the environment name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Development => "development",
            Environment::Test => "test",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "staging" => Ok(Environment::Staging),
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            other => Err(VaultError::Configuration(format!(
                "unknown environment: {}",
                other
            ))),
        }
    }
}

/// Bounded exponential backoff for transient KMS failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Deadline for a single KMS call. Expiry counts as `KmsUnavailable`.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            multiplier: 2.0,
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let delay = self.initial_backoff.as_nanos() as f64 * self.multiplier.powi(exponent);
        let delay = delay.min(self.max_backoff.as_nanos() as f64);
        Duration::from_nanos(delay.max(0.0) as u64)
    }

    /// Sets the maximum number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the initial and maximum backoff.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Sets the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    fn validate(&self) -> Result<(), VaultError> {
        if self.max_attempts == 0 {
            return Err(VaultError::Configuration(
                "retry max_attempts must be at least 1".into(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(VaultError::Configuration(format!(
                "retry multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(VaultError::Configuration(
                "initial backoff exceeds max backoff".into(),
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(VaultError::Configuration(
                "call timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a [`SecureVault`](crate::SecureVault).
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Deployment environment.
    pub environment: Environment,
    /// Master key that starts out Active.
    pub master_key_id: String,
    /// Grace period before erased key material is destroyed.
    pub deletion_window_days: u32,
    /// Retry behaviour for KMS calls.
    pub retry: RetryPolicy,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            master_key_id: String::new(),
            deletion_window_days: MIN_DELETION_WINDOW_DAYS,
            retry: RetryPolicy::default(),
        }
    }
}

impl VaultConfig {
    /// Creates a configuration with the given initial master key.
    pub fn new(master_key_id: impl Into<String>) -> Self {
        Self {
            master_key_id: master_key_id.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from `SECURE_VAULT_*` environment variables.
    ///
    /// `SECURE_VAULT_MASTER_KEY_ID` is required. Optional variables are
    /// `SECURE_VAULT_ENV`, `SECURE_VAULT_DELETION_WINDOW_DAYS`,
    /// `SECURE_VAULT_KMS_MAX_ATTEMPTS` and `SECURE_VAULT_KMS_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, VaultError> {
        let master_key_id = std::env::var("SECURE_VAULT_MASTER_KEY_ID").map_err(|_| {
            VaultError::Configuration("SECURE_VAULT_MASTER_KEY_ID is not set".into())
        })?;

        let mut config = Self::new(master_key_id);

        if let Ok(env) = std::env::var("SECURE_VAULT_ENV") {
            config.environment = env.parse()?;
        }
        if let Ok(days) = std::env::var("SECURE_VAULT_DELETION_WINDOW_DAYS") {
            config.deletion_window_days = parse_var("SECURE_VAULT_DELETION_WINDOW_DAYS", &days)?;
        }
        if let Ok(attempts) = std::env::var("SECURE_VAULT_KMS_MAX_ATTEMPTS") {
            config.retry.max_attempts = parse_var("SECURE_VAULT_KMS_MAX_ATTEMPTS", &attempts)?;
        }
        if let Ok(ms) = std::env::var("SECURE_VAULT_KMS_TIMEOUT_MS") {
            let ms: u64 = parse_var("SECURE_VAULT_KMS_TIMEOUT_MS", &ms)?;
            config.retry.call_timeout = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the deployment environment.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Sets the deletion window used by crypto-erase.
    pub fn with_deletion_window_days(mut self, days: u32) -> Self {
        self.deletion_window_days = days;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Checks that all values are within their accepted ranges.
    pub fn validate(&self) -> Result<(), VaultError> {
        if self.master_key_id.trim().is_empty() {
            return Err(VaultError::Configuration("master key id is empty".into()));
        }
        if !(MIN_DELETION_WINDOW_DAYS..=MAX_DELETION_WINDOW_DAYS)
            .contains(&self.deletion_window_days)
        {
            return Err(VaultError::Configuration(format!(
                "deletion window must be {}..={} days, got {}",
                MIN_DELETION_WINDOW_DAYS, MAX_DELETION_WINDOW_DAYS, self.deletion_window_days
            )));
        }
        self.retry.validate()
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T, VaultError> {
    value
        .trim()
        .parse()
        .map_err(|_| VaultError::Configuration(format!("{} has invalid value {:?}", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_needs_master_key() {
        let result = VaultConfig::default().validate();
        assert!(matches!(result, Err(VaultError::Configuration(_))));
        assert!(VaultConfig::new("mk-1").validate().is_ok());
    }

    #[test]
    fn test_deletion_window_bounds() {
        for days in [0, 6, 31] {
            let config = VaultConfig::new("mk-1").with_deletion_window_days(days);
            assert!(config.validate().is_err(), "{} days accepted", days);
        }
        for days in [7, 14, 30] {
            let config = VaultConfig::new("mk-1").with_deletion_window_days(days);
            assert!(config.validate().is_ok(), "{} days rejected", days);
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default()
            .with_backoff(Duration::from_millis(100), Duration::from_millis(350));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(30), Duration::from_millis(350));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = VaultConfig::new("mk-1").with_retry(RetryPolicy::default().with_max_attempts(0));
        assert!(matches!(
            config.validate(),
            Err(VaultError::Configuration(_))
        ));
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("Test".parse::<Environment>().unwrap(), Environment::Test);
        assert!("mars".parse::<Environment>().is_err());
        assert!(Environment::Production.is_production());
        assert!(!Environment::Staging.is_production());
    }
}
