use std::time::Duration;

use multidoc_lib::{DurabilityLevel, NUM_ATRS_DEFAULT};

/// Handle-level configuration for [`crate::Transactions`].
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Total lifetime of one transaction across all of its attempts.
    pub expiration_timeout: Duration,
    /// Timeout applied to each individual store operation.
    pub key_value_timeout: Duration,
    /// Budget between heartbeats; also the base of peer lease length.
    pub cleanup_window: Duration,
    /// Whether to drain this process's own cleanup queue in the background.
    pub cleanup_client_attempts: bool,
    /// Whether to run the client-record manager that sweeps for attempts
    /// abandoned by other (possibly dead) clients.
    pub cleanup_lost_attempts: bool,
    /// Durability applied to all durable writes.
    pub durability_level: DurabilityLevel,
    /// Size of the ATR key space this client uses and sweeps.
    pub num_atrs: u32,
    /// Bound of the in-process cleanup queue; overflow drops requests.
    pub cleanup_queue_capacity: usize,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            expiration_timeout: Duration::from_secs(15),
            key_value_timeout: Duration::from_millis(2_500),
            cleanup_window: Duration::from_secs(60),
            cleanup_client_attempts: true,
            cleanup_lost_attempts: true,
            durability_level: DurabilityLevel::default(),
            num_atrs: NUM_ATRS_DEFAULT,
            cleanup_queue_capacity: 1024,
        }
    }
}

impl TransactionConfig {
    pub fn with_expiration_timeout(mut self, timeout: Duration) -> Self {
        self.expiration_timeout = timeout;
        self
    }

    pub fn with_key_value_timeout(mut self, timeout: Duration) -> Self {
        self.key_value_timeout = timeout;
        self
    }

    pub fn with_cleanup_window(mut self, window: Duration) -> Self {
        self.cleanup_window = window;
        self
    }

    pub fn with_cleanup_client_attempts(mut self, enabled: bool) -> Self {
        self.cleanup_client_attempts = enabled;
        self
    }

    pub fn with_cleanup_lost_attempts(mut self, enabled: bool) -> Self {
        self.cleanup_lost_attempts = enabled;
        self
    }

    pub fn with_durability_level(mut self, level: DurabilityLevel) -> Self {
        self.durability_level = level;
        self
    }

    pub fn with_num_atrs(mut self, num_atrs: u32) -> Self {
        self.num_atrs = num_atrs;
        self
    }

    /// Effective config for one `run` call, with per-transaction overrides
    /// applied on top of this handle-level config.
    pub fn with_overrides(&self, overrides: &PerTransactionConfig) -> TransactionConfig {
        let mut effective = self.clone();
        if let Some(timeout) = overrides.expiration_timeout {
            effective.expiration_timeout = timeout;
        }
        if let Some(timeout) = overrides.key_value_timeout {
            effective.key_value_timeout = timeout;
        }
        if let Some(level) = overrides.durability_level {
            effective.durability_level = level;
        }
        effective
    }

    /// The per-operation slice of this config handed to repositories.
    pub fn op_options(&self) -> OpOptions {
        OpOptions {
            timeout: self.key_value_timeout,
            durability: self.durability_level,
        }
    }
}

/// Overrides a single `run` call may apply on top of [`TransactionConfig`].
#[derive(Debug, Clone, Default)]
pub struct PerTransactionConfig {
    pub expiration_timeout: Option<Duration>,
    pub key_value_timeout: Option<Duration>,
    pub durability_level: Option<DurabilityLevel>,
}

impl PerTransactionConfig {
    pub fn with_expiration_timeout(mut self, timeout: Duration) -> Self {
        self.expiration_timeout = Some(timeout);
        self
    }

    pub fn with_key_value_timeout(mut self, timeout: Duration) -> Self {
        self.key_value_timeout = Some(timeout);
        self
    }

    pub fn with_durability_level(mut self, level: DurabilityLevel) -> Self {
        self.durability_level = Some(level);
        self
    }
}

/// Options accompanying every repository call.
#[derive(Debug, Clone, Copy)]
pub struct OpOptions {
    pub timeout: Duration,
    pub durability: DurabilityLevel,
}

impl OpOptions {
    /// Non-durable variant with a short deadline, used where best effort is
    /// all that is wanted (e.g. deregistration on shutdown).
    pub fn best_effort(timeout: Duration) -> Self {
        Self {
            timeout,
            durability: DurabilityLevel::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_only_where_set() {
        let base = TransactionConfig::default();
        let overridden = base.with_overrides(
            &PerTransactionConfig::default().with_expiration_timeout(Duration::from_millis(50)),
        );
        assert_eq!(overridden.expiration_timeout, Duration::from_millis(50));
        assert_eq!(overridden.key_value_timeout, base.key_value_timeout);
        assert_eq!(overridden.durability_level, base.durability_level);
    }
}
