use serde::{Deserialize, Serialize};

/// What a compensation pass does when a compensating action fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompensationPolicy {
    /// Stop at the first failure and propagate it. Earlier calls stay
    /// uncompensated.
    #[default]
    FailFast,
    /// Keep compensating the remaining calls and report every failure.
    BestEffort,
}

/// Settings fixed when a transaction is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Propagate the failure that triggered compensation once compensation
    /// has finished. When false the failure is suppressed.
    pub reraise: bool,
    pub policy: CompensationPolicy,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            reraise: true,
            policy: CompensationPolicy::FailFast,
        }
    }
}
