//! Engine configuration.
//!
//! Two values have no built-in default and must be supplied: the refund
//! fraction applied to failed actions and the witness-deficit fallback.
//! Everything else falls back to the documented defaults.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub settlement: SettlementConfig,
    pub witness: WitnessConfig,
    #[serde(default)]
    pub tensor: TensorConfig,
    #[serde(default)]
    pub reputation: ReputationConfig,
    #[serde(default)]
    pub ledger: RetryConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

impl EngineConfig {
    /// Configuration with the two required values and defaults elsewhere.
    pub fn new(refund_fraction: Decimal, fallback: WitnessFallback) -> Self {
        EngineConfig {
            settlement: SettlementConfig {
                refund_fraction,
                escrow_ttl_secs: default_escrow_ttl_secs(),
            },
            witness: WitnessConfig {
                fallback,
                timeout_ms: default_witness_timeout_ms(),
                max_clock_skew_secs: default_max_clock_skew_secs(),
                default_quorum: default_quorum(),
                max_peer_hops: default_max_peer_hops(),
            },
            tensor: TensorConfig::default(),
            reputation: ReputationConfig::default(),
            ledger: RetryConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<(), EngineError> {
        let refund = self.settlement.refund_fraction;
        if refund < Decimal::ZERO || refund > Decimal::ONE {
            return Err(EngineError::Config(format!(
                "settlement.refund_fraction must be within [0, 1], got {}",
                refund
            )));
        }
        if self.tensor.half_life_days <= Decimal::ZERO {
            return Err(EngineError::Config(
                "tensor.half_life_days must be positive".into(),
            ));
        }
        if self.tensor.horizon_days <= Decimal::ZERO {
            return Err(EngineError::Config(
                "tensor.horizon_days must be positive".into(),
            ));
        }
        if self.reputation.delta_bound <= Decimal::ZERO {
            return Err(EngineError::Config(
                "reputation.delta_bound must be positive".into(),
            ));
        }
        if self.reputation.diminishing_step < Decimal::ZERO {
            return Err(EngineError::Config(
                "reputation.diminishing_step must not be negative".into(),
            ));
        }
        if self.ledger.max_attempts == 0 {
            return Err(EngineError::Config(
                "ledger.max_attempts must be at least 1".into(),
            ));
        }
        if self.ledger.initial_backoff_ms > self.ledger.max_backoff_ms {
            return Err(EngineError::Config(
                "ledger.initial_backoff_ms must not exceed ledger.max_backoff_ms".into(),
            ));
        }
        if self.execution.timeout_ms == 0 {
            return Err(EngineError::Config(
                "execution.timeout_ms must be positive".into(),
            ));
        }
        if self.witness.timeout_ms == 0 {
            return Err(EngineError::Config(
                "witness.timeout_ms must be positive".into(),
            ));
        }
        match self.witness.fallback {
            WitnessFallback::ExpandAndRetry { max_rounds: 0 } => Err(EngineError::Config(
                "witness.fallback expand_and_retry needs max_rounds >= 1".into(),
            )),
            WitnessFallback::ReducedConfidence {
                min_attestations: 0,
            } => Err(EngineError::Config(
                "witness.fallback reduced_confidence needs min_attestations >= 1".into(),
            )),
            _ => Ok(()),
        }
    }
}

// ── Settlement ──────────────────────────────────────────────────────

fn default_escrow_ttl_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Fraction of the escrow refunded to the actor when execution fails.
    pub refund_fraction: Decimal,
    #[serde(default = "default_escrow_ttl_secs")]
    pub escrow_ttl_secs: u64,
}

// ── Witnessing ──────────────────────────────────────────────────────

fn default_witness_timeout_ms() -> u64 {
    2000
}

fn default_max_clock_skew_secs() -> u64 {
    300
}

fn default_quorum() -> u32 {
    1
}

fn default_max_peer_hops() -> u32 {
    2
}

/// What happens when witness quorum is not reached before the timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum WitnessFallback {
    /// Terminate the action in `WitnessDeficit`; tensors are untouched.
    Abort,
    /// Finalize with the attestations collected, scaling the applied
    /// change by attested/required. Needs at least `min_attestations`.
    ReducedConfidence { min_attestations: u32 },
    /// Solicit a fresh, wider candidate pool up to `max_rounds` more times
    /// before giving up with `WitnessDeficit`.
    ExpandAndRetry { max_rounds: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessConfig {
    pub fallback: WitnessFallback,
    #[serde(default = "default_witness_timeout_ms")]
    pub timeout_ms: u64,
    /// Attestations timestamped further than this from the coordinator's
    /// clock are not counted.
    #[serde(default = "default_max_clock_skew_secs")]
    pub max_clock_skew_secs: u64,
    /// Quorum used when no triggered rule states its own requirement.
    #[serde(default = "default_quorum")]
    pub default_quorum: u32,
    /// Relationship-graph distance bound for peer witnesses.
    #[serde(default = "default_max_peer_hops")]
    pub max_peer_hops: u32,
}

impl WitnessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Skew bound as a signed duration; values beyond `i64` saturate.
    pub fn max_clock_skew(&self) -> time::Duration {
        time::Duration::seconds(i64::try_from(self.max_clock_skew_secs).unwrap_or(i64::MAX))
    }
}

// ── Tensors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorConfig {
    #[serde(default = "TensorConfig::default_half_life")]
    pub half_life_days: Decimal,
    /// Deltas older than this no longer contribute.
    #[serde(default = "TensorConfig::default_horizon")]
    pub horizon_days: Decimal,
}

impl TensorConfig {
    fn default_half_life() -> Decimal {
        Decimal::from(30)
    }

    fn default_horizon() -> Decimal {
        Decimal::from(365)
    }
}

impl Default for TensorConfig {
    fn default() -> Self {
        TensorConfig {
            half_life_days: Self::default_half_life(),
            horizon_days: Self::default_horizon(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationConfig {
    /// Per-dimension clamp applied to a single action's delta.
    #[serde(default = "ReputationConfig::default_bound")]
    pub delta_bound: Decimal,
    /// Repeats of one action type a pair may accumulate before its gains
    /// start to shrink.
    #[serde(default = "ReputationConfig::default_diminishing_after")]
    pub diminishing_after: u64,
    /// Gains are divided by `1 + (repeats - diminishing_after) * step`.
    #[serde(default = "ReputationConfig::default_diminishing_step")]
    pub diminishing_step: Decimal,
}

impl ReputationConfig {
    fn default_bound() -> Decimal {
        Decimal::ONE
    }

    fn default_diminishing_after() -> u64 {
        5
    }

    fn default_diminishing_step() -> Decimal {
        Decimal::new(2, 1)
    }
}

impl Default for ReputationConfig {
    fn default() -> Self {
        ReputationConfig {
            delta_bound: Self::default_bound(),
            diminishing_after: Self::default_diminishing_after(),
            diminishing_step: Self::default_diminishing_step(),
        }
    }
}

// ── Ledger retry ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "RetryConfig::default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "RetryConfig::default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "RetryConfig::default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    fn default_max_attempts() -> u32 {
        5
    }

    fn default_initial_backoff_ms() -> u64 {
        20
    }

    fn default_max_backoff_ms() -> u64 {
        1000
    }

    /// Backoff before retry number `attempt` (1-based), doubling from the
    /// initial value and capped at the maximum.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: Self::default_max_attempts(),
            initial_backoff_ms: Self::default_initial_backoff_ms(),
            max_backoff_ms: Self::default_max_backoff_ms(),
        }
    }
}

// ── Execution ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "ExecutionConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl ExecutionConfig {
    fn default_timeout_ms() -> u64 {
        30_000
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn new_fills_defaults() {
        let cfg = EngineConfig::new(dec("0.5"), WitnessFallback::Abort);
        assert_eq!(cfg.tensor.half_life_days, Decimal::from(30));
        assert_eq!(cfg.ledger.max_attempts, 5);
        assert_eq!(cfg.witness.timeout_ms, 2000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn refund_fraction_out_of_range_rejected() {
        let cfg = EngineConfig::new(dec("1.2"), WitnessFallback::Abort);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("refund_fraction"));
    }

    #[test]
    fn zero_rounds_rejected() {
        let cfg = EngineConfig::new(dec("0.5"), WitnessFallback::ExpandAndRetry { max_rounds: 0 });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn fallback_parses_from_tagged_json() {
        let json = serde_json::json!({
            "settlement": { "refund_fraction": "0.8" },
            "witness": { "fallback": { "policy": "reduced_confidence", "min_attestations": 2 } }
        });
        let cfg: EngineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(
            cfg.witness.fallback,
            WitnessFallback::ReducedConfidence {
                min_attestations: 2
            }
        );
        assert_eq!(cfg.settlement.escrow_ttl_secs, 3600);
        assert_eq!(cfg.reputation.delta_bound, Decimal::ONE);
        assert_eq!(cfg.reputation.diminishing_after, 5);
        assert_eq!(cfg.reputation.diminishing_step, dec("0.2"));
    }

    #[test]
    fn negative_diminishing_step_rejected() {
        let mut cfg = EngineConfig::new(dec("0.5"), WitnessFallback::Abort);
        cfg.reputation.diminishing_step = dec("-0.1");
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("diminishing_step"));
    }

    #[test]
    fn missing_required_values_fail_to_parse() {
        let json = serde_json::json!({ "witness": { "fallback": { "policy": "abort" } } });
        assert!(serde_json::from_value::<EngineConfig>(json).is_err());
    }

    #[test]
    fn oversized_clock_skew_saturates() {
        let mut cfg = EngineConfig::new(dec("0.5"), WitnessFallback::Abort);
        assert_eq!(cfg.witness.max_clock_skew(), time::Duration::seconds(300));
        cfg.witness.max_clock_skew_secs = u64::MAX;
        assert_eq!(cfg.witness.max_clock_skew(), time::Duration::seconds(i64::MAX));
        assert!(cfg.witness.max_clock_skew().is_positive());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let r = RetryConfig {
            max_attempts: 10,
            initial_backoff_ms: 20,
            max_backoff_ms: 100,
        };
        assert_eq!(r.backoff(1), Duration::from_millis(20));
        assert_eq!(r.backoff(2), Duration::from_millis(40));
        assert_eq!(r.backoff(3), Duration::from_millis(80));
        assert_eq!(r.backoff(4), Duration::from_millis(100));
        assert_eq!(r.backoff(40), Duration::from_millis(100));
    }
}
