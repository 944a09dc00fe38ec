//! Kernel configuration: every named threshold in one place.
//!
//! Each knob has a documented default and an allowed range, and is loaded
//! once at runtime construction. Values can be overridden through
//! `HIVECELL_*` environment variables (a `.env` file is honoured via
//! `dotenvy`); [`KernelConfig::validate`] clamps nothing — out-of-range
//! values are rejected so misconfiguration is loud.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Monitor thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// τ_drift: lexical distance between recent step goals and the focus
    /// above which the monitor requests a replan. Default 0.7, range (0, 1].
    pub drift_threshold: f64,
    /// ε: confidence variance below which outcomes count as stagnant, and
    /// the tie-break window for contradictory facts. Default 0.05,
    /// range (0, 0.5].
    pub confidence_epsilon: f64,
    /// N: step goals compared against the focus for drift. Default 3,
    /// range 1..=16.
    pub goal_window: usize,
    /// W: step-outcome signatures compared for bit-identical repetition.
    /// Default 3, range 2..=32.
    pub signature_window: usize,
    /// Jaccard similarity between consecutive fact-bag signatures above
    /// which the window counts as stagnant. Default 0.95, range (0.5, 1].
    pub jaccard_threshold: f64,
    /// Replans the monitor may request before terminating on repeated
    /// drift. Default 2, range 0..=8.
    pub max_replans: u32,
    /// Working-memory fact count above which the compression pass runs.
    /// Default 256, range 16..=8192.
    pub memory_occupancy_threshold: usize,
    /// K: age in steps after which low-confidence facts are digested and
    /// refuted hypotheses dropped. Default 8, range 1..=128.
    pub compression_age_steps: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            drift_threshold: 0.7,
            confidence_epsilon: 0.05,
            goal_window: 3,
            signature_window: 3,
            jaccard_threshold: 0.95,
            max_replans: 2,
            memory_occupancy_threshold: 256,
            compression_age_steps: 8,
        }
    }
}

/// Delegation limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DelegationConfig {
    /// Ceiling on concurrent children per phase. Default 8, range 1..=64.
    pub max_parallel_children: usize,
    /// Review rounds per child before unresolved defects become warnings.
    /// Default 2, range 1..=8.
    pub max_review_rounds: u32,
    /// Smallest budget worth spawning a child for. Default 500 tokens,
    /// range 1..=1_000_000.
    pub per_child_minimum: u64,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            max_parallel_children: 8,
            max_review_rounds: 2,
            per_child_minimum: 500,
        }
    }
}

/// Self-healing limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealingConfig {
    /// Master switch for the healing loop. Default true.
    pub enabled: bool,
    /// Heal iterations for staff-rank cells and below. Default 1,
    /// range 0..=8.
    pub max_iterations_staff: u32,
    /// Heal iterations for manager-rank cells and above. Default 3,
    /// range 0..=16.
    pub max_iterations_manager: u32,
    /// Cascade chain length at which healing stops. Default 3,
    /// range 1..=16.
    pub max_cascade_depth: u32,
    /// Improvement ratio below which healing stops. Default 0.1,
    /// range (0, 1).
    pub diminishing_returns_threshold: f64,
    /// Heal reserve as a share of the initial budget. Default 0.25,
    /// range (0, 1).
    pub min_reserve_ratio: f64,
    /// Absolute floor on the heal reserve in tokens. Default 1000,
    /// range 0..=1_000_000.
    pub min_reserve_floor: u64,
    /// Whether peers may send each other HEAL_REQUEST directly.
    /// Default false.
    pub peer_requests: bool,
    /// Top-K fix patterns seeded from the vault at spawn. Default 16,
    /// range 0..=256.
    pub pattern_seed_limit: usize,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_iterations_staff: 1,
            max_iterations_manager: 3,
            max_cascade_depth: 3,
            diminishing_returns_threshold: 0.1,
            min_reserve_ratio: 0.25,
            min_reserve_floor: 1_000,
            peer_requests: false,
            pattern_seed_limit: 16,
        }
    }
}

/// Message-bus sizing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Mailbox capacity per (cell, channel). Default 128, range 1..=65536.
    pub mailbox_capacity: usize,
    /// How long a reliable-channel send waits for mailbox space before the
    /// sender gives up with a backpressure warning. Default 1000 ms,
    /// range 1..=60_000.
    pub backpressure_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 128,
            backpressure_timeout_ms: 1_000,
        }
    }
}

/// Runtime execution knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Hard cap on the shared worker pool; the effective size is
    /// `min(available_parallelism * 2, worker_cap)`. Default 32,
    /// range 1..=1024.
    pub worker_cap: usize,
    /// Grace window a cancelled cell gets to emit a partial envelope.
    /// Default 5000 ms, range 0..=60_000.
    pub wind_down_ms: u64,
    /// Per-tool-call timeout. Default 30_000 ms, range 1..=600_000.
    pub tool_timeout_ms: u64,
    /// Bounded retries for inference timeouts. Default 2, range 0..=8.
    pub inference_retries: u32,
    /// Tokens held back so Package always has room to run. Default 200,
    /// range 0..=100_000.
    pub safety_floor: u64,
    /// Flat token estimate for one execute-loop step when the tool gives
    /// no cost hint. Default 200, range 1..=100_000.
    pub step_cost_estimate: u64,
    /// Ceiling on execute-loop steps per cell, a backstop against
    /// runaway plans. Default 32, range 1..=1024.
    pub max_steps: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            worker_cap: 32,
            wind_down_ms: 5_000,
            tool_timeout_ms: 30_000,
            inference_retries: 2,
            safety_floor: 200,
            step_cost_estimate: 200,
            max_steps: 32,
        }
    }
}

/// Top-level configuration for a kernel run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct KernelConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub delegation: DelegationConfig,
    #[serde(default)]
    pub healing: HealingConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Configuration rejected by [`KernelConfig::validate`].
#[derive(Debug, Error, Diagnostic)]
#[error("config key {key} = {value} outside allowed range {range}")]
#[diagnostic(
    code(hivecell::config::out_of_range),
    help("Defaults and ranges are documented on the config structs.")
)]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub range: &'static str,
}

macro_rules! check_range {
    ($key:expr, $value:expr, $range:expr, $ok:expr) => {
        if !$ok {
            return Err(ConfigError {
                key: $key,
                value: format!("{}", $value),
                range: $range,
            });
        }
    };
}

impl KernelConfig {
    /// Reject any knob outside its documented range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.monitor;
        check_range!(
            "monitor.drift_threshold",
            m.drift_threshold,
            "(0, 1]",
            m.drift_threshold > 0.0 && m.drift_threshold <= 1.0
        );
        check_range!(
            "monitor.confidence_epsilon",
            m.confidence_epsilon,
            "(0, 0.5]",
            m.confidence_epsilon > 0.0 && m.confidence_epsilon <= 0.5
        );
        check_range!(
            "monitor.goal_window",
            m.goal_window,
            "1..=16",
            (1..=16).contains(&m.goal_window)
        );
        check_range!(
            "monitor.signature_window",
            m.signature_window,
            "2..=32",
            (2..=32).contains(&m.signature_window)
        );
        check_range!(
            "monitor.jaccard_threshold",
            m.jaccard_threshold,
            "(0.5, 1]",
            m.jaccard_threshold > 0.5 && m.jaccard_threshold <= 1.0
        );

        let d = &self.delegation;
        check_range!(
            "delegation.max_parallel_children",
            d.max_parallel_children,
            "1..=64",
            (1..=64).contains(&d.max_parallel_children)
        );
        check_range!(
            "delegation.max_review_rounds",
            d.max_review_rounds,
            "1..=8",
            (1..=8).contains(&d.max_review_rounds)
        );

        let h = &self.healing;
        check_range!(
            "healing.max_cascade_depth",
            h.max_cascade_depth,
            "1..=16",
            (1..=16).contains(&h.max_cascade_depth)
        );
        check_range!(
            "healing.diminishing_returns_threshold",
            h.diminishing_returns_threshold,
            "(0, 1)",
            h.diminishing_returns_threshold > 0.0 && h.diminishing_returns_threshold < 1.0
        );
        check_range!(
            "healing.min_reserve_ratio",
            h.min_reserve_ratio,
            "(0, 1)",
            h.min_reserve_ratio > 0.0 && h.min_reserve_ratio < 1.0
        );

        let b = &self.bus;
        check_range!(
            "bus.mailbox_capacity",
            b.mailbox_capacity,
            "1..=65536",
            (1..=65_536).contains(&b.mailbox_capacity)
        );
        check_range!(
            "bus.backpressure_timeout_ms",
            b.backpressure_timeout_ms,
            "1..=60000",
            (1..=60_000).contains(&b.backpressure_timeout_ms)
        );

        let e = &self.execution;
        check_range!(
            "execution.worker_cap",
            e.worker_cap,
            "1..=1024",
            (1..=1024).contains(&e.worker_cap)
        );
        check_range!(
            "execution.tool_timeout_ms",
            e.tool_timeout_ms,
            "1..=600000",
            (1..=600_000).contains(&e.tool_timeout_ms)
        );
        check_range!(
            "execution.max_steps",
            e.max_steps,
            "1..=1024",
            (1..=1024).contains(&e.max_steps)
        );
        Ok(())
    }

    /// Load defaults, then apply `HIVECELL_*` environment overrides.
    ///
    /// Unknown variables are ignored; unparsable values fall back to the
    /// default for that key with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        override_f64("HIVECELL_DRIFT_THRESHOLD", &mut config.monitor.drift_threshold);
        override_f64(
            "HIVECELL_CONFIDENCE_EPSILON",
            &mut config.monitor.confidence_epsilon,
        );
        override_f64(
            "HIVECELL_JACCARD_THRESHOLD",
            &mut config.monitor.jaccard_threshold,
        );
        override_usize(
            "HIVECELL_MAX_PARALLEL_CHILDREN",
            &mut config.delegation.max_parallel_children,
        );
        override_u32(
            "HIVECELL_MAX_REVIEW_ROUNDS",
            &mut config.delegation.max_review_rounds,
        );
        override_bool("HIVECELL_HEALING_ENABLED", &mut config.healing.enabled);
        override_u32(
            "HIVECELL_MAX_CASCADE_DEPTH",
            &mut config.healing.max_cascade_depth,
        );
        override_f64(
            "HIVECELL_DIMINISHING_RETURNS",
            &mut config.healing.diminishing_returns_threshold,
        );
        override_usize("HIVECELL_MAILBOX_CAPACITY", &mut config.bus.mailbox_capacity);
        override_u64("HIVECELL_WIND_DOWN_MS", &mut config.execution.wind_down_ms);
        override_u64(
            "HIVECELL_TOOL_TIMEOUT_MS",
            &mut config.execution.tool_timeout_ms,
        );
        override_usize("HIVECELL_WORKER_CAP", &mut config.execution.worker_cap);
        config
    }

    /// Effective worker-pool size for this host.
    #[must_use]
    pub fn worker_pool_size(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cores * 2).min(self.execution.worker_cap).max(1)
    }

    /// Heal iteration cap for a given rank.
    #[must_use]
    pub fn max_heal_iterations(&self, manager_or_above: bool) -> u32 {
        if manager_or_above {
            self.healing.max_iterations_manager
        } else {
            self.healing.max_iterations_staff
        }
    }
}

fn override_f64(key: &str, slot: &mut f64) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, raw = %raw, "ignoring unparsable config override"),
        }
    }
}

fn override_u64(key: &str, slot: &mut u64) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, raw = %raw, "ignoring unparsable config override"),
        }
    }
}

fn override_u32(key: &str, slot: &mut u32) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, raw = %raw, "ignoring unparsable config override"),
        }
    }
}

fn override_usize(key: &str, slot: &mut usize) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, raw = %raw, "ignoring unparsable config override"),
        }
    }
}

fn override_bool(key: &str, slot: &mut bool) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, raw = %raw, "ignoring unparsable config override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(KernelConfig::default().validate().is_ok());
    }

    #[test]
    fn out_of_range_is_rejected() {
        let mut config = KernelConfig::default();
        config.monitor.drift_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert_eq!(err.key, "monitor.drift_threshold");
    }

    #[test]
    fn heal_iterations_follow_rank() {
        let config = KernelConfig::default();
        assert_eq!(config.max_heal_iterations(false), 1);
        assert_eq!(config.max_heal_iterations(true), 3);
    }

    #[test]
    fn worker_pool_is_bounded() {
        let config = KernelConfig::default();
        let size = config.worker_pool_size();
        assert!(size >= 1 && size <= config.execution.worker_cap);
    }
}
