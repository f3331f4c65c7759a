use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `VARIANT_ENGINE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub experiment: ExperimentConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

// ─── Experiment (generation, evaluation, regeneration) ──────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentConfig {
    /// Relative noise fraction applied to numeric traits.
    #[serde(default = "default_mutation_magnitude")]
    pub mutation_magnitude: f64,
    #[serde(default = "default_candidate_count")]
    pub candidate_count: usize,
    #[serde(default = "default_simulation_steps")]
    pub simulation_steps: usize,
    #[serde(default = "default_seed_audience")]
    pub seed_audience: u32,
    #[serde(default = "default_randomness")]
    pub randomness: f64,
    #[serde(default = "default_min_quality")]
    pub min_quality: f64,
    #[serde(default = "default_min_active")]
    pub min_active: usize,
    #[serde(default = "default_regeneration_target")]
    pub regeneration_target: usize,
    #[serde(default = "default_resonance_weight")]
    pub resonance_weight: f64,
    #[serde(default = "default_heuristic_weight")]
    pub heuristic_weight: f64,
    #[serde(default = "default_generation_strategy")]
    pub generation_strategy: String,
    #[serde(default = "default_posterior_samples")]
    pub posterior_samples: usize,
}

fn default_mutation_magnitude() -> f64 {
    0.15
}
fn default_candidate_count() -> usize {
    6
}
fn default_simulation_steps() -> usize {
    10
}
fn default_seed_audience() -> u32 {
    100
}
fn default_randomness() -> f64 {
    0.1
}
fn default_min_quality() -> f64 {
    45.0
}
fn default_min_active() -> usize {
    2
}
fn default_regeneration_target() -> usize {
    3
}
fn default_resonance_weight() -> f64 {
    0.7
}
fn default_heuristic_weight() -> f64 {
    0.3
}
fn default_generation_strategy() -> String {
    "heuristic".to_string()
}
fn default_posterior_samples() -> usize {
    4000
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            mutation_magnitude: default_mutation_magnitude(),
            candidate_count: default_candidate_count(),
            simulation_steps: default_simulation_steps(),
            seed_audience: default_seed_audience(),
            randomness: default_randomness(),
            min_quality: default_min_quality(),
            min_active: default_min_active(),
            regeneration_target: default_regeneration_target(),
            resonance_weight: default_resonance_weight(),
            heuristic_weight: default_heuristic_weight(),
            generation_strategy: default_generation_strategy(),
            posterior_samples: default_posterior_samples(),
        }
    }
}

// ─── Ledger ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// `exponential` or `linear`.
    #[serde(default = "default_decay_curve")]
    pub decay_curve: String,
    #[serde(default = "default_half_life_minutes")]
    pub half_life_minutes: f64,
    #[serde(default = "default_linear_window_minutes")]
    pub linear_window_minutes: f64,
    #[serde(default = "default_max_commit_attempts")]
    pub max_commit_attempts: u32,
    #[serde(default = "default_commit_backoff_ms")]
    pub commit_backoff_ms: u64,
}

fn default_decay_curve() -> String {
    "exponential".to_string()
}
fn default_half_life_minutes() -> f64 {
    720.0
}
fn default_linear_window_minutes() -> f64 {
    1440.0
}
fn default_max_commit_attempts() -> u32 {
    5
}
fn default_commit_backoff_ms() -> u64 {
    10
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            decay_curve: default_decay_curve(),
            half_life_minutes: default_half_life_minutes(),
            linear_window_minutes: default_linear_window_minutes(),
            max_commit_attempts: default_max_commit_attempts(),
            commit_backoff_ms: default_commit_backoff_ms(),
        }
    }
}

// ─── Health (anomaly / suppression / quarantine) ────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_anomaly_spike_factor")]
    pub anomaly_spike_factor: f64,
    #[serde(default = "default_anomaly_min_posts")]
    pub anomaly_min_posts: f64,
    #[serde(default = "default_severe_spike_multiplier")]
    pub severe_spike_multiplier: f64,
    #[serde(default = "default_max_anomaly_strikes")]
    pub max_anomaly_strikes: u32,
    #[serde(default = "default_suppression_enabled")]
    pub suppression_enabled: bool,
    #[serde(default = "default_suppression_min_posts")]
    pub suppression_min_posts: u64,
    /// Impressions a variant needs before it can be judged underperforming.
    #[serde(default = "default_suppression_min_impressions")]
    pub suppression_min_impressions: u64,
    #[serde(default = "default_baseline_ctr")]
    pub baseline_ctr: f64,
    #[serde(default = "default_suppression_ratio")]
    pub suppression_ratio: f64,
    #[serde(default)]
    pub quarantine_on_anomaly: bool,
}

fn default_anomaly_spike_factor() -> f64 {
    4.0
}
fn default_anomaly_min_posts() -> f64 {
    3.0
}
fn default_severe_spike_multiplier() -> f64 {
    2.0
}
fn default_max_anomaly_strikes() -> u32 {
    2
}
fn default_suppression_enabled() -> bool {
    false
}
fn default_suppression_min_posts() -> u64 {
    5
}
fn default_suppression_min_impressions() -> u64 {
    50
}
fn default_baseline_ctr() -> f64 {
    0.03
}
fn default_suppression_ratio() -> f64 {
    0.6
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            anomaly_spike_factor: default_anomaly_spike_factor(),
            anomaly_min_posts: default_anomaly_min_posts(),
            severe_spike_multiplier: default_severe_spike_multiplier(),
            max_anomaly_strikes: default_max_anomaly_strikes(),
            suppression_enabled: default_suppression_enabled(),
            suppression_min_posts: default_suppression_min_posts(),
            suppression_min_impressions: default_suppression_min_impressions(),
            baseline_ctr: default_baseline_ctr(),
            suppression_ratio: default_suppression_ratio(),
            quarantine_on_anomaly: false,
        }
    }
}

// ─── Selection ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SelectionConfig {
    /// `rotation`, `ucb1`, `weighted_ucb` or `thompson`.
    #[serde(default = "default_selection_strategy")]
    pub strategy: String,
    #[serde(default = "default_exploration_factor")]
    pub exploration_factor: f64,
    #[serde(default = "default_weight_ctr")]
    pub weight_ctr: f64,
    #[serde(default = "default_weight_reach")]
    pub weight_reach: f64,
    #[serde(default = "default_weight_quality")]
    pub weight_quality: f64,
}

fn default_selection_strategy() -> String {
    "ucb1".to_string()
}
fn default_exploration_factor() -> f64 {
    1.0
}
fn default_weight_ctr() -> f64 {
    0.6
}
fn default_weight_reach() -> f64 {
    0.25
}
fn default_weight_quality() -> f64 {
    0.15
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            strategy: default_selection_strategy(),
            exploration_factor: default_exploration_factor(),
            weight_ctr: default_weight_ctr(),
            weight_reach: default_weight_reach(),
            weight_quality: default_weight_quality(),
        }
    }
}

// ─── Decision ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct DecisionConfig {
    /// Frequentist confidence (0-100) required to declare a winner.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Bayesian P(top > baseline) required to declare a winner.
    #[serde(default = "default_bayesian_threshold")]
    pub bayesian_threshold: f64,
    #[serde(default = "default_min_views")]
    pub min_views: u64,
    /// Views summed across the pool before any decision is attempted.
    #[serde(default = "default_min_total_views")]
    pub min_total_views: u64,
}

fn default_confidence_threshold() -> f64 {
    95.0
}
fn default_bayesian_threshold() -> f64 {
    0.95
}
fn default_min_views() -> u64 {
    100
}

fn default_min_total_views() -> u64 {
    100
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            bayesian_threshold: default_bayesian_threshold(),
            min_views: default_min_views(),
            min_total_views: default_min_total_views(),
        }
    }
}

// ─── Infrastructure ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_key_prefix() -> String {
    "variant_pool".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_path")]
    pub path: String,
    #[serde(default = "default_audit_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_audit_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_audit_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_audit_path() -> String {
    "variant-audit.jsonl".to_string()
}
fn default_audit_batch_size() -> usize {
    256
}
fn default_audit_flush_interval_ms() -> u64 {
    1000
}
fn default_audit_channel_capacity() -> usize {
    10_000
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
            batch_size: default_audit_batch_size(),
            flush_interval_ms: default_audit_flush_interval_ms(),
            channel_capacity: default_audit_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_host")]
    pub host: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_host() -> String {
    "0.0.0.0".to_string()
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_metrics_host(),
            port: default_metrics_port(),
        }
    }
}

fn default_node_id() -> String {
    "node-01".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            experiment: ExperimentConfig::default(),
            ledger: LedgerConfig::default(),
            health: HealthConfig::default(),
            selection: SelectionConfig::default(),
            decision: DecisionConfig::default(),
            redis: RedisConfig::default(),
            audit: AuditConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("VARIANT_ENGINE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.experiment.min_quality, 45.0);
        assert_eq!(config.experiment.min_active, 2);
        assert_eq!(config.experiment.regeneration_target, 3);
        assert_eq!(config.experiment.resonance_weight, 0.7);
        assert_eq!(config.experiment.heuristic_weight, 0.3);
        assert_eq!(config.ledger.decay_curve, "exponential");
        assert_eq!(config.selection.strategy, "ucb1");
        assert!(!config.health.suppression_enabled);
        assert_eq!(config.health.suppression_min_impressions, 50);
        assert_eq!(config.decision.min_total_views, 100);
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let json = r#"{ "experiment": { "candidate_count": 12 }, "health": {} }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.experiment.candidate_count, 12);
        assert_eq!(config.experiment.mutation_magnitude, 0.15);
        assert_eq!(config.health.anomaly_spike_factor, 4.0);
        assert_eq!(config.node_id, "node-01");
    }
}
