use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{VariantError, VariantResult};
use crate::lifecycle::{self, StateTransition, TransitionTrigger};

pub type VariantId = Uuid;

// ─── Pool identity ──────────────────────────────────────────────────────

/// Identifies the pool of variants for one (content, platform) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolKey {
    pub content_id: String,
    pub platform: String,
}

impl PoolKey {
    pub fn new(content_id: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            platform: platform.into(),
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.content_id, self.platform)
    }
}

// ─── Traits ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptionStyle {
    Hook,
    Question,
    Story,
    Minimal,
    Listicle,
}

impl CaptionStyle {
    pub const ALL: [CaptionStyle; 5] = [
        CaptionStyle::Hook,
        CaptionStyle::Question,
        CaptionStyle::Story,
        CaptionStyle::Minimal,
        CaptionStyle::Listicle,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThumbnailStyle {
    Face,
    TextOverlay,
    ActionShot,
    HighContrast,
}

impl ThumbnailStyle {
    pub const ALL: [ThumbnailStyle; 4] = [
        ThumbnailStyle::Face,
        ThumbnailStyle::TextOverlay,
        ThumbnailStyle::ActionShot,
        ThumbnailStyle::HighContrast,
    ];
}

/// Closed numeric domain of a trait.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraitDomain {
    pub min: f64,
    pub max: f64,
}

impl TraitDomain {
    pub const UNIT: TraitDomain = TraitDomain { min: 0.0, max: 1.0 };
    pub const TEMPO: TraitDomain = TraitDomain { min: 0.7, max: 1.4 };

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

pub const DEFAULT_HOOK_STRENGTH: f64 = 0.6;
pub const DEFAULT_SHAREABILITY: f64 = 0.05;
pub const DEFAULT_CTA_INTENSITY: f64 = 0.2;
pub const DEFAULT_REMIX_PROBABILITY: f64 = 0.01;
pub const DEFAULT_TEMPO: f64 = 1.0;

/// Full trait vector of a variant. Numeric traits always lie in their domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraitVector {
    pub hook_strength: f64,
    pub shareability: f64,
    pub cta_intensity: f64,
    pub remix_probability: f64,
    pub tempo: f64,
    pub caption_style: CaptionStyle,
    pub thumbnail_style: ThumbnailStyle,
}

impl TraitVector {
    /// Clamp every numeric trait into its declared domain.
    pub fn clamped(self) -> Self {
        Self {
            hook_strength: TraitDomain::UNIT.clamp(self.hook_strength),
            shareability: TraitDomain::UNIT.clamp(self.shareability),
            cta_intensity: TraitDomain::UNIT.clamp(self.cta_intensity),
            remix_probability: TraitDomain::UNIT.clamp(self.remix_probability),
            tempo: TraitDomain::TEMPO.clamp(self.tempo),
            ..self
        }
    }

    pub fn in_domain(&self) -> bool {
        TraitDomain::UNIT.contains(self.hook_strength)
            && TraitDomain::UNIT.contains(self.shareability)
            && TraitDomain::UNIT.contains(self.cta_intensity)
            && TraitDomain::UNIT.contains(self.remix_probability)
            && TraitDomain::TEMPO.contains(self.tempo)
    }
}

impl Default for TraitVector {
    fn default() -> Self {
        Self {
            hook_strength: DEFAULT_HOOK_STRENGTH,
            shareability: DEFAULT_SHAREABILITY,
            cta_intensity: DEFAULT_CTA_INTENSITY,
            remix_probability: DEFAULT_REMIX_PROBABILITY,
            tempo: DEFAULT_TEMPO,
            caption_style: CaptionStyle::Hook,
            thumbnail_style: ThumbnailStyle::Face,
        }
    }
}

/// Seed traits as supplied by callers. Missing or non-finite fields fall back
/// to the defaults of [`TraitVector::default`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedTraits {
    pub hook_strength: Option<f64>,
    pub shareability: Option<f64>,
    pub cta_intensity: Option<f64>,
    pub remix_probability: Option<f64>,
    pub tempo: Option<f64>,
    pub caption_style: Option<CaptionStyle>,
    pub thumbnail_style: Option<ThumbnailStyle>,
}

impl SeedTraits {
    /// Resolve into a complete, clamped trait vector. Also returns the names
    /// of the fields that had to be defaulted.
    pub fn resolve(&self) -> (TraitVector, Vec<&'static str>) {
        let defaults = TraitVector::default();
        let mut defaulted = Vec::new();

        let mut numeric = |name: &'static str, value: Option<f64>, fallback: f64| match value {
            Some(v) if v.is_finite() => v,
            _ => {
                defaulted.push(name);
                fallback
            }
        };

        let hook_strength = numeric("hook_strength", self.hook_strength, defaults.hook_strength);
        let shareability = numeric("shareability", self.shareability, defaults.shareability);
        let cta_intensity = numeric("cta_intensity", self.cta_intensity, defaults.cta_intensity);
        let remix_probability = numeric(
            "remix_probability",
            self.remix_probability,
            defaults.remix_probability,
        );
        let tempo = numeric("tempo", self.tempo, defaults.tempo);

        let caption_style = self.caption_style.unwrap_or_else(|| {
            defaulted.push("caption_style");
            defaults.caption_style
        });
        let thumbnail_style = self.thumbnail_style.unwrap_or_else(|| {
            defaulted.push("thumbnail_style");
            defaults.thumbnail_style
        });

        let traits = TraitVector {
            hook_strength,
            shareability,
            cta_intensity,
            remix_probability,
            tempo,
            caption_style,
            thumbnail_style,
        }
        .clamped();

        (traits, defaulted)
    }
}

impl From<TraitVector> for SeedTraits {
    fn from(t: TraitVector) -> Self {
        Self {
            hook_strength: Some(t.hook_strength),
            shareability: Some(t.shareability),
            cta_intensity: Some(t.cta_intensity),
            remix_probability: Some(t.remix_probability),
            tempo: Some(t.tempo),
            caption_style: Some(t.caption_style),
            thumbnail_style: Some(t.thumbnail_style),
        }
    }
}

// ─── Variant ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantState {
    Proposed,
    Active,
    Anomalous,
    Suppressed,
    Quarantined,
}

impl VariantState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantState::Proposed => "proposed",
            VariantState::Active => "active",
            VariantState::Anomalous => "anomalous",
            VariantState::Suppressed => "suppressed",
            VariantState::Quarantined => "quarantined",
        }
    }

    /// Suppressed and quarantined variants are kept for audit only.
    pub fn is_excluded(&self) -> bool {
        matches!(self, VariantState::Suppressed | VariantState::Quarantined)
    }
}

impl fmt::Display for VariantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Impression,
    Click,
    Post,
}

impl FromStr for EventType {
    type Err = VariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "impression" => Ok(EventType::Impression),
            "click" => Ok(EventType::Click),
            "post" => Ok(EventType::Post),
            other => Err(VariantError::Validation(format!("unknown event type '{other}'"))),
        }
    }
}

/// One candidate treatment of a content item for one platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub value: String,
    pub traits: TraitVector,
    pub posts: u64,
    pub clicks: u64,
    pub impressions: u64,
    pub decayed_clicks: f64,
    pub decayed_posts: f64,
    pub last_decay_at: DateTime<Utc>,
    pub anomaly_strikes: u32,
    pub created_at: DateTime<Utc>,
    pub state_changed_at: Option<DateTime<Utc>>,
    quality_score: f64,
    state: VariantState,
}

impl Variant {
    pub fn new(
        id: VariantId,
        value: impl Into<String>,
        traits: TraitVector,
        quality_score: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            value: value.into(),
            traits,
            posts: 0,
            clicks: 0,
            impressions: 0,
            decayed_clicks: 0.0,
            decayed_posts: 0.0,
            last_decay_at: now,
            anomaly_strikes: 0,
            created_at: now,
            state_changed_at: None,
            quality_score: quality_score.clamp(0.0, 100.0),
            state: VariantState::Proposed,
        }
    }

    /// Assigned at construction and never changed afterwards.
    pub fn quality_score(&self) -> f64 {
        self.quality_score
    }

    pub fn state(&self) -> VariantState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == VariantState::Active
    }

    /// Move to `to`, validated against the lifecycle table.
    pub fn transition(
        &mut self,
        to: VariantState,
        trigger: TransitionTrigger,
        now: DateTime<Utc>,
    ) -> VariantResult<StateTransition> {
        let transition = lifecycle::validate(self.id, self.state, to, trigger)?;
        self.state = to;
        self.state_changed_at = Some(now);
        Ok(transition)
    }

    pub fn decayed_ctr(&self) -> f64 {
        if self.decayed_posts > 0.0 {
            self.decayed_clicks / self.decayed_posts
        } else {
            0.0
        }
    }

    /// Clicks over impressions, as consumed by the decision engine.
    pub fn metrics(&self) -> VariantMetrics {
        VariantMetrics {
            variant_id: self.id,
            conversions: self.clicks,
            views: self.impressions,
        }
    }
}

/// Conversion counts of one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantMetrics {
    pub variant_id: VariantId,
    pub conversions: u64,
    pub views: u64,
}

impl VariantMetrics {
    pub fn new(variant_id: VariantId, conversions: u64, views: u64) -> Self {
        Self {
            variant_id,
            conversions,
            views,
        }
    }

    /// `None` when there are no views.
    pub fn rate(&self) -> Option<f64> {
        (self.views > 0).then(|| self.conversions as f64 / self.views as f64)
    }
}

// ─── Bandit state ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ArmStats {
    pub trials: u64,
    pub reward: f64,
}

impl ArmStats {
    pub fn mean_reward(&self) -> f64 {
        if self.trials == 0 {
            0.0
        } else {
            self.reward / self.trials as f64
        }
    }
}

/// Durable per-pool bandit counters, keyed by variant id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BanditRecord {
    pub arms: BTreeMap<VariantId, ArmStats>,
}

impl BanditRecord {
    pub fn arm(&self, id: &VariantId) -> ArmStats {
        self.arms.get(id).copied().unwrap_or_default()
    }

    pub fn total_trials(&self) -> u64 {
        self.arms.values().map(|a| a.trials).sum()
    }

    pub fn record(&mut self, id: VariantId, reward: f64) {
        let arm = self.arms.entry(id).or_default();
        arm.trials += 1;
        arm.reward += reward;
    }
}

// ─── Pool ───────────────────────────────────────────────────────────────

/// All variants of one (content, platform) pair plus its bandit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub key: PoolKey,
    pub variants: Vec<Variant>,
    pub bandit: BanditRecord,
    /// Optimistic-concurrency version; bumped by every successful commit.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Pool {
    pub fn new(key: PoolKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            variants: Vec::new(),
            bandit: BanditRecord::default(),
            version: 0,
            updated_at: now,
        }
    }

    pub fn active(&self) -> impl Iterator<Item = &Variant> {
        self.variants.iter().filter(|v| v.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    pub fn excluded_count(&self) -> usize {
        self.variants.iter().filter(|v| v.state().is_excluded()).count()
    }

    pub fn contains_value(&self, value: &str) -> bool {
        self.variants.iter().any(|v| v.value == value)
    }

    pub fn variant(&self, id: &VariantId) -> Option<&Variant> {
        self.variants.iter().find(|v| &v.id == id)
    }

    pub fn variant_mut(&mut self, id: &VariantId) -> VariantResult<&mut Variant> {
        let key = self.key.to_string();
        self.variants
            .iter_mut()
            .find(|v| &v.id == id)
            .ok_or_else(|| VariantError::VariantNotFound(format!("{id} in pool {key}")))
    }

    /// Append a variant, enforcing id and value uniqueness.
    pub fn push(&mut self, variant: Variant) -> VariantResult<()> {
        if self.contains_value(&variant.value) {
            return Err(VariantError::Validation(format!(
                "value '{}' already present in pool {}",
                variant.value, self.key
            )));
        }
        if self.variant(&variant.id).is_some() {
            return Err(VariantError::Validation(format!(
                "variant id {} already present in pool {}",
                variant.id, self.key
            )));
        }
        self.variants.push(variant);
        Ok(())
    }
}

// ─── Evaluation & decision outputs ──────────────────────────────────────

/// Ephemeral evaluator output used for ranking candidates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub resonance_score: f64,
    pub model_score: f64,
    pub combined_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceMethod {
    Frequentist,
    Bayesian,
}

/// Confidence that the top variant beats the pooled baseline.
///
/// `confidence` is on the method's native scale: 0..=100 for frequentist,
/// 0..=1 for Bayesian.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceReport {
    pub method: ConfidenceMethod,
    pub confidence: f64,
    pub top_variant_id: VariantId,
    pub compared_variant_ids: Vec<VariantId>,
    /// Variants left out for lack of views.
    pub excluded_variant_ids: Vec<VariantId>,
}

impl ConfidenceReport {
    pub fn as_percent(&self) -> f64 {
        match self.method {
            ConfidenceMethod::Frequentist => self.confidence,
            ConfidenceMethod::Bayesian => self.confidence * 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_traits_fill_defaults() {
        let seed = SeedTraits {
            hook_strength: Some(0.9),
            shareability: Some(f64::NAN),
            tempo: Some(3.0),
            ..Default::default()
        };
        let (traits, defaulted) = seed.resolve();
        assert_eq!(traits.hook_strength, 0.9);
        assert_eq!(traits.shareability, DEFAULT_SHAREABILITY);
        assert_eq!(traits.tempo, 1.4);
        assert!(defaulted.contains(&"shareability"));
        assert!(defaulted.contains(&"caption_style"));
        assert!(!defaulted.contains(&"hook_strength"));
        assert!(traits.in_domain());
    }

    #[test]
    fn test_pool_rejects_duplicate_values() {
        let now = Utc::now();
        let mut pool = Pool::new(PoolKey::new("c1", "tiktok"), now);
        let a = Variant::new(Uuid::new_v4(), "Watch this", TraitVector::default(), 60.0, now);
        let b = Variant::new(Uuid::new_v4(), "Watch this", TraitVector::default(), 70.0, now);
        assert!(pool.push(a).is_ok());
        assert!(pool.push(b).is_err());
        assert_eq!(pool.variants.len(), 1);
    }

    #[test]
    fn test_metrics_rate_undefined_without_views() {
        let m = VariantMetrics::new(Uuid::new_v4(), 0, 0);
        assert!(m.rate().is_none());
        let m = VariantMetrics::new(Uuid::new_v4(), 5, 100);
        assert_eq!(m.rate(), Some(0.05));
    }

    #[test]
    fn test_event_type_parse() {
        assert_eq!("click".parse::<EventType>().unwrap(), EventType::Click);
        assert!("share".parse::<EventType>().is_err());
    }

    #[test]
    fn test_bandit_record_accumulates() {
        let mut record = BanditRecord::default();
        let id = Uuid::new_v4();
        record.record(id, 1.0);
        record.record(id, 0.0);
        assert_eq!(record.arm(&id).trials, 2);
        assert_eq!(record.arm(&id).mean_reward(), 0.5);
        assert_eq!(record.total_trials(), 2);
        assert_eq!(record.arm(&Uuid::new_v4()).trials, 0);
    }

    #[test]
    fn test_pool_serializes_with_bandit_keys() {
        let now = Utc::now();
        let mut pool = Pool::new(PoolKey::new("c1", "youtube"), now);
        let v = Variant::new(Uuid::new_v4(), "A", TraitVector::default(), 50.0, now);
        pool.bandit.record(v.id, 1.0);
        pool.push(v).unwrap();
        let json = serde_json::to_string(&pool).unwrap();
        let back: Pool = serde_json::from_str(&json).unwrap();
        assert_eq!(back.variants.len(), 1);
        assert_eq!(back.bandit.total_trials(), 1);
    }
}
