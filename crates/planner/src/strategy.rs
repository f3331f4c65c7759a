//! Named candidate-generation strategies and their registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::RngCore;
use variant_core::{CaptionStyle, TraitVector, VariantError, VariantId, VariantResult};

use crate::mutator::MutationGenerator;

/// What to generate candidates from.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub title: &'a str,
    pub base: TraitVector,
    pub count: usize,
    pub magnitude: f64,
}

/// A generated, not yet scored candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: VariantId,
    pub value: String,
    pub traits: TraitVector,
}

pub trait GenerationStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Produce exactly `request.count` candidates. Values may repeat.
    fn generate(
        &self,
        request: &GenerationRequest<'_>,
        rng: &mut dyn RngCore,
    ) -> VariantResult<Vec<Candidate>>;
}

/// Full mutation: numeric perturbation plus categorical resampling.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicStrategy;

impl GenerationStrategy for HeuristicStrategy {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn generate(
        &self,
        request: &GenerationRequest<'_>,
        rng: &mut dyn RngCore,
    ) -> VariantResult<Vec<Candidate>> {
        let generator = MutationGenerator::new(request.magnitude)?;
        render_all(request, generator, rng)
    }
}

/// Half the configured magnitude; caption and thumbnail styles are kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConservativeStrategy;

impl GenerationStrategy for ConservativeStrategy {
    fn name(&self) -> &str {
        "conservative"
    }

    fn generate(
        &self,
        request: &GenerationRequest<'_>,
        rng: &mut dyn RngCore,
    ) -> VariantResult<Vec<Candidate>> {
        let generator = MutationGenerator::new(request.magnitude / 2.0)?.keep_categorical();
        render_all(request, generator, rng)
    }
}

fn render_all(
    request: &GenerationRequest<'_>,
    generator: MutationGenerator,
    rng: &mut dyn RngCore,
) -> VariantResult<Vec<Candidate>> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(VariantError::InvalidBaseVariant(
            "title is required to render variants".into(),
        ));
    }
    Ok(generator
        .mutate(&request.base, request.count, rng)
        .into_iter()
        .map(|m| Candidate {
            id: m.id,
            value: render_value(title, &m.traits),
            traits: m.traits,
        })
        .collect())
}

/// Render the caption text of a variant from its title and traits.
pub fn render_value(title: &str, traits: &TraitVector) -> String {
    let body = match traits.caption_style {
        CaptionStyle::Hook => format!("Wait for it: {title}"),
        CaptionStyle::Question => format!("Have you seen {title}?"),
        CaptionStyle::Story => format!("The story behind {title}"),
        CaptionStyle::Minimal => title.to_string(),
        CaptionStyle::Listicle => format!("3 things about {title}"),
    };
    let opener = if traits.hook_strength >= 0.8 {
        "You won't believe this. "
    } else if traits.hook_strength >= 0.5 {
        "Heads up! "
    } else {
        ""
    };
    let cta = if traits.cta_intensity >= 0.6 {
        " Share it now!"
    } else if traits.cta_intensity >= 0.3 {
        " Follow for more."
    } else {
        ""
    };
    format!("{opener}{body}{cta}")
}

/// Resolves strategies by name.
#[derive(Clone)]
pub struct StrategyRegistry {
    strategies: BTreeMap<String, Arc<dyn GenerationStrategy>>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            strategies: BTreeMap::new(),
        }
    }

    /// Registry holding `heuristic` and `conservative`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(HeuristicStrategy));
        registry.register(Arc::new(ConservativeStrategy));
        registry
    }

    /// Add or replace a strategy under its own name.
    pub fn register(&mut self, strategy: Arc<dyn GenerationStrategy>) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    pub fn get(&self, name: &str) -> VariantResult<Arc<dyn GenerationStrategy>> {
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| VariantError::UnknownStrategy(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.keys().map(String::as_str).collect()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
