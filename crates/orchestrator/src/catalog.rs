use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use variant_core::SeedTraits;

/// What the content catalog knows about one content item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentContext {
    pub title: String,
    #[serde(default)]
    pub seed_traits: SeedTraits,
}

impl ContentContext {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            seed_traits: SeedTraits::default(),
        }
    }

    pub fn with_traits(mut self, traits: SeedTraits) -> Self {
        self.seed_traits = traits;
        self
    }
}

/// Read access to canonical content metadata.
pub trait ContentCatalog: Send + Sync {
    fn context(&self, content_id: &str) -> Option<ContentContext>;
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    entries: DashMap<String, ContentContext>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, content_id: impl Into<String>, context: ContentContext) {
        self.entries.insert(content_id.into(), context);
    }
}

impl ContentCatalog for InMemoryCatalog {
    fn context(&self, content_id: &str) -> Option<ContentContext> {
        self.entries.get(content_id).map(|entry| entry.clone())
    }
}
