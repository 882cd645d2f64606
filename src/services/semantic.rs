// Semantic matching against the curated dish-photo library
//
// The embedding index is an external collaborator; one call per item. A
// failed or empty lookup just advances the item to the web search stage.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::core::config::SemanticConfig;
use crate::core::types::{ImageCandidate, ImageSource, SimilarDish};
use crate::services::storage::MetadataStore;

/// Precomputed embedding index over the curated dish-photo library.
#[async_trait]
pub trait EmbeddingIndex: Send + Sync {
    async fn search_similar(
        &self,
        text: &str,
        top_k: usize,
        threshold: f32,
    ) -> anyhow::Result<Vec<SimilarDish>>;
}

/// Semantic stage: match dishes against the curated library.
pub struct SemanticMatcher {
    index: Option<Arc<dyn EmbeddingIndex>>,
    records: Arc<dyn MetadataStore>,
    threshold: f32,
    top_k: usize,
    enabled: bool,
}

impl SemanticMatcher {
    pub fn new(
        index: Option<Arc<dyn EmbeddingIndex>>,
        records: Arc<dyn MetadataStore>,
        config: &SemanticConfig,
    ) -> Self {
        Self {
            index,
            records,
            threshold: config.similarity_threshold,
            top_k: config.top_k,
            enabled: config.enabled,
        }
    }

    /// Whether this stage should run at all. Disabled configs and a missing
    /// index collaborator skip the stage for every item.
    pub fn is_enabled(&self) -> bool {
        self.enabled && self.index.is_some()
    }

    /// Find library photos for a dish. Empty on no-match or error.
    #[instrument(skip(self, description))]
    pub async fn find_matches(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Vec<ImageCandidate> {
        let Some(index) = self.index.as_ref() else {
            return Vec::new();
        };

        // Name plus description gives the embedding more to work with
        let query_text = match description {
            Some(desc) if !desc.is_empty() => format!("{}. {}", name, desc),
            _ => name.to_string(),
        };

        let matches = match index
            .search_similar(&query_text, self.top_k, self.threshold)
            .await
        {
            Ok(matches) => matches,
            Err(e) => {
                error!("Semantic search failed for '{}': {}", name, e);
                return Vec::new();
            }
        };

        if matches.is_empty() {
            debug!("No semantic match for '{}' above {}", name, self.threshold);
            self.log_missing(name, description).await;
            return Vec::new();
        }

        for m in &matches {
            info!(
                "Semantic match for '{}': {} (similarity {:.3})",
                name, m.title, m.similarity
            );
        }

        matches
            .into_iter()
            .filter(|m| !m.image_url.is_empty())
            .map(|m| {
                ImageCandidate::new(m.image_url, ImageSource::Semantic).with_score(m.similarity)
            })
            .collect()
    }

    /// Record an unmatched dish for library curation. Best effort.
    async fn log_missing(&self, name: &str, description: Option<&str>) {
        if let Err(e) = self.records.log_missing_dish(name, description).await {
            debug!("Could not log missing dish '{}': {}", name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::fakes::MemoryMetadataStore;

    struct FixedIndex {
        hits: Vec<SimilarDish>,
    }

    #[async_trait]
    impl EmbeddingIndex for FixedIndex {
        async fn search_similar(
            &self,
            _text: &str,
            top_k: usize,
            threshold: f32,
        ) -> anyhow::Result<Vec<SimilarDish>> {
            Ok(self
                .hits
                .iter()
                .filter(|h| h.similarity >= threshold)
                .take(top_k)
                .cloned()
                .collect())
        }
    }

    struct FailingIndex;

    #[async_trait]
    impl EmbeddingIndex for FailingIndex {
        async fn search_similar(
            &self,
            _text: &str,
            _top_k: usize,
            _threshold: f32,
        ) -> anyhow::Result<Vec<SimilarDish>> {
            anyhow::bail!("index unavailable")
        }
    }

    fn config() -> SemanticConfig {
        SemanticConfig {
            enabled: true,
            similarity_threshold: 0.7,
            top_k: 3,
        }
    }

    fn dish(title: &str, similarity: f32) -> SimilarDish {
        SimilarDish {
            id: title.to_string(),
            title: title.to_string(),
            description: None,
            similarity,
            image_url: format!("https://library/{}.jpg", title),
        }
    }

    #[tokio::test]
    async fn test_matches_above_threshold_become_candidates() {
        let index = Arc::new(FixedIndex {
            hits: vec![dish("ramen", 0.91), dish("udon", 0.4)],
        });
        let matcher = SemanticMatcher::new(
            Some(index),
            Arc::new(MemoryMetadataStore::default()),
            &config(),
        );

        let candidates = matcher.find_matches("Tonkotsu Ramen", None).await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source, ImageSource::Semantic);
        assert_eq!(candidates[0].score, Some(0.91));
    }

    #[tokio::test]
    async fn test_no_match_logs_missing_dish() {
        let records = Arc::new(MemoryMetadataStore::default());
        let matcher = SemanticMatcher::new(
            Some(Arc::new(FixedIndex { hits: vec![] })),
            Arc::clone(&records) as Arc<dyn MetadataStore>,
            &config(),
        );

        let candidates = matcher.find_matches("Obscure Stew", None).await;
        assert!(candidates.is_empty());
        assert_eq!(records.missing.lock().as_slice(), ["Obscure Stew"]);
    }

    #[tokio::test]
    async fn test_index_failure_degrades_to_empty() {
        let matcher = SemanticMatcher::new(
            Some(Arc::new(FailingIndex)),
            Arc::new(MemoryMetadataStore::default()),
            &config(),
        );
        assert!(matcher.find_matches("Pho", None).await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_without_index() {
        let matcher =
            SemanticMatcher::new(None, Arc::new(MemoryMetadataStore::default()), &config());
        assert!(!matcher.is_enabled());
        assert!(matcher.find_matches("Pho", None).await.is_empty());
    }
}
