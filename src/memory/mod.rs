//! Crew memory and the embedder seam.
//!
//! A crew with `memory: true` keeps the outputs of its completed tasks in a
//! [`ShortTermMemory`] and recalls the most similar ones when prompting later
//! tasks. Embeddings come from an [`EmbedderProvider`] supplied by the
//! embedding program; when none is configured or it fails, the crew falls
//! back to the local [`HashingEmbedder`].

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

/// Dimension of the fallback embedder.
pub const DEFAULT_EMBEDDING_DIMS: usize = 256;

/// Text-to-vector conversion.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Supplies an embedder for a crew.
pub trait EmbedderProvider: Send + Sync {
    fn embedder_for(&self, crew: &str) -> anyhow::Result<Arc<dyn Embedder>>;
}

/// Get an embedder for `crew`, degrading to the default on any failure.
pub fn resolve_embedder(provider: Option<&dyn EmbedderProvider>, crew: &str) -> Arc<dyn Embedder> {
    match provider {
        Some(provider) => match provider.embedder_for(crew) {
            Ok(embedder) => embedder,
            Err(e) => {
                log::warn!(
                    "Embedder unavailable for crew '{}' ({}); using default embedder",
                    crew,
                    e
                );
                Arc::new(HashingEmbedder::default())
            }
        },
        None => {
            log::warn!(
                "No embedder provider configured for crew '{}'; using default embedder",
                crew
            );
            Arc::new(HashingEmbedder::default())
        }
    }
}

/// Deterministic bag-of-words embedder using feature hashing.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dims: DEFAULT_EMBEDDING_DIMS,
        }
    }
}

impl HashingEmbedder {
    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            // FNV-1a
            let mut hash: u64 = 0xcbf29ce484222325;
            for b in word.to_lowercase().bytes() {
                hash ^= b as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            v[(hash % self.dims as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    source: String,
    text: String,
    vector: Vec<f32>,
}

/// Per-run memory of completed task outputs.
pub struct ShortTermMemory {
    embedder: Arc<dyn Embedder>,
    entries: Mutex<Vec<MemoryEntry>>,
}

impl ShortTermMemory {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn embedder_name(&self) -> &str {
        self.embedder.name()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remember `text` produced by `source`.
    pub async fn save(&self, source: &str, text: &str) -> anyhow::Result<()> {
        let vector = self
            .embedder
            .embed(&[text.to_string()])
            .await?
            .pop()
            .unwrap_or_default();
        self.entries.lock().push(MemoryEntry {
            source: source.to_string(),
            text: text.to_string(),
            vector,
        });
        Ok(())
    }

    /// Up to `limit` remembered texts most similar to `query`, as
    /// `(source, text)` pairs.
    pub async fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<(String, String)>> {
        if self.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let query = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .pop()
            .unwrap_or_default();
        let entries = self.entries.lock().clone();
        let mut scored: Vec<(f32, MemoryEntry)> = entries
            .into_iter()
            .map(|e| (cosine(&query, &e.vector), e))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, e)| (e.source, e.text))
            .collect())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingProvider;

    impl EmbedderProvider for FailingProvider {
        fn embedder_for(&self, _crew: &str) -> anyhow::Result<Arc<dyn Embedder>> {
            anyhow::bail!("quota exceeded")
        }
    }

    #[test]
    fn test_failing_provider_degrades_to_default() {
        let embedder = resolve_embedder(Some(&FailingProvider), "main");
        assert_eq!(embedder.name(), "hashing");
        assert_eq!(resolve_embedder(None, "main").name(), "hashing");
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let memory = ShortTermMemory::new(Arc::new(HashingEmbedder::default()));
        memory.save("research", "rust ownership and borrowing").await.unwrap();
        memory.save("weather", "sunny skies tomorrow").await.unwrap();

        let hits = memory.search("borrowing in rust", 5).await.unwrap();
        assert_eq!(hits[0].0, "research");
        assert_eq!(memory.len(), 2);
    }
}
