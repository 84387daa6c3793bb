use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Memoises chunk embeddings and query entity extraction across selections.
///
/// Keys are SHA-256 digests of the input text. When a map reaches
/// `max_entries`, a quarter of it is evicted in arbitrary order.
#[derive(Clone)]
pub struct EmbeddingCache {
    embeddings: Arc<DashMap<String, Vec<f32>>>,
    query_entities: Arc<DashMap<String, Vec<String>>>,
    max_entries: usize,
}

impl EmbeddingCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            embeddings: Arc::new(DashMap::new()),
            query_entities: Arc::new(DashMap::new()),
            max_entries,
        }
    }

    pub fn set_embedding(&self, text: &str, embedding: Vec<f32>) {
        if self.max_entries == 0 {
            return;
        }
        evict_if_full(&self.embeddings, self.max_entries);
        let key = self.hash_text(text);
        self.embeddings.insert(key, embedding);
    }

    pub fn get_embedding(&self, text: &str) -> Option<Vec<f32>> {
        let key = self.hash_text(text);
        self.embeddings.get(&key).map(|r| r.value().clone())
    }

    pub fn set_query_entities(&self, query: &str, entities: Vec<String>) {
        if self.max_entries == 0 {
            return;
        }
        evict_if_full(&self.query_entities, self.max_entries);
        let key = self.hash_text(query);
        self.query_entities.insert(key, entities);
    }

    pub fn get_query_entities(&self, query: &str) -> Option<Vec<String>> {
        let key = self.hash_text(query);
        self.query_entities.get(&key).map(|r| r.value().clone())
    }

    fn hash_text(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            embeddings_cached: self.embeddings.len(),
            query_entities_cached: self.query_entities.len(),
        }
    }

    /// Drop everything, e.g. after the graph is reprocessed
    pub fn clear(&self) {
        self.embeddings.clear();
        self.query_entities.clear();
    }
}

fn evict_if_full<V>(map: &DashMap<String, V>, max_entries: usize) {
    if map.len() < max_entries {
        return;
    }
    let to_remove: Vec<_> = map
        .iter()
        .take((max_entries / 4).max(1))
        .map(|r| r.key().clone())
        .collect();
    for key in to_remove {
        map.remove(&key);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub embeddings_cached: usize,
    pub query_entities_cached: usize,
}
