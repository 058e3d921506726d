//! Embedding providers
//!
//! The pipeline treats embedding generation as an external collaborator
//! behind [`EmbeddingProvider`]. Rate limits are retried with exponential
//! backoff; provider failures abort the processing run.
//!
//! [`HashEmbedder`] is the in-process default: a deterministic term-hash
//! embedding good enough for similarity ranking in tests and local
//! development, with no model or network involved.

use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use crate::error::{PipelineError, PipelineResult};

/// Generates fixed-dimension embeddings for chunk text
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Dimension of every vector this provider returns
    fn dimension(&self) -> usize;

    /// Embed one text. May fail with `RateLimited` (retryable) or
    /// `Provider` (fatal for the run).
    async fn embed(&self, text: &str) -> PipelineResult<Vec<f32>>;
}

/// Embed with bounded retries on rate limits.
///
/// Returns the vector and how many retries were needed, so callers can
/// surface retry notes without failing the run.
pub async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    text: &str,
    max_retries: u32,
    backoff: Duration,
) -> PipelineResult<(Vec<f32>, u32)> {
    let mut attempt = 0u32;
    loop {
        match provider.embed(text).await {
            Ok(vector) => {
                if vector.len() != provider.dimension() {
                    return Err(PipelineError::provider(format!(
                        "embedding has {} dimensions, provider advertises {}",
                        vector.len(),
                        provider.dimension()
                    )));
                }
                return Ok((vector, attempt));
            }
            Err(err @ PipelineError::RateLimited(_)) if attempt < max_retries => {
                attempt += 1;
                let delay = backoff.saturating_mul(1u32 << (attempt - 1).min(8));
                warn!(attempt, max_retries, error = %err, "embedding rate limited, backing off");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Deterministic hash-based embedder.
///
/// Each term scatters weight onto three hashed positions, earlier terms
/// weighted more, and the result is normalized to unit length. Identical
/// text always embeds identically.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> PipelineResult<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();

        for (position, term) in lowered.split_whitespace().enumerate() {
            let hash = term_hash(term);
            let slot_a = (hash % self.dimension as u64) as usize;
            let slot_b = ((hash / 11) % self.dimension as u64) as usize;
            let slot_c = ((hash / 17) % self.dimension as u64) as usize;

            let position_weight = 1.0 / (1.0 + position as f32 * 0.1);
            let length_factor = (term.chars().count() as f32).sqrt() / 3.0;

            vector[slot_a] += position_weight * length_factor;
            vector[slot_b] += position_weight * 0.5;
            vector[slot_c] -= position_weight * 0.25;
        }

        normalize(&mut vector);
        Ok(vector)
    }
}

fn term_hash(term: &str) -> u64 {
    let mut hash = 5381u64;
    for byte in term.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u64);
    }
    hash
}

fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}
