//! Built-in training strategies
//!
//! A strategy is a pure function of (role, chunks, config): identical input
//! must produce identical manifests and artifact digests, so repeat runs are
//! reproducible and tests can assert on exact output. Neither built-in does
//! gradient work; they derive capability manifests from the material itself
//! and emit a digest-addressed artifact reference.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio_util::sync::CancellationToken;

use super::schema::{
    Capability, CapabilityManifest, ModelArtifact, TrainingConfig, TrainingMethod,
};
use crate::error::{PipelineError, PipelineResult};
use crate::registry::ContentChunk;

/// Executes the training phase of a job
#[async_trait]
pub trait TrainingStrategy: Send + Sync {
    /// Which `training_method` this strategy serves
    fn method(&self) -> TrainingMethod;

    /// Derive (artifact, manifest) from the collected chunks.
    ///
    /// Must be deterministic for identical (role, chunks, config). The token
    /// is the job's cancellation token; long-running strategies should check
    /// it and give up with a `Cancelled` error.
    async fn train(
        &self,
        role: &str,
        chunks: &[ContentChunk],
        config: &TrainingConfig,
        cancel: &CancellationToken,
    ) -> PipelineResult<(ModelArtifact, CapabilityManifest)>;
}

/// SHA-256 over role, chunk texts in order, and the canonical config
fn artifact_digest(
    role: &str,
    chunks: &[ContentChunk],
    config: &TrainingConfig,
) -> PipelineResult<String> {
    let mut hasher = Sha256::new();
    hasher.update(role.as_bytes());
    hasher.update([0u8]);
    for chunk in chunks {
        hasher.update(chunk.text.as_bytes());
        hasher.update([0u8]);
    }
    // BTreeMap params keep this byte-stable across runs
    hasher.update(serde_json::to_vec(config)?);
    Ok(format!("{:x}", hasher.finalize()))
}

fn build_artifact(
    role: &str,
    chunks: &[ContentChunk],
    config: &TrainingConfig,
) -> PipelineResult<ModelArtifact> {
    let digest = artifact_digest(role, chunks, config)?;
    let short: String = digest.chars().take(12).collect();
    Ok(ModelArtifact {
        reference: format!("{}/{role}/{short}", config.model_type),
        digest,
        model_type: config.model_type,
        chunk_count: chunks.len(),
    })
}

fn ensure_trainable(
    role: &str,
    chunks: &[ContentChunk],
    cancel: &CancellationToken,
) -> PipelineResult<()> {
    if chunks.is_empty() {
        return Err(PipelineError::invalid_state(format!(
            "no chunks to train role {role} on"
        )));
    }
    if cancel.is_cancelled() {
        return Err(PipelineError::cancelled(format!(
            "training for role {role} was cancelled"
        )));
    }
    Ok(())
}

/// Function words that never make meaningful capabilities. Anything shorter
/// than four characters is filtered by length before this list applies.
const STOPWORDS: &[&str] = &[
    "that", "this", "with", "from", "have", "will", "they", "their", "there",
    "which", "would", "about", "into", "been", "were", "also", "more", "than",
    "when", "where", "each", "them", "then", "these", "those", "such", "other",
    "over", "only", "must", "should", "could", "because", "between", "during",
    "before", "after", "your", "every", "some", "what", "does", "upon", "while",
    "being", "through", "against", "within",
];

fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= 4)
        .map(str::to_lowercase)
        .filter(|word| !STOPWORDS.contains(&word.as_str()))
        .filter(|word| !word.chars().all(char::is_numeric))
}

/// Document-frequency-weighted term scoring, shared by both built-ins.
///
/// Terms recurring across chunks are ranked by (document frequency, total
/// frequency, name); when nothing recurs (single-chunk corpora, disjoint
/// vocabulary) every term competes on total frequency instead.
fn score_terms(chunks: &[ContentChunk], max_capabilities: usize) -> BTreeMap<String, Capability> {
    let total = chunks.len();
    let mut document_frequency: HashMap<String, usize> = HashMap::new();
    let mut term_frequency: HashMap<String, usize> = HashMap::new();
    for chunk in chunks {
        let mut seen = HashSet::new();
        for term in terms(&chunk.text) {
            *term_frequency.entry(term.clone()).or_insert(0) += 1;
            if seen.insert(term.clone()) {
                *document_frequency.entry(term).or_insert(0) += 1;
            }
        }
    }

    let mut candidates: Vec<(String, usize, usize)> = document_frequency
        .iter()
        .filter(|(_, &df)| df >= 2)
        .map(|(term, &df)| (term.clone(), df, term_frequency[term]))
        .collect();
    if candidates.is_empty() {
        candidates = term_frequency
            .iter()
            .map(|(term, &tf)| (term.clone(), document_frequency[term], tf))
            .collect();
    }
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)).then(a.0.cmp(&b.0)));
    candidates.truncate(max_capabilities);

    candidates
        .into_iter()
        .map(|(term, df, tf)| {
            let description = format!(
                "Recurring term '{term}' appears in {df} of {total} chunks ({tf} occurrences)"
            );
            (
                term,
                Capability {
                    confidence: df as f64 / total as f64,
                    description,
                    source_chunks: df,
                },
            )
        })
        .collect()
}

/// Scores recurring domain terms across the material
pub struct FineTuningStrategy {
    max_capabilities: usize,
}

impl FineTuningStrategy {
    pub fn new(max_capabilities: usize) -> Self {
        Self { max_capabilities }
    }
}

impl Default for FineTuningStrategy {
    fn default() -> Self {
        Self::new(12)
    }
}

#[async_trait]
impl TrainingStrategy for FineTuningStrategy {
    fn method(&self) -> TrainingMethod {
        TrainingMethod::FineTuning
    }

    async fn train(
        &self,
        role: &str,
        chunks: &[ContentChunk],
        config: &TrainingConfig,
        cancel: &CancellationToken,
    ) -> PipelineResult<(ModelArtifact, CapabilityManifest)> {
        ensure_trainable(role, chunks, cancel)?;
        let capabilities = score_terms(chunks, self.max_capabilities);
        if cancel.is_cancelled() {
            return Err(PipelineError::cancelled(format!(
                "training for role {role} was cancelled"
            )));
        }
        let artifact = build_artifact(role, chunks, config)?;
        Ok((artifact, CapabilityManifest { capabilities }))
    }
}

/// Derives capabilities from document structure.
///
/// Chunks carrying a `section` metadata entry (structural chunking) become
/// capabilities named by section title, confidence relative to the dominant
/// section. Without section metadata it falls back to term scoring.
pub struct RetrievalAugmentedStrategy {
    max_capabilities: usize,
}

impl RetrievalAugmentedStrategy {
    pub fn new(max_capabilities: usize) -> Self {
        Self { max_capabilities }
    }
}

impl Default for RetrievalAugmentedStrategy {
    fn default() -> Self {
        Self::new(12)
    }
}

#[async_trait]
impl TrainingStrategy for RetrievalAugmentedStrategy {
    fn method(&self) -> TrainingMethod {
        TrainingMethod::RetrievalAugmented
    }

    async fn train(
        &self,
        role: &str,
        chunks: &[ContentChunk],
        config: &TrainingConfig,
        cancel: &CancellationToken,
    ) -> PipelineResult<(ModelArtifact, CapabilityManifest)> {
        ensure_trainable(role, chunks, cancel)?;
        let total = chunks.len();

        let mut section_counts: BTreeMap<String, usize> = BTreeMap::new();
        for chunk in chunks {
            if let Some(serde_json::Value::String(title)) = chunk.metadata.get("section") {
                *section_counts.entry(title.clone()).or_insert(0) += 1;
            }
        }

        let capabilities = if section_counts.is_empty() {
            score_terms(chunks, self.max_capabilities)
        } else {
            let dominant = section_counts.values().copied().max().unwrap_or(1);
            let mut ranked: Vec<(String, usize)> = section_counts.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            ranked.truncate(self.max_capabilities);
            ranked
                .into_iter()
                .map(|(title, count)| {
                    let description =
                        format!("Section '{title}' spans {count} of {total} chunks");
                    (
                        title,
                        Capability {
                            confidence: count as f64 / dominant as f64,
                            description,
                            source_chunks: count,
                        },
                    )
                })
                .collect()
        };

        if cancel.is_cancelled() {
            return Err(PipelineError::cancelled(format!(
                "training for role {role} was cancelled"
            )));
        }
        let artifact = build_artifact(role, chunks, config)?;
        Ok((artifact, CapabilityManifest { capabilities }))
    }
}
