//! Batch scoring of catalog records against a query.
//!
//! A [`SimilarityEvaluator`] judges a whole batch in one call. The
//! [`DeterministicEvaluator`] applies [`crate::compare::compare`] per record;
//! semantic evaluators (see [`crate::llm::LlmEvaluator`]) may fail, in which
//! case [`BatchScorer`] falls back to the deterministic path.

use crate::compare::compare;
use crate::error::{ResolverError, Result};
use crate::types::{sort_ranked, CandidateRecord, QueryKeywords, ScoredCandidate};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default deadline for one evaluator call.
pub const DEFAULT_EVALUATOR_TIMEOUT: Duration = Duration::from_secs(60);

/// Which rubric an evaluator should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationPass {
    /// Per-strategy screening inside the cascade.
    Quick,
    /// Stricter tie-break over the surviving ambiguous records.
    Final,
}

impl EvaluationPass {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final)
    }
}

/// One evaluator verdict. `index` is zero-based into the submitted batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Judgement {
    pub index: usize,
    pub score: f64,
    pub rationale: Option<String>,
}

/// Judges how well each candidate matches the original citation.
#[async_trait]
pub trait SimilarityEvaluator: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Score every candidate in one call. Candidates missing from the
    /// result are treated as non-matching.
    async fn evaluate(
        &self,
        original: &QueryKeywords,
        candidates: &[CandidateRecord],
        pass: EvaluationPass,
        exclude_identifiers: bool,
    ) -> Result<Vec<Judgement>>;
}

/// Weighted field comparison. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicEvaluator;

#[async_trait]
impl SimilarityEvaluator for DeterministicEvaluator {
    fn name(&self) -> &'static str {
        "deterministic"
    }

    async fn evaluate(
        &self,
        original: &QueryKeywords,
        candidates: &[CandidateRecord],
        _pass: EvaluationPass,
        exclude_identifiers: bool,
    ) -> Result<Vec<Judgement>> {
        Ok(deterministic_judgements(original, candidates, exclude_identifiers))
    }
}

fn deterministic_judgements(
    original: &QueryKeywords,
    candidates: &[CandidateRecord],
    exclude_identifiers: bool,
) -> Vec<Judgement> {
    candidates
        .iter()
        .enumerate()
        .map(|(index, record)| Judgement {
            index,
            score: compare(original, record, exclude_identifiers),
            rationale: None,
        })
        .collect()
}

/// Scores batches through an evaluator, with a deterministic fallback.
#[derive(Clone)]
pub struct BatchScorer {
    evaluator: Arc<dyn SimilarityEvaluator>,
    timeout: Duration,
}

impl std::fmt::Debug for BatchScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScorer")
            .field("evaluator", &self.evaluator.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for BatchScorer {
    fn default() -> Self {
        Self::deterministic()
    }
}

impl BatchScorer {
    /// Scorer using only the weighted field comparison.
    pub fn deterministic() -> Self {
        Self::new(Arc::new(DeterministicEvaluator))
    }

    /// Scorer delegating to `evaluator`.
    pub fn new(evaluator: Arc<dyn SimilarityEvaluator>) -> Self {
        Self {
            evaluator,
            timeout: DEFAULT_EVALUATOR_TIMEOUT,
        }
    }

    /// Deadline for each evaluator call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn evaluator_name(&self) -> &'static str {
        self.evaluator.name()
    }

    /// Score `candidates` against `original`, best first.
    ///
    /// Evaluator errors, timeouts and unusable responses are logged and the
    /// batch is rescored deterministically; this never fails.
    pub async fn score_batch(
        &self,
        original: &QueryKeywords,
        candidates: Vec<CandidateRecord>,
        pass: EvaluationPass,
        exclude_identifiers: bool,
    ) -> Vec<ScoredCandidate> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let judgements = match self
            .judge(original, &candidates, pass, exclude_identifiers)
            .await
        {
            Ok(judgements) => judgements,
            Err(error) => {
                warn!(
                    evaluator = self.evaluator.name(),
                    ?pass,
                    candidates = candidates.len(),
                    %error,
                    "Evaluator failed, falling back to deterministic scoring"
                );
                deterministic_judgements(original, &candidates, exclude_identifiers)
            }
        };

        let scored = apply_judgements(candidates, judgements);
        debug!(
            evaluator = self.evaluator.name(),
            ?pass,
            best = scored.first().map(|s| s.score()),
            "Scored batch"
        );
        scored
    }

    async fn judge(
        &self,
        original: &QueryKeywords,
        candidates: &[CandidateRecord],
        pass: EvaluationPass,
        exclude_identifiers: bool,
    ) -> Result<Vec<Judgement>> {
        let call = self
            .evaluator
            .evaluate(original, candidates, pass, exclude_identifiers);
        let judgements = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ResolverError::Timeout {
                operation: "similarity evaluation",
                after: self.timeout,
            })??;

        if !judgements.iter().any(|j| j.index < candidates.len()) {
            return Err(ResolverError::Evaluator(format!(
                "{} returned no usable judgements for {} candidates",
                self.evaluator.name(),
                candidates.len()
            )));
        }
        Ok(judgements)
    }
}

/// Pair each record with its judgement; unjudged records score 0.
fn apply_judgements(
    candidates: Vec<CandidateRecord>,
    judgements: Vec<Judgement>,
) -> Vec<ScoredCandidate> {
    let mut by_index: HashMap<usize, Judgement> = HashMap::new();
    for judgement in judgements {
        // First verdict for an index wins.
        by_index.entry(judgement.index).or_insert(judgement);
    }

    let mut scored: Vec<ScoredCandidate> = candidates
        .into_iter()
        .enumerate()
        .map(|(index, record)| match by_index.remove(&index) {
            Some(j) => ScoredCandidate::new(j.score, record).with_rationale(j.rationale),
            None => ScoredCandidate::new(0.0, record),
        })
        .collect();
    sort_ranked(&mut scored);
    scored
}
