//! Confidence buckets and the final reconciliation policy.

use crate::scorer::{BatchScorer, EvaluationPass};
use crate::types::{sort_ranked, Bucket, QueryKeywords, ScoredCandidate};
use std::collections::HashSet;
use tracing::{debug, info};

/// Scores above this are accepted outright.
pub const HIGH_CONFIDENCE: f64 = 0.9;
/// Field-based results below this are dropped.
pub const CANDIDATE_THRESHOLD: f64 = 0.5;
/// A final re-rank whose best score is below this is "no match".
pub const NO_MATCH_THRESHOLD: f64 = 0.3;

/// Bucket for a single scored record.
///
/// Identifier evidence is never discarded: an identifier-matched record that
/// is not high confidence lands in [`Bucket::IdentifierMatchedLow`] however
/// low it scores.
pub fn bucket_for(candidate: &ScoredCandidate) -> Bucket {
    let score = candidate.score();
    if score > HIGH_CONFIDENCE {
        Bucket::High
    } else if candidate.is_identifier_matched() {
        Bucket::IdentifierMatchedLow
    } else if score >= CANDIDATE_THRESHOLD {
        Bucket::Candidate
    } else {
        Bucket::Discarded
    }
}

/// Scored records split by confidence. Each identifier is held at most once.
#[derive(Debug, Clone, Default)]
pub struct Buckets {
    pub high: Vec<ScoredCandidate>,
    pub candidates: Vec<ScoredCandidate>,
    pub identifier_matched_low: Vec<ScoredCandidate>,
    pub discarded: Vec<ScoredCandidate>,
}

impl Buckets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a record with this identifier is already held.
    pub fn contains(&self, id: &str) -> bool {
        self.all().any(|c| c.identifier() == id)
    }

    fn all(&self) -> impl Iterator<Item = &ScoredCandidate> {
        self.high
            .iter()
            .chain(&self.candidates)
            .chain(&self.identifier_matched_low)
            .chain(&self.discarded)
    }

    /// Place one record. A record whose identifier is already held keeps its
    /// first placement.
    pub fn insert(&mut self, candidate: ScoredCandidate) -> Option<Bucket> {
        if self.contains(candidate.identifier()) {
            debug!(pmid = candidate.identifier(), "Record already classified");
            return None;
        }
        let bucket = bucket_for(&candidate);
        let target = match bucket {
            Bucket::High => &mut self.high,
            Bucket::Candidate => &mut self.candidates,
            Bucket::IdentifierMatchedLow => &mut self.identifier_matched_low,
            Bucket::Discarded => &mut self.discarded,
        };
        target.push(candidate);
        sort_ranked(target);
        Some(bucket)
    }

    /// Fold a later batch in, keeping earlier placements.
    pub fn absorb(&mut self, other: Buckets) {
        let Buckets {
            high,
            candidates,
            identifier_matched_low,
            discarded,
        } = other;
        for candidate in high
            .into_iter()
            .chain(candidates)
            .chain(identifier_matched_low)
            .chain(discarded)
        {
            self.insert(candidate);
        }
    }

    /// Best high-confidence record, if any.
    pub fn best_high(&self) -> Option<&ScoredCandidate> {
        self.high.first()
    }

    /// Records that survive into reconciliation.
    pub fn retained(&self) -> usize {
        self.candidates.len() + self.identifier_matched_low.len()
    }
}

/// Split one scored batch into buckets.
pub fn classify(scored: Vec<ScoredCandidate>) -> Buckets {
    let mut buckets = Buckets::new();
    for candidate in scored {
        buckets.insert(candidate);
    }
    buckets
}

/// Merge the buckets accumulated over a whole cascade into the final answer.
///
/// An empty result means no match. Several results are returned only when
/// identifier-matched alternatives sit beside the best field-based match, or
/// when identifier evidence is all there is.
pub async fn reconcile(
    original: &QueryKeywords,
    buckets: Buckets,
    scorer: &BatchScorer,
) -> Vec<ScoredCandidate> {
    let Buckets {
        high,
        candidates,
        mut identifier_matched_low,
        ..
    } = buckets;

    if let Some(best) = high.into_iter().next() {
        return vec![best];
    }

    if candidates.is_empty() && identifier_matched_low.is_empty() {
        info!("No candidate survived the cascade");
        return Vec::new();
    }

    if candidates.is_empty() {
        sort_ranked(&mut identifier_matched_low);
        info!(
            count = identifier_matched_low.len(),
            "Returning identifier matches only"
        );
        return identifier_matched_low;
    }

    if candidates.len() + identifier_matched_low.len() == 1 {
        return candidates
            .into_iter()
            .chain(identifier_matched_low)
            .collect();
    }

    // Identifier-matched entries win identifier collisions.
    let mut pooled = HashSet::new();
    let pool: Vec<_> = identifier_matched_low
        .iter()
        .chain(&candidates)
        .filter(|c| pooled.insert(c.identifier().to_string()))
        .map(|c| c.record().clone())
        .collect();
    let id_matched: HashSet<&str> = identifier_matched_low
        .iter()
        .map(|c| c.identifier())
        .collect();

    // The re-rank only picks the best field-based record. Identifier matches
    // are reported with their cascade score, which ignored the identifier.
    let best = scorer
        .score_batch(original, pool, EvaluationPass::Final, false)
        .await
        .into_iter()
        .find(|c| !id_matched.contains(c.identifier()));
    sort_ranked(&mut identifier_matched_low);

    let best = match best {
        Some(best) if best.score() >= NO_MATCH_THRESHOLD => best,
        other => {
            info!(
                top_score = other.map(|c| c.score()),
                returned = identifier_matched_low.len(),
                "Final re-rank found no confident match"
            );
            return identifier_matched_low;
        }
    };

    info!(
        pmid = best.identifier(),
        top_score = best.score(),
        alternatives = identifier_matched_low.len(),
        "Reconciled ambiguous candidates"
    );
    let mut result = Vec::with_capacity(identifier_matched_low.len() + 1);
    result.push(best);
    result.extend(identifier_matched_low);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedEvaluator;
    use crate::types::{CandidateRecord, MatchType};
    use std::sync::Arc;

    fn scored(pmid: &str, score: f64) -> ScoredCandidate {
        ScoredCandidate::new(
            score,
            CandidateRecord {
                title: Some(format!("Record {}", pmid)),
                ..CandidateRecord::new(pmid)
            },
        )
    }

    fn id_matched(pmid: &str, score: f64) -> ScoredCandidate {
        scored(pmid, score).with_match_type(Some(MatchType::PmidMatch))
    }

    fn query() -> QueryKeywords {
        QueryKeywords {
            title: Some("Sample Study of X".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(bucket_for(&scored("1", 0.91)), Bucket::High);
        assert_eq!(bucket_for(&scored("1", 0.9)), Bucket::Candidate);
        assert_eq!(bucket_for(&scored("1", 0.5)), Bucket::Candidate);
        assert_eq!(bucket_for(&scored("1", 0.49)), Bucket::Discarded);
        assert_eq!(bucket_for(&id_matched("1", 0.9)), Bucket::IdentifierMatchedLow);
        assert_eq!(bucket_for(&id_matched("1", 0.01)), Bucket::IdentifierMatchedLow);
        assert_eq!(bucket_for(&id_matched("1", 0.95)), Bucket::High);
    }

    #[test]
    fn test_classify_is_disjoint_and_deduplicated() {
        let buckets = classify(vec![
            scored("1", 0.95),
            scored("2", 0.7),
            scored("2", 0.99),
            id_matched("3", 0.2),
            scored("4", 0.1),
        ]);
        assert_eq!(buckets.high.len(), 1);
        assert_eq!(buckets.candidates.len(), 1);
        assert_eq!(buckets.candidates[0].score(), 0.7);
        assert_eq!(buckets.identifier_matched_low.len(), 1);
        assert_eq!(buckets.discarded.len(), 1);
    }

    #[test]
    fn test_absorb_keeps_first_placement() {
        let mut all = classify(vec![id_matched("3", 0.2)]);
        all.absorb(classify(vec![scored("3", 0.8), scored("5", 0.6)]));
        assert_eq!(all.identifier_matched_low.len(), 1);
        assert_eq!(all.candidates.len(), 1);
        assert_eq!(all.candidates[0].identifier(), "5");
        assert_eq!(all.retained(), 2);
    }

    #[tokio::test]
    async fn test_reconcile_empty() {
        let result = reconcile(&query(), Buckets::new(), &BatchScorer::deterministic()).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_keeps_low_identifier_match() {
        let buckets = classify(vec![id_matched("77", 0.2)]);
        let result = reconcile(&query(), buckets, &BatchScorer::deterministic()).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].identifier(), "77");
        assert_eq!(result[0].score(), 0.2);
        assert_eq!(result[0].match_type(), Some(MatchType::PmidMatch));
    }

    #[tokio::test]
    async fn test_reconcile_single_candidate_returned_directly() {
        let evaluator = Arc::new(ScriptedEvaluator::new(vec![]));
        let buckets = classify(vec![scored("5", 0.6)]);
        let result = reconcile(&query(), buckets, &BatchScorer::new(evaluator.clone())).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].score(), 0.6);
        assert_eq!(evaluator.calls(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_semantic_tie_break_picks_one() {
        let evaluator = Arc::new(ScriptedEvaluator::by_pmid(&[
            ("1", 0.95),
            ("2", 0.2),
            ("3", 0.1),
        ]));
        let buckets = classify(vec![scored("1", 0.55), scored("2", 0.6), scored("3", 0.65)]);
        let result = reconcile(&query(), buckets, &BatchScorer::new(evaluator.clone())).await;

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].identifier(), "1");
        assert_eq!(result[0].score(), 0.95);
        assert_eq!(evaluator.passes(), vec![EvaluationPass::Final]);
    }

    #[tokio::test]
    async fn test_reconcile_keeps_identifier_alternatives_beside_best() {
        let evaluator = Arc::new(ScriptedEvaluator::by_pmid(&[
            ("1", 0.8),
            ("2", 0.4),
            ("9", 0.35),
        ]));
        let buckets = classify(vec![scored("1", 0.6), scored("2", 0.7), id_matched("9", 0.1)]);
        let result = reconcile(&query(), buckets, &BatchScorer::new(evaluator)).await;

        let ids: Vec<&str> = result.iter().map(|c| c.identifier()).collect();
        assert_eq!(ids, vec!["1", "9"]);
        assert_eq!(result[0].score(), 0.8);
        assert_eq!(result[1].match_type(), Some(MatchType::PmidMatch));
        assert_eq!(result[1].score(), 0.1);
    }

    #[tokio::test]
    async fn test_reconcile_identifier_rerank_does_not_displace_field_match() {
        let evaluator = Arc::new(ScriptedEvaluator::by_pmid(&[
            ("9", 0.9),
            ("1", 0.6),
            ("2", 0.4),
        ]));
        let buckets = classify(vec![scored("1", 0.8), scored("2", 0.7), id_matched("9", 0.1)]);
        let result = reconcile(&query(), buckets, &BatchScorer::new(evaluator)).await;

        let ids: Vec<&str> = result.iter().map(|c| c.identifier()).collect();
        assert_eq!(ids, vec!["1", "9"]);
        assert_eq!(result[0].score(), 0.6);
        assert_eq!(result[1].score(), 0.1);
    }

    #[tokio::test]
    async fn test_reconcile_deterministic_keeps_cascade_score_for_identifier_match() {
        let titled = |pmid: &str, title: &str, score: f64| {
            ScoredCandidate::new(
                score,
                CandidateRecord {
                    title: Some(title.into()),
                    ..CandidateRecord::new(pmid)
                },
            )
        };
        let query = QueryKeywords {
            pmid: Some("9".into()),
            ..query()
        };
        let buckets = classify(vec![
            titled("9", "Unrelated Paper About Y", 0.1).with_match_type(Some(MatchType::PmidMatch)),
            titled("1", "Sample Study of X.", 0.8),
            titled("2", "Sample Study of Z", 0.7),
        ]);
        let result = reconcile(&query, buckets, &BatchScorer::deterministic()).await;

        let ids: Vec<&str> = result.iter().map(|c| c.identifier()).collect();
        assert_eq!(ids, vec!["1", "9"]);
        // Title agrees, PMID does not: 0.20 / 0.45.
        assert!((result[0].score() - 0.2 / 0.45).abs() < 1e-9);
        assert_eq!(result[1].score(), 0.1);
        assert_eq!(result[1].match_type(), Some(MatchType::PmidMatch));
    }

    #[tokio::test]
    async fn test_reconcile_low_confidence_falls_back_to_identifier_evidence() {
        let evaluator = Arc::new(ScriptedEvaluator::by_pmid(&[
            ("1", 0.2),
            ("2", 0.1),
            ("9", 0.05),
        ]));
        let buckets = classify(vec![scored("1", 0.6), scored("2", 0.7), id_matched("9", 0.1)]);
        let result = reconcile(&query(), buckets, &BatchScorer::new(evaluator)).await;
        let ids: Vec<&str> = result.iter().map(|c| c.identifier()).collect();
        assert_eq!(ids, vec!["9"]);
        assert_eq!(result[0].score(), 0.1);
    }

    #[tokio::test]
    async fn test_reconcile_low_confidence_without_identifiers_is_no_match() {
        let evaluator = Arc::new(ScriptedEvaluator::by_pmid(&[("1", 0.2), ("2", 0.1)]));
        let buckets = classify(vec![scored("1", 0.6), scored("2", 0.7)]);
        let result = reconcile(&query(), buckets, &BatchScorer::new(evaluator)).await;
        assert!(result.is_empty());
    }
}
