//! Top-level citation resolution.

use crate::cascade::{Cascade, CascadeOutcome, SeenIdentifiers};
use crate::catalog::Catalog;
use crate::classify::reconcile;
use crate::compare::find_differences;
use crate::config::ResolverConfig;
use crate::error::{ResolverError, Result};
use crate::scorer::{BatchScorer, SimilarityEvaluator};
use crate::types::{QueryKeywords, ResolvedCandidate, ScoredCandidate};
use std::sync::Arc;
use tracing::{info, info_span, instrument, Instrument};

/// Resolves structured citations against a catalog.
///
/// Holds no per-request state, so one resolver can serve concurrent calls.
///
/// # Example
///
/// ```no_run
/// # async fn example() -> refmatch::error::Result<()> {
/// use refmatch::{PubMedClient, QueryKeywords, Resolver};
/// use std::sync::Arc;
///
/// let resolver = Resolver::new(Arc::new(PubMedClient::from_env()?));
/// let query = QueryKeywords {
///     title: Some("Sample Study of X".into()),
///     year: Some(2020),
///     ..Default::default()
/// };
/// for candidate in resolver.resolve(&query).await? {
///     println!("{:.2} {}", candidate.score, candidate.record.url());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Resolver {
    catalog: Arc<dyn Catalog>,
    scorer: BatchScorer,
    config: ResolverConfig,
}

impl Resolver {
    /// Deterministic resolver with default settings.
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        let config = ResolverConfig::default();
        Self {
            catalog,
            scorer: BatchScorer::deterministic().with_timeout(config.evaluator_timeout),
            config,
        }
    }

    /// Use a semantic evaluator, falling back to field comparison on failure.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn SimilarityEvaluator>) -> Self {
        self.scorer = BatchScorer::new(evaluator).with_timeout(self.config.evaluator_timeout);
        self
    }

    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.scorer = self.scorer.with_timeout(config.evaluator_timeout);
        self.config = config;
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve one citation to zero or more ranked catalog records.
    ///
    /// Only an empty query or invalid settings are errors. An empty result is
    /// "no match"; several results mean a human has to choose.
    #[instrument(skip_all, fields(evaluator = self.scorer.evaluator_name()))]
    pub async fn resolve(&self, query: &QueryKeywords) -> Result<Vec<ResolvedCandidate>> {
        if query.is_empty() {
            return Err(ResolverError::EmptyQuery);
        }
        self.config.validate()?;

        let mut seen = SeenIdentifiers::new();
        let outcome = Cascade::new(self.catalog.as_ref(), &self.scorer, &self.config)
            .run(query, &mut seen)
            .await;

        let ranked = match outcome {
            CascadeOutcome::Resolved(best) => vec![best],
            CascadeOutcome::Exhausted(buckets) => {
                reconcile(query, buckets, &self.scorer)
                    .instrument(info_span!("strategy", strategy = "reconcile"))
                    .await
            }
        };

        info!(
            fetched = seen.len(),
            returned = ranked.len(),
            best = ranked.first().map(|c| c.score()),
            "Resolution finished"
        );
        Ok(ranked
            .into_iter()
            .map(|candidate| into_resolved(query, candidate))
            .collect())
    }
}

fn into_resolved(query: &QueryKeywords, candidate: ScoredCandidate) -> ResolvedCandidate {
    let score = candidate.score();
    let match_type = candidate.match_type();
    let rationale = candidate.rationale().map(str::to_string);
    let record = candidate.into_record();
    ResolvedCandidate {
        differences: find_differences(query, &record),
        record,
        score,
        match_type,
        rationale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{LogBuffer, MockCatalog, ScriptedEvaluator};
    use crate::scorer::{EvaluationPass, Judgement};
    use crate::types::{CandidateRecord, DifferenceKind, Field, MatchType};

    fn record(pmid: &str, title: &str, journal: &str, year: i32) -> CandidateRecord {
        CandidateRecord {
            title: Some(title.into()),
            journal: Some(journal.into()),
            year: Some(year),
            ..CandidateRecord::new(pmid)
        }
    }

    #[tokio::test]
    async fn test_empty_query_rejected_before_cascade() {
        let catalog = Arc::new(MockCatalog::new());
        let resolver = Resolver::new(catalog.clone());
        let blank = QueryKeywords {
            title: Some("  ".into()),
            ..Default::default()
        };
        assert!(matches!(
            resolver.resolve(&blank).await,
            Err(ResolverError::EmptyQuery)
        ));
        assert!(catalog.searches().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let resolver = Resolver::new(Arc::new(MockCatalog::new()))
            .with_config(ResolverConfig::default().with_max_results(0));
        let query = QueryKeywords {
            title: Some("Sample Study of X".into()),
            ..Default::default()
        };
        assert!(matches!(
            resolver.resolve(&query).await,
            Err(ResolverError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_journal_match_wins_end_to_end() {
        let query = QueryKeywords {
            title: Some("Sample Study of X".into()),
            journal: Some("Journal of Sample Research".into()),
            year: Some(2020),
            ..Default::default()
        };
        let catalog = Arc::new(
            MockCatalog::new()
                .on_search("[Title]", &["1", "2"])
                .with_record(record("1", "Sample Study of X.", "Annals of Other Things", 2020))
                .with_record(record("2", "Sample Study of X.", "Journal of Sample Research", 2020)),
        );

        let results = Resolver::new(catalog).resolve(&query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.pmid, "2");
        assert_eq!(results[0].score, 1.0);
        let differing: Vec<(Field, DifferenceKind)> = results[0]
            .differences
            .iter()
            .map(|d| (d.field, d.kind))
            .collect();
        assert_eq!(differing, vec![(Field::Pmid, DifferenceKind::Missing)]);
    }

    #[tokio::test]
    async fn test_semantic_final_pass_breaks_tie() {
        let query = QueryKeywords {
            title: Some("Sample Study of X".into()),
            year: Some(2021),
            ..Default::default()
        };
        // Both records survive the quick pass; the final pass decides.
        let catalog = Arc::new(
            MockCatalog::new()
                .on_search("[Title]", &["1", "2"])
                .with_record(record("1", "Sample Study of X.", "Journal B", 2020))
                .with_record(record("2", "Sample Study of X.", "Journal A", 2020)),
        );
        let evaluator = Arc::new(ScriptedEvaluator::by_pmid(&[("2", 0.8), ("1", 0.6)]));

        let results = Resolver::new(catalog)
            .with_evaluator(evaluator.clone())
            .resolve(&query)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.pmid, "2");
        assert_eq!(results[0].score, 0.8);
        assert_eq!(results[0].rationale.as_deref(), Some("scripted score for 2"));
        assert_eq!(evaluator.passes().last(), Some(&EvaluationPass::Final));
    }

    #[tokio::test]
    async fn test_identifier_match_with_conflicting_fields_is_surfaced() {
        let query = QueryKeywords {
            title: Some("Sample Study of X".into()),
            year: Some(2020),
            pmid: Some("999".into()),
            ..Default::default()
        };
        let catalog = Arc::new(
            MockCatalog::new()
                .with_record(record("999", "Totally Different Paper", "Other Journal", 1995)),
        );

        let results = Resolver::new(catalog).resolve(&query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.pmid, "999");
        assert_eq!(results[0].match_type, Some(MatchType::PmidMatch));
        assert!(results[0].score < 0.5);
        assert!(results[0]
            .differences
            .iter()
            .any(|d| d.field == Field::Title && d.kind == DifferenceKind::Different));
    }

    #[tokio::test]
    async fn test_no_match_returns_empty() {
        let query = QueryKeywords {
            title: Some("Sample Study of X".into()),
            ..Default::default()
        };
        let catalog = Arc::new(
            MockCatalog::new()
                .on_search("[Title]", &["1"])
                .with_record(record("1", "Quantum Effects in Films", "Physics", 1987)),
        );
        let results = Resolver::new(catalog).resolve(&query).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_final_pass_fallback_logged_as_reconcile() {
        let logs = LogBuffer::default();
        let _guard = logs.install();
        let query = QueryKeywords {
            title: Some("Sample Study of X".into()),
            year: Some(2021),
            ..Default::default()
        };
        let catalog = Arc::new(
            MockCatalog::new()
                .on_search("[Title]", &["1", "2"])
                .with_record(record("1", "Sample Study of X.", "Journal B", 2020))
                .with_record(record("2", "Sample Study of X.", "Journal A", 2020)),
        );
        // Quick pass answers, final pass fails and falls back.
        let judged = vec![
            Judgement { index: 0, score: 0.7, rationale: None },
            Judgement { index: 1, score: 0.6, rationale: None },
        ];
        let evaluator = Arc::new(ScriptedEvaluator::new(vec![Ok(judged)]));

        let results = Resolver::new(catalog)
            .with_evaluator(evaluator.clone())
            .resolve(&query)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(evaluator.passes(), vec![EvaluationPass::Quick, EvaluationPass::Final]);

        let line = logs
            .line_with("falling back to deterministic scoring")
            .expect("final pass fallback should be logged");
        assert!(line.contains("reconcile"), "{line}");
    }
}
