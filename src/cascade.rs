//! The catalog query cascade.
//!
//! Strategies are plain data: an ordered table of [`Strategy`] values, each
//! naming the query terms it needs. [`Cascade::run`] walks the table in
//! order, skipping strategies whose fields the query lacks, and stops at the
//! first batch that yields a high-confidence record.
//!
//! Strategies run one after another. Whether a looser query is worth its
//! quota depends on what the stricter ones found.

use crate::catalog::Catalog;
use crate::classify::{classify, Buckets};
use crate::config::ResolverConfig;
use crate::error::{ResolverError, Result};
use crate::parse::normalize_pmid;
use crate::query::QueryBuilder;
use crate::scorer::{BatchScorer, EvaluationPass};
use crate::types::{CandidateRecord, Citation, Field, MatchType, QueryKeywords, ScoredCandidate};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

/// One fuzzy search term derived from the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Term {
    /// Title keywords.
    Title,
    /// Surname of the first listed author.
    FirstAuthor,
    /// Every listed author.
    Authors,
    Journal,
    Year,
    Volume,
    Issue,
}

impl Term {
    /// Query field this term reads.
    pub fn field(&self) -> Field {
        match self {
            Self::Title => Field::Title,
            Self::FirstAuthor | Self::Authors => Field::Authors,
            Self::Journal => Field::Journal,
            Self::Year => Field::Year,
            Self::Volume => Field::Volume,
            Self::Issue => Field::Issue,
        }
    }

    fn apply(&self, builder: QueryBuilder, query: &QueryKeywords) -> QueryBuilder {
        match self {
            Self::Title => match query.title() {
                Some(title) => builder.title_keywords(title),
                None => builder,
            },
            Self::FirstAuthor => match query.first_author() {
                Some(author) => builder.author(author, false),
                None => builder,
            },
            Self::Authors => match query.authors() {
                Some(authors) => builder.authors(authors, false),
                None => builder,
            },
            Self::Journal => match query.journal() {
                Some(journal) => builder.journal(journal, false),
                None => builder,
            },
            Self::Year => match query.year() {
                Some(year) => builder.year(year),
                None => builder,
            },
            Self::Volume => match query.volume() {
                Some(volume) => builder.volume(volume),
                None => builder,
            },
            Self::Issue => match query.issue() {
                Some(issue) => builder.issue(issue),
                None => builder,
            },
        }
    }
}

/// How a strategy finds records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Fetch the record named by the query's PMID.
    Pmid,
    /// Search for the query's DOI.
    Doi,
    /// Search with the conjunction of these terms.
    Fields(&'static [Term]),
}

/// A named query-and-fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    pub name: &'static str,
    pub lookup: Lookup,
    /// Only run when the query has no title.
    pub without_title: bool,
}

impl Strategy {
    const fn fields(name: &'static str, terms: &'static [Term]) -> Self {
        Self {
            name,
            lookup: Lookup::Fields(terms),
            without_title: false,
        }
    }

    const fn untitled(name: &'static str, terms: &'static [Term]) -> Self {
        Self {
            name,
            lookup: Lookup::Fields(terms),
            without_title: true,
        }
    }

    /// Whether every field this strategy needs is present in `query`.
    pub fn applies(&self, query: &QueryKeywords) -> bool {
        if self.without_title && query.title().is_some() {
            return false;
        }
        match self.lookup {
            Lookup::Pmid => query.pmid().is_some(),
            Lookup::Doi => query.doi().is_some(),
            Lookup::Fields(terms) => terms.iter().all(|t| query.has(t.field())),
        }
    }

    /// Match tag carried by records this strategy finds.
    pub fn match_type(&self) -> Option<MatchType> {
        match self.lookup {
            Lookup::Pmid => Some(MatchType::PmidMatch),
            Lookup::Doi => Some(MatchType::DoiMatch),
            Lookup::Fields(_) => None,
        }
    }

    pub fn is_identifier(&self) -> bool {
        self.match_type().is_some()
    }

    /// Catalog search expression, if this strategy searches.
    pub fn query(&self, query: &QueryKeywords) -> Option<String> {
        let builder = match self.lookup {
            Lookup::Pmid => return None,
            Lookup::Doi => QueryBuilder::new().doi(query.doi()?),
            Lookup::Fields(terms) => terms
                .iter()
                .fold(QueryBuilder::new(), |b, term| term.apply(b, query)),
        };
        if builder.is_empty() {
            None
        } else {
            Some(builder.build())
        }
    }
}

use Term::{Authors, FirstAuthor, Issue, Journal, Title, Volume, Year};

/// Default strategy order: identifiers, then field combinations from most to
/// least selective.
pub const STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "pmid",
        lookup: Lookup::Pmid,
        without_title: false,
    },
    Strategy {
        name: "doi",
        lookup: Lookup::Doi,
        without_title: false,
    },
    Strategy::fields("title+author+journal+year", &[Title, FirstAuthor, Journal, Year]),
    Strategy::fields("title+journal+year", &[Title, Journal, Year]),
    Strategy::fields("title+author", &[Title, FirstAuthor]),
    Strategy::fields("title", &[Title]),
    Strategy::untitled(
        "author+journal+year+volume+issue",
        &[Authors, Journal, Year, Volume, Issue],
    ),
    Strategy::untitled("author+journal+year+volume", &[Authors, Journal, Year, Volume]),
    Strategy::untitled("author+journal+year", &[Authors, Journal, Year]),
    Strategy::untitled("author+journal", &[Authors, Journal]),
    Strategy::untitled("author+year", &[Authors, Year]),
    Strategy::untitled("journal+year", &[Journal, Year]),
    Strategy::untitled("author", &[Authors]),
    Strategy::untitled("journal", &[Journal]),
];

/// Identifiers already fetched during one resolution.
#[derive(Debug, Default)]
pub struct SeenIdentifiers(HashSet<String>);

impl SeenIdentifiers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id`; false when it was already seen.
    pub fn insert(&mut self, id: &str) -> bool {
        self.0.insert(id.to_string())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result of a cascade run.
#[derive(Debug)]
pub enum CascadeOutcome {
    /// A strategy produced a high-confidence record.
    Resolved(ScoredCandidate),
    /// Every strategy ran without a high-confidence hit.
    Exhausted(Buckets),
}

/// Runs [`STRATEGIES`] (or a custom table) against a catalog.
pub struct Cascade<'a> {
    catalog: &'a dyn Catalog,
    scorer: &'a BatchScorer,
    config: &'a ResolverConfig,
    strategies: &'a [Strategy],
}

impl<'a> Cascade<'a> {
    pub fn new(catalog: &'a dyn Catalog, scorer: &'a BatchScorer, config: &'a ResolverConfig) -> Self {
        Self {
            catalog,
            scorer,
            config,
            strategies: STRATEGIES,
        }
    }

    pub fn with_strategies(mut self, strategies: &'a [Strategy]) -> Self {
        self.strategies = strategies;
        self
    }

    /// Walk the strategy table for `original`.
    ///
    /// Lookup and fetch failures are logged and count as an empty strategy;
    /// this never fails.
    pub async fn run(&self, original: &QueryKeywords, seen: &mut SeenIdentifiers) -> CascadeOutcome {
        let identifier_only = original.is_identifier_only();
        let mut identifiers_tried = false;
        let mut buckets = Buckets::new();

        for strategy in self.strategies {
            if !strategy.applies(original) {
                debug!(strategy = strategy.name, "Skipping strategy, fields missing");
                continue;
            }

            let span = info_span!("strategy", strategy = strategy.name);
            let records = match self
                .lookup(strategy, original, seen)
                .instrument(span.clone())
                .await
            {
                Ok(records) => records,
                Err(error) => {
                    warn!(
                        strategy = strategy.name,
                        %error,
                        transient = error.is_transient(),
                        "Strategy failed, continuing with the next one"
                    );
                    Vec::new()
                }
            };

            // Identifier hits are judged on the other fields unless the
            // identifier is all the query has; field strategies ignore
            // identifiers once an identifier strategy has run.
            let exclude_identifiers = if strategy.is_identifier() {
                !identifier_only
            } else {
                identifiers_tried
            };
            if strategy.is_identifier() {
                identifiers_tried = true;
            }

            if records.is_empty() {
                debug!(strategy = strategy.name, "No new records");
                continue;
            }

            let fetched = records.len();
            let match_type = strategy.match_type();
            let scored: Vec<ScoredCandidate> = self
                .scorer
                .score_batch(original, records, EvaluationPass::Quick, exclude_identifiers)
                .instrument(span)
                .await
                .into_iter()
                .map(|c| c.with_match_type(match_type))
                .collect();

            let batch = classify(scored);
            if let Some(best) = batch.best_high() {
                info!(
                    strategy = strategy.name,
                    pmid = best.identifier(),
                    score = best.score(),
                    "High-confidence match"
                );
                return CascadeOutcome::Resolved(best.clone());
            }

            debug!(
                strategy = strategy.name,
                fetched,
                candidates = batch.candidates.len(),
                identifier_matched_low = batch.identifier_matched_low.len(),
                discarded = batch.discarded.len(),
                "Strategy complete"
            );
            buckets.absorb(batch);
        }

        CascadeOutcome::Exhausted(buckets)
    }

    async fn lookup(
        &self,
        strategy: &Strategy,
        original: &QueryKeywords,
        seen: &mut SeenIdentifiers,
    ) -> Result<Vec<CandidateRecord>> {
        let ids = match strategy.lookup {
            Lookup::Pmid => match original.pmid() {
                Some(pmid) => vec![normalize_pmid(pmid)],
                None => return Ok(Vec::new()),
            },
            Lookup::Doi | Lookup::Fields(_) => {
                let Some(query) = strategy.query(original) else {
                    return Ok(Vec::new());
                };
                let max_results = if strategy.is_identifier() {
                    1
                } else {
                    self.config.max_results
                };
                debug!(strategy = strategy.name, %query, "Searching catalog");
                with_deadline(
                    "catalog search",
                    self.config.catalog_timeout,
                    self.catalog.search(&query, max_results),
                )
                .await?
            }
        };

        let mut records = Vec::new();
        for id in ids {
            if id.is_empty() || seen.contains(&id) {
                continue;
            }
            let fetched = with_deadline(
                "catalog fetch",
                self.config.catalog_timeout,
                self.catalog.fetch(&id),
            )
            .await;
            // Only answered fetches are marked seen; a failed one may be
            // retried by a later strategy.
            match fetched {
                Ok(Some(record)) => {
                    seen.insert(&id);
                    records.push(record);
                }
                Ok(None) => {
                    seen.insert(&id);
                    debug!(strategy = strategy.name, pmid = %id, "Record not in catalog");
                }
                Err(error) => warn!(
                    strategy = strategy.name,
                    pmid = %id,
                    %error,
                    transient = error.is_transient(),
                    "Fetch failed, skipping record"
                ),
            }
        }
        Ok(records)
    }
}

async fn with_deadline<T>(
    operation: &'static str,
    after: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(after, call)
        .await
        .map_err(|_| ResolverError::Timeout { operation, after })?
}
