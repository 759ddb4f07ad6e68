//! In-memory catalog and scripted evaluator for tests.

use crate::catalog::Catalog;
use crate::error::{ResolverError, Result};
use crate::scorer::{EvaluationPass, Judgement, SimilarityEvaluator};
use crate::types::{CandidateRecord, QueryKeywords};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Catalog answering searches from substring rules.
///
/// The first rule whose pattern occurs in the query decides the hits; with
/// no matching rule the search returns nothing.
#[derive(Default)]
pub(crate) struct MockCatalog {
    records: HashMap<String, CandidateRecord>,
    rules: Vec<(String, Vec<String>)>,
    failing_searches: Vec<String>,
    failing_fetches: Vec<String>,
    flaky_fetches: Mutex<Vec<String>>,
    search_delay: Option<Duration>,
    searches: Mutex<Vec<String>>,
    fetches: Mutex<Vec<String>>,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(mut self, record: CandidateRecord) -> Self {
        self.records.insert(record.pmid.clone(), record);
        self
    }

    /// Queries containing `pattern` return `ids`.
    pub fn on_search(mut self, pattern: &str, ids: &[&str]) -> Self {
        self.rules.push((
            pattern.to_string(),
            ids.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    /// Queries containing `pattern` fail with a server error.
    pub fn fail_search(mut self, pattern: &str) -> Self {
        self.failing_searches.push(pattern.to_string());
        self
    }

    pub fn fail_fetch(mut self, id: &str) -> Self {
        self.failing_fetches.push(id.to_string());
        self
    }

    /// The first fetch of `id` times out; later ones succeed.
    pub fn fail_fetch_once(self, id: &str) -> Self {
        self.flaky_fetches.lock().unwrap().push(id.to_string());
        self
    }

    pub fn with_search_delay(mut self, delay: Duration) -> Self {
        self.search_delay = Some(delay);
        self
    }

    pub fn searches(&self) -> Vec<String> {
        self.searches.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn fetch_count(&self, id: &str) -> usize {
        self.fetches.lock().unwrap().iter().filter(|f| *f == id).count()
    }
}

#[async_trait]
impl Catalog for MockCatalog {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>> {
        self.searches.lock().unwrap().push(query.to_string());
        if let Some(delay) = self.search_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_searches.iter().any(|p| query.contains(p.as_str())) {
            return Err(ResolverError::Api {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        Ok(self
            .rules
            .iter()
            .find(|(pattern, _)| query.contains(pattern.as_str()))
            .map(|(_, ids)| ids.iter().take(max_results).cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch(&self, id: &str) -> Result<Option<CandidateRecord>> {
        self.fetches.lock().unwrap().push(id.to_string());
        if self.failing_fetches.iter().any(|f| f == id) {
            return Err(ResolverError::Parse("truncated efetch body".to_string()));
        }
        {
            let mut flaky = self.flaky_fetches.lock().unwrap();
            if let Some(position) = flaky.iter().position(|f| f == id) {
                flaky.remove(position);
                return Err(ResolverError::Timeout {
                    operation: "catalog fetch",
                    after: Duration::from_secs(10),
                });
            }
        }
        Ok(self.records.get(id).cloned())
    }
}

enum Script {
    Queue(Mutex<VecDeque<Result<Vec<Judgement>>>>),
    ByPmid(HashMap<String, f64>),
}

/// Evaluator replaying canned answers.
pub(crate) struct ScriptedEvaluator {
    script: Script,
    delay: Option<Duration>,
    passes: Mutex<Vec<EvaluationPass>>,
}

impl ScriptedEvaluator {
    /// Replay `responses` in order; once exhausted every call fails.
    pub fn new(responses: Vec<Result<Vec<Judgement>>>) -> Self {
        Self {
            script: Script::Queue(Mutex::new(responses.into())),
            delay: None,
            passes: Mutex::new(Vec::new()),
        }
    }

    /// Score candidates by PMID; unlisted candidates are left unjudged.
    pub fn by_pmid(scores: &[(&str, f64)]) -> Self {
        Self {
            script: Script::ByPmid(scores.iter().map(|(id, s)| (id.to_string(), *s)).collect()),
            delay: None,
            passes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.passes.lock().unwrap().len()
    }

    pub fn passes(&self) -> Vec<EvaluationPass> {
        self.passes.lock().unwrap().clone()
    }
}

#[async_trait]
impl SimilarityEvaluator for ScriptedEvaluator {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn evaluate(
        &self,
        _original: &QueryKeywords,
        candidates: &[CandidateRecord],
        pass: EvaluationPass,
        _exclude_identifiers: bool,
    ) -> Result<Vec<Judgement>> {
        self.passes.lock().unwrap().push(pass);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.script {
            Script::Queue(queue) => queue.lock().unwrap().pop_front().unwrap_or_else(|| {
                Err(ResolverError::Evaluator("no scripted response left".to_string()))
            }),
            Script::ByPmid(scores) => Ok(candidates
                .iter()
                .enumerate()
                .filter_map(|(index, record)| {
                    scores.get(&record.pmid).map(|score| Judgement {
                        index,
                        score: *score,
                        rationale: Some(format!("scripted score for {}", record.pmid)),
                    })
                })
                .collect()),
        }
    }
}

/// Formatted log output captured for assertions.
#[derive(Clone, Default)]
pub(crate) struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    /// Route this thread's events into the buffer until the guard drops.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let buffer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || buffer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// First captured line containing `needle`.
    pub fn line_with(&self, needle: &str) -> Option<String> {
        self.contents()
            .lines()
            .find(|line| line.contains(needle))
            .map(str::to_string)
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
