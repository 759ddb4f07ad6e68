//! Semantic similarity evaluation through an OpenAI-compatible chat model.

use crate::error::{ResolverError, Result};
use crate::scorer::{EvaluationPass, Judgement, SimilarityEvaluator};
use crate::types::{CandidateRecord, Citation, QueryKeywords};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write as _;
use tracing::{debug, instrument};

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

const SYSTEM_PROMPT: &str = "You are an experienced biomedical reviewer who decides whether \
bibliographic records describe the same article. Answer with JSON only.";

const QUICK_RUBRIC: &str = "This is a quick screening pass. Judge each candidate on:
1. Identifiers: a matching DOI or PMID with otherwise similar fields means > 0.9; a matching identifier with unrelated fields suggests a typo and should stay below 0.5.
2. Title: semantic similarity, allowing abbreviations, synonyms and punctuation differences.
3. Authors: allow name format differences (\"Smith J\", \"Smith, J\", \"Smith John\"); the first author matters most.
4. Journal: allow abbreviations (\"Nature Med\" vs \"Nature Medicine\").
5. Year, volume, issue and pages are supporting evidence.";

const QUICK_RUBRIC_NO_IDENTIFIERS: &str = "This is a quick screening pass. The DOI and PMID were \
already checked in an earlier step: ignore them entirely and judge each candidate on the other fields.
1. Title: semantic similarity, allowing abbreviations, synonyms and punctuation differences. The title is the key signal.
2. Authors: allow name format differences (\"Smith J\", \"Smith, J\", \"Smith John\"); the first author matters most.
3. Journal: allow abbreviations (\"Nature Med\" vs \"Nature Medicine\").
4. Year, volume, issue and pages are supporting evidence.";

const FINAL_RUBRIC: &str = "This is the final decision between several plausible candidates. \
Compare all of them carefully and pick the one most likely to be the same article.
1. Identifiers: a matching DOI or PMID with similar fields means 1.0; a matching identifier with unrelated fields is probably a typo and must stay below 0.5.
2. Title: semantic similarity is the strongest descriptive signal.
3. Authors: the first author matters most, then overlap of the list.
4. Journal: allow abbreviations and full names.
5. Year, volume, issue and pages confirm the choice.
If none of the candidates is the same article, score every one below 0.3. Only give scores above 0.7 when title, authors and journal agree closely.";

const RESPONSE_FORMAT: &str = r#"Reply with a JSON object of this shape and nothing else:
{"results": [{"index": 1, "similarity": 0.92, "reason": "title, authors and journal match"}]}
"index" is the 1-based candidate number."#;

/// [`SimilarityEvaluator`] backed by a chat-completions endpoint.
#[derive(Clone)]
pub struct LlmEvaluator {
    http: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl LlmEvaluator {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("refmatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    /// Configure from `REFMATCH_LLM_API_KEY` (or `OPENAI_API_KEY`),
    /// `REFMATCH_LLM_BASE_URL` and `REFMATCH_LLM_MODEL`.
    ///
    /// A key is required unless a custom base URL points at a local server.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("REFMATCH_LLM_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());
        let base_url = std::env::var("REFMATCH_LLM_BASE_URL").ok();
        if api_key.is_none() && base_url.is_none() {
            return Err(ResolverError::Config(
                "semantic evaluation needs REFMATCH_LLM_API_KEY, OPENAI_API_KEY or REFMATCH_LLM_BASE_URL"
                    .to_string(),
            ));
        }
        let model =
            std::env::var("REFMATCH_LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string());
        Self::new(
            base_url.unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            model,
            api_key,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn complete(&self, prompt: String) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "temperature": 0.1,
            "response_format": {"type": "json_object"},
        });

        let mut request = self.http.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ResolverError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let completion: ChatCompletion = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ResolverError::Evaluator("completion had no content".to_string()))
    }
}

#[async_trait]
impl SimilarityEvaluator for LlmEvaluator {
    fn name(&self) -> &'static str {
        "llm"
    }

    #[instrument(skip_all, fields(model = %self.model, candidates = candidates.len(), pass = ?pass))]
    async fn evaluate(
        &self,
        original: &QueryKeywords,
        candidates: &[CandidateRecord],
        pass: EvaluationPass,
        exclude_identifiers: bool,
    ) -> Result<Vec<Judgement>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let prompt = build_prompt(original, candidates, pass, exclude_identifiers);
        let content = self.complete(prompt).await?;
        let judgements = parse_judgements(&content, candidates.len())?;
        debug!(judged = judgements.len(), "LLM evaluation complete");
        Ok(judgements)
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Render a citation as labelled lines for the prompt.
fn describe<C: Citation + ?Sized>(citation: &C, include_identifiers: bool) -> String {
    let mut out = String::new();
    if let Some(title) = citation.title() {
        let _ = writeln!(out, "Title: {}", title);
    }
    if let Some(authors) = citation.authors() {
        let _ = writeln!(out, "Authors: {}", authors.join("; "));
    }
    if let Some(journal) = citation.journal() {
        let _ = writeln!(out, "Journal: {}", journal);
    }
    if let Some(year) = citation.year() {
        let _ = writeln!(out, "Year: {}", year);
    }
    if let Some(volume) = citation.volume() {
        let _ = writeln!(out, "Volume: {}", volume);
    }
    if let Some(issue) = citation.issue() {
        let _ = writeln!(out, "Issue: {}", issue);
    }
    if let Some(pages) = citation.pages() {
        let _ = writeln!(out, "Pages: {}", pages);
    }
    if include_identifiers {
        if let Some(pmid) = citation.pmid() {
            let _ = writeln!(out, "PMID: {}", pmid);
        }
        if let Some(doi) = citation.doi() {
            let _ = writeln!(out, "DOI: {}", doi);
        }
    }
    if out.is_empty() {
        out.push_str("(no fields)\n");
    }
    out
}

/// Build the user prompt for one evaluation call.
pub(crate) fn build_prompt(
    original: &QueryKeywords,
    candidates: &[CandidateRecord],
    pass: EvaluationPass,
    exclude_identifiers: bool,
) -> String {
    let rubric = match pass {
        EvaluationPass::Final => FINAL_RUBRIC,
        EvaluationPass::Quick if exclude_identifiers => QUICK_RUBRIC_NO_IDENTIFIERS,
        EvaluationPass::Quick => QUICK_RUBRIC,
    };
    let include_identifiers = !exclude_identifiers;

    let mut prompt = String::new();
    let _ = writeln!(prompt, "{}\n", rubric);
    let _ = writeln!(
        prompt,
        "Original reference:\n{}",
        describe(original, include_identifiers)
    );
    prompt.push_str("Candidates:\n");
    for (i, candidate) in candidates.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "Candidate {}:\n{}",
            i + 1,
            describe(candidate, include_identifiers)
        );
    }
    prompt.push_str(RESPONSE_FORMAT);
    prompt
}

/// Parse the model's reply into zero-based judgements.
///
/// Accepts optional Markdown code fences, a `{"results": [...]}` object or a
/// bare array, `similarity` or `score` keys, and numeric strings. Entries
/// with an index outside `1..=candidate_count` are dropped.
pub(crate) fn parse_judgements(content: &str, candidate_count: usize) -> Result<Vec<Judgement>> {
    let text = strip_code_fence(content);
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ResolverError::Evaluator(format!("reply is not JSON: {}", e)))?;

    let entries = match &value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("results").or_else(|| map.get("candidates")) {
            Some(Value::Array(items)) => items.as_slice(),
            _ => {
                return Err(ResolverError::Evaluator(
                    "reply has no results array".to_string(),
                ))
            }
        },
        _ => {
            return Err(ResolverError::Evaluator(
                "reply is neither an object nor an array".to_string(),
            ))
        }
    };

    let judgements: Vec<Judgement> = entries
        .iter()
        .filter_map(|entry| {
            let index = as_number(entry.get("index")?)?;
            if index < 1.0 || index.fract() != 0.0 || index > candidate_count as f64 {
                return None;
            }
            let score = as_number(entry.get("similarity").or_else(|| entry.get("score"))?)?;
            let rationale = entry
                .get("reason")
                .or_else(|| entry.get("rationale"))
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(Judgement {
                index: index as usize - 1,
                score: score.clamp(0.0, 1.0),
                rationale,
            })
        })
        .collect();

    if judgements.is_empty() {
        return Err(ResolverError::Evaluator(
            "reply contained no usable judgements".to_string(),
        ));
    }
    Ok(judgements)
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.trim_end().trim_end_matches("```").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pmid: &str, title: &str) -> CandidateRecord {
        CandidateRecord {
            title: Some(title.into()),
            doi: Some(format!("10.1000/{}", pmid)),
            ..CandidateRecord::new(pmid)
        }
    }

    #[test]
    fn test_parse_results_object() {
        let reply = r#"{"results": [
            {"index": 1, "similarity": 0.95, "reason": "same article"},
            {"index": 2, "similarity": 0.2}
        ]}"#;
        let judgements = parse_judgements(reply, 2).unwrap();
        assert_eq!(judgements.len(), 2);
        assert_eq!(judgements[0].index, 0);
        assert_eq!(judgements[0].score, 0.95);
        assert_eq!(judgements[0].rationale.as_deref(), Some("same article"));
        assert_eq!(judgements[1].rationale, None);
    }

    #[test]
    fn test_parse_fenced_bare_array() {
        let reply = "```json\n[{\"index\": \"1\", \"score\": \"1.4\"}]\n```";
        let judgements = parse_judgements(reply, 1).unwrap();
        assert_eq!(judgements[0].index, 0);
        assert_eq!(judgements[0].score, 1.0);
    }

    #[test]
    fn test_parse_drops_out_of_range_indexes() {
        let reply = r#"{"results": [{"index": 0, "similarity": 0.9}, {"index": 3, "similarity": 0.8}, {"index": 2, "similarity": 0.7}]}"#;
        let judgements = parse_judgements(reply, 2).unwrap();
        assert_eq!(judgements.len(), 1);
        assert_eq!(judgements[0].index, 1);
    }

    #[test]
    fn test_parse_rejects_unusable_replies() {
        assert!(matches!(
            parse_judgements("I think candidate 1 matches.", 2),
            Err(ResolverError::Evaluator(_))
        ));
        assert!(parse_judgements(r#"{"results": []}"#, 2).is_err());
        assert!(parse_judgements(r#"{"answer": 1}"#, 2).is_err());
    }

    #[test]
    fn test_prompt_hides_identifiers_when_excluded() {
        let original = QueryKeywords {
            title: Some("Sample Study of X".into()),
            doi: Some("10.1000/original".into()),
            ..Default::default()
        };
        let candidates = vec![record("1", "Sample Study of X"), record("2", "Other")];

        let prompt = build_prompt(&original, &candidates, EvaluationPass::Quick, true);
        assert!(!prompt.contains("DOI: "));
        assert!(prompt.contains("Candidate 2:\nTitle: Other"));
        assert!(prompt.contains("ignore them entirely"));

        let prompt = build_prompt(&original, &candidates, EvaluationPass::Final, false);
        assert!(prompt.contains("DOI: 10.1000/original"));
        assert!(prompt.contains("final decision"));
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let evaluator = LlmEvaluator::new("http://localhost:11434/", "llama3", None).unwrap();
        assert_eq!(
            evaluator.endpoint(),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(evaluator.model(), "llama3");
    }
}
