//! Public types for the resolver.
//!
//! [`QueryKeywords`] is what the caller knows about a citation,
//! [`CandidateRecord`] is what the catalog knows about an article. Scoring
//! never mutates either: annotations travel in [`ScoredCandidate`] inside the
//! engine and in [`ResolvedCandidate`] on the way out.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// The nine comparable citation fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Title,
    Authors,
    Journal,
    Year,
    Volume,
    Issue,
    Pages,
    Pmid,
    Doi,
}

impl Field {
    /// All fields in display order.
    pub const ALL: [Field; 9] = [
        Field::Title,
        Field::Authors,
        Field::Journal,
        Field::Year,
        Field::Volume,
        Field::Issue,
        Field::Pages,
        Field::Pmid,
        Field::Doi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Authors => "authors",
            Self::Journal => "journal",
            Self::Year => "year",
            Self::Volume => "volume",
            Self::Issue => "issue",
            Self::Pages => "pages",
            Self::Pmid => "pmid",
            Self::Doi => "doi",
        }
    }

    pub fn is_identifier(&self) -> bool {
        matches!(self, Self::Pmid | Self::Doi)
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read access to the citation fields shared by queries and catalog records.
///
/// Text accessors return `None` for blank values, so "present" always means
/// "present and non-blank".
pub trait Citation {
    fn title(&self) -> Option<&str>;
    fn authors(&self) -> Option<&[String]>;
    fn journal(&self) -> Option<&str>;
    fn year(&self) -> Option<i32>;
    fn volume(&self) -> Option<&str>;
    fn issue(&self) -> Option<&str>;
    fn pages(&self) -> Option<&str>;
    fn pmid(&self) -> Option<&str>;
    fn doi(&self) -> Option<&str>;

    /// Whether `field` is present.
    fn has(&self, field: Field) -> bool {
        match field {
            Field::Title => self.title().is_some(),
            Field::Authors => self.authors().is_some(),
            Field::Journal => self.journal().is_some(),
            Field::Year => self.year().is_some(),
            Field::Volume => self.volume().is_some(),
            Field::Issue => self.issue().is_some(),
            Field::Pages => self.pages().is_some(),
            Field::Pmid => self.pmid().is_some(),
            Field::Doi => self.doi().is_some(),
        }
    }

    /// First listed author, if any.
    fn first_author(&self) -> Option<&str> {
        self.authors()
            .and_then(|a| a.first())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    /// Whether any of title, authors or journal is present.
    fn has_descriptive_fields(&self) -> bool {
        self.title().is_some() || self.authors().is_some() || self.journal().is_some()
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

fn non_empty_authors(authors: &[String]) -> Option<&[String]> {
    if authors.iter().any(|a| !a.trim().is_empty()) {
        Some(authors)
    } else {
        None
    }
}

/// Structured keywords extracted from a free-text citation.
///
/// No field is required. `None` means the extractor found nothing; a blank
/// string is kept as given but treated as absent when comparing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryKeywords {
    pub title: Option<String>,
    pub authors: Option<Vec<String>>,
    pub journal: Option<String>,
    #[serde(deserialize_with = "deserialize_lenient_year")]
    pub year: Option<i32>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub pages: Option<String>,
    pub pmid: Option<String>,
    pub doi: Option<String>,
}

impl QueryKeywords {
    /// Whether no field carries a usable value.
    pub fn is_empty(&self) -> bool {
        !Field::ALL.iter().any(|f| self.has(*f))
    }

    /// Whether the query carries DOI or PMID but no title, authors or journal.
    pub fn is_identifier_only(&self) -> bool {
        (self.pmid().is_some() || self.doi().is_some()) && !self.has_descriptive_fields()
    }
}

impl Citation for QueryKeywords {
    fn title(&self) -> Option<&str> {
        non_blank(&self.title)
    }
    fn authors(&self) -> Option<&[String]> {
        self.authors.as_deref().and_then(non_empty_authors)
    }
    fn journal(&self) -> Option<&str> {
        non_blank(&self.journal)
    }
    fn year(&self) -> Option<i32> {
        self.year
    }
    fn volume(&self) -> Option<&str> {
        non_blank(&self.volume)
    }
    fn issue(&self) -> Option<&str> {
        non_blank(&self.issue)
    }
    fn pages(&self) -> Option<&str> {
        non_blank(&self.pages)
    }
    fn pmid(&self) -> Option<&str> {
        non_blank(&self.pmid)
    }
    fn doi(&self) -> Option<&str> {
        non_blank(&self.doi)
    }
}

/// Deserialize a year given as an integer, a numeric string, or garbage.
///
/// Anything that is not a plausible integer year becomes `None` instead of
/// failing the whole request.
fn deserialize_lenient_year<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct YearVisitor;

    impl<'de> Visitor<'de> for YearVisitor {
        type Value = Option<i32>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a year as integer or string")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            deserializer.deserialize_any(YearVisitor)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(i32::try_from(v).ok())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(i32::try_from(v).ok())
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            if v.is_finite() && v.fract() == 0.0 && v.abs() < i32::MAX as f64 {
                Ok(Some(v as i32))
            } else {
                Ok(None)
            }
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(parse_year(v))
        }

        fn visit_bool<E: de::Error>(self, _v: bool) -> Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_option(YearVisitor)
}

/// Parse a leading four-digit year out of strings like "2020" or "2020 Mar 5".
pub fn parse_year(text: &str) -> Option<i32> {
    let trimmed = text.trim();
    if let Ok(y) = trimmed.parse::<i32>() {
        return Some(y);
    }
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() == 4 {
        digits.parse().ok()
    } else {
        None
    }
}

/// A full article record as returned by the catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Catalog identifier (PubMed ID).
    pub pmid: String,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub journal: Option<String>,
    pub year: Option<i32>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub pages: Option<String>,
    pub doi: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
}

impl CandidateRecord {
    /// Create an otherwise empty record with the given catalog identifier.
    pub fn new(pmid: impl Into<String>) -> Self {
        Self {
            pmid: pmid.into(),
            ..Default::default()
        }
    }

    /// PubMed landing page.
    pub fn url(&self) -> String {
        format!("https://pubmed.ncbi.nlm.nih.gov/{}/", self.pmid)
    }
}

impl Citation for CandidateRecord {
    fn title(&self) -> Option<&str> {
        non_blank(&self.title)
    }
    fn authors(&self) -> Option<&[String]> {
        non_empty_authors(&self.authors)
    }
    fn journal(&self) -> Option<&str> {
        non_blank(&self.journal)
    }
    fn year(&self) -> Option<i32> {
        self.year
    }
    fn volume(&self) -> Option<&str> {
        non_blank(&self.volume)
    }
    fn issue(&self) -> Option<&str> {
        non_blank(&self.issue)
    }
    fn pages(&self) -> Option<&str> {
        non_blank(&self.pages)
    }
    fn pmid(&self) -> Option<&str> {
        Some(self.pmid.as_str()).filter(|s| !s.trim().is_empty())
    }
    fn doi(&self) -> Option<&str> {
        non_blank(&self.doi)
    }
}

/// How a record was tied to the query by an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    DoiMatch,
    PmidMatch,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DoiMatch => "doi_match",
            Self::PmidMatch => "pmid_match",
        }
    }
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record paired with its similarity score.
///
/// Values are immutable: the `with_*` helpers return a new candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    score: f64,
    record: CandidateRecord,
    match_type: Option<MatchType>,
    rationale: Option<String>,
}

impl ScoredCandidate {
    /// Pair a record with a score. The score is clamped to `[0, 1]`; NaN becomes 0.
    pub fn new(score: f64, record: CandidateRecord) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        Self {
            score,
            record,
            match_type: None,
            rationale: None,
        }
    }

    pub fn with_match_type(mut self, match_type: Option<MatchType>) -> Self {
        self.match_type = match_type;
        self
    }

    pub fn with_rationale(mut self, rationale: Option<String>) -> Self {
        self.rationale = rationale.filter(|r| !r.trim().is_empty());
        self
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn record(&self) -> &CandidateRecord {
        &self.record
    }

    pub fn identifier(&self) -> &str {
        &self.record.pmid
    }

    pub fn match_type(&self) -> Option<MatchType> {
        self.match_type
    }

    pub fn rationale(&self) -> Option<&str> {
        self.rationale.as_deref()
    }

    pub fn is_identifier_matched(&self) -> bool {
        self.match_type.is_some()
    }

    pub fn into_record(self) -> CandidateRecord {
        self.record
    }

    /// Ranking order: score descending, then identifier ascending.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.record.pmid.cmp(&other.record.pmid))
    }
}

/// Sort candidates into ranking order.
pub fn sort_ranked(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| a.rank_cmp(b));
}

/// Confidence classification of a scored candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    High,
    Candidate,
    IdentifierMatchedLow,
    Discarded,
}

/// Kind of disagreement between the query and a catalog record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceKind {
    /// The catalog has a value the query lacks.
    Missing,
    /// The query has a value the catalog lacks.
    Extra,
    /// Both have a value and they disagree.
    Different,
}

/// One field-level disagreement, for human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDifference {
    pub field: Field,
    pub kind: DifferenceKind,
    pub original: Option<String>,
    pub matched: Option<String>,
}

/// A catalog record returned to callers, with its annotations kept apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedCandidate {
    pub record: CandidateRecord,
    pub score: f64,
    pub match_type: Option<MatchType>,
    pub rationale: Option<String>,
    pub differences: Vec<FieldDifference>,
}
