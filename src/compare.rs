//! Field-by-field similarity between a query and a catalog record.
//!
//! The score is a weighted mean over the fields present on both sides, so a
//! sparse query is judged only on what it actually states. Identifiers are
//! exact-match; titles and journals use a normalized edit-distance ratio;
//! author lists blend first-author similarity with list overlap.

use crate::parse::{normalize_doi, normalize_pmid};
use crate::types::{Citation, DifferenceKind, Field, FieldDifference};

pub const DOI_WEIGHT: f64 = 0.30;
pub const PMID_WEIGHT: f64 = 0.25;
pub const TITLE_WEIGHT: f64 = 0.20;
pub const AUTHORS_WEIGHT: f64 = 0.15;
pub const JOURNAL_WEIGHT: f64 = 0.05;
pub const YEAR_WEIGHT: f64 = 0.03;
pub const VOLUME_WEIGHT: f64 = 0.01;
pub const ISSUE_WEIGHT: f64 = 0.01;
/// Pages are reported in differences but never scored.
pub const PAGES_WEIGHT: f64 = 0.0;

/// Two author names count as the same person above this similarity.
const AUTHOR_MATCH_THRESHOLD: f64 = 0.8;
/// Share of the shorter author list that must overlap for lists to "match".
const AUTHOR_LIST_AGREEMENT: f64 = 0.7;

/// Scoring weight of a field.
pub fn weight(field: Field) -> f64 {
    match field {
        Field::Doi => DOI_WEIGHT,
        Field::Pmid => PMID_WEIGHT,
        Field::Title => TITLE_WEIGHT,
        Field::Authors => AUTHORS_WEIGHT,
        Field::Journal => JOURNAL_WEIGHT,
        Field::Year => YEAR_WEIGHT,
        Field::Volume => VOLUME_WEIGHT,
        Field::Issue => ISSUE_WEIGHT,
        Field::Pages => PAGES_WEIGHT,
    }
}

/// Similarity of `candidate` to `original` in `[0, 1]`.
///
/// With `exclude_identifiers` the DOI and PMID are left out entirely, so a
/// record found through its identifier is judged on the remaining evidence.
/// Returns 0.0 when no field is comparable.
pub fn compare<O, C>(original: &O, candidate: &C, exclude_identifiers: bool) -> f64
where
    O: Citation + ?Sized,
    C: Citation + ?Sized,
{
    if !exclude_identifiers && !original.has_descriptive_fields() {
        if let (Some(a), Some(b)) = (original.doi(), candidate.doi()) {
            if normalize_doi(a) == normalize_doi(b) {
                return 1.0;
            }
        }
    }

    let mut total = 0.0;
    let mut total_weight = 0.0;

    for field in Field::ALL {
        let w = weight(field);
        if w == 0.0 || (exclude_identifiers && field.is_identifier()) {
            continue;
        }
        if let Some(similarity) = field_similarity(field, original, candidate) {
            total += similarity * w;
            total_weight += w;
        }
    }

    if total_weight == 0.0 {
        0.0
    } else {
        (total / total_weight).clamp(0.0, 1.0)
    }
}

/// Per-field similarity, or `None` when either side lacks the field.
fn field_similarity<O, C>(field: Field, original: &O, candidate: &C) -> Option<f64>
where
    O: Citation + ?Sized,
    C: Citation + ?Sized,
{
    let exact = |equal: bool| if equal { 1.0 } else { 0.0 };
    match field {
        Field::Title => Some(text_similarity(original.title()?, candidate.title()?)),
        Field::Journal => Some(text_similarity(original.journal()?, candidate.journal()?)),
        Field::Authors => Some(authors_similarity(original.authors()?, candidate.authors()?)),
        Field::Year => Some(exact(original.year()? == candidate.year()?)),
        Field::Volume => Some(exact(
            normalize_text(original.volume()?) == normalize_text(candidate.volume()?),
        )),
        Field::Issue => Some(exact(
            normalize_text(original.issue()?) == normalize_text(candidate.issue()?),
        )),
        Field::Pages => Some(exact(
            normalize_text(original.pages()?) == normalize_text(candidate.pages()?),
        )),
        Field::Pmid => Some(exact(
            normalize_pmid(original.pmid()?) == normalize_pmid(candidate.pmid()?),
        )),
        Field::Doi => Some(exact(
            normalize_doi(original.doi()?) == normalize_doi(candidate.doi()?),
        )),
    }
}

/// Case-fold, trim and collapse inner whitespace.
fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Edit-distance ratio of two strings after normalization.
///
/// A trailing period is ignored; catalog titles carry one, citations often
/// do not.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_text(a);
    let b = normalize_text(b);
    let a = a.trim_end_matches('.');
    let b = b.trim_end_matches('.');
    if a == b {
        return 1.0;
    }
    strsim::normalized_levenshtein(a, b)
}

fn normalize_author(name: &str) -> String {
    normalize_text(&name.replace([',', '.'], ""))
}

fn normalized_authors(authors: &[String]) -> Vec<String> {
    authors
        .iter()
        .map(|a| normalize_author(a))
        .filter(|a| !a.is_empty())
        .collect()
}

fn author_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        1.0
    } else {
        strsim::normalized_levenshtein(a, b)
    }
}

/// Author list similarity: half first-author similarity, half the share of
/// the shorter list found in the longer one.
pub fn authors_similarity(a: &[String], b: &[String]) -> f64 {
    let a = normalized_authors(a);
    let b = normalized_authors(b);
    let (Some(first_a), Some(first_b)) = (a.first(), b.first()) else {
        return 0.0;
    };

    let first = author_similarity(first_a, first_b);

    let (shorter, longer) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    let found = shorter
        .iter()
        .filter(|name| {
            longer
                .iter()
                .any(|other| author_similarity(name, other) > AUTHOR_MATCH_THRESHOLD)
        })
        .count();
    let overlap = found as f64 / shorter.len() as f64;

    0.5 * first + 0.5 * overlap
}

/// Whether two author lists name the same authors: equal first authors and
/// at least 70% of the shorter list shared.
fn authors_agree(a: &[String], b: &[String]) -> bool {
    let a = normalized_authors(a);
    let b = normalized_authors(b);
    if a.is_empty() || b.is_empty() || a[0] != b[0] {
        return false;
    }
    let common = a.iter().filter(|name| b.contains(name)).count();
    common as f64 >= a.len().min(b.len()) as f64 * AUTHOR_LIST_AGREEMENT
}

fn same_text(a: &str, b: &str) -> bool {
    normalize_text(a).trim_end_matches('.') == normalize_text(b).trim_end_matches('.')
}

fn display_value<C: Citation + ?Sized>(citation: &C, field: Field) -> Option<String> {
    match field {
        Field::Title => citation.title().map(str::to_string),
        Field::Authors => citation.authors().map(|a| a.join("; ")),
        Field::Journal => citation.journal().map(str::to_string),
        Field::Year => citation.year().map(|y| y.to_string()),
        Field::Volume => citation.volume().map(str::to_string),
        Field::Issue => citation.issue().map(str::to_string),
        Field::Pages => citation.pages().map(str::to_string),
        Field::Pmid => citation.pmid().map(normalize_pmid),
        Field::Doi => citation.doi().map(normalize_doi),
    }
}

/// Field-level disagreements between a query and a record, in field order.
pub fn find_differences<O, C>(original: &O, matched: &C) -> Vec<FieldDifference>
where
    O: Citation + ?Sized,
    C: Citation + ?Sized,
{
    let mut differences = Vec::new();

    for field in Field::ALL {
        let ours = display_value(original, field);
        let theirs = display_value(matched, field);
        let kind = match (&ours, &theirs) {
            (None, None) => continue,
            (None, Some(_)) => DifferenceKind::Missing,
            (Some(_), None) => DifferenceKind::Extra,
            (Some(a), Some(b)) => {
                let same = match field {
                    Field::Authors => match (original.authors(), matched.authors()) {
                        (Some(x), Some(y)) => authors_agree(x, y),
                        _ => false,
                    },
                    _ => same_text(a, b),
                };
                if same {
                    continue;
                }
                DifferenceKind::Different
            }
        };
        differences.push(FieldDifference {
            field,
            kind,
            original: ours,
            matched: theirs,
        });
    }

    differences
}
