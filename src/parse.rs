//! E-utilities response parsing and identifier normalization.

use crate::error::{ResolverError, Result};
use crate::types::{parse_year, CandidateRecord};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Deserialize;

/// esearch JSON response wrapper.
#[derive(Debug, Deserialize)]
pub(crate) struct EsearchResponse {
    pub esearchresult: EsearchResult,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EsearchResult {
    #[serde(default)]
    pub idlist: Vec<String>,
    #[serde(rename = "ERROR")]
    pub error: Option<String>,
}

/// Parse an esearch JSON response into PMIDs, in relevance order.
pub fn parse_esearch_response(json: &str) -> Result<Vec<String>> {
    let response: EsearchResponse = serde_json::from_str(json)
        .map_err(|e| ResolverError::Parse(format!("Invalid esearch JSON: {}", e)))?;

    if let Some(error) = response.esearchresult.error {
        return Err(ResolverError::Parse(format!("esearch error: {}", error)));
    }

    Ok(response
        .esearchresult
        .idlist
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect())
}

/// Strip resolver prefixes and case from a DOI.
pub fn normalize_doi(doi: &str) -> String {
    let mut result = doi.trim();
    let lower = result.to_ascii_lowercase();
    for prefix in [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi:",
    ] {
        if lower.starts_with(prefix) {
            result = &result[prefix.len()..];
            break;
        }
    }
    result.trim().to_lowercase()
}

/// Trim a PMID and drop a `PMID:` prefix.
pub fn normalize_pmid(pmid: &str) -> String {
    let trimmed = pmid.trim();
    let lower = trimmed.to_ascii_lowercase();
    let stripped = if lower.starts_with("pmid:") {
        &trimmed[5..]
    } else {
        trimmed
    };
    stripped.trim().to_string()
}

/// Element whose text the parser is currently collecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    Pmid,
    Title,
    Abstract,
    LastName,
    ForeName,
    CollectiveName,
    Journal,
    Year,
    MedlineDate,
    Volume,
    Issue,
    StartPage,
    EndPage,
    MedlinePgn,
    ArticleDoi,
    ElocationDoi,
}

/// Parse a PubMed efetch XML document into records.
///
/// Handles the `<PubmedArticleSet><PubmedArticle>` structure. Articles
/// without a PMID are skipped. Malformed XML is a parse error.
pub fn parse_efetch_response(xml: &str) -> Result<Vec<CandidateRecord>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut buf = Vec::new();

    let mut current: Option<ArticleBuilder> = None;
    let mut capture: Option<Capture> = None;
    let mut text = String::new();
    // Title/AbstractText contain inline markup (<i>, <sup>); track nesting.
    let mut depth_in_capture = 0usize;
    let mut in_author = false;
    let mut in_journal = false;
    let mut in_pub_date = false;
    let mut in_reference_list = false;
    let mut last = String::new();
    let mut fore = String::new();
    let mut collective = String::new();

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                if capture.is_some() {
                    depth_in_capture += 1;
                    continue;
                }
                let name = e.name();
                match name.as_ref() {
                    b"PubmedArticle" => current = Some(ArticleBuilder::default()),
                    b"ReferenceList" => in_reference_list = true,
                    _ if in_reference_list || current.is_none() => {}
                    b"Author" => {
                        in_author = true;
                        last.clear();
                        fore.clear();
                        collective.clear();
                    }
                    b"Journal" => in_journal = true,
                    b"PubDate" => in_pub_date = true,
                    other => {
                        capture = start_capture(other, e, in_author, in_journal, in_pub_date);
                        text.clear();
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                if capture.is_some() {
                    let chunk = e
                        .unescape()
                        .map_err(|err| ResolverError::Parse(format!("XML text error: {}", err)))?;
                    if !text.is_empty() && !text.ends_with(' ') {
                        text.push(' ');
                    }
                    text.push_str(chunk.trim());
                }
            }
            Ok(Event::End(ref e)) => {
                if capture.is_some() && depth_in_capture > 0 {
                    depth_in_capture -= 1;
                    continue;
                }
                let name = e.name();
                match name.as_ref() {
                    b"PubmedArticle" => {
                        if let Some(article) = current.take() {
                            if let Some(record) = article.build() {
                                records.push(record);
                            } else {
                                tracing::warn!("Skipping PubMed article without PMID");
                            }
                        }
                    }
                    b"ReferenceList" => in_reference_list = false,
                    b"Journal" => in_journal = false,
                    b"PubDate" => in_pub_date = false,
                    b"Author" if in_author => {
                        if let Some(article) = current.as_mut() {
                            let name = if !last.is_empty() {
                                if fore.is_empty() {
                                    last.clone()
                                } else {
                                    format!("{}, {}", last, fore)
                                }
                            } else {
                                collective.clone()
                            };
                            if !name.is_empty() {
                                article.authors.push(name);
                            }
                        }
                        in_author = false;
                    }
                    _ => {
                        if let (Some(field), Some(article)) = (capture.take(), current.as_mut()) {
                            let value = std::mem::take(&mut text);
                            match field {
                                Capture::LastName => last = value,
                                Capture::ForeName => fore = value,
                                Capture::CollectiveName => collective = value,
                                other => article.set(other, value),
                            }
                        }
                        capture = None;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ResolverError::Parse(format!(
                    "XML parse error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    Ok(records)
}

fn start_capture(
    name: &[u8],
    e: &BytesStart<'_>,
    in_author: bool,
    in_journal: bool,
    in_pub_date: bool,
) -> Option<Capture> {
    match name {
        b"PMID" => Some(Capture::Pmid),
        b"ArticleTitle" => Some(Capture::Title),
        b"AbstractText" => Some(Capture::Abstract),
        b"LastName" if in_author => Some(Capture::LastName),
        b"ForeName" if in_author => Some(Capture::ForeName),
        b"CollectiveName" => Some(Capture::CollectiveName),
        b"Title" if in_journal => Some(Capture::Journal),
        b"Year" if in_pub_date => Some(Capture::Year),
        b"MedlineDate" if in_pub_date => Some(Capture::MedlineDate),
        b"Volume" if in_journal => Some(Capture::Volume),
        b"Issue" if in_journal => Some(Capture::Issue),
        b"StartPage" => Some(Capture::StartPage),
        b"EndPage" => Some(Capture::EndPage),
        b"MedlinePgn" => Some(Capture::MedlinePgn),
        b"ArticleId" if attribute_is(e, b"IdType", "doi") => Some(Capture::ArticleDoi),
        b"ELocationID" if attribute_is(e, b"EIdType", "doi") => Some(Capture::ElocationDoi),
        _ => None,
    }
}

fn attribute_is(e: &BytesStart<'_>, key: &[u8], expected: &str) -> bool {
    e.try_get_attribute(key)
        .ok()
        .flatten()
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.eq_ignore_ascii_case(expected)))
        .unwrap_or(false)
}

/// Field accumulator for one `<PubmedArticle>`.
#[derive(Debug, Default)]
struct ArticleBuilder {
    pmid: Option<String>,
    title: Option<String>,
    abstract_parts: Vec<String>,
    authors: Vec<String>,
    journal: Option<String>,
    year: Option<i32>,
    medline_year: Option<i32>,
    volume: Option<String>,
    issue: Option<String>,
    start_page: Option<String>,
    end_page: Option<String>,
    medline_pages: Option<String>,
    article_doi: Option<String>,
    elocation_doi: Option<String>,
}

impl ArticleBuilder {
    fn set(&mut self, field: Capture, value: String) {
        if value.is_empty() {
            return;
        }
        match field {
            // The first PMID is the article's own; later ones belong to comments/corrections.
            Capture::Pmid if self.pmid.is_none() => self.pmid = Some(value),
            Capture::Title if self.title.is_none() => self.title = Some(value),
            Capture::Abstract => self.abstract_parts.push(value),
            Capture::Journal if self.journal.is_none() => self.journal = Some(value),
            Capture::Year if self.year.is_none() => self.year = parse_year(&value),
            Capture::MedlineDate if self.medline_year.is_none() => {
                self.medline_year = parse_year(&value)
            }
            Capture::Volume if self.volume.is_none() => self.volume = Some(value),
            Capture::Issue if self.issue.is_none() => self.issue = Some(value),
            Capture::StartPage if self.start_page.is_none() => self.start_page = Some(value),
            Capture::EndPage if self.end_page.is_none() => self.end_page = Some(value),
            Capture::MedlinePgn if self.medline_pages.is_none() => {
                self.medline_pages = Some(value)
            }
            Capture::ArticleDoi if self.article_doi.is_none() => self.article_doi = Some(value),
            Capture::ElocationDoi if self.elocation_doi.is_none() => {
                self.elocation_doi = Some(value)
            }
            _ => {}
        }
    }

    fn build(self) -> Option<CandidateRecord> {
        let pmid = self.pmid?;
        let pages = match (self.start_page, self.end_page) {
            (Some(start), Some(end)) => Some(format!("{}-{}", start, end)),
            (Some(start), None) => Some(start),
            _ => self.medline_pages,
        };
        let abstract_text = if self.abstract_parts.is_empty() {
            None
        } else {
            Some(self.abstract_parts.join(" "))
        };

        Some(CandidateRecord {
            pmid,
            title: self.title,
            authors: self.authors,
            journal: self.journal,
            year: self.year.or(self.medline_year),
            volume: self.volume,
            issue: self.issue,
            pages,
            doi: self.article_doi.or(self.elocation_doi),
            abstract_text,
        })
    }
}
