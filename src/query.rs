//! PubMed query builder.
//!
//! Builds field-tagged E-utilities search terms. Every added term is joined
//! with `AND`.
//!
//! # Example
//!
//! ```
//! use refmatch::QueryBuilder;
//!
//! let query = QueryBuilder::new()
//!     .title_keywords("A Sample Study of X in Mice")
//!     .author("Smith, John", false)
//!     .year(2020)
//!     .build();
//! assert_eq!(
//!     query,
//!     "(Sample Study Mice)[Title] AND Smith[Author] AND 2020[Publication Date]"
//! );
//! ```

/// Words dropped when turning a title into search keywords.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "for", "of", "in", "on", "at", "to", "by", "with", "is",
    "are", "was", "were", "from",
];

/// Upper bound on title words sent to the catalog; longer terms get rejected.
const MAX_TITLE_WORDS: usize = 15;

/// Builder for PubMed search terms.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    parts: Vec<String>,
}

impl QueryBuilder {
    /// Create a new empty query builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Title keywords: `(w1 w2 ...)[Title]`, see [`title_keywords`].
    pub fn title_keywords(mut self, title: &str) -> Self {
        if let Some(words) = title_keywords(title) {
            self.parts.push(format!("({})[Title]", words));
        }
        self
    }

    /// Single author. Fuzzy mode sends only the surname part of "Last, First".
    pub fn author(mut self, name: &str, exact: bool) -> Self {
        let cleaned = clean_term(name);
        if cleaned.is_empty() {
            return self;
        }
        if exact {
            self.parts.push(format!("\"{}\"[Author]", cleaned));
        } else {
            let surname = cleaned.split(',').next().unwrap_or(&cleaned).trim();
            self.parts.push(format!("{}[Author]", surname));
        }
        self
    }

    /// Several authors in one clause; PubMed treats space-separated names as AND.
    pub fn authors(mut self, names: &[String], exact: bool) -> Self {
        let cleaned: Vec<String> = names
            .iter()
            .map(|n| clean_term(n))
            .filter(|n| !n.is_empty())
            .collect();
        if cleaned.is_empty() {
            return self;
        }
        let joined = cleaned.join(" ");
        if exact {
            self.parts.push(format!("\"{}\"[Author]", joined));
        } else {
            self.parts.push(format!("({})[Author]", joined));
        }
        self
    }

    /// Journal name, quoted when exact, as a keyword group otherwise.
    pub fn journal(mut self, name: &str, exact: bool) -> Self {
        let cleaned = clean_term(name);
        if cleaned.is_empty() {
            return self;
        }
        if exact {
            self.parts.push(format!("\"{}\"[Journal]", cleaned));
        } else if cleaned.split_whitespace().count() > 1 {
            self.parts.push(format!("({})[Journal]", cleaned));
        } else {
            self.parts.push(format!("{}[Journal]", cleaned));
        }
        self
    }

    /// Publication year.
    pub fn year(mut self, year: i32) -> Self {
        self.parts.push(format!("{}[Publication Date]", year));
        self
    }

    pub fn volume(mut self, volume: &str) -> Self {
        let cleaned = clean_term(volume);
        if !cleaned.is_empty() {
            self.parts.push(format!("{}[Volume]", cleaned));
        }
        self
    }

    pub fn issue(mut self, issue: &str) -> Self {
        let cleaned = clean_term(issue);
        if !cleaned.is_empty() {
            self.parts.push(format!("{}[Issue]", cleaned));
        }
        self
    }

    /// DOI lookup; the DOI is normalized first.
    pub fn doi(mut self, doi: &str) -> Self {
        let normalized = crate::parse::normalize_doi(doi);
        if !normalized.is_empty() {
            self.parts.push(format!("\"{}\"[DOI]", clean_term(&normalized)));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Build the final query string.
    pub fn build(self) -> String {
        self.parts.join(" AND ")
    }
}

impl std::fmt::Display for QueryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.parts.join(" AND "))
    }
}

/// Remove characters that would break out of a field-tagged term.
fn clean_term(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '"' | '[' | ']' | '(' | ')' => ' ',
            other => other,
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Turn a title into search keywords.
///
/// Drops a trailing period, stop words and words of two characters or
/// fewer, keeping at most fifteen words. When fewer than three keywords
/// survive, the first fifteen raw words are used instead.
pub fn title_keywords(title: &str) -> Option<String> {
    let cleaned = clean_term(title.trim().trim_end_matches('.'));
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }

    let keywords: Vec<&str> = words
        .iter()
        .copied()
        .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(&w.to_lowercase().as_str()))
        .collect();

    let chosen = if keywords.len() >= 3 { keywords } else { words };
    Some(
        chosen
            .into_iter()
            .take(MAX_TITLE_WORDS)
            .collect::<Vec<_>>()
            .join(" "),
    )
}
