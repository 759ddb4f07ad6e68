//! E-utilities search and fetch endpoints.

use crate::client::PubMedClient;
use crate::error::Result;
use crate::parse::{normalize_pmid, parse_efetch_response, parse_esearch_response};
use crate::types::CandidateRecord;
use tracing::{debug, instrument};

impl PubMedClient {
    /// Search PubMed, returning PMIDs in relevance order.
    ///
    /// `term` uses PubMed field tags; see [`crate::QueryBuilder`].
    #[instrument(skip(self), fields(retmax))]
    pub async fn esearch(&self, term: &str, retmax: usize) -> Result<Vec<String>> {
        let retmax_str = retmax.to_string();
        let params = [
            ("db", "pubmed"),
            ("term", term),
            ("retmode", "json"),
            ("retmax", retmax_str.as_str()),
            ("sort", "relevance"),
        ];

        let body = self.get("esearch.fcgi", &params).await?;
        let ids = parse_esearch_response(&body)?;
        debug!(hits = ids.len(), "esearch complete");
        Ok(ids)
    }

    /// Fetch the full record for one PMID. `None` when PubMed has no such article.
    #[instrument(skip(self))]
    pub async fn efetch(&self, pmid: &str) -> Result<Option<CandidateRecord>> {
        let pmid = normalize_pmid(pmid);
        if pmid.is_empty() {
            return Ok(None);
        }
        let params = [("db", "pubmed"), ("id", pmid.as_str()), ("retmode", "xml")];

        let body = self.get("efetch.fcgi", &params).await?;
        let mut records = parse_efetch_response(&body)?;
        let position = records.iter().position(|r| r.pmid == pmid);
        Ok(match position {
            Some(i) => Some(records.swap_remove(i)),
            None => records.into_iter().next(),
        })
    }
}
