//! The external catalog the resolver queries.

use crate::client::PubMedClient;
use crate::error::Result;
use crate::types::CandidateRecord;
use async_trait::async_trait;

/// Search-and-fetch interface of a bibliographic catalog.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Run a field-tagged query, returning identifiers in the catalog's
    /// relevance order.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>>;

    /// Fetch the full record for an identifier.
    async fn fetch(&self, id: &str) -> Result<Option<CandidateRecord>>;
}

#[async_trait]
impl Catalog for PubMedClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>> {
        self.esearch(query, max_results).await
    }

    async fn fetch(&self, id: &str) -> Result<Option<CandidateRecord>> {
        self.efetch(id).await
    }
}
