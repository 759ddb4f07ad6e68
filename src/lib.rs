//! # refmatch
//!
//! Resolve imprecise bibliographic citations against PubMed.
//!
//! Provides:
//! - **Resolver**: a cascade of progressively looser catalog queries with
//!   confidence bucketing and a final reconciliation pass
//! - **Library**: async PubMed E-utilities client and query builder
//! - **CLI**: `refmatch` binary for terminal use
//!
//! ## Quick Start
//!
//! ```no_run
//! # async fn example() -> refmatch::error::Result<()> {
//! use refmatch::{PubMedClient, QueryKeywords, Resolver};
//! use std::sync::Arc;
//!
//! // Client from NCBI_API_KEY / PUBMED_EMAIL (both optional)
//! let client = PubMedClient::from_env()?;
//! let resolver = Resolver::new(Arc::new(client));
//!
//! let query = QueryKeywords {
//!     title: Some("Sample Study of X".into()),
//!     authors: Some(vec!["Smith, John".into()]),
//!     year: Some(2020),
//!     ..Default::default()
//! };
//! match resolver.resolve(&query).await?.as_slice() {
//!     [] => println!("no match"),
//!     [best] => println!("{} ({:.2})", best.record.pmid, best.score),
//!     several => println!("{} candidates to review", several.len()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Query Builder
//!
//! ```
//! use refmatch::QueryBuilder;
//!
//! let query = QueryBuilder::new()
//!     .author("Smith, John", false)
//!     .journal("Nature Medicine", true)
//!     .year(2020)
//!     .build();
//! assert_eq!(
//!     query,
//!     "Smith[Author] AND \"Nature Medicine\"[Journal] AND 2020[Publication Date]"
//! );
//! ```

pub mod cascade;
pub mod catalog;
pub mod classify;
pub mod client;
pub mod compare;
pub mod config;
pub mod error;
pub mod llm;
pub mod parse;
pub mod query;
pub mod rate_limit;
pub mod resolver;
pub mod scorer;
pub mod search;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use catalog::Catalog;
pub use client::PubMedClient;
pub use config::ResolverConfig;
pub use error::ResolverError;
pub use llm::LlmEvaluator;
pub use query::QueryBuilder;
pub use resolver::Resolver;
pub use scorer::{BatchScorer, DeterministicEvaluator, EvaluationPass, Judgement, SimilarityEvaluator};
pub use types::*;
