//! HTTP client for NCBI E-utilities (PubMed).

use crate::error::{ResolverError, Result};
use crate::rate_limit::RateLimiter;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Default E-utilities endpoint root.
pub const DEFAULT_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/";

const USER_AGENT: &str = concat!("refmatch/", env!("CARGO_PKG_VERSION"));
/// Tool name NCBI asks integrators to send with each request.
const TOOL: &str = "refmatch";

/// Async client for the PubMed E-utilities API.
///
/// Cheap to clone; clones share the HTTP connection pool and rate limiter.
///
/// # Example
///
/// ```no_run
/// # async fn example() -> refmatch::error::Result<()> {
/// use refmatch::PubMedClient;
///
/// let client = PubMedClient::from_env()?;
/// let pmids = client.esearch("\"sample study\"[Title]", 20).await?;
/// for pmid in &pmids {
///     if let Some(record) = client.efetch(pmid).await? {
///         println!("{} {:?}", record.pmid, record.title);
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PubMedClient {
    pub(crate) http: Client,
    pub(crate) base_url: Url,
    pub(crate) api_key: Option<String>,
    pub(crate) email: Option<String>,
    pub(crate) rate_limiter: RateLimiter,
}

impl PubMedClient {
    /// Create a client, optionally with an NCBI API key.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        let base_url = Url::parse(DEFAULT_BASE_URL)
            .map_err(|e| ResolverError::Config(format!("invalid base URL: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            rate_limiter: RateLimiter::for_ncbi(api_key.is_some()),
            api_key,
            email: None,
        })
    }

    /// Create a client from `NCBI_API_KEY` (or `PUBMED_API_KEY`) and `PUBMED_EMAIL`.
    ///
    /// Both variables are optional; without a key the client paces itself to
    /// the anonymous rate.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("NCBI_API_KEY")
            .or_else(|_| std::env::var("PUBMED_API_KEY"))
            .ok();
        let client = Self::new(key)?;
        match std::env::var("PUBMED_EMAIL") {
            Ok(email) if !email.trim().is_empty() => Ok(client.with_email(email)),
            _ => Ok(client),
        }
    }

    /// Override the base URL (useful for testing against a local server).
    pub fn with_base_url(mut self, url: &str) -> Result<Self> {
        let normalized = if url.ends_with('/') {
            url.to_string()
        } else {
            format!("{}/", url)
        };
        self.base_url = Url::parse(&normalized)
            .map_err(|e| ResolverError::Config(format!("invalid base URL {:?}: {}", url, e)))?;
        Ok(self)
    }

    /// Contact address NCBI asks integrators to send with each request.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Override the rate limit (requests per second).
    pub fn with_rate_limit(mut self, per_second: f64) -> Self {
        self.rate_limiter = RateLimiter::new(per_second);
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Issue a GET against an E-utilities endpoint such as `esearch.fcgi`.
    pub(crate) async fn get(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<String> {
        self.rate_limiter.acquire().await;

        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| ResolverError::Config(format!("invalid endpoint {:?}: {}", endpoint, e)))?;

        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("tool", TOOL));
        if let Some(email) = &self.email {
            query.push(("email", email.as_str()));
        }
        if let Some(key) = &self.api_key {
            query.push(("api_key", key.as_str()));
        }

        let response = self.http.get(url).query(&query).send().await?;

        self.rate_limiter
            .update_from_headers(response.headers())
            .await;
        let result = handle_response(response).await;
        if let Err(ResolverError::RateLimited { retry_after }) = &result {
            self.rate_limiter
                .back_off(retry_after.unwrap_or(Duration::from_secs(1)))
                .await;
        }
        result
    }
}

/// Handle the HTTP response, mapping status codes to errors.
async fn handle_response(response: reqwest::Response) -> Result<String> {
    let status = response.status().as_u16();

    match status {
        200..=299 => Ok(response.text().await?),
        401 | 403 => Err(ResolverError::Config(
            "E-utilities rejected the request credentials (check NCBI_API_KEY)".to_string(),
        )),
        404 => Err(ResolverError::NotFound("Resource not found".to_string())),
        429 => {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            Err(ResolverError::RateLimited { retry_after })
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(ResolverError::Api {
                status,
                message: body,
            })
        }
    }
}
