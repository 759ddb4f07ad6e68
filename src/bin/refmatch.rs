//! CLI binary for the citation resolver.
//!
//! Usage: refmatch resolve --title "Sample Study of X" --year 2020

#[cfg(feature = "cli")]
mod cli {
    use clap::{Args, Parser, Subcommand};
    use refmatch::{
        CandidateRecord, LlmEvaluator, PubMedClient, QueryKeywords, ResolvedCandidate, Resolver,
        ResolverConfig, ResolverError,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tracing_subscriber::EnvFilter;

    #[derive(Parser)]
    #[command(name = "refmatch", about = "Resolve citations against PubMed", version)]
    struct Cli {
        /// NCBI API key (overrides NCBI_API_KEY / PUBMED_API_KEY env var)
        #[arg(long, global = true)]
        api_key: Option<String>,

        /// Requests per second sent to E-utilities (defaults to NCBI's limit)
        #[arg(long, global = true)]
        rate_limit: Option<f64>,

        /// Output format
        #[arg(long, global = true, default_value = "table")]
        output: OutputFormat,

        #[command(subcommand)]
        command: Commands,
    }

    #[derive(Clone, Copy, clap::ValueEnum)]
    enum OutputFormat {
        Table,
        Json,
    }

    #[derive(Subcommand)]
    enum Commands {
        /// Resolve a structured citation to PubMed records
        Resolve {
            #[command(flatten)]
            fields: CitationArgs,
            /// Read the citation as a JSON object instead of flags
            #[arg(long, conflicts_with_all = ["title", "authors", "journal", "year"])]
            json: Option<String>,
            /// Score with the LLM evaluator (REFMATCH_LLM_* env vars)
            #[arg(long)]
            semantic: bool,
            /// Identifiers requested per search strategy
            #[arg(long, default_value = "20")]
            max_results: usize,
            /// Catalog call timeout in seconds
            #[arg(long, default_value = "10")]
            timeout: u64,
        },
        /// Run a raw PubMed search and print PMIDs
        Search {
            /// Search term (PubMed syntax)
            term: String,
            #[arg(short, long, default_value = "20")]
            retmax: usize,
        },
        /// Fetch the record for a PMID
        Fetch {
            pmid: String,
        },
    }

    #[derive(Args)]
    struct CitationArgs {
        #[arg(long)]
        title: Option<String>,
        /// Author, repeatable, in citation order
        #[arg(long = "author")]
        authors: Vec<String>,
        #[arg(long)]
        journal: Option<String>,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        volume: Option<String>,
        #[arg(long)]
        issue: Option<String>,
        #[arg(long)]
        pages: Option<String>,
        #[arg(long)]
        pmid: Option<String>,
        #[arg(long)]
        doi: Option<String>,
    }

    impl CitationArgs {
        fn into_keywords(self) -> QueryKeywords {
            QueryKeywords {
                title: self.title,
                authors: if self.authors.is_empty() {
                    None
                } else {
                    Some(self.authors)
                },
                journal: self.journal,
                year: self.year,
                volume: self.volume,
                issue: self.issue,
                pages: self.pages,
                pmid: self.pmid,
                doi: self.doi,
            }
        }
    }

    fn init_tracing() {
        let filter = EnvFilter::try_from_env("REFMATCH_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("refmatch=info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    fn make_client(
        api_key: Option<String>,
        rate_limit: Option<f64>,
    ) -> refmatch::error::Result<PubMedClient> {
        let client = match api_key {
            Some(key) => PubMedClient::new(Some(key))?,
            None => PubMedClient::from_env()?,
        };
        Ok(match rate_limit {
            Some(per_second) => client.with_rate_limit(per_second),
            None => client,
        })
    }

    fn truncate(text: &str, max: usize) -> String {
        if text.chars().count() > max {
            let cut: String = text.chars().take(max.saturating_sub(3)).collect();
            format!("{}...", cut)
        } else {
            text.to_string()
        }
    }

    fn print_records_table(records: &[CandidateRecord]) {
        use comfy_table::{ContentArrangement, Table};

        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["PMID", "Year", "First Author", "Journal", "Title"]);

        for record in records {
            let year = record.year.map(|y| y.to_string()).unwrap_or_default();
            let first_author = record.authors.first().map(String::as_str).unwrap_or("-");
            let journal = record.journal.as_deref().unwrap_or("-");
            let title = truncate(record.title.as_deref().unwrap_or(""), 60);
            table.add_row(vec![
                record.pmid.clone(),
                year,
                first_author.to_string(),
                truncate(journal, 30),
                title,
            ]);
        }

        println!("{table}");
    }

    fn print_resolved_table(results: &[ResolvedCandidate]) {
        use comfy_table::{ContentArrangement, Table};

        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Score", "PMID", "Match", "Title", "Differences"]);

        for result in results {
            let match_type = result
                .match_type
                .map(|m| m.to_string())
                .unwrap_or_else(|| "-".to_string());
            let differences = result
                .differences
                .iter()
                .map(|d| d.field.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            table.add_row(vec![
                format!("{:.2}", result.score),
                result.record.pmid.clone(),
                match_type,
                truncate(result.record.title.as_deref().unwrap_or(""), 60),
                differences,
            ]);
        }

        println!("{table}");
    }

    pub async fn run() -> refmatch::error::Result<()> {
        init_tracing();
        let cli = Cli::parse();
        let client = make_client(cli.api_key, cli.rate_limit)?;

        match cli.command {
            Commands::Resolve {
                fields,
                json,
                semantic,
                max_results,
                timeout,
            } => {
                let query = match json {
                    Some(text) => serde_json::from_str::<QueryKeywords>(&text)?,
                    None => fields.into_keywords(),
                };
                let config = ResolverConfig::default()
                    .with_max_results(max_results)
                    .with_catalog_timeout(Duration::from_secs(timeout));
                let mut resolver = Resolver::new(Arc::new(client)).with_config(config);
                if semantic {
                    resolver = resolver.with_evaluator(Arc::new(LlmEvaluator::from_env()?));
                }

                let results = resolver.resolve(&query).await?;
                match cli.output {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
                    OutputFormat::Table if results.is_empty() => println!("No match found."),
                    OutputFormat::Table => {
                        if results.len() > 1 {
                            println!("{} candidates need review:", results.len());
                        }
                        print_resolved_table(&results);
                        for result in &results {
                            if let Some(reason) = &result.rationale {
                                println!("{}: {}", result.record.pmid, reason);
                            }
                        }
                    }
                }
            }

            Commands::Search { term, retmax } => {
                let pmids = client.esearch(&term, retmax).await?;
                match cli.output {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&pmids)?),
                    OutputFormat::Table => {
                        println!("Found {} PMIDs:", pmids.len());
                        for pmid in &pmids {
                            println!("{}", pmid);
                        }
                    }
                }
            }

            Commands::Fetch { pmid } => {
                let record = client
                    .efetch(&pmid)
                    .await?
                    .ok_or_else(|| ResolverError::NotFound(format!("PMID {}", pmid)))?;
                match cli.output {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
                    OutputFormat::Table => print_records_table(std::slice::from_ref(&record)),
                }
            }
        }

        Ok(())
    }
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() {
    if let Err(e) = cli::run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("This binary requires the 'cli' feature. Build with: cargo build --features cli");
    std::process::exit(1);
}
