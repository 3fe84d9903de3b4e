use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use mod_crawler::{CrawlConfig, CrawlStatus, Crawler, HttpTransport, JsonLinesSink};

#[derive(Parser)]
#[command(name = "mod-crawler")]
#[command(about = "Crawl a mod catalog and write mod and mod file records as JSON lines")]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Catalog URL to start from (repeatable, overrides the config)
    #[arg(long = "start-url")]
    start_urls: Vec<String>,

    /// Output file (defaults to stdout)
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Stop dispatching after this many requests
    #[arg(long)]
    max_requests: Option<usize>,

    /// Only crawl the first listing page
    #[arg(long)]
    no_pagination: bool,

    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    fn load_config(&self) -> Result<CrawlConfig> {
        let mut config = match &self.config {
            Some(path) => CrawlConfig::from_file(path)?,
            None => CrawlConfig::default(),
        };
        if !self.start_urls.is_empty() {
            config.start_urls = self.start_urls.clone();
        }
        if self.max_requests.is_some() {
            config.max_requests = self.max_requests;
        }
        if self.no_pagination {
            config.follow_pagination = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(filter));

    let config = cli.load_config()?;
    let start_urls = config.parse_start_urls()?;
    let transport = HttpTransport::new(&config).context("Failed to build HTTP client")?;

    let writer: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path)
                .with_context(|| format!("Failed to create output file {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout())),
    };

    log::info!("🚀 Starting mod crawler");
    let mut crawler = Crawler::new(transport, JsonLinesSink::new(writer), &config);
    let stop = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let report = crawler.run(&start_urls, stop).await?;

    log::info!(
        "{}",
        serde_json::to_string(&report).context("Failed to serialize crawl report")?
    );
    if report.status == CrawlStatus::Failed {
        anyhow::bail!("Crawl failed: no page could be fetched");
    }
    Ok(())
}
