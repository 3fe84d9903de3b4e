use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use url::Url;

use crate::assembler::RecordAssembler;
use crate::config::CrawlConfig;
use crate::dispatch::{Delivery, FetchDispatcher, Transport};
use crate::document::HtmlPage;
use crate::error::CrawlError;
use crate::schema::{CompletedRecord, RecordKind};
use crate::sink::RecordSink;
use crate::spider::{CurseforgeSpider, SpiderOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrawlStatus {
    Running,
    Completed,
    /// Interrupted, or cut short by the request budget.
    Stopped,
    Failed,
}

/// Summary of one crawl run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlReport {
    pub run_id: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub pages_fetched: usize,
    pub fetch_failures: usize,
    pub requests_refused: usize,
    pub mods_completed: usize,
    pub files_completed: usize,
    pub abandoned: usize,
    pub status: CrawlStatus,
}

impl CrawlReport {
    fn start() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            start_time: chrono::Utc::now().to_rfc3339(),
            end_time: None,
            pages_fetched: 0,
            fetch_failures: 0,
            requests_refused: 0,
            mods_completed: 0,
            files_completed: 0,
            abandoned: 0,
            status: CrawlStatus::Running,
        }
    }

    fn count(&mut self, record: &CompletedRecord) {
        match record.kind() {
            RecordKind::Mod => self.mods_completed += 1,
            RecordKind::ModFile => self.files_completed += 1,
        }
    }

    fn finish(&mut self, interrupted: bool) {
        self.end_time = Some(chrono::Utc::now().to_rfc3339());
        self.status = if self.pages_fetched == 0 && self.fetch_failures > 0 {
            CrawlStatus::Failed
        } else if interrupted || self.requests_refused > 0 {
            CrawlStatus::Stopped
        } else {
            CrawlStatus::Completed
        };
    }
}

/// Drives one crawl: deliveries in, spider outputs out, records to the sink.
///
/// Pages are parsed and handled synchronously between deliveries, so the
/// assembler has a single owner and needs no locking.
pub struct Crawler<T: Transport, S: RecordSink> {
    spider: CurseforgeSpider,
    dispatcher: FetchDispatcher<T>,
    assembler: RecordAssembler,
    sink: S,
    max_requests: Option<usize>,
}

impl<T: Transport, S: RecordSink> Crawler<T, S> {
    pub fn new(transport: T, sink: S, config: &CrawlConfig) -> Self {
        Self {
            spider: CurseforgeSpider::new(config.follow_pagination),
            dispatcher: FetchDispatcher::new(transport, config.max_concurrent_requests),
            assembler: RecordAssembler::new(),
            sink,
            max_requests: config.max_requests,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Crawl from `start_urls` until nothing is outstanding or `stop` resolves.
    ///
    /// Entities still waiting for a branch when the crawl ends are reported as
    /// abandoned. Only sink errors abort the run.
    pub async fn run(
        &mut self,
        start_urls: &[Url],
        stop: impl Future<Output = ()>,
    ) -> Result<CrawlReport> {
        let mut report = CrawlReport::start();
        log::info!("🔍 Starting crawl {}: {} start URLs", report.run_id, start_urls.len());

        let start = self
            .spider
            .start_requests(start_urls)
            .into_iter()
            .map(SpiderOutput::Request)
            .collect();
        self.process(start, &mut report)?;

        tokio::pin!(stop);
        let interrupted = loop {
            tokio::select! {
                biased;
                _ = &mut stop => {
                    log::warn!("Stop requested, dropping {} outstanding requests", self.dispatcher.outstanding());
                    break true;
                }
                delivery = self.dispatcher.next_delivery() => {
                    let Some(delivery) = delivery else {
                        break false;
                    };
                    let outputs = self.on_delivery(delivery, &mut report);
                    self.process(outputs, &mut report)?;
                }
            }
        };

        self.dispatcher.cancel();
        let reason = if interrupted {
            "crawl stopped"
        } else {
            "crawl finished"
        };
        for abandoned in self.assembler.abandon_all(reason) {
            report.abandoned += 1;
            self.sink.abandoned(&abandoned)?;
        }
        self.sink.flush()?;

        report.finish(interrupted);
        log::info!(
            "✅ Crawl {} {:?}: {} pages, {} failures, {} mods, {} files, {} abandoned",
            report.run_id,
            report.status,
            report.pages_fetched,
            report.fetch_failures,
            report.mods_completed,
            report.files_completed,
            report.abandoned
        );
        Ok(report)
    }

    fn on_delivery(&mut self, delivery: Delivery, report: &mut CrawlReport) -> Vec<SpiderOutput> {
        let Delivery { request, result } = delivery;
        match result {
            Ok(fetched) => {
                report.pages_fetched += 1;
                let page = HtmlPage::parse(fetched.url, fetched.body);
                self.spider.handle(&request, &page, &mut self.assembler)
            }
            Err(e) => {
                report.fetch_failures += 1;
                log::warn!("❌ Failed to fetch {}: {}", request.url, e);
                self.spider.handle_failure(&request, &e, &mut self.assembler)
            }
        }
    }

    /// Dispatch requests and emit records, in output order.
    fn process(&mut self, outputs: Vec<SpiderOutput>, report: &mut CrawlReport) -> Result<()> {
        let mut queue = VecDeque::from(outputs);
        while let Some(output) = queue.pop_front() {
            match output {
                SpiderOutput::Request(request) => match self.max_requests {
                    Some(max) if self.dispatcher.accepted() >= max => {
                        report.requests_refused += 1;
                        log::debug!("Refusing {} beyond the request budget", request.url);
                        let refused = CrawlError::BudgetExhausted(max);
                        queue.extend(self.spider.handle_failure(&request, &refused, &mut self.assembler));
                    }
                    _ => self.dispatcher.dispatch(request),
                },
                SpiderOutput::Record(record) => {
                    report.count(&record);
                    self.sink.emit(&record)?;
                }
                SpiderOutput::Abandoned(abandoned) => {
                    report.abandoned += 1;
                    self.sink.abandoned(&abandoned)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Fetched;
    use crate::sink::MemorySink;
    use crate::transport::StaticTransport;
    use std::future::pending;

    const CATALOG: &str = r#"
        <ul class="listing-project">
            <li><div><a href="/projects/mantle">Mantle</a></div></li>
            <li><div><a href="/projects/broken">Broken</a></div></li>
        </ul>
        <ul class="paging-list">
            <li><a href="/mc-mods?page=1">1</a></li>
            <li><a href="/mc-mods?page=2">2</a></li>
        </ul>
    "#;

    const LISTING_2: &str = r#"
        <ul class="listing-project">
            <li><div><a href="/projects/jei">JEI</a></div></li>
        </ul>
    "#;

    fn mod_page(name: &str, slug: &str, with_license: bool) -> String {
        let license = if with_license {
            format!(
                r#"<li><div class="info-label">License</div><div class="info-data"><a href="/projects/{}/license">MIT</a></div></li>"#,
                slug
            )
        } else {
            String::new()
        };
        format!(
            r#"
            <nav class="project-header-nav"><a href="/projects/{slug}/files">Files</a></nav>
            <h1 class="project-title"><a href="/projects/{slug}">{name}</a></h1>
            <ul class="project-details">
                <li><div class="info-label">Total Downloads</div><div class="info-data">1,000</div></li>
                {license}
            </ul>
            "#
        )
    }

    fn files_page(slug: &str) -> String {
        format!(
            r#"
            <div class="listing-body"><table><tbody><tr>
                <td><div class="project-file-name-container"><a href="/projects/{slug}/files/1">{slug}-1.0.jar</a></div></td>
                <td><div class="project-file-download-button"><a href="/projects/{slug}/files/1/download">Download</a></div></td>
            </tr></tbody></table></div>
            "#
        )
    }

    const FILE_DETAILS: &str = r#"<span class="md5">0123456789abcdef0123456789abcdef</span>"#;

    fn catalog_transport() -> StaticTransport {
        let mut transport = StaticTransport::new();
        transport
            .insert("https://foo.org/mc-mods", CATALOG)
            .insert("https://foo.org/mc-mods?page=2", LISTING_2)
            .insert("https://foo.org/projects/mantle", mod_page("Mantle", "mantle", true))
            .insert("https://foo.org/projects/mantle/license", "MIT License")
            .insert("https://foo.org/projects/mantle/files", files_page("mantle"))
            .insert("https://foo.org/projects/mantle/files/1", FILE_DETAILS)
            .insert("https://foo.org/projects/broken", mod_page("Broken", "broken", false))
            .insert("https://foo.org/projects/broken/files", files_page("broken"))
            .insert("https://foo.org/projects/broken/files/1", FILE_DETAILS)
            .insert("https://foo.org/projects/jei", mod_page("JEI", "jei", true))
            .insert("https://foo.org/projects/jei/license", "MIT License")
            .insert("https://foo.org/projects/jei/files", files_page("jei"));
        transport
    }

    fn config() -> CrawlConfig {
        CrawlConfig {
            download_delay: 0.0,
            ..CrawlConfig::default()
        }
    }

    fn start() -> Vec<Url> {
        vec![Url::parse("https://foo.org/mc-mods").unwrap()]
    }

    fn mod_names(sink: &MemorySink) -> Vec<&str> {
        let mut names: Vec<&str> = sink
            .records
            .iter()
            .filter_map(|record| match record {
                CompletedRecord::Mod(m) => Some(m.name.as_str()),
                CompletedRecord::ModFile(_) => None,
            })
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_full_crawl_emits_records_and_abandonments() {
        let mut crawler = Crawler::new(catalog_transport(), MemorySink::new(), &config());
        let report = crawler.run(&start(), pending()).await.unwrap();

        assert_eq!(report.status, CrawlStatus::Completed);
        assert_eq!(report.mods_completed, 2);
        assert_eq!(report.files_completed, 2);
        // broken has no license link, jei's file detail page is missing
        assert_eq!(report.abandoned, 2);
        assert_eq!(report.fetch_failures, 1);
        assert!(report.end_time.is_some());

        let sink = crawler.into_sink();
        assert_eq!(mod_names(&sink), vec!["JEI", "Mantle"]);

        let broken = sink
            .abandoned
            .iter()
            .find(|report| report.entity == "Broken")
            .unwrap();
        assert_eq!(broken.missing, vec!["license"]);

        let jei_file = sink
            .abandoned
            .iter()
            .find(|report| report.entity == "jei-1.0.jar")
            .unwrap();
        assert_eq!(jei_file.missing, vec!["md5"]);
        assert_eq!(jei_file.partial.text("mod"), Some("JEI"));
    }

    #[tokio::test]
    async fn test_request_budget_refuses_and_abandons() {
        let config = CrawlConfig {
            max_requests: Some(2),
            max_concurrent_requests: 1,
            ..config()
        };
        let mut crawler = Crawler::new(catalog_transport(), MemorySink::new(), &config);
        let report = crawler.run(&start(), pending()).await.unwrap();

        assert_eq!(report.status, CrawlStatus::Stopped);
        assert_eq!(report.pages_fetched, 2);
        assert!(report.requests_refused > 0);
        assert_eq!(report.mods_completed, 0);

        let sink = crawler.into_sink();
        assert!(sink.records.is_empty());
        assert_eq!(sink.abandoned.len(), 1);
        assert_eq!(sink.abandoned[0].entity, "Mantle");
        assert_eq!(sink.abandoned[0].missing, vec!["license"]);
    }

    /// Serves canned pages but never answers for one URL.
    struct StallingTransport {
        pages: StaticTransport,
        stalled: Url,
    }

    impl Transport for StallingTransport {
        async fn fetch(&self, url: Url) -> Result<Fetched, CrawlError> {
            if url == self.stalled {
                pending::<()>().await;
            }
            self.pages.fetch(url).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_in_flight_entities() {
        let mut pages = StaticTransport::new();
        pages
            .insert(
                "https://foo.org/mc-mods",
                r#"<ul class="listing-project"><li><div><a href="/projects/mantle">Mantle</a></div></li></ul>"#,
            )
            .insert("https://foo.org/projects/mantle", mod_page("Mantle", "mantle", true))
            .insert("https://foo.org/projects/mantle/files", files_page("mantle"))
            .insert("https://foo.org/projects/mantle/files/1", FILE_DETAILS);
        let transport = StallingTransport {
            pages,
            stalled: Url::parse("https://foo.org/projects/mantle/license").unwrap(),
        };

        let mut crawler = Crawler::new(transport, MemorySink::new(), &config());
        let stop = tokio::time::sleep(std::time::Duration::from_secs(1));
        let report = crawler.run(&start(), stop).await.unwrap();

        assert_eq!(report.status, CrawlStatus::Stopped);
        assert_eq!(report.mods_completed, 0);
        assert_eq!(report.abandoned, 1);

        let sink = crawler.into_sink();
        assert_eq!(sink.abandoned.len(), 1);
        assert_eq!(sink.abandoned[0].entity, "Mantle");
        assert_eq!(sink.abandoned[0].missing, vec!["license"]);
        assert_eq!(sink.abandoned[0].reasons, vec!["crawl stopped"]);
    }

    #[tokio::test]
    async fn test_unreachable_catalog_fails() {
        let mut crawler = Crawler::new(StaticTransport::new(), MemorySink::new(), &config());
        let report = crawler.run(&start(), pending()).await.unwrap();

        assert_eq!(report.status, CrawlStatus::Failed);
        assert_eq!(report.fetch_failures, 1);
    }
}
