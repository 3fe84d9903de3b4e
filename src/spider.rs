use std::fmt;
use url::Url;

use crate::assembler::{AbandonmentReport, Branch, Fanout, Outcome, RecordAssembler};
use crate::dispatch::{Continuation, FetchRequest, Stage};
use crate::document::{DocumentQuery, HtmlPage, Query, Region};
use crate::error::AssemblyError;
use crate::normalize::{RawFragments, normalize};
use crate::pagination::PaginationPlanner;
use crate::record::Extracted;
use crate::schema::{CompletedRecord, MOD_FILE_SCHEMA, MOD_SCHEMA, RecordSchema};

// Catalog listing
const MOD_LINKS: Query = Query::attr("ul.listing-project > li > div > a", "href");

// Mod page
const MOD_TITLE: Query = Query::text("h1.project-title a");
const MOD_DESCRIPTION: Query = Query::rich_text("div.project-description > p");
const DETAIL_ROWS: &str = "ul.project-details > li";
const DETAIL_LABEL: &str = "div.info-label";
const DETAIL_DATA: Query = Query::text("div.info-data");
const DETAIL_LINK: Query = Query::attr("div.info-data a", "href");
const CATEGORIES: Query = Query::attr("ul.project-categories a", "href");
const AUTHORS: Query = Query::text("ul.project-members .info-wrapper a");
const NAV_LINKS: &str = "nav.project-header-nav a";

// Files listing
const FILE_ROWS: &str = "div.listing-body tbody tr";
const FILE_NAME: Query = Query::text("div.project-file-name-container");
const FILE_DETAIL_LINK: Query = Query::attr("div.project-file-name-container a", "href");
const FILE_RELEASE: Query = Query::attr("td.project-file-release-type > div", "title");
const FILE_VERSION: Query = Query::text("td.project-file-game-version");
const FILE_SIZE: Query = Query::own_text("td.project-file-size");
const FILE_UPLOADED: Query = Query::attr("td.project-file-date-uploaded > abbr", "data-epoch");
const FILE_DOWNLOADS: Query = Query::own_text("td.project-file-downloads");
const FILE_DOWNLOAD_URL: Query = Query::attr("div.project-file-download-button a", "href");

// File detail page
const FILE_MD5: Query = Query::own_text("span.md5");
const FILE_CHANGELOG: Query = Query::rich_text("div.logbox");
const DEPENDENCIES: &str = "section.details-related-projects li";
const DEPENDENCY_NAME: &str = "div.project-tag-name";
const OPTIONAL_DEPENDENCY: &str = "div.optionallibrary";

/// What a stage handler hands back to the crawl loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SpiderOutput {
    Request(FetchRequest),
    Record(CompletedRecord),
    Abandoned(AbandonmentReport),
}

/// Links found in a mod page's navigation and detail rows.
#[derive(Debug, Default)]
struct ModLinks {
    files: Option<Url>,
    license: Option<Url>,
}

/// Site wiring for the curseforge mod repository.
///
/// The catalog tree is walked top-down: catalog root and listing pages yield mod
/// pages, each mod page fans out to its license page and its paginated files
/// listing, and each file row fans out to its detail page.
#[derive(Debug, Clone)]
pub struct CurseforgeSpider {
    planner: PaginationPlanner,
    follow_pagination: bool,
}

impl Default for CurseforgeSpider {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CurseforgeSpider {
    pub fn new(follow_pagination: bool) -> Self {
        Self {
            planner: PaginationPlanner::default(),
            follow_pagination,
        }
    }

    pub fn start_requests(&self, start_urls: &[Url]) -> Vec<FetchRequest> {
        start_urls
            .iter()
            .map(|url| FetchRequest::new(url.clone(), Stage::Catalog))
            .collect()
    }

    /// Route a fetched page to the handler of its stage.
    pub fn handle(
        &self,
        request: &FetchRequest,
        page: &HtmlPage,
        assembler: &mut RecordAssembler,
    ) -> Vec<SpiderOutput> {
        match (request.stage, &request.context) {
            (Stage::Catalog, _) => {
                let mut out = self.parse_listing(page);
                out.extend(self.paginate(page, Stage::Listing, &Continuation::Fresh));
                out
            }
            (Stage::Listing, _) => self.parse_listing(page),
            (Stage::ModPage, _) => self.parse_mod_page(page, assembler),
            (Stage::License, Continuation::Entity { key, branch }) => {
                let mut extracted = Extracted::new(page.url());
                extracted.add_value("license", page.body());
                outputs(assembler.resume(*key, *branch, &extracted))
            }
            (Stage::FilesIndex, Continuation::Files { mod_name }) => {
                let mut out = self.paginate(page, Stage::FilesPage, &request.context);
                out.extend(self.parse_files_page(page, mod_name, assembler));
                out
            }
            (Stage::FilesPage, Continuation::Files { mod_name }) => {
                self.parse_files_page(page, mod_name, assembler)
            }
            (Stage::FileDetails, Continuation::Entity { key, branch }) => {
                outputs(assembler.resume(*key, *branch, &extract_file_details(page)))
            }
            (stage, context) => {
                log::warn!("No handler for {:?} with context {:?} @ {}", stage, context, page.url());
                Vec::new()
            }
        }
    }

    /// A request that will never deliver: the waiting entity, if any, loses that branch.
    pub fn handle_failure(
        &self,
        request: &FetchRequest,
        reason: impl fmt::Display,
        assembler: &mut RecordAssembler,
    ) -> Vec<SpiderOutput> {
        match request.context {
            Continuation::Entity { key, branch } => {
                outputs(assembler.fail_branch(key, branch, reason))
            }
            _ => {
                log::warn!("Failed {:?} page {}: {}", request.stage, request.url, reason);
                Vec::new()
            }
        }
    }

    fn paginate(&self, page: &HtmlPage, stage: Stage, context: &Continuation) -> Vec<SpiderOutput> {
        if !self.follow_pagination {
            return Vec::new();
        }
        self.planner
            .plan_pages(page, page.url())
            .urls()
            .map(|url| SpiderOutput::Request(FetchRequest::new(url, stage).with_context(context.clone())))
            .collect()
    }

    fn parse_listing(&self, page: &HtmlPage) -> Vec<SpiderOutput> {
        resolve_all(page, &MOD_LINKS, page.url())
            .into_iter()
            .map(|url| {
                log::info!("Found mod URL {}", url);
                SpiderOutput::Request(FetchRequest::new(url, Stage::ModPage))
            })
            .collect()
    }

    fn parse_mod_page(&self, page: &HtmlPage, assembler: &mut RecordAssembler) -> Vec<SpiderOutput> {
        let (extracted, links) = extract_mod(page);
        let name = extracted
            .fields()
            .find(|(field, _)| *field == "name")
            .and_then(|(_, fragments)| field_text(&MOD_SCHEMA, "name", fragments, page.url()));
        let label = name.clone().unwrap_or_else(|| page.url().to_string());
        log::info!("Created item Mod {} @ {}", label, page.url());

        let mut out = Vec::new();
        match (links.files, name) {
            (Some(files_url), Some(mod_name)) => {
                log::info!("Request mod files for Mod {} @ {}", label, files_url);
                out.push(SpiderOutput::Request(
                    FetchRequest::new(files_url, Stage::FilesIndex)
                        .with_context(Continuation::Files { mod_name }),
                ));
            }
            (None, _) => log::warn!("No files link for Mod {} @ {}", label, page.url()),
            (Some(_), None) => log::warn!("Skipping files of unnamed mod @ {}", page.url()),
        }

        let fanout = match &links.license {
            Some(_) => Fanout::new().awaiting(Branch::License),
            None => Fanout::new().failed(
                Branch::License,
                AssemblyError::MissingSelection {
                    what: "license link",
                    url: page.url().to_string(),
                }
                .to_string(),
            ),
        };
        let (key, outcome) = assembler.start(&MOD_SCHEMA, label.as_str(), &extracted, fanout);

        if let Some(license_url) = links.license {
            log::info!("Request mod license for Mod {} @ {}", label, license_url);
            out.push(SpiderOutput::Request(
                FetchRequest::new(license_url, Stage::License).with_context(Continuation::Entity {
                    key,
                    branch: Branch::License,
                }),
            ));
        }
        out.extend(outputs(outcome));
        out
    }

    fn parse_files_page(
        &self,
        page: &HtmlPage,
        mod_name: &str,
        assembler: &mut RecordAssembler,
    ) -> Vec<SpiderOutput> {
        let rows = page.regions(FILE_ROWS);
        log::debug!("Found {} files for Mod {} @ {}", rows.len(), mod_name, page.url());

        let mut out = Vec::new();
        for row in rows {
            let extracted = extract_file_row(&row, page.url(), mod_name);
            let name = row.select(&FILE_NAME);
            let label = field_text(&MOD_FILE_SCHEMA, "name", &name, page.url())
                .unwrap_or_else(|| format!("{} file", mod_name));

            let detail_url = resolve_all(&row, &FILE_DETAIL_LINK, page.url()).into_iter().next();
            let fanout = match &detail_url {
                Some(_) => Fanout::new().awaiting(Branch::FileDetails),
                None => Fanout::new().failed(
                    Branch::FileDetails,
                    AssemblyError::MissingSelection {
                        what: "file detail link",
                        url: page.url().to_string(),
                    }
                    .to_string(),
                ),
            };
            let (key, outcome) = assembler.start(&MOD_FILE_SCHEMA, label, &extracted, fanout);

            if let Some(url) = detail_url {
                out.push(SpiderOutput::Request(
                    FetchRequest::new(url, Stage::FileDetails).with_context(Continuation::Entity {
                        key,
                        branch: Branch::FileDetails,
                    }),
                ));
            }
            out.extend(outputs(outcome));
        }
        out
    }
}

fn outputs(outcome: Outcome) -> Vec<SpiderOutput> {
    match outcome {
        Outcome::Completed(record) => vec![SpiderOutput::Record(record)],
        Outcome::Abandoned(report) => vec![SpiderOutput::Abandoned(report)],
        Outcome::Pending | Outcome::Ignored => Vec::new(),
    }
}

/// Absolute URLs for every link matched by `query`, in document order.
fn resolve_all(document: &impl DocumentQuery, query: &Query, base: &Url) -> Vec<Url> {
    document
        .select(query)
        .iter()
        .filter_map(|href| match base.join(href.trim()) {
            Ok(url) => Some(url),
            Err(e) => {
                log::debug!("Ignoring link '{}': {}", href, e);
                None
            }
        })
        .collect()
}

/// The normalized text of one field, used to label entities before they complete.
fn field_text(
    schema: &'static RecordSchema,
    field: &str,
    fragments: &RawFragments,
    base: &Url,
) -> Option<String> {
    let spec = schema.field(field)?;
    match normalize(spec, fragments, Some(base)) {
        Ok(value) => value.and_then(|v| v.as_text().map(str::to_string)),
        Err(_) => None,
    }
}

fn extract_mod(page: &HtmlPage) -> (Extracted, ModLinks) {
    let base = page.url();
    let mut extracted = Extracted::new(base);
    let mut links = ModLinks::default();

    extracted
        .add("name", page.select(&MOD_TITLE))
        .add("description", page.select(&MOD_DESCRIPTION));

    for row in page.regions(DETAIL_ROWS) {
        let label = row
            .regions(DETAIL_LABEL)
            .first()
            .map(Region::label)
            .unwrap_or_default();
        match label.as_str() {
            "Created" => {
                extracted.add("created", row.select(&DETAIL_DATA));
            }
            "Last Released File" => {
                extracted.add("updated", row.select(&DETAIL_DATA));
            }
            "Total Downloads" => {
                extracted.add("downloads", row.select(&DETAIL_DATA));
            }
            "License" => {
                links.license = row
                    .select(&DETAIL_LINK)
                    .first()
                    .and_then(|href| base.join(href.trim()).ok());
            }
            _ => {}
        }
    }

    extracted
        .add("categories", page.select(&CATEGORIES))
        .add("authors", page.select(&AUTHORS));

    for link in page.regions(NAV_LINKS) {
        let Some(href) = link.attr("href") else {
            continue;
        };
        match link.label().as_str() {
            "Source" => {
                extracted.add_value("source_url", href);
            }
            "Donate" => {
                extracted.add_value("donation_url", href);
            }
            "Files" => links.files = base.join(href.trim()).ok(),
            _ => {}
        }
    }

    extracted.add_value("mod_url", base.as_str());
    (extracted, links)
}

fn extract_file_row(row: &Region<'_>, base: &Url, mod_name: &str) -> Extracted {
    let mut extracted = Extracted::new(base);
    extracted
        .add_value("mod", mod_name)
        .add("name", row.select(&FILE_NAME))
        .add("release", row.select(&FILE_RELEASE))
        .add("mc_version", row.select(&FILE_VERSION))
        .add("size", row.select(&FILE_SIZE))
        .add("upload_date", row.select(&FILE_UPLOADED))
        .add("downloads", row.select(&FILE_DOWNLOADS))
        .add("download_url", row.select(&FILE_DOWNLOAD_URL));
    extracted
}

fn extract_file_details(page: &HtmlPage) -> Extracted {
    let mut required = RawFragments::new();
    let mut optional = RawFragments::new();

    for dependency in page.regions(DEPENDENCIES) {
        let Some(name) = dependency
            .regions(DEPENDENCY_NAME)
            .first()
            .map(Region::label)
            .filter(|name| !name.is_empty())
        else {
            continue;
        };
        if dependency.exists(OPTIONAL_DEPENDENCY) {
            optional.push(name);
        } else {
            required.push(name);
        }
    }

    let mut extracted = Extracted::new(page.url());
    extracted
        .add("md5", page.select(&FILE_MD5))
        .add("changelog", page.select(&FILE_CHANGELOG))
        .add("required_dependencies", required)
        .add("optional_dependencies", optional);
    extracted
}
