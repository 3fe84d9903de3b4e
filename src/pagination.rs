use url::Url;

use crate::document::{DocumentQuery, Query};

/// Anchors of the catalog's pagination widget.
pub const PAGINATION_MENU: Query = Query::attr("ul.paging-list li a", "href");

pub const PAGE_PARAM: &str = "page";

/// A contiguous, gap-free run of page indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    first: u32,
    last: u32,
}

impl PageRange {
    pub fn new(first: u32, last: u32) -> Option<Self> {
        if first >= 1 && first <= last {
            Some(Self { first, last })
        } else {
            None
        }
    }

    /// Smallest range covering every page number, or `None` when there are none.
    pub fn spanning(pages: &[u32]) -> Option<Self> {
        let first = pages.iter().copied().min()?;
        let last = pages.iter().copied().max()?;
        Self::new(first, last)
    }

    pub fn first(&self) -> u32 {
        self.first
    }

    pub fn last(&self) -> u32 {
        self.last
    }

    pub fn len(&self) -> usize {
        (self.last - self.first + 1) as usize
    }
}

/// The listing pages inferred from one sampled page.
///
/// Iterating does not consume the plan, so the same URLs can be produced again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePlan {
    template: Option<Url>,
    range: Option<PageRange>,
    sampled: u32,
}

impl PagePlan {
    pub fn empty() -> Self {
        Self {
            template: None,
            range: None,
            sampled: 1,
        }
    }

    pub fn range(&self) -> Option<PageRange> {
        self.range
    }

    pub fn is_empty(&self) -> bool {
        self.urls().next().is_none()
    }

    pub fn urls(&self) -> impl Iterator<Item = Url> + '_ {
        self.range
            .filter(|_| self.template.is_some())
            .map(|range| range.first..=range.last)
            .into_iter()
            .flatten()
            .filter(move |page| *page != self.sampled)
            .filter_map(move |page| {
                self.template
                    .as_ref()
                    .map(|template| with_page(template, page))
            })
    }
}

/// Infers the full set of paginated listing URLs from one page's pagination menu.
///
/// The sampled page is assumed to sit at the low end of the visible window and
/// the widget is assumed to expose the true last page. Widgets that hide the
/// last page behind an ellipsis are under-enumerated.
#[derive(Debug, Clone, Copy)]
pub struct PaginationPlanner {
    menu: Query,
}

impl Default for PaginationPlanner {
    fn default() -> Self {
        Self::new(PAGINATION_MENU)
    }
}

impl PaginationPlanner {
    pub fn new(menu: Query) -> Self {
        Self { menu }
    }

    pub fn plan_pages(&self, document: &impl DocumentQuery, base: &Url) -> PagePlan {
        let mut pages = Vec::new();
        let mut template = None;

        for href in document.select(&self.menu).iter() {
            let Ok(url) = base.join(href.trim()) else {
                log::debug!("Ignoring unparseable pagination link '{}'", href);
                continue;
            };
            let Some(page) = page_number(&url) else {
                continue;
            };
            pages.push(page);
            if template.is_none() {
                template = Some(url);
            }
        }

        let Some(range) = PageRange::spanning(&pages) else {
            log::info!("No pagination found on {}", base);
            return PagePlan::empty();
        };

        log::info!("Found listing pages {}-{} on {}", range.first, range.last, base);

        PagePlan {
            template,
            range: Some(range),
            sampled: page_number(base).unwrap_or(1),
        }
    }
}

fn page_number(url: &Url) -> Option<u32> {
    url.query_pairs()
        .find(|(key, _)| key == PAGE_PARAM)
        .and_then(|(_, value)| value.trim().parse().ok())
        .filter(|page| *page >= 1)
}

/// `template` with its page parameter set to `page`. Every other query
/// segment is kept byte-for-byte and in order.
fn with_page(template: &Url, page: u32) -> Url {
    let page_segment = format!("{}={}", PAGE_PARAM, page);
    let mut segments: Vec<&str> = Vec::new();
    let mut placed = false;
    for segment in template.query().unwrap_or("").split('&') {
        let key = segment.split_once('=').map_or(segment, |(key, _)| key);
        if key == PAGE_PARAM {
            if !placed {
                segments.push(&page_segment);
                placed = true;
            }
        } else if !segment.is_empty() {
            segments.push(segment);
        }
    }
    if !placed {
        segments.push(&page_segment);
    }

    let mut url = template.clone();
    url.set_query(Some(&segments.join("&")));
    url
}
