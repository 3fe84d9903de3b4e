// Mod Catalog Crawler Library
//
// Crawls a paginated mod repository and assembles mod and mod file records
// from fields scattered across several pages.

pub mod assembler;
pub mod config;
pub mod crawler;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod normalize;
pub mod pagination;
pub mod record;
pub mod schema;
pub mod sink;
pub mod spider;
pub mod transport;
pub mod utils;

// Re-export main types for convenience
pub use assembler::{AbandonmentReport, AssemblyState, Branch, EntityKey, Fanout, Outcome, RecordAssembler};
pub use config::CrawlConfig;
pub use crawler::{CrawlReport, CrawlStatus, Crawler};
pub use dispatch::{Continuation, Delivery, FetchDispatcher, FetchRequest, Fetched, Stage, Transport};
pub use document::{DocumentQuery, Extract, HtmlPage, Query, Region};
pub use error::{AssemblyError, CrawlError, NormalizationError};
pub use normalize::{Combinator, FieldSpec, Parse, RawFragments, Transform, Value, normalize};
pub use pagination::{PagePlan, PageRange, PaginationPlanner};
pub use record::{Extracted, PartialRecord};
pub use schema::{
    CompletedRecord, Dependencies, Mod, ModFile, MOD_FILE_SCHEMA, MOD_SCHEMA, RecordKind,
    RecordSchema, ReleaseChannel,
};
pub use sink::{JsonLinesSink, MemorySink, RecordSink};
pub use spider::{CurseforgeSpider, SpiderOutput};
pub use transport::{HttpTransport, StaticTransport};
pub use utils::RateLimiter;
