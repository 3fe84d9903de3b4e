use thiserror::Error;

/// Errors raised while talking to the outside world: transport, configuration, output.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Request budget of {0} exhausted")]
    BudgetExhausted(usize),
}

/// A fragment set that could not be turned into the typed value of its field.
///
/// The assembler records such fields as present-but-null; this error never
/// aborts a record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizationError {
    #[error("field '{field}': cannot parse '{input}' as {expected}")]
    Unparseable {
        field: &'static str,
        input: String,
        expected: &'static str,
    },

    #[error("field '{field}': cannot resolve URL '{input}'")]
    UnresolvableUrl { field: &'static str, input: String },
}

/// Problems found while merging into or finalising a record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssemblyError {
    #[error("record '{record}' has no field '{field}'")]
    UnknownField { record: &'static str, field: String },

    #[error("record '{record}' is missing required fields: {missing:?}")]
    MissingFields {
        record: &'static str,
        missing: Vec<&'static str>,
    },

    #[error("missing selection '{what}' on {url}")]
    MissingSelection { what: &'static str, url: String },
}
