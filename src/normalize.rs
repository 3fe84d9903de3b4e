use chrono::{DateTime, NaiveDate};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use url::Url;

use crate::error::NormalizationError;
use crate::schema::ReleaseChannel;

/// Markup token emitted by the document layer for `<br>` elements and block ends.
pub const LINE_BREAK_TOKEN: &str = "<br>";

/// Date formats seen on catalog detail pages, tried in order.
pub const CATALOG_DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%b %d, %Y", "%d %b %Y", "%Y-%m-%d"];

static LINE_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid line break pattern"));

static MARKUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<!--.*?-->|<script\b.*?</script>|<style\b.*?</style>|<[^>]*>")
        .expect("valid markup pattern")
});

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:#([0-9]{1,7})|#[xX]([0-9a-fA-F]{1,6})|([a-zA-Z]+));")
        .expect("valid entity pattern")
});

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([0-9][0-9,]*(?:\.[0-9]+)?)\s*([KMG])(?:i?B)?$").expect("valid size pattern")
});

/// Ordered raw strings produced by one selection query against one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFragments(Vec<String>);

impl RawFragments {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn single(value: impl Into<String>) -> Self {
        Self(vec![value.into()])
    }

    pub fn push(&mut self, fragment: impl Into<String>) {
        self.0.push(fragment.into());
    }

    pub fn extend(&mut self, other: RawFragments) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

impl From<Vec<String>> for RawFragments {
    fn from(fragments: Vec<String>) -> Self {
        Self(fragments)
    }
}

impl From<Vec<&str>> for RawFragments {
    fn from(fragments: Vec<&str>) -> Self {
        Self(fragments.into_iter().map(str::to_string).collect())
    }
}

impl FromIterator<String> for RawFragments {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A typed, normalized field value.
///
/// `Null` marks a field that was extracted but could not be converted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Text(String),
    Integer(u64),
    Float(f64),
    Date(NaiveDate),
    Set(BTreeSet<String>),
    List(Vec<String>),
    Channel(ReleaseChannel),
}

impl Value {
    /// Empty values lose against any later non-empty contribution.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(text) => text.is_empty(),
            Value::Set(set) => set.is_empty(),
            Value::List(list) => list.is_empty(),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<u64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(date) => Some(*date),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            Value::Set(set) => Some(set),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_channel(&self) -> Option<ReleaseChannel> {
        match self {
            Value::Channel(channel) => Some(*channel),
            _ => None,
        }
    }
}

/// Closed catalog of fragment transforms, applied in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// `<br>` tokens become `\n`.
    MaterializeLineBreaks,
    CollapseWhitespace,
    CompactEmptyLines,
    StripMarkup,
    /// Last path segment of a URL-like fragment.
    TrailingSegment,
    Split(char),
    ResolveUrl,
    /// Newline-aware join of all fragments into one.
    Join(&'static str),
}

impl Transform {
    pub fn apply(
        self,
        field: &'static str,
        fragments: Vec<String>,
        base: Option<&Url>,
    ) -> Result<Vec<String>, NormalizationError> {
        let out = match self {
            Transform::MaterializeLineBreaks => fragments
                .iter()
                .map(|f| materialize_line_breaks(f))
                .collect(),
            Transform::CollapseWhitespace => {
                fragments.iter().map(|f| collapse_whitespace(f)).collect()
            }
            Transform::CompactEmptyLines => {
                fragments.iter().map(|f| compact_empty_lines(f)).collect()
            }
            Transform::StripMarkup => fragments.iter().map(|f| strip_markup(f)).collect(),
            Transform::TrailingSegment => fragments
                .iter()
                .map(|f| trailing_segment(f).to_string())
                .collect(),
            Transform::Split(delimiter) => split_tokens(&fragments, delimiter),
            Transform::ResolveUrl => {
                let mut resolved = Vec::with_capacity(fragments.len());
                for fragment in fragments {
                    let trimmed = fragment.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match resolve_url(base, trimmed) {
                        Some(url) => resolved.push(url),
                        None => {
                            return Err(NormalizationError::UnresolvableUrl {
                                field,
                                input: fragment,
                            });
                        }
                    }
                }
                resolved
            }
            Transform::Join(separator) => {
                if fragments.is_empty() {
                    Vec::new()
                } else {
                    vec![newline_join(&fragments, separator)]
                }
            }
        };
        Ok(out)
    }
}

/// Terminal conversion from cleaned fragments to a typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parse {
    Text,
    Integer,
    SizeMb,
    Date(&'static [&'static str]),
    Epoch,
    TokenSet,
    List,
    Channel,
}

impl Parse {
    fn expected(self) -> &'static str {
        match self {
            Parse::Text => "text",
            Parse::Integer => "integer",
            Parse::SizeMb => "size",
            Parse::Date(_) => "date",
            Parse::Epoch => "epoch seconds",
            Parse::TokenSet => "token set",
            Parse::List => "list",
            Parse::Channel => "release channel",
        }
    }
}

/// How repeated contributions to one field are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Combinator {
    /// The first non-empty value is kept; later ones are discarded.
    #[default]
    FirstNonEmpty,
    /// Set and list contributions are unioned in arrival order.
    Union,
}

impl Combinator {
    pub fn combine(self, existing: Value, incoming: Value) -> Value {
        match (self, existing, incoming) {
            (Combinator::Union, Value::Set(mut current), Value::Set(more)) => {
                current.extend(more);
                Value::Set(current)
            }
            (Combinator::Union, Value::List(mut current), Value::List(more)) => {
                for item in more {
                    if !current.contains(&item) {
                        current.push(item);
                    }
                }
                Value::List(current)
            }
            (_, existing, incoming) => {
                if existing.is_empty() && !incoming.is_empty() {
                    incoming
                } else {
                    existing
                }
            }
        }
    }
}

/// Normalization binding for one schema field.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub transforms: &'static [Transform],
    pub parse: Parse,
    pub combinator: Combinator,
    pub required: bool,
}

impl FieldSpec {
    pub const fn new(name: &'static str, parse: Parse) -> Self {
        Self {
            name,
            transforms: &[],
            parse,
            combinator: Combinator::FirstNonEmpty,
            required: false,
        }
    }

    pub const fn with(mut self, transforms: &'static [Transform]) -> Self {
        self.transforms = transforms;
        self
    }

    pub const fn combine(mut self, combinator: Combinator) -> Self {
        self.combinator = combinator;
        self
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Run a field's transforms and terminal parse over a fragment set.
///
/// `Ok(None)` means nothing usable was extracted (the field stays missing).
/// `Err` means something was extracted but could not be typed.
pub fn normalize(
    spec: &FieldSpec,
    fragments: &RawFragments,
    base: Option<&Url>,
) -> Result<Option<Value>, NormalizationError> {
    let mut current: Vec<String> = fragments.0.clone();
    for transform in spec.transforms {
        current = transform.apply(spec.name, current, base)?;
    }

    let unparseable = |input: &str| NormalizationError::Unparseable {
        field: spec.name,
        input: input.to_string(),
        expected: spec.parse.expected(),
    };
    let first = current.iter().map(|f| f.trim()).find(|f| !f.is_empty());

    let value = match spec.parse {
        Parse::Text => first.map(|text| Value::Text(text.to_string())),
        Parse::Integer => first.and_then(parse_integer).map(Value::Integer),
        Parse::SizeMb => match first {
            Some(input) => Some(Value::Float(
                parse_size_mb(input).ok_or_else(|| unparseable(input))?,
            )),
            None => None,
        },
        Parse::Date(formats) => match first {
            Some(input) => Some(Value::Date(
                parse_date(input, formats).ok_or_else(|| unparseable(input))?,
            )),
            None => None,
        },
        Parse::Epoch => match first {
            Some(input) => Some(Value::Date(
                parse_epoch(input).ok_or_else(|| unparseable(input))?,
            )),
            None => None,
        },
        Parse::Channel => match first {
            Some(input) => Some(Value::Channel(
                ReleaseChannel::from_label(input).ok_or_else(|| unparseable(input))?,
            )),
            None => None,
        },
        Parse::TokenSet => Some(Value::Set(
            current
                .iter()
                .map(|f| f.trim())
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect(),
        )),
        Parse::List => Some(Value::List(
            current
                .iter()
                .map(|f| f.trim())
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect(),
        )),
    };

    Ok(value)
}

/// Collapse runs of spaces and tabs into one space and trim them from every line.
///
/// Line feeds are kept so materialized line breaks survive.
pub fn collapse_whitespace(input: &str) -> String {
    input
        .split('\n')
        .map(|line| {
            line.split(|c| c == ' ' || c == '\t' || c == '\r')
                .filter(|word| !word.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn materialize_line_breaks(input: &str) -> String {
    LINE_BREAK_RE.replace_all(input, "\n").into_owned()
}

/// Squash consecutive blank lines into one and drop blank lines at both ends.
pub fn compact_empty_lines(input: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut previous_blank = true;

    for line in input.lines() {
        let blank = line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        lines.push(if blank { "" } else { line });
        previous_blank = blank;
    }

    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    lines.join("\n")
}

/// Join fragments with `separator`, except next to empty sides and newlines.
pub fn newline_join<S: AsRef<str>>(fragments: &[S], separator: &str) -> String {
    let mut joined = String::new();

    for fragment in fragments {
        let fragment = fragment.as_ref();
        let bare = joined.is_empty()
            || fragment.is_empty()
            || joined.ends_with('\n')
            || fragment.starts_with('\n');
        if !bare {
            joined.push_str(separator);
        }
        joined.push_str(fragment);
    }

    joined
}

pub fn parse_date(input: &str, formats: &[&str]) -> Option<NaiveDate> {
    let input = input.trim();
    formats
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(input, format).ok())
}

pub fn parse_epoch(input: &str) -> Option<NaiveDate> {
    let seconds: i64 = input.trim().parse().ok()?;
    DateTime::from_timestamp(seconds, 0).map(|dt| dt.date_naive())
}

/// Parse a count such as `1,000` or `12.345`; grouping separators are dropped.
pub fn parse_integer(input: &str) -> Option<u64> {
    let digits: String = input
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '.')
        .collect();
    digits.parse().ok()
}

/// Multiplier from a size unit to megabytes.
pub fn unit_to_mb(unit: char) -> Option<f64> {
    match unit.to_ascii_uppercase() {
        'K' => Some(1.0 / 1024.0),
        'M' => Some(1.0),
        'G' => Some(1024.0),
        _ => None,
    }
}

/// Parse `<number> <unit>` (K, M or G, optional `B`) into megabytes.
pub fn parse_size_mb(input: &str) -> Option<f64> {
    let caps = SIZE_RE.captures(input.trim())?;
    let number: f64 = caps.get(1)?.as_str().replace(',', "").parse().ok()?;
    let unit = caps.get(2)?.as_str().chars().next()?;
    Some(number * unit_to_mb(unit)?)
}

pub fn trailing_segment(input: &str) -> &str {
    let path = input
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    path.rsplit('/').next().unwrap_or_default().trim()
}

pub fn split_tokens<S: AsRef<str>>(fragments: &[S], delimiter: char) -> Vec<String> {
    fragments
        .iter()
        .flat_map(|fragment| fragment.as_ref().split(delimiter))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn resolve_url(base: Option<&Url>, input: &str) -> Option<String> {
    match base {
        Some(base) => base.join(input).ok().map(|url| url.to_string()),
        None => Url::parse(input).ok().map(|url| url.to_string()),
    }
}

/// Remove tags, comments, scripts and styles, then decode character references.
pub fn strip_markup(input: &str) -> String {
    let text = MARKUP_RE.replace_all(input, "");
    decode_entities(&text).trim().to_string()
}

/// Decode numeric references and the common named entities. Unknown names are
/// left as written.
pub fn decode_entities(input: &str) -> String {
    ENTITY_RE
        .replace_all(input, |caps: &regex::Captures| {
            let decoded = if let Some(dec) = caps.get(1) {
                dec.as_str().parse().ok().and_then(char::from_u32)
            } else if let Some(hex) = caps.get(2) {
                u32::from_str_radix(hex.as_str(), 16).ok().and_then(char::from_u32)
            } else {
                caps.get(3).and_then(|name| named_entity(name.as_str()))
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "copy" => '©',
        "reg" => '®',
        "trade" => '™',
        "hellip" => '…',
        "ndash" => '–',
        "mdash" => '—',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        _ => return None,
    };
    Some(c)
}
