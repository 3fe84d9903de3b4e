use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::AssemblyError;
use crate::normalize::{CATALOG_DATE_FORMATS, Combinator, FieldSpec, Parse, Transform};
use crate::record::PartialRecord;

/// Cleanup for short inline text such as titles and labels.
const INLINE_TEXT: &[Transform] = &[Transform::CollapseWhitespace, Transform::Join(" ")];

/// Cleanup for free text whose paragraph breaks must survive.
const RICH_TEXT: &[Transform] = &[
    Transform::MaterializeLineBreaks,
    Transform::CollapseWhitespace,
    Transform::Join(" "),
    Transform::CompactEmptyLines,
];

const CELL_TEXT: &[Transform] = &[Transform::CollapseWhitespace];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Mod,
    ModFile,
}

/// The field bindings of one entity type.
#[derive(Debug)]
pub struct RecordSchema {
    pub kind: RecordKind,
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
}

impl RecordSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.name == name)
    }

    pub fn required(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|spec| spec.required)
    }
}

pub static MOD_SCHEMA: RecordSchema = RecordSchema {
    kind: RecordKind::Mod,
    name: "mod",
    fields: &[
        FieldSpec::new("name", Parse::Text).with(INLINE_TEXT).required(),
        FieldSpec::new("description", Parse::Text).with(RICH_TEXT),
        FieldSpec::new("authors", Parse::TokenSet)
            .with(&[Transform::CollapseWhitespace, Transform::Split(',')]),
        FieldSpec::new("created", Parse::Date(CATALOG_DATE_FORMATS)).with(INLINE_TEXT),
        FieldSpec::new("updated", Parse::Date(CATALOG_DATE_FORMATS)).with(INLINE_TEXT),
        FieldSpec::new("downloads", Parse::Integer).with(INLINE_TEXT),
        FieldSpec::new("categories", Parse::TokenSet)
            .with(&[Transform::TrailingSegment])
            .combine(Combinator::Union),
        FieldSpec::new("source_url", Parse::Text).with(&[Transform::ResolveUrl]),
        FieldSpec::new("donation_url", Parse::Text).with(&[Transform::ResolveUrl]),
        FieldSpec::new("mod_url", Parse::Text).required(),
        FieldSpec::new("license", Parse::Text)
            .with(&[Transform::StripMarkup, Transform::CompactEmptyLines])
            .required(),
    ],
};

pub static MOD_FILE_SCHEMA: RecordSchema = RecordSchema {
    kind: RecordKind::ModFile,
    name: "mod_file",
    fields: &[
        FieldSpec::new("mod", Parse::Text).required(),
        FieldSpec::new("name", Parse::Text).with(INLINE_TEXT).required(),
        FieldSpec::new("release", Parse::Channel).with(CELL_TEXT),
        FieldSpec::new("mc_version", Parse::Text).with(CELL_TEXT),
        FieldSpec::new("size", Parse::SizeMb).with(CELL_TEXT),
        FieldSpec::new("upload_date", Parse::Epoch).with(CELL_TEXT),
        FieldSpec::new("downloads", Parse::Integer).with(CELL_TEXT),
        FieldSpec::new("download_url", Parse::Text)
            .with(&[Transform::ResolveUrl])
            .required(),
        FieldSpec::new("md5", Parse::Text).with(INLINE_TEXT).required(),
        FieldSpec::new("changelog", Parse::Text).with(RICH_TEXT),
        FieldSpec::new("required_dependencies", Parse::List).with(CELL_TEXT),
        FieldSpec::new("optional_dependencies", Parse::List).with(CELL_TEXT),
    ],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseChannel {
    Release,
    Beta,
    Alpha,
}

impl ReleaseChannel {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "release" | "r" => Some(ReleaseChannel::Release),
            "beta" | "b" => Some(ReleaseChannel::Beta),
            "alpha" | "a" => Some(ReleaseChannel::Alpha),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mod {
    pub name: String,
    pub description: Option<String>,
    pub authors: BTreeSet<String>,
    pub created: Option<NaiveDate>,
    pub updated: Option<NaiveDate>,
    pub downloads: Option<u64>,
    pub categories: BTreeSet<String>,
    pub source_url: Option<String>,
    pub donation_url: Option<String>,
    pub mod_url: String,
    pub license: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModFile {
    #[serde(rename = "mod")]
    pub mod_name: String,
    pub name: String,
    pub release: Option<ReleaseChannel>,
    pub mc_version: Option<String>,
    /// Size in megabytes.
    pub size: Option<f64>,
    pub upload_date: Option<NaiveDate>,
    pub downloads: Option<u64>,
    pub download_url: String,
    pub md5: String,
    pub changelog: Option<String>,
    pub dependencies: Dependencies,
}

/// An immutable record emitted once every required field has arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletedRecord {
    Mod(Mod),
    ModFile(ModFile),
}

impl CompletedRecord {
    pub fn from_partial(record: &PartialRecord) -> Result<Self, AssemblyError> {
        match record.schema().kind {
            RecordKind::Mod => Mod::from_partial(record).map(CompletedRecord::Mod),
            RecordKind::ModFile => ModFile::from_partial(record).map(CompletedRecord::ModFile),
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            CompletedRecord::Mod(_) => RecordKind::Mod,
            CompletedRecord::ModFile(_) => RecordKind::ModFile,
        }
    }
}

fn require_text(record: &PartialRecord, field: &'static str) -> Result<String, AssemblyError> {
    record
        .text(field)
        .map(str::to_string)
        .ok_or_else(|| AssemblyError::MissingFields {
            record: record.schema().name,
            missing: vec![field],
        })
}

impl Mod {
    pub fn from_partial(record: &PartialRecord) -> Result<Self, AssemblyError> {
        let missing = record.missing_required();
        if !missing.is_empty() {
            return Err(AssemblyError::MissingFields {
                record: MOD_SCHEMA.name,
                missing,
            });
        }

        Ok(Self {
            name: require_text(record, "name")?,
            description: record.text("description").map(str::to_string),
            authors: record.set("authors"),
            created: record.date("created"),
            updated: record.date("updated"),
            downloads: record.integer("downloads"),
            categories: record.set("categories"),
            source_url: record.text("source_url").map(str::to_string),
            donation_url: record.text("donation_url").map(str::to_string),
            mod_url: require_text(record, "mod_url")?,
            license: require_text(record, "license")?,
        })
    }
}

impl ModFile {
    pub fn from_partial(record: &PartialRecord) -> Result<Self, AssemblyError> {
        let missing = record.missing_required();
        if !missing.is_empty() {
            return Err(AssemblyError::MissingFields {
                record: MOD_FILE_SCHEMA.name,
                missing,
            });
        }

        Ok(Self {
            mod_name: require_text(record, "mod")?,
            name: require_text(record, "name")?,
            release: record.get("release").and_then(|v| v.as_channel()),
            mc_version: record.text("mc_version").map(str::to_string),
            size: record.get("size").and_then(|v| v.as_float()),
            upload_date: record.date("upload_date"),
            downloads: record.integer("downloads"),
            download_url: require_text(record, "download_url")?,
            md5: require_text(record, "md5")?,
            changelog: record.text("changelog").map(str::to_string),
            dependencies: Dependencies {
                required: record.list("required_dependencies"),
                optional: record.list("optional_dependencies"),
            },
        })
    }
}
