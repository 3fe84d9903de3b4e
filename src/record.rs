use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use url::Url;

use crate::error::AssemblyError;
use crate::normalize::{RawFragments, Value, normalize};
use crate::schema::RecordSchema;

/// Raw fragments pulled from one page, keyed by the field they feed.
///
/// A field may appear more than once when several queries contribute to it;
/// contributions are merged in the order they were added.
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    base: Option<Url>,
    fields: Vec<(&'static str, RawFragments)>,
}

impl Extracted {
    pub fn new(base: &Url) -> Self {
        Self {
            base: Some(base.clone()),
            fields: Vec::new(),
        }
    }

    pub fn add(&mut self, field: &'static str, fragments: RawFragments) -> &mut Self {
        self.fields.push((field, fragments));
        self
    }

    pub fn add_value(&mut self, field: &'static str, value: impl Into<String>) -> &mut Self {
        self.add(field, RawFragments::single(value))
    }

    pub fn base(&self) -> Option<&Url> {
        self.base.as_ref()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &RawFragments)> {
        self.fields.iter().map(|(name, fragments)| (*name, fragments))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A record under assembly. Fields change only through [`PartialRecord::merge`].
#[derive(Debug, Clone, Serialize)]
pub struct PartialRecord {
    #[serde(skip)]
    schema: &'static RecordSchema,
    fields: BTreeMap<&'static str, Value>,
}

impl PartialEq for PartialRecord {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.schema, other.schema) && self.fields == other.fields
    }
}

impl PartialRecord {
    pub fn new(schema: &'static RecordSchema) -> Self {
        Self {
            schema,
            fields: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &'static RecordSchema {
        self.schema
    }

    /// Combine a typed value into `field` with the field's output combinator.
    pub fn merge(&mut self, field: &str, value: Value) -> Result<(), AssemblyError> {
        let spec = self
            .schema
            .field(field)
            .ok_or_else(|| AssemblyError::UnknownField {
                record: self.schema.name,
                field: field.to_string(),
            })?;

        let merged = match self.fields.remove(spec.name) {
            Some(existing) => spec.combinator.combine(existing, value),
            None => value,
        };
        self.fields.insert(spec.name, merged);
        Ok(())
    }

    /// Normalize raw fragments for `field` and merge the result.
    ///
    /// Unconvertible input is stored as [`Value::Null`]; nothing extracted
    /// leaves the field untouched.
    pub fn merge_fragments(
        &mut self,
        field: &str,
        fragments: &RawFragments,
        base: Option<&Url>,
    ) -> Result<(), AssemblyError> {
        let spec = self
            .schema
            .field(field)
            .ok_or_else(|| AssemblyError::UnknownField {
                record: self.schema.name,
                field: field.to_string(),
            })?;

        match normalize(spec, fragments, base) {
            Ok(Some(value)) => self.merge(field, value),
            Ok(None) => Ok(()),
            Err(e) => {
                log::warn!("{}", e);
                self.merge(field, Value::Null)
            }
        }
    }

    pub fn merge_extracted(&mut self, extracted: &Extracted) {
        for (field, fragments) in extracted.fields() {
            if let Err(e) = self.merge_fragments(field, fragments, extracted.base()) {
                log::warn!("Dropped fragments: {}", e);
            }
        }
    }

    /// Required fields that are absent or null.
    pub fn missing_required(&self) -> Vec<&'static str> {
        self.schema
            .required()
            .filter(|spec| self.fields.get(spec.name).is_none_or(Value::is_null))
            .map(|spec| spec.name)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_required().is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_text)
    }

    pub fn integer(&self, field: &str) -> Option<u64> {
        self.get(field).and_then(Value::as_integer)
    }

    pub fn date(&self, field: &str) -> Option<NaiveDate> {
        self.get(field).and_then(Value::as_date)
    }

    pub fn set(&self, field: &str) -> BTreeSet<String> {
        self.get(field)
            .and_then(Value::as_set)
            .cloned()
            .unwrap_or_default()
    }

    pub fn list(&self, field: &str) -> Vec<String> {
        self.get(field)
            .and_then(Value::as_list)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }
}
