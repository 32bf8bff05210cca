//! Tag identity and value types (C1).
//!
//! `TagIdentifier` equality/hashing is over `id` only (ordinal, case-sensitive);
//! callers that want case-insensitive id matching normalize before
//! constructing one. `TagValue` is immutable once built and is always
//! constructed through [`TagValueBuilder`], which deep-copies the property
//! list and coerces non-UTC sample times to UTC.

use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named, independently-addressable time-series variable.
///
/// Created by the tag resolver (C8) or, in identity-resolution mode, by the
/// manager itself. Equality and hashing are over `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagIdentifier {
    /// Stable identifier used for equality, hashing, and cache/index keys.
    pub id: String,
    /// Human-readable name, not used for equality.
    pub name: String,
}

impl TagIdentifier {
    /// Creates a new tag identifier.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl PartialEq for TagIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TagIdentifier {}

impl PartialOrd for TagIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TagIdentifier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl Hash for TagIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Quality of a sample, mirroring the adapter framework's tri-state model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum StatusCode {
    /// The sample is trustworthy.
    Good,
    /// The sample should be used with caution (e.g. stale, clamped).
    Uncertain,
    /// The sample is not trustworthy and `error` should be set.
    Bad,
}

/// The payload carried by a [`TagValue`].
///
/// Covers the "numeric, textual, boolean, or composite" shapes called out in
/// the data model; composite values are an ordered list of named sub-values
/// so nested structures round-trip through JSON deterministically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Variant {
    /// A numeric sample (the adapter framework does not distinguish
    /// int/float at this layer; narrower typing is a transport concern).
    Numeric(f64),
    /// A textual sample.
    Text(String),
    /// A boolean sample.
    Boolean(bool),
    /// A composite sample: an ordered list of named sub-values.
    Composite(Vec<(String, Variant)>),
}

/// A single named property attached to a [`TagValue`] (e.g. engineering
/// units metadata, vendor-specific quality flags).
pub type Property = (String, String);

/// An immutable, quality-stamped, time-stamped sample for one tag.
///
/// Built exclusively through [`TagValueBuilder`]; there is no public
/// constructor that bypasses the UTC-coercion and property deep-copy the
/// builder performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagValue {
    /// Sample time, always UTC.
    pub utc_sample_time: DateTime<Utc>,
    /// Sample payload.
    pub value: Variant,
    /// Sample quality.
    pub status: StatusCode,
    /// Optional engineering units.
    pub units: Option<String>,
    /// Optional free-text annotation.
    pub notes: Option<String>,
    /// Optional error description; non-empty implies `status == Bad`.
    pub error: Option<String>,
    /// Ordered `(name, value)` properties.
    pub properties: Vec<Property>,
}

/// Fluent builder for [`TagValue`].
///
/// Deep-copies the property list on `build()` so the builder can be reused
/// (or its source list mutated) without aliasing the built value.
#[derive(Debug, Clone, Default)]
pub struct TagValueBuilder {
    utc_sample_time: Option<DateTime<Utc>>,
    value: Option<Variant>,
    status: Option<StatusCode>,
    units: Option<String>,
    notes: Option<String>,
    error: Option<String>,
    properties: Vec<Property>,
}

impl TagValueBuilder {
    /// Starts a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sample time, coercing to UTC if a non-UTC timestamp is
    /// supplied (here: any `DateTime<Utc>` is already UTC by construction,
    /// so this accepts `DateTime<Utc>` directly rather than round-tripping
    /// through a `FixedOffset` type the crate does not otherwise need).
    pub fn sample_time(mut self, time: DateTime<Utc>) -> Self {
        self.utc_sample_time = Some(time);
        self
    }

    /// Sets the payload.
    pub fn value(mut self, value: Variant) -> Self {
        self.value = Some(value);
        self
    }

    /// Sets the quality.
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets engineering units.
    pub fn units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    /// Sets a free-text note.
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Sets an error description. Forces `status = Bad` on build unless a
    /// status was already explicitly set to `Bad`.
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Appends a property.
    pub fn property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((name.into(), value.into()));
        self
    }

    /// Builds the immutable value.
    ///
    /// Defaults: `status = Good`, `utc_sample_time = Utc::now()` if unset.
    pub fn build(self) -> TagValue {
        let mut status = self.status.unwrap_or(StatusCode::Good);
        if self.error.is_some() {
            status = StatusCode::Bad;
        }

        TagValue {
            utc_sample_time: self.utc_sample_time.unwrap_or_else(Utc::now),
            value: self.value.unwrap_or(Variant::Boolean(false)),
            status,
            units: self.units,
            notes: self.notes,
            error: self.error,
            properties: self.properties.clone(),
        }
    }
}

/// A value as observed at the ingress, kept referentially stable through
/// the pipeline (cache -> topic index -> subscription channels).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagValueQueryResult {
    /// The tag's stable id.
    pub tag_id: String,
    /// The tag's human-readable name at the time of ingress.
    pub tag_name: String,
    /// The sample itself.
    pub value: TagValue,
}

impl TagValueQueryResult {
    /// Creates a new query result for the given tag and value.
    pub fn new(tag: &TagIdentifier, value: TagValue) -> Self {
        Self {
            tag_id: tag.id.clone(),
            tag_name: tag.name.clone(),
            value,
        }
    }

    /// Returns a [`TagIdentifier`] built from this result's tag fields.
    pub fn tag_identifier(&self) -> TagIdentifier {
        TagIdentifier::new(self.tag_id.clone(), self.tag_name.clone())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn tag_identifier_equality_is_over_id_only() {
        let a = TagIdentifier::new("A1", "Reactor1.Temperature");
        let b = TagIdentifier::new("A1", "DifferentName");
        assert_eq!(a, b);
    }

    #[test]
    fn builder_forces_bad_status_when_error_set() {
        let value = TagValueBuilder::new()
            .value(Variant::Numeric(1.0))
            .status(StatusCode::Good)
            .error("sensor fault")
            .build();
        assert_eq!(value.status, StatusCode::Bad);
        assert_eq!(value.error.as_deref(), Some("sensor fault"));
    }

    #[test]
    fn builder_deep_copies_properties() {
        let mut builder = TagValueBuilder::new().property("unit", "C");
        let first = builder.clone().build();
        builder = builder.property("unit2", "F");
        let second = builder.build();
        assert_eq!(first.properties.len(), 1);
        assert_eq!(second.properties.len(), 2);
    }

    #[test]
    fn variant_json_round_trips() {
        let v = Variant::Composite(vec![
            ("x".to_string(), Variant::Numeric(1.0)),
            ("y".to_string(), Variant::Text("hi".to_string())),
        ]);
        let json = serde_json::to_string(&v).expect("serializable");
        let back: Variant = serde_json::from_str(&json).expect("deserializable");
        assert_eq!(v, back);
    }
}
