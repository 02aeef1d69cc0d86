//! Semantic events produced by recognizers and classifiers.

use crate::collector::{FeatureType, SampleValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Semantic label of an event, e.g. `HIGH`, `WALKING` or `DANGEROUS`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A recognized or classified condition awaiting dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    pub feature_type: FeatureType,
    pub label: Label,
    pub raw_value: Option<SampleValue>,
    /// Log only, do not actuate
    pub gated: bool,
}

impl Event {
    pub fn new(
        timestamp: DateTime<Utc>,
        source_id: impl Into<String>,
        feature_type: FeatureType,
        label: Label,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            source_id: source_id.into(),
            feature_type,
            label,
            raw_value: None,
            gated: false,
        }
    }

    pub fn with_value(mut self, value: SampleValue) -> Self {
        self.raw_value = Some(value);
        self
    }

    pub fn gated(mut self, gated: bool) -> Self {
        self.gated = gated;
        self
    }
}
