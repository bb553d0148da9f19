use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

/// One detected object in a frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class label or grounded phrase, as reported by the backend.
    pub label: String,
    /// Confidence in `0..=1`.
    pub confidence: f32,
    /// Normalized box (0..1 coordinates).
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }

    /// Case-insensitive label comparison.
    pub fn same_label(&self, other: &str) -> bool {
        self.label.eq_ignore_ascii_case(other)
    }
}

/// Which labels the run pursues.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetSpec {
    /// Wildcard: every label qualifies.
    Any,
    /// Lowercased labels or phrases.
    Labels(Vec<String>),
}

impl TargetSpec {
    /// Parse a `;`-separated list (`"a bird;a cat"`). `*` anywhere in the
    /// list means every label.
    pub fn parse(raw: &str) -> Result<Self> {
        let labels: Vec<String> = raw
            .split(';')
            .map(|entry| entry.trim().to_lowercase())
            .filter(|entry| !entry.is_empty())
            .collect();
        if labels.is_empty() {
            return Err(anyhow!("target objects must name at least one label or '*'"));
        }
        if labels.iter().any(|label| label == "*") {
            return Ok(TargetSpec::Any);
        }
        Ok(TargetSpec::Labels(labels))
    }

    pub fn matches(&self, label: &str) -> bool {
        match self {
            TargetSpec::Any => true,
            TargetSpec::Labels(labels) => {
                let label = label.trim();
                labels.iter().any(|l| l.eq_ignore_ascii_case(label))
            }
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, TargetSpec::Any)
    }

    pub fn labels(&self) -> &[String] {
        match self {
            TargetSpec::Any => &[],
            TargetSpec::Labels(labels) => labels,
        }
    }
}
