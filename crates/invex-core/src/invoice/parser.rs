//! The strategy contract shared by every extraction parser and the registry.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ParserError;
use crate::models::invoice::{Invoice, LineItem};

/// Uniform output of every strategy and of the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserResult {
    /// Whether the strategy produced a usable extraction.
    pub success: bool,
    /// Extracted header data (absent on failure).
    pub invoice: Option<Invoice>,
    /// Extracted rows.
    pub items: Vec<LineItem>,
    /// Self-reported confidence (0.0 - 1.0).
    pub confidence: f32,
    /// Name of the strategy that produced this result.
    pub parser_name: String,
    /// Human-readable failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Diagnostic details.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl ParserResult {
    /// A successful extraction.
    pub fn success(
        parser_name: impl Into<String>,
        invoice: Invoice,
        items: Vec<LineItem>,
        confidence: f32,
    ) -> Self {
        Self {
            success: true,
            invoice: Some(invoice),
            items,
            confidence: confidence.clamp(0.0, 1.0),
            parser_name: parser_name.into(),
            error: None,
            metadata: BTreeMap::new(),
        }
    }

    /// A soft failure.
    pub fn failure(parser_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            invoice: None,
            items: Vec::new(),
            confidence: 0.0,
            parser_name: parser_name.into(),
            error: Some(error.into()),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether the registry returned this as a best effort below its threshold.
    pub fn is_below_threshold(&self) -> bool {
        self.metadata
            .get("below_threshold")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Optional caller hints for a parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseHints {
    /// Image of the invoice, required by the vision strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,

    /// Ask the vision strategy to claim the document regardless of text heuristics.
    #[serde(default)]
    pub prefer_vision: bool,

    /// Whitespace run separating table cells.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_gap: Option<usize>,

    /// Regex matching the table header row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_row_pattern: Option<String>,

    /// Unrecognized keys, kept for diagnostics.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ParseHints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build hints from a loosely-typed JSON object.
    pub fn from_value(value: Value) -> Result<Self, ParserError> {
        serde_json::from_value(value).map_err(|e| ParserError::InvalidHint {
            hint: "hints".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn with_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_path = Some(path.into());
        self
    }

    pub fn with_prefer_vision(mut self, prefer: bool) -> Self {
        self.prefer_vision = prefer;
        self
    }

    pub fn with_min_gap(mut self, min_gap: usize) -> Self {
        self.min_gap = Some(min_gap);
        self
    }

    pub fn with_header_row_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.header_row_pattern = Some(pattern.into());
        self
    }
}

/// An extraction strategy.
///
/// `can_parse` is a cheap pre-filter; `parse` does the real work. Soft failures
/// come back as an unsuccessful `ParserResult`; `Err` is reserved for faults.
#[async_trait]
pub trait InvoiceParser: Send + Sync {
    /// Unique strategy name.
    fn name(&self) -> &str;

    /// Higher runs first.
    fn priority(&self) -> i32;

    /// Estimate (0.0 - 1.0) of how well this strategy fits the input.
    fn can_parse(&self, text: &str, hints: &ParseHints) -> f32;

    /// Extract an invoice.
    async fn parse(
        &self,
        text: &str,
        filename: &str,
        hints: &ParseHints,
    ) -> Result<ParserResult, ParserError>;
}
