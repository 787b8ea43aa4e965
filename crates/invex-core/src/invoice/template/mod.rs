//! Company-specific invoice templates.
//!
//! A template is a set of detection patterns (used to recognize the issuer's
//! layout), one pattern per header field, and an item pattern whose named
//! groups map onto [`LineItem`](crate::models::invoice::LineItem) fields.
//! Templates are JSON files loaded from a directory at startup.

mod detector;
mod parser;

pub use detector::{TemplateDetector, TemplateMatch};
pub use parser::TemplateParser;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::TemplateError;

/// Header fields a template may extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HeaderField {
    InvoiceNumber,
    InvoiceDate,
    SellerName,
    BuyerName,
    Currency,
    TotalAmount,
    Subtotal,
    TaxAmount,
    Discount,
    TotalQuantity,
}

impl HeaderField {
    /// Parse a field key as written in template files.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "invoice_number" => Some(Self::InvoiceNumber),
            "invoice_date" => Some(Self::InvoiceDate),
            "seller_name" => Some(Self::SellerName),
            "buyer_name" => Some(Self::BuyerName),
            "currency" => Some(Self::Currency),
            "total_amount" => Some(Self::TotalAmount),
            "subtotal" => Some(Self::Subtotal),
            "tax_amount" => Some(Self::TaxAmount),
            "discount" => Some(Self::Discount),
            "total_quantity" => Some(Self::TotalQuantity),
            _ => None,
        }
    }
}

/// A template as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDefinition {
    /// Unique template id.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Key of the issuing company.
    #[serde(default)]
    pub company_key: String,

    /// Patterns whose matches identify this layout.
    pub detection_patterns: Vec<String>,

    /// Header field key -> pattern (first capture group or whole match).
    #[serde(default)]
    pub field_patterns: BTreeMap<String, String>,

    /// Pattern applied repeatedly to extract items (named groups).
    #[serde(default)]
    pub item_pattern: Option<String>,

    /// Strategy-specific hints passed through with a match.
    #[serde(default)]
    pub parser_hints: BTreeMap<String, Value>,
}

/// A template with its patterns compiled.
#[derive(Debug)]
pub struct CompiledTemplate {
    pub id: String,
    pub name: String,
    pub company_key: String,
    pub detection: Vec<Regex>,
    pub fields: Vec<(HeaderField, Regex)>,
    pub item: Option<Regex>,
    pub parser_hints: BTreeMap<String, Value>,
}

impl CompiledTemplate {
    /// Compile a template definition.
    ///
    /// Patterns are compiled in multi-line mode so `^`/`$` anchor on lines.
    pub fn compile(def: TemplateDefinition) -> Result<Self, TemplateError> {
        let detection = def
            .detection_patterns
            .iter()
            .enumerate()
            .map(|(i, p)| compile_pattern(&def.id, &format!("detection_patterns[{i}]"), p))
            .collect::<Result<Vec<_>, _>>()?;

        let mut fields = Vec::new();
        for (key, pattern) in &def.field_patterns {
            let Some(field) = HeaderField::from_key(key) else {
                warn!("Template {}: ignoring unknown field pattern {}", def.id, key);
                continue;
            };
            fields.push((field, compile_pattern(&def.id, key, pattern)?));
        }

        let item = def
            .item_pattern
            .as_deref()
            .map(|p| compile_pattern(&def.id, "item_pattern", p))
            .transpose()?;

        Ok(Self {
            id: def.id,
            name: def.name,
            company_key: def.company_key,
            detection,
            fields,
            item,
            parser_hints: def.parser_hints,
        })
    }

    /// Fraction of detection patterns that match the text.
    pub fn detection_score(&self, text: &str) -> f32 {
        if self.detection.is_empty() {
            return 0.0;
        }
        let matches = self.detection.iter().filter(|re| re.is_match(text)).count();
        matches as f32 / self.detection.len() as f32
    }
}

fn compile_pattern(template: &str, field: &str, pattern: &str) -> Result<Regex, TemplateError> {
    RegexBuilder::new(pattern)
        .multi_line(true)
        .build()
        .map_err(|source| TemplateError::Pattern {
            template: template.to_string(),
            field: field.to_string(),
            source,
        })
}

/// The set of known templates.
#[derive(Debug, Default)]
pub struct TemplateLibrary {
    templates: Vec<Arc<CompiledTemplate>>,
}

impl TemplateLibrary {
    /// An empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile templates built in code.
    pub fn from_definitions(
        defs: impl IntoIterator<Item = TemplateDefinition>,
    ) -> Result<Self, TemplateError> {
        let mut library = Self::new();
        for def in defs {
            library.add(def)?;
        }
        Ok(library)
    }

    /// Load every `*.json` template in a directory, in file-name order.
    pub fn load_dir(dir: &Path) -> Result<Self, TemplateError> {
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();

        let mut library = Self::new();
        for path in paths {
            let content = fs::read_to_string(&path)?;
            let def: TemplateDefinition =
                serde_json::from_str(&content).map_err(|e| TemplateError::InvalidFile {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            debug!("Loaded template {} from {}", def.id, path.display());
            library.add(def)?;
        }

        info!("Loaded {} templates from {}", library.len(), dir.display());
        Ok(library)
    }

    /// Compile and add a template.
    pub fn add(&mut self, def: TemplateDefinition) -> Result<(), TemplateError> {
        if self.get(&def.id).is_some() {
            return Err(TemplateError::DuplicateId(def.id));
        }
        self.templates.push(Arc::new(CompiledTemplate::compile(def)?));
        Ok(())
    }

    /// Look up a template by id.
    pub fn get(&self, id: &str) -> Option<Arc<CompiledTemplate>> {
        self.templates.iter().find(|t| t.id == id).cloned()
    }

    /// Iterate templates in load order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CompiledTemplate>> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn acme_definition() -> TemplateDefinition {
        serde_json::from_value(serde_json::json!({
            "id": "acme_v1",
            "name": "ACME Trading LLC",
            "company_key": "acme",
            "detection_patterns": [
                "ACME Trading LLC",
                "(?i)tax invoice",
                "TRN\\s*100200300"
            ],
            "field_patterns": {
                "invoice_number": "Invoice #\\s*(\\S+)",
                "invoice_date": "Date:\\s*(\\d{2}/\\d{2}/\\d{4})",
                "seller_name": "ACME Trading LLC",
                "currency": "Currency:\\s*([A-Z]{3})",
                "total_amount": "Amount Due:\\s*([\\d,]+\\.\\d{2})"
            },
            "item_pattern": "^(?P<line_number>\\d+)\\|(?P<item_name>[^|]+)\\|(?P<hs_code>[^|]*)\\|(?P<quantity>[\\d.]+)\\|(?P<unit>\\w+)\\|(?P<unit_price>[\\d,.]+)\\|(?P<total_price>[\\d,.]+)$",
            "parser_hints": {"min_gap": 3}
        }))
        .unwrap()
    }

    #[test]
    fn test_detection_score() {
        let template = CompiledTemplate::compile(acme_definition()).unwrap();
        assert_eq!(template.detection_score("ACME Trading LLC\nTAX INVOICE"), 2.0 / 3.0);
        assert_eq!(template.detection_score("unrelated"), 0.0);
    }

    #[test]
    fn test_invalid_pattern_names_template_and_field() {
        let mut def = acme_definition();
        def.item_pattern = Some("(unclosed".to_string());
        let err = CompiledTemplate::compile(def).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("acme_v1"));
        assert!(message.contains("item_pattern"));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = TemplateLibrary::from_definitions([acme_definition(), acme_definition()]);
        assert!(matches!(result, Err(TemplateError::DuplicateId(id)) if id == "acme_v1"));
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        let json = serde_json::to_string_pretty(&acme_definition()).unwrap();
        fs::write(dir.path().join("acme.json"), json).unwrap();
        fs::write(dir.path().join("README.txt"), "not a template").unwrap();

        let library = TemplateLibrary::load_dir(dir.path()).unwrap();
        assert_eq!(library.len(), 1);
        assert!(library.get("acme_v1").is_some());
    }

    #[test]
    fn test_load_dir_reports_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

        let err = TemplateLibrary::load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidFile { .. }));
    }
}
