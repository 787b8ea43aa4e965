//! Locating and validating the JSON payload in a vision model answer.

use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::PayloadError;
use crate::invoice::rules::{normalize_hs_code, parse_number};
use crate::models::invoice::{Invoice, LineItem};

lazy_static! {
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").unwrap();
}

const DEFAULT_CURRENCY: &str = "USD";

const HEADER_FIELD_WEIGHT: f32 = 0.1;
const ITEMS_WEIGHT: f32 = 0.6;
const PARTIAL_ITEM_WEIGHT: f32 = 0.5;

/// Where in the answer the payload was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadSource {
    /// The whole answer is JSON.
    Direct,
    /// Inside a fenced code block.
    Fenced,
    /// The first balanced `{...}` span.
    Braces,
}

impl PayloadSource {
    pub fn as_str(self) -> &'static str {
        match self {
            PayloadSource::Direct => "direct",
            PayloadSource::Fenced => "fenced",
            PayloadSource::Braces => "braces",
        }
    }
}

/// Find the JSON object in a model answer.
///
/// Tries the whole text, then each fenced code block, then the first balanced
/// brace span. `NotFound` means no candidate existed at all; `Syntax` means a
/// candidate was found but none parsed.
pub fn extract_json_payload(text: &str) -> Result<(Value, PayloadSource), PayloadError> {
    let mut syntax_error: Option<String> = None;
    let trimmed = text.trim();

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) if value.is_object() => return Ok((value, PayloadSource::Direct)),
        Ok(_) => {}
        Err(e) if trimmed.starts_with('{') => syntax_error = Some(e.to_string()),
        Err(_) => {}
    }

    for caps in FENCED_BLOCK.captures_iter(text) {
        let candidate = caps[1].trim();
        if candidate.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(candidate) {
            Ok(value) if value.is_object() => return Ok((value, PayloadSource::Fenced)),
            Ok(_) => {}
            Err(e) if candidate.starts_with(['{', '[']) => {
                syntax_error.get_or_insert(e.to_string());
            }
            Err(_) => {}
        }
    }

    if let Some(start) = text.find('{') {
        let Some(end) = matching_brace(&text[start..]) else {
            return Err(PayloadError::Syntax(
                syntax_error.unwrap_or_else(|| "unterminated JSON object".to_string()),
            ));
        };
        match serde_json::from_str::<Value>(&text[start..start + end]) {
            Ok(value) => return Ok((value, PayloadSource::Braces)),
            Err(e) => {
                syntax_error.get_or_insert(e.to_string());
            }
        }
    }

    Err(match syntax_error {
        Some(reason) => PayloadError::Syntax(reason),
        None => PayloadError::NotFound,
    })
}

/// Byte length of the balanced object starting at `s[0] == '{'`.
fn matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Invoice fields as answered by the model.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VisionPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub invoice_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub invoice_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub seller_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub buyer_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub currency: Option<String>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub total_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub subtotal: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub tax_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub discount_amount: Option<Decimal>,
    #[serde(default, alias = "line_items", deserialize_with = "lenient_items")]
    pub items: Vec<VisionItem>,
}

/// One line item as answered by the model.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VisionItem {
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub line_number: Option<Decimal>,
    #[serde(default, alias = "name", deserialize_with = "lenient_string")]
    pub item_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_hs_code")]
    pub hs_code: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub unit: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub brand: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub quantity: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub unit_price: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub total_price: Option<Decimal>,
}

impl VisionPayload {
    /// Validate a located payload. Header fields may sit at the top level or
    /// under `"invoice"`; top-level values win.
    pub fn from_value(value: Value) -> Result<Self, PayloadError> {
        let Value::Object(mut root) = value else {
            return Err(PayloadError::Schema("expected a JSON object".to_string()));
        };
        if let Some(Value::Object(nested)) = root.remove("invoice") {
            for (key, value) in nested {
                root.entry(key).or_insert(value);
            }
        }
        serde_json::from_value(Value::Object(root)).map_err(|e| PayloadError::Schema(e.to_string()))
    }

    /// Self-reported confidence from field presence and item completeness.
    pub fn confidence(&self) -> f32 {
        let header = [
            self.invoice_number.is_some(),
            self.invoice_date.is_some(),
            self.seller_name.is_some(),
            self.total_amount.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count() as f32
            * HEADER_FIELD_WEIGHT;

        let items = if self.items.is_empty() {
            0.0
        } else {
            let credit: f32 = self.items.iter().map(VisionItem::completeness).sum();
            ITEMS_WEIGHT * credit / self.items.len() as f32
        };

        (header + items).clamp(0.0, 1.0)
    }

    /// Convert to the shared invoice model.
    pub fn into_invoice(self) -> (Invoice, Vec<LineItem>) {
        let items: Vec<LineItem> = self
            .items
            .into_iter()
            .filter_map(VisionItem::into_line_item)
            .collect();

        let mut invoice = Invoice::new();
        invoice.invoice_number = self.invoice_number;
        invoice.invoice_date = self.invoice_date;
        invoice.seller_name = self.seller_name;
        invoice.buyer_name = self.buyer_name;
        invoice.currency = Some(
            self.currency
                .map(|c| c.to_uppercase())
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        );
        invoice.total_amount = self.total_amount;
        invoice.subtotal = self.subtotal;
        invoice.tax_amount = self.tax_amount;
        invoice.discount_amount = self.discount_amount;
        invoice.summarize_items(&items);

        (invoice, items)
    }
}

impl VisionItem {
    fn label(&self) -> Option<&String> {
        self.description.as_ref().or(self.item_name.as_ref())
    }

    /// 1.0 when description, quantity, unit price and total are all present;
    /// otherwise half credit scaled by how many are.
    fn completeness(&self) -> f32 {
        let present = [
            self.label().is_some(),
            self.quantity.is_some(),
            self.unit_price.is_some(),
            self.total_price.is_some(),
        ]
        .iter()
        .filter(|p| **p)
        .count();

        if present == 4 {
            1.0
        } else {
            PARTIAL_ITEM_WEIGHT * present as f32 / 4.0
        }
    }

    fn into_line_item(self) -> Option<LineItem> {
        let labelled = self.label().is_some();
        let name = self
            .item_name
            .clone()
            .or_else(|| self.description.clone())
            .unwrap_or_default();
        let mut item = LineItem::new(name.clone());
        item.description = self.description.unwrap_or(name);
        item.line_number = self.line_number.and_then(|n| n.trunc().to_string().parse().ok());
        item.hs_code = self.hs_code;
        item.unit = self.unit;
        item.brand = self.brand;
        item.model = self.model;
        item.quantity = self.quantity;
        item.unit_price = self.unit_price;
        item.total_price = self.total_price;
        (labelled || item.has_amounts()).then_some(item)
    }
}

fn is_null_like(s: &str) -> bool {
    let s = s.trim();
    s.is_empty()
        || s.eq_ignore_ascii_case("null")
        || s.eq_ignore_ascii_case("n/a")
        || s.eq_ignore_ascii_case("none")
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) if is_null_like(&s) => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_to_decimal(value: Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) if is_null_like(&s) => None,
        Value::String(s) => parse_number(&s),
        _ => None,
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Value>::deserialize(d)?.and_then(value_to_string))
}

fn lenient_decimal<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Decimal>, D::Error> {
    Ok(Option::<Value>::deserialize(d)?.and_then(value_to_decimal))
}

fn lenient_hs_code<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Value>::deserialize(d)?
        .and_then(value_to_string)
        .and_then(|s| normalize_hs_code(&s)))
}

fn lenient_items<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<VisionItem>, D::Error> {
    Ok(Option::<Vec<VisionItem>>::deserialize(d)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_direct_payload() {
        let (value, source) = extract_json_payload(r#"  {"invoice_number": "A-1"} "#).unwrap();
        assert_eq!(source, PayloadSource::Direct);
        assert_eq!(value["invoice_number"], json!("A-1"));
    }

    #[test]
    fn test_fenced_payload_amid_prose() {
        let text = "Sure! Here is the data:\n```json\n{\"invoice_number\": \"F-9\", \"items\": []}\n```\nLet me know if you need more.";
        let (value, source) = extract_json_payload(text).unwrap();
        assert_eq!(source, PayloadSource::Fenced);
        assert_eq!(value["invoice_number"], json!("F-9"));
    }

    #[test]
    fn test_braces_payload() {
        let text = "The invoice is {\"seller_name\": \"Brace {Co}\", \"total_amount\": 5} as requested.";
        let (value, source) = extract_json_payload(text).unwrap();
        assert_eq!(source, PayloadSource::Braces);
        assert_eq!(value["seller_name"], json!("Brace {Co}"));
    }

    #[test]
    fn test_no_payload() {
        let err = extract_json_payload("I could not read this image.").unwrap_err();
        assert!(matches!(err, PayloadError::NotFound));
        assert_eq!(err.to_string(), "no structured payload found in response");
    }

    #[test]
    fn test_prose_fence_is_not_a_payload() {
        let err = extract_json_payload("```\nI am unable to read this invoice.\n```").unwrap_err();
        assert!(matches!(err, PayloadError::NotFound));
    }

    #[test]
    fn test_malformed_payload_is_syntax_error() {
        let err = extract_json_payload("Result: {\"invoice_number\": ").unwrap_err();
        assert!(matches!(err, PayloadError::Syntax(_)));

        let err = extract_json_payload("```json\n{\"a\": 1,,}\n```").unwrap_err();
        assert!(matches!(err, PayloadError::Syntax(_)));
    }

    #[test]
    fn test_lenient_validation() {
        let payload = VisionPayload::from_value(json!({
            "invoice": {
                "invoice_number": "INV-7",
                "invoice_date": "N/A",
                "seller_name": "Nile Traders",
                "total_amount": "1,250.50"
            },
            "currency": "null",
            "line_items": [
                {"description": "Cotton yarn", "hs_code": "5205.12.00", "quantity": "1,000",
                 "unit_price": 1.25, "total_price": "1,250.50"},
                {"description": "Freight", "hs_code": "12AB", "quantity": null}
            ]
        }))
        .unwrap();

        assert_eq!(payload.invoice_number.as_deref(), Some("INV-7"));
        assert_eq!(payload.invoice_date, None);
        assert_eq!(payload.total_amount, Some(Decimal::from_str("1250.50").unwrap()));
        assert_eq!(payload.items.len(), 2);
        assert_eq!(payload.items[0].hs_code.as_deref(), Some("52051200"));
        assert_eq!(payload.items[0].quantity, Some(Decimal::from(1000)));
        assert_eq!(payload.items[1].hs_code, None);

        let (invoice, items) = payload.into_invoice();
        assert_eq!(invoice.currency.as_deref(), Some("USD"));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].item_name, "Cotton yarn");
    }

    #[test]
    fn test_empty_rows_are_dropped() {
        let payload = VisionPayload::from_value(json!({
            "items": [
                {"hs_code": "520512"},
                {"total_price": "15.00"},
                {"item_name": "Spindle"}
            ]
        }))
        .unwrap();

        let (_, items) = payload.into_invoice();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].item_name, "");
        assert_eq!(items[0].total_price, Some(Decimal::from(15)));
        assert_eq!(items[1].item_name, "Spindle");
    }

    #[test]
    fn test_schema_error() {
        let err = VisionPayload::from_value(json!(["not", "an", "object"])).unwrap_err();
        assert!(matches!(err, PayloadError::Schema(_)));

        let err = VisionPayload::from_value(json!({"items": "nope"})).unwrap_err();
        assert!(matches!(err, PayloadError::Schema(_)));
    }

    #[test]
    fn test_confidence_scale() {
        assert_eq!(VisionPayload::default().confidence(), 0.0);

        let full = VisionPayload::from_value(json!({
            "invoice_number": "X-1",
            "invoice_date": "2024-01-01",
            "seller_name": "Seller",
            "total_amount": 10,
            "items": [{"description": "A", "quantity": 1, "unit_price": 10, "total_price": 10}]
        }))
        .unwrap();
        assert!(full.confidence() >= 0.8);

        let partial = VisionPayload::from_value(json!({
            "invoice_number": "X-1",
            "items": [{"description": "A", "quantity": 1}]
        }))
        .unwrap();
        // 0.1 header + 0.6 * 0.5 * 2/4
        assert!((partial.confidence() - 0.25).abs() < 1e-6);
    }
}
