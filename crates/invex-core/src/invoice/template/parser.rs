//! Template-driven extraction.

use std::sync::Arc;

use async_trait::async_trait;
use regex::{Captures, Regex};
use tracing::{debug, info};

use crate::error::ParserError;
use crate::invoice::parser::{InvoiceParser, ParseHints, ParserResult};
use crate::invoice::rules::{collapse_whitespace, normalize_hs_code, parse_number};
use crate::models::invoice::{Invoice, LineItem};

use super::{CompiledTemplate, HeaderField, TemplateDetector};

/// Strategy name.
pub const TEMPLATE_PARSER: &str = "template";

/// Extracts invoices whose issuer has a known template.
pub struct TemplateParser {
    detector: Arc<TemplateDetector>,
}

impl TemplateParser {
    pub fn new(detector: Arc<TemplateDetector>) -> Self {
        Self { detector }
    }

    /// Apply one template to the text.
    pub fn extract(&self, template: &CompiledTemplate, text: &str) -> (Invoice, Vec<LineItem>) {
        let mut invoice = Invoice::new();
        for (field, pattern) in &template.fields {
            if let Some(value) = capture_field(pattern, text) {
                set_field(&mut invoice, *field, value);
            }
        }

        let items = match &template.item {
            Some(pattern) => extract_items(pattern, text, &template.id),
            None => Vec::new(),
        };

        invoice.summarize_items(&items);
        (invoice, items)
    }
}

#[async_trait]
impl InvoiceParser for TemplateParser {
    fn name(&self) -> &str {
        TEMPLATE_PARSER
    }

    fn priority(&self) -> i32 {
        100
    }

    fn can_parse(&self, text: &str, _hints: &ParseHints) -> f32 {
        self.detector.detect(text).map(|m| m.confidence).unwrap_or(0.0)
    }

    async fn parse(
        &self,
        text: &str,
        filename: &str,
        _hints: &ParseHints,
    ) -> Result<ParserResult, ParserError> {
        let Some(found) = self.detector.detect(text) else {
            return Ok(ParserResult::failure(TEMPLATE_PARSER, "no template matched"));
        };

        let Some(template) = self.detector.library().get(&found.template_id) else {
            return Ok(ParserResult::failure(
                TEMPLATE_PARSER,
                format!("template {} is not loaded", found.template_id),
            ));
        };

        let (mut invoice, items) = self.extract(&template, text);
        if items.is_empty() && !invoice.has_header_data() {
            return Ok(ParserResult::failure(
                TEMPLATE_PARSER,
                format!("template {} matched but extracted nothing", template.id),
            )
            .with_metadata("template_id", template.id.clone()));
        }

        invoice.template_id = Some(template.id.clone());
        invoice.template_confidence = Some(found.confidence);

        info!(
            "Template {} extracted {} items from {} (score {:.2})",
            template.id,
            items.len(),
            filename,
            found.confidence
        );

        let hints = serde_json::to_value(&found.parser_hints).unwrap_or_default();
        Ok(
            ParserResult::success(TEMPLATE_PARSER, invoice, items, found.confidence)
                .with_metadata("template_id", found.template_id)
                .with_metadata("template_name", found.name)
                .with_metadata("company_key", found.company_key)
                .with_metadata("parser_hints", hints),
        )
    }
}

fn capture_field(pattern: &Regex, text: &str) -> Option<String> {
    let caps = pattern.captures(text)?;
    let m = caps.get(1).or_else(|| caps.get(0))?;
    let value = m.as_str().trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn set_field(invoice: &mut Invoice, field: HeaderField, value: String) {
    match field {
        HeaderField::InvoiceNumber => invoice.invoice_number = Some(value),
        HeaderField::InvoiceDate => invoice.invoice_date = Some(value),
        HeaderField::SellerName => invoice.seller_name = Some(value),
        HeaderField::BuyerName => invoice.buyer_name = Some(value),
        HeaderField::Currency => invoice.currency = Some(value.to_uppercase()),
        HeaderField::TotalAmount => invoice.total_amount = parse_number(&value),
        HeaderField::Subtotal => invoice.subtotal = parse_number(&value),
        HeaderField::TaxAmount => invoice.tax_amount = parse_number(&value),
        HeaderField::Discount => invoice.discount_amount = parse_number(&value),
        HeaderField::TotalQuantity => invoice.total_quantity = parse_number(&value),
    }
}

fn extract_items(pattern: &Regex, text: &str, template_id: &str) -> Vec<LineItem> {
    pattern
        .captures_iter(text)
        .filter_map(|caps| item_from_captures(&caps, template_id))
        .collect()
}

fn item_from_captures(caps: &Captures<'_>, template_id: &str) -> Option<LineItem> {
    let group = |name: &str| {
        caps.name(name)
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
    };

    // An HS code that is not a 6-10 digit run means the row was mis-captured.
    let hs_code = match group("hs_code") {
        Some(raw) => match normalize_hs_code(raw) {
            Some(code) => Some(code),
            None => {
                debug!("Template {}: dropping row with HS code {:?}", template_id, raw);
                return None;
            }
        },
        None => None,
    };

    let description = group("description").map(collapse_whitespace).unwrap_or_default();
    let item_name = group("item_name")
        .map(collapse_whitespace)
        .unwrap_or_else(|| description.clone());

    let mut item = LineItem::new(item_name);
    item.description = description;
    item.hs_code = hs_code;
    item.line_number = group("line_number").and_then(|s| s.parse().ok());
    item.unit = group("unit").map(str::to_string);
    item.brand = group("brand").map(str::to_string);
    item.model = group("model").map(str::to_string);
    item.quantity = group("quantity").and_then(parse_number);
    item.unit_price = group("unit_price").and_then(parse_number);
    item.total_price = group("total_price").and_then(parse_number);

    Some(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::template::tests::acme_definition;
    use crate::invoice::template::TemplateLibrary;
    use crate::models::invoice::{ParsingStatus, RowType};
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const ACME_INVOICE: &str = "ACME Trading LLC\nTAX INVOICE\nTRN 100200300\nInvoice # AC-7781\nDate: 03/02/2024\nCurrency: AED\n\n1|Steel bolts M8|7318.15.00|100|PCS|0.50|50.00\n2|Copper wire|ABC123|10|ROLL|12.00|120.00\n3|Hex nuts|73181600|200|PCS|0.10|20.00\n\nAmount Due: 1,070.00\n";

    fn parser() -> TemplateParser {
        let library = Arc::new(TemplateLibrary::from_definitions([acme_definition()]).unwrap());
        TemplateParser::new(Arc::new(TemplateDetector::new(library)))
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn test_parse_acme_invoice() {
        let parser = parser();
        assert_eq!(parser.can_parse(ACME_INVOICE, &ParseHints::new()), 1.0);

        let result = parser
            .parse(ACME_INVOICE, "acme.txt", &ParseHints::new())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.parser_name, TEMPLATE_PARSER);
        assert_eq!(result.metadata.get("template_id"), Some(&serde_json::json!("acme_v1")));

        let invoice = result.invoice.unwrap();
        assert_eq!(invoice.invoice_number.as_deref(), Some("AC-7781"));
        assert_eq!(invoice.invoice_date.as_deref(), Some("03/02/2024"));
        assert_eq!(invoice.seller_name.as_deref(), Some("ACME Trading LLC"));
        assert_eq!(invoice.currency.as_deref(), Some("AED"));
        assert_eq!(invoice.total_amount, Some(dec("1070.00")));
        assert_eq!(invoice.template_id.as_deref(), Some("acme_v1"));
        assert_eq!(invoice.template_confidence, Some(1.0));
        assert_eq!(invoice.status, ParsingStatus::Parsed);

        // Row 2 has a malformed HS code and is rejected.
        assert_eq!(result.items.len(), 2);
        let bolts = &result.items[0];
        assert_eq!(bolts.line_number, Some(1));
        assert_eq!(bolts.item_name, "Steel bolts M8");
        assert_eq!(bolts.hs_code.as_deref(), Some("73181500"));
        assert_eq!(bolts.quantity, Some(dec("100")));
        assert_eq!(bolts.unit.as_deref(), Some("PCS"));
        assert_eq!(bolts.unit_price, Some(dec("0.50")));
        assert_eq!(bolts.total_price, Some(dec("50.00")));
        assert_eq!(bolts.row_type, RowType::LineItem);
        assert_eq!(result.items[1].line_number, Some(3));
        assert_eq!(invoice.total_quantity, Some(dec("300")));
    }

    #[tokio::test]
    async fn test_no_template_is_soft_failure() {
        let parser = parser();
        let text = "Some other company\ninvoice";
        assert_eq!(parser.can_parse(text, &ParseHints::new()), 0.0);

        let result = parser.parse(text, "other.txt", &ParseHints::new()).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("no template matched"));
    }

    #[tokio::test]
    async fn test_empty_library_never_matches() {
        let detector = TemplateDetector::new(Arc::new(TemplateLibrary::new()));
        let parser = TemplateParser::new(Arc::new(detector));
        assert_eq!(parser.can_parse(ACME_INVOICE, &ParseHints::new()), 0.0);
    }
}
