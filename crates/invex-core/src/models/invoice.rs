//! Invoice data models produced by the extraction strategies.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Version tag stamped on every extracted invoice.
pub const PARSER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Header-level fields of an extracted invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Invoice number/identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,

    /// Invoice date as printed (not normalized).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_date: Option<String>,

    /// Seller (issuer) name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_name: Option<String>,

    /// Buyer (receiver) name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_name: Option<String>,

    /// Currency code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    /// Grand total.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<Decimal>,

    /// Total before tax and discount.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<Decimal>,

    /// Tax amount.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_amount: Option<Decimal>,

    /// Discount amount.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_amount: Option<Decimal>,

    /// Sum of quantities over `LINE_ITEM` rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_quantity: Option<Decimal>,

    /// Identifier of the matched template, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,

    /// Detection score of the matched template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_confidence: Option<f32>,

    /// Version of the parser that produced this invoice.
    pub parser_version: String,

    /// Overall parsing status.
    pub status: ParsingStatus,
}

/// Outcome of parsing an invoice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsingStatus {
    /// Header fields and items were extracted.
    Parsed,
    /// Some data was extracted but parts are missing.
    Partial,
    /// Nothing usable was extracted.
    #[default]
    Failed,
}

/// A single row of the invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Sequential number on the invoice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,

    /// Short item name.
    pub item_name: String,

    /// Free-text description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Harmonized System tariff code (6-10 digits).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hs_code: Option<String>,

    /// Unit of measure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Brand.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,

    /// Model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Quantity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,

    /// Price per unit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<Decimal>,

    /// Line total.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_price: Option<Decimal>,

    /// Row classification.
    pub row_type: RowType,
}

impl LineItem {
    /// Create an item row with the given name and nothing else.
    pub fn new(item_name: impl Into<String>) -> Self {
        Self {
            line_number: None,
            item_name: item_name.into(),
            description: String::new(),
            hs_code: None,
            unit: None,
            brand: None,
            model: None,
            quantity: None,
            unit_price: None,
            total_price: None,
            row_type: RowType::LineItem,
        }
    }

    /// Whether any of quantity, unit price or total price is present.
    pub fn has_amounts(&self) -> bool {
        self.quantity.is_some() || self.unit_price.is_some() || self.total_price.is_some()
    }
}

/// Classification of an invoice row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowType {
    /// A product or service line.
    #[default]
    LineItem,
    /// Subtotal row.
    Subtotal,
    /// Tax row.
    Tax,
    /// Discount row.
    Discount,
    /// Grand total row.
    Total,
    /// Anything else (notes, shipping, ...).
    Other,
}

impl Invoice {
    /// Create a new empty invoice.
    pub fn new() -> Self {
        Self {
            invoice_number: None,
            invoice_date: None,
            seller_name: None,
            buyer_name: None,
            currency: None,
            total_amount: None,
            subtotal: None,
            tax_amount: None,
            discount_amount: None,
            total_quantity: None,
            template_id: None,
            template_confidence: None,
            parser_version: PARSER_VERSION.to_string(),
            status: ParsingStatus::Failed,
        }
    }

    /// Fill aggregate fields from the extracted items and set the status.
    ///
    /// Only `LINE_ITEM` rows count toward the quantity and subtotal sums.
    pub fn summarize_items(&mut self, items: &[LineItem]) {
        let line_items = items.iter().filter(|i| i.row_type == RowType::LineItem);

        let quantities: Vec<Decimal> = line_items.clone().filter_map(|i| i.quantity).collect();
        if self.total_quantity.is_none() && !quantities.is_empty() {
            self.total_quantity = Some(quantities.iter().sum());
        }

        let totals: Vec<Decimal> = line_items.filter_map(|i| i.total_price).collect();
        if self.subtotal.is_none() && !totals.is_empty() {
            self.subtotal = Some(totals.iter().sum());
        }

        self.status = if items.is_empty() {
            if self.has_header_data() {
                ParsingStatus::Partial
            } else {
                ParsingStatus::Failed
            }
        } else if self.invoice_number.is_some() && self.total_amount.is_some() {
            ParsingStatus::Parsed
        } else {
            ParsingStatus::Partial
        };
    }

    /// Whether any header field was extracted.
    pub fn has_header_data(&self) -> bool {
        self.invoice_number.is_some()
            || self.invoice_date.is_some()
            || self.seller_name.is_some()
            || self.buyer_name.is_some()
            || self.total_amount.is_some()
    }
}

impl Default for Invoice {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_row_type_serialization() {
        let json = serde_json::to_string(&RowType::LineItem).unwrap();
        assert_eq!(json, "\"LINE_ITEM\"");
    }

    #[test]
    fn test_summarize_ignores_non_item_rows() {
        let mut a = LineItem::new("Widget");
        a.quantity = Some(dec("2"));
        a.total_price = Some(dec("20.00"));
        let mut b = LineItem::new("Gadget");
        b.quantity = Some(dec("3"));
        b.total_price = Some(dec("15.00"));
        let mut sub = LineItem::new("Subtotal");
        sub.quantity = Some(dec("5"));
        sub.total_price = Some(dec("35.00"));
        sub.row_type = RowType::Subtotal;

        let mut invoice = Invoice::new();
        invoice.summarize_items(&[a, b, sub]);

        assert_eq!(invoice.total_quantity, Some(dec("5")));
        assert_eq!(invoice.subtotal, Some(dec("35.00")));
        assert_eq!(invoice.status, ParsingStatus::Partial);
    }

    #[test]
    fn test_summarize_keeps_explicit_subtotal() {
        let mut item = LineItem::new("Widget");
        item.total_price = Some(dec("10.00"));

        let mut invoice = Invoice::new();
        invoice.subtotal = Some(dec("9.50"));
        invoice.invoice_number = Some("INV-1".into());
        invoice.total_amount = Some(dec("9.50"));
        invoice.summarize_items(&[item]);

        assert_eq!(invoice.subtotal, Some(dec("9.50")));
        assert_eq!(invoice.status, ParsingStatus::Parsed);
    }

    #[test]
    fn test_empty_invoice_is_failed() {
        let mut invoice = Invoice::new();
        invoice.summarize_items(&[]);
        assert_eq!(invoice.status, ParsingStatus::Failed);
        assert_eq!(invoice.parser_version, PARSER_VERSION);
    }
}
