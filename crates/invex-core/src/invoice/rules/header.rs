//! Generic labelled header-field extraction.
//!
//! Used when no company template is known for the document.

use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;

use crate::models::invoice::Invoice;

use super::numbers::parse_number;
use super::patterns::{
    BUYER, CURRENCY, DISCOUNT_AMOUNT, GRAND_TOTAL_AMOUNT, INVOICE_DATE, INVOICE_NUMBER, SELLER,
    SUBTOTAL_AMOUNT, TAX_AMOUNT, TOTAL_AMOUNT,
};

lazy_static! {
    // "Tax ID: 100234", "VAT No 3001" are registration numbers, not amounts.
    static ref TAX_REGISTRATION: Regex =
        Regex::new(r"(?i)\b(?:id|no|number|reg(?:istration)?|trn|tin)\b").unwrap();
}

/// Header fields found in free text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderFields {
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub seller_name: Option<String>,
    pub buyer_name: Option<String>,
    pub currency: Option<String>,
    pub total_amount: Option<Decimal>,
    pub subtotal: Option<Decimal>,
    pub tax_amount: Option<Decimal>,
    pub discount_amount: Option<Decimal>,
}

impl HeaderFields {
    /// Copy the extracted fields onto an invoice, leaving existing values alone.
    pub fn apply_to(self, invoice: &mut Invoice) {
        invoice.invoice_number = invoice.invoice_number.take().or(self.invoice_number);
        invoice.invoice_date = invoice.invoice_date.take().or(self.invoice_date);
        invoice.seller_name = invoice.seller_name.take().or(self.seller_name);
        invoice.buyer_name = invoice.buyer_name.take().or(self.buyer_name);
        invoice.currency = invoice.currency.take().or(self.currency);
        invoice.total_amount = invoice.total_amount.or(self.total_amount);
        invoice.subtotal = invoice.subtotal.or(self.subtotal);
        invoice.tax_amount = invoice.tax_amount.or(self.tax_amount);
        invoice.discount_amount = invoice.discount_amount.or(self.discount_amount);
    }
}

/// Extract labelled header fields from invoice text.
pub fn extract_header_fields(text: &str) -> HeaderFields {
    let total_amount =
        capture_amount(&GRAND_TOTAL_AMOUNT, text).or_else(|| capture_amount(&TOTAL_AMOUNT, text));

    let tax_amount = TAX_AMOUNT
        .captures_iter(text)
        .filter(|caps| !TAX_REGISTRATION.is_match(&caps[0]))
        .find_map(|caps| parse_number(&caps[1]));

    HeaderFields {
        invoice_number: capture_text(&INVOICE_NUMBER, text),
        invoice_date: capture_text(&INVOICE_DATE, text),
        seller_name: capture_text(&SELLER, text),
        buyer_name: capture_text(&BUYER, text),
        currency: CURRENCY.captures(text).map(|c| c[1].to_string()),
        total_amount,
        subtotal: capture_amount(&SUBTOTAL_AMOUNT, text),
        tax_amount,
        discount_amount: capture_amount(&DISCOUNT_AMOUNT, text),
    }
}

fn capture_text(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn capture_amount(pattern: &Regex, text: &str) -> Option<Decimal> {
    pattern
        .captures_iter(text)
        .find_map(|caps| parse_number(&caps[1]))
}
