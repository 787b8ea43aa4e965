//! Common regex patterns shared by the extraction strategies.
//!
//! Keyword sets cover English and Arabic invoices.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Bank / remittance details
    pub static ref BANK_KEYWORDS: Regex = Regex::new(
        r"(?i)\b(?:bank|banking|iban|swift|bic|beneficiary|branch|routing|sort\s+code|a/c|account\s+(?:no|number|name|holder))\b|بنك|مصرف|رقم\s+الحساب|الحساب|المستفيد|آيبان|ايبان|سويفت"
    ).unwrap();

    pub static ref IBAN: Regex = Regex::new(
        r"\b[A-Z]{2}\d{2}(?:\s?[A-Z0-9]{4}){2,7}(?:\s?[A-Z0-9]{1,3})?\b"
    ).unwrap();

    // SWIFT/BIC: an explicit XXX branch anywhere, or a bare code alone on its
    // line. Product codes such as SENSOR12 share the bare shape.
    pub static ref SWIFT_BIC: Regex = Regex::new(
        r"\b[A-Z]{6}[A-Z0-9]{2}XXX\b|^\s*[A-Z]{6}\d[A-Z0-9](?:[A-Z0-9]{3})?\s*$"
    ).unwrap();

    pub static ref REMITTANCE_MARKER: Regex = Regex::new(
        r"(?i)\b(?:remit(?:tance)?|payment\s+details|bank(?:ing)?\s+details|wire\s+transfer)\b|تفاصيل\s+البنك|بيانات\s+الحساب"
    ).unwrap();

    pub static ref GRAND_TOTAL_MARKER: Regex = Regex::new(
        r"(?i)\b(?:grand\s+total|total\s+amount\s+due|amount\s+in\s+words|total\s+in\s+words|in\s+words|say\s+(?:us\s+)?dollars?)\b|الإجمالي\s+الكلي|المجموع\s+الكلي|المبلغ\s+كتابة|لا\s+غير"
    ).unwrap();

    // Summary / meta lines
    pub static ref SUMMARY_LINE: Regex = Regex::new(
        r"(?i)^\s*(?:sub\s*-?\s*total|grand\s+total|net\s+total|total|amount\s+due|balance\s+due|vat|tax|gst|sales\s+tax|discount|shipping|freight|insurance|rounding)\b|^\s*(?:المجموع|الإجمالي|الضريبة|ضريبة|الخصم|الشحن)"
    ).unwrap();

    pub static ref META_LINE: Regex = Regex::new(
        r"(?i)\bterms\s*(?:and|&)\s*conditions\b|\bpage\s+\d+(?:\s*(?:of|/)\s*\d+)?\b|\bthank\s+you\b|\bauthori[sz]ed\s+signat|\bsignature\b|\bcontinued\b|^\s*-{3,}\s*$|^\s*={3,}\s*$|الشروط\s+والأحكام|صفحة\s+\d+|التوقيع|شكرا"
    ).unwrap();

    // Numbers
    pub static ref NUMERIC_TOKEN: Regex = Regex::new(
        r"^[-+(]?[$€£]?\d[\d,.]*%?\)?$"
    ).unwrap();

    pub static ref NUMBER_IN_TEXT: Regex = Regex::new(
        r"-?\d[\d,]*(?:\.\d+)?"
    ).unwrap();

    pub static ref PRICE_TOKEN: Regex = Regex::new(
        r"\b\d{1,3}(?:,\d{3})+\.\d{2}\b"
    ).unwrap();

    // Vertical block layout
    pub static ref NUMBERED_ITEM: Regex = Regex::new(
        r"^\s*(\d{1,3})\s*[-–—.)]\s+(\S.*?)\s*$"
    ).unwrap();

    pub static ref HS_CODE_8: Regex = Regex::new(
        r"\b(\d{8})\b"
    ).unwrap();

    pub static ref UNIT_WORD: Regex = Regex::new(
        r"(?i)\b(pcs|pc|pieces?|units?|sets?|kgs?|lbs?|mtrs?|meters?|metres?|box(?:es)?|ctns?|cartons?|rolls?|pairs?|prs|dozens?|doz|ea|each|nos?|bags?|drums?|ltrs?|liters?|litres?|tons?)\b|(قطعة|حبة|كرتون|علبة|طقم|كيلو|متر)"
    ).unwrap();

    // Header fields
    pub static ref INVOICE_NUMBER: Regex = Regex::new(
        r"(?i)(?:invoice\s*(?:no\.?|number|num\.?|#)|inv\.?\s*no\.?|bill\s*no\.?|رقم\s+الفاتورة)\s*[:#]?\s*([A-Za-z0-9][A-Za-z0-9/\-_.]*)"
    ).unwrap();

    pub static ref INVOICE_DATE: Regex = Regex::new(
        r"(?i)(?:invoice\s+date|date\s+of\s+issue|issue\s+date|\bdate|تاريخ\s+الفاتورة|التاريخ)\s*[:\-]?\s*(\d{1,4}[./\-]\d{1,2}[./\-]\d{1,4}|\d{1,2}[\s\-][A-Za-z]{3,9}\.?[\s\-,]+\d{4}|[A-Za-z]{3,9}\.?\s+\d{1,2},?\s+\d{4})"
    ).unwrap();

    pub static ref SELLER: Regex = Regex::new(
        r"(?im)^\s*(?:seller|supplier|vendor|exporter|shipper|from|البائع|المورد)\s*[:\-]\s*(\S.*?)\s*$"
    ).unwrap();

    pub static ref BUYER: Regex = Regex::new(
        r"(?im)^\s*(?:buyer|customer|consignee|importer|bill\s+to|sold\s+to|المشتري|العميل)\s*[:\-]\s*(\S.*?)\s*$"
    ).unwrap();

    pub static ref CURRENCY: Regex = Regex::new(
        r"\b(USD|EUR|GBP|AED|SAR|CNY|RMB|JPY|INR|EGP|KWD|QAR|OMR|BHD|JOD|TRY|CHF|CAD|AUD)\b"
    ).unwrap();

    pub static ref GRAND_TOTAL_AMOUNT: Regex = Regex::new(
        r"(?im)^\s*(?:grand\s+total|invoice\s+total|total\s+amount(?:\s+due)?|amount\s+due|total\s+due|الإجمالي\s+الكلي|المجموع\s+الكلي)\b.*?(\d[\d,.]*\d|\d)\s*[A-Za-z]{0,3}\s*$"
    ).unwrap();

    pub static ref TOTAL_AMOUNT: Regex = Regex::new(
        r"(?im)^\s*(?:total|الإجمالي)\s*(?:[:\-][^\n]*?|\s[A-Z]{3}\b[^\n]*?|\s)(\d[\d,.]*\d|\d)\s*[A-Za-z]{0,3}\s*$"
    ).unwrap();

    pub static ref SUBTOTAL_AMOUNT: Regex = Regex::new(
        r"(?im)^\s*(?:sub\s*-?\s*total|net\s+total|المجموع\s+الفرعي)\b.*?(\d[\d,.]*\d|\d)\s*[A-Za-z]{0,3}\s*$"
    ).unwrap();

    pub static ref TAX_AMOUNT: Regex = Regex::new(
        r"(?im)^\s*(?:vat|tax|gst|sales\s+tax|الضريبة|ضريبة\s+القيمة\s+المضافة)\b.*?(\d[\d,.]*\d|\d)\s*[A-Za-z]{0,3}\s*$"
    ).unwrap();

    pub static ref DISCOUNT_AMOUNT: Regex = Regex::new(
        r"(?im)^\s*(?:discount|الخصم)\b.*?(\d[\d,.]*\d|\d)\s*[A-Za-z]{0,3}\s*$"
    ).unwrap();
}
