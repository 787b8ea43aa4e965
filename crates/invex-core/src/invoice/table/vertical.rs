//! Vertical block layout: each item is a numbered description line, a data
//! line carrying the HS code, unit and amounts, and optional trailing
//! description lines.
//!
//! ```text
//! 1 - Industrial router
//! 85176200   PCS   10   150.00   1,500.00
//! dual band, rack mount
//! 2 - Patch cable
//! ...
//! ```

use rust_decimal::Decimal;
use tracing::debug;

use crate::invoice::rules::patterns::{
    GRAND_TOTAL_MARKER, HS_CODE_8, NUMBERED_ITEM, NUMBER_IN_TEXT, REMITTANCE_MARKER, UNIT_WORD,
};
use crate::invoice::rules::{is_bank_line, is_summary_or_meta_line, parse_number};
use crate::models::config::TableConfig;
use crate::models::invoice::LineItem;

/// Whether the text looks like a vertical block layout.
pub fn is_vertical_layout(lines: &[&str], config: &TableConfig) -> bool {
    let window = &lines[..lines.len().min(config.vertical_scan_lines)];

    let numbered = window
        .iter()
        .filter(|l| !is_data_line(l) && NUMBERED_ITEM.is_match(l))
        .count();
    let data_lines = window
        .iter()
        .filter(|l| is_data_line(l) && UNIT_WORD.is_match(l))
        .count();

    debug!("Vertical layout probe: {} numbered, {} HS lines", numbered, data_lines);
    numbered >= config.vertical_min_numbered && data_lines >= config.vertical_min_hs_lines
}

fn is_data_line(line: &str) -> bool {
    HS_CODE_8.is_match(line)
}

#[derive(Default)]
struct PendingItem {
    line_number: Option<u32>,
    description: Vec<String>,
    hs_code: Option<String>,
    unit: Option<String>,
    quantity: Option<Decimal>,
    unit_price: Option<Decimal>,
    total_price: Option<Decimal>,
    has_data: bool,
}

impl PendingItem {
    fn numbered(line_number: &str, first_line: &str) -> Self {
        Self {
            line_number: line_number.parse().ok(),
            description: vec![first_line.trim().to_string()],
            ..Self::default()
        }
    }

    fn apply_data_line(&mut self, line: &str) {
        let Some(hs) = HS_CODE_8.captures(line).and_then(|c| c.get(1)) else {
            return;
        };
        self.hs_code = Some(hs.as_str().to_string());
        self.unit = UNIT_WORD
            .captures(line)
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().to_uppercase());

        let mut numbers = NUMBER_IN_TEXT
            .find_iter(&line[hs.end()..])
            .filter_map(|m| parse_number(m.as_str()));
        self.quantity = numbers.next();
        self.unit_price = numbers.next();
        self.total_price = numbers.next();
        self.has_data = true;
    }

    fn into_item(self) -> Option<LineItem> {
        let description: Vec<String> = self
            .description
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();
        let name = description.first()?.clone();
        if !self.has_data {
            return None;
        }

        let mut item = LineItem::new(name);
        item.description = description.join(" ");
        item.line_number = self.line_number;
        item.hs_code = self.hs_code;
        item.unit = self.unit;
        item.quantity = self.quantity;
        item.unit_price = self.unit_price;
        item.total_price = self.total_price;
        Some(item)
    }
}

/// Rebuild items from a vertical block layout.
pub fn parse_vertical(lines: &[&str]) -> Vec<LineItem> {
    let mut items = Vec::new();
    let mut current: Option<PendingItem> = None;

    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if GRAND_TOTAL_MARKER.is_match(trimmed) || REMITTANCE_MARKER.is_match(trimmed) {
            break;
        }

        if is_data_line(trimmed) {
            match current.as_mut() {
                Some(item) if !item.has_data => item.apply_data_line(trimmed),
                _ => {
                    // A second data line without a new number starts an
                    // unnumbered item described by the lines that follow.
                    items.extend(current.take().and_then(PendingItem::into_item));
                    let mut item = PendingItem::default();
                    item.apply_data_line(trimmed);
                    current = Some(item);
                }
            }
            continue;
        }

        if let Some(caps) = NUMBERED_ITEM.captures(trimmed) {
            items.extend(current.take().and_then(PendingItem::into_item));
            current = Some(PendingItem::numbered(&caps[1], &caps[2]));
            continue;
        }

        let Some(item) = current.as_mut() else {
            continue;
        };
        if is_bank_line(trimmed) || is_summary_or_meta_line(trimmed) {
            continue;
        }
        item.description.push(trimmed.to_string());
    }

    items.extend(current.and_then(PendingItem::into_item));
    items
}
