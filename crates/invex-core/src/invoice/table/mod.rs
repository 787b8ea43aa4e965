//! Table-aware extraction for text laid out in aligned columns or in
//! vertical item blocks.

mod columns;
mod vertical;

pub use columns::{
    classify_header_cell, find_header, header_group_count, Column, ColumnMap, ColumnType,
};
pub use vertical::{is_vertical_layout, parse_vertical};

use std::collections::BTreeMap;

use async_trait::async_trait;
use regex::Regex;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::error::ParserError;
use crate::invoice::parser::{InvoiceParser, ParseHints, ParserResult};
use crate::invoice::rules::patterns::PRICE_TOKEN;
use crate::invoice::rules::{
    collapse_whitespace, extract_header_fields, extract_table_block, is_bank_line,
    is_summary_or_meta_line, normalize_hs_code, parse_number, split_cells_by_whitespace, Cell,
};
use crate::models::config::TableConfig;
use crate::models::invoice::{Invoice, LineItem};

/// Strategy name.
pub const TABLE_AWARE_PARSER: &str = "table_aware";

/// Rows shorter than this are never items.
const MIN_ROW_CHARS: usize = 5;

const HEADER_SCORE: f32 = 0.7;
const ALIGNED_LINE_SCORE: f32 = 0.05;
const MAX_ALIGNMENT_SCORE: f32 = 0.3;
const VERTICAL_LAYOUT_SCORE: f32 = 0.5;

/// Extracts line items from column-aligned or vertical-block text.
#[derive(Debug, Clone, Default)]
pub struct TableAwareParser {
    config: TableConfig,
}

struct Extraction {
    layout: &'static str,
    items: Vec<LineItem>,
    confidence: f32,
    metadata: BTreeMap<String, serde_json::Value>,
}

impl TableAwareParser {
    pub fn new(config: TableConfig) -> Self {
        Self { config }
    }

    fn extract_vertical(&self, lines: &[&str]) -> Option<Extraction> {
        if !is_vertical_layout(lines, &self.config) {
            return None;
        }
        let items = parse_vertical(lines);
        if items.is_empty() {
            debug!("Vertical layout detected but no blocks rebuilt");
            return None;
        }
        Some(Extraction {
            layout: "vertical",
            items,
            confidence: self.config.vertical_confidence,
            metadata: BTreeMap::new(),
        })
    }

    fn extract_columns(
        &self,
        text: &str,
        pattern: Option<&Regex>,
        min_gap: usize,
    ) -> Result<Extraction, String> {
        let block = extract_table_block(text);
        let block_lines: Vec<&str> = block.lines().collect();
        let all_lines: Vec<&str> = text.lines().collect();

        let (lines, (header_idx, map)) = match find_header(&block_lines, pattern, min_gap) {
            Some(found) => (block_lines, found),
            None => match find_header(&all_lines, pattern, min_gap) {
                Some(found) => (all_lines, found),
                None => return Err("no table header found".to_string()),
            },
        };

        let header_line = lines[header_idx].trim().to_string();
        debug!("Table header {:?} with {} columns", header_line, map.len());

        let items = parse_rows(&lines[header_idx + 1..], &map, min_gap);
        if items.is_empty() {
            return Err("table header found but no item rows".to_string());
        }

        let mut metadata = BTreeMap::new();
        metadata.insert(
            "column_map".to_string(),
            serde_json::to_value(map.to_metadata()).unwrap_or_default(),
        );
        metadata.insert("header_line".to_string(), header_line.into());

        Ok(Extraction {
            layout: "columns",
            items,
            confidence: self.config.column_confidence,
            metadata,
        })
    }
}

#[async_trait]
impl InvoiceParser for TableAwareParser {
    fn name(&self) -> &str {
        TABLE_AWARE_PARSER
    }

    fn priority(&self) -> i32 {
        80
    }

    fn can_parse(&self, text: &str, _hints: &ParseHints) -> f32 {
        let has_header = text
            .lines()
            .take(self.config.header_scan_lines)
            .any(|l| header_group_count(l) >= columns::MIN_HEADER_GROUPS);

        let aligned = text
            .lines()
            .filter(|l| PRICE_TOKEN.find_iter(l).count() >= 2)
            .count();

        let mut score = if has_header { HEADER_SCORE } else { 0.0 };
        score += (aligned as f32 * ALIGNED_LINE_SCORE).min(MAX_ALIGNMENT_SCORE);

        if score < VERTICAL_LAYOUT_SCORE {
            let lines: Vec<&str> = text.lines().collect();
            if is_vertical_layout(&lines, &self.config) {
                score = VERTICAL_LAYOUT_SCORE;
            }
        }

        score.min(1.0)
    }

    async fn parse(
        &self,
        text: &str,
        filename: &str,
        hints: &ParseHints,
    ) -> Result<ParserResult, ParserError> {
        let min_gap = hints.min_gap.unwrap_or(self.config.min_gap);
        let pattern = hints
            .header_row_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| ParserError::InvalidHint {
                hint: "header_row_pattern".to_string(),
                reason: e.to_string(),
            })?;

        let lines: Vec<&str> = text.lines().collect();
        let extraction = match self.extract_vertical(&lines) {
            Some(found) => found,
            None => match self.extract_columns(text, pattern.as_ref(), min_gap) {
                Ok(found) => found,
                Err(reason) => return Ok(ParserResult::failure(TABLE_AWARE_PARSER, reason)),
            },
        };

        let mut invoice = Invoice::new();
        extract_header_fields(text).apply_to(&mut invoice);
        invoice.summarize_items(&extraction.items);

        info!(
            "Table-aware ({}) extracted {} items from {}",
            extraction.layout,
            extraction.items.len(),
            filename
        );

        let row_count = extraction.items.len();
        let mut result = ParserResult::success(
            TABLE_AWARE_PARSER,
            invoice,
            extraction.items,
            extraction.confidence,
        )
        .with_metadata("layout", extraction.layout)
        .with_metadata("row_count", row_count);
        result.metadata.extend(extraction.metadata);
        Ok(result)
    }
}

fn parse_rows(lines: &[&str], map: &ColumnMap, min_gap: usize) -> Vec<LineItem> {
    let description_column = map.get(ColumnType::Description);
    let mut items: Vec<LineItem> = Vec::new();

    for line in lines {
        let trimmed = line.trim();
        if trimmed.chars().count() < MIN_ROW_CHARS
            || is_bank_line(trimmed)
            || is_summary_or_meta_line(trimmed)
        {
            continue;
        }

        let cells = split_cells_by_whitespace(line, min_gap);
        let assigned = map.assign(&cells);
        if let Some(item) = row_to_item(&assigned) {
            items.push(item);
            continue;
        }

        // Wrapped description text belongs to the row above.
        if let (Some(previous), Some(column)) = (items.last_mut(), description_column) {
            if is_continuation(&cells, column, min_gap) {
                let text = collapse_whitespace(&cells[0].text);
                if previous.description.is_empty() {
                    previous.description = text;
                } else {
                    previous.description.push(' ');
                    previous.description.push_str(&text);
                }
            }
        }
    }

    items
}

fn is_continuation(cells: &[Cell], column: &Column, slack: usize) -> bool {
    match cells {
        [cell] => cell.start < column.end + slack && cell.end + slack > column.start,
        _ => false,
    }
}

fn row_to_item(assigned: &BTreeMap<ColumnType, &Cell>) -> Option<LineItem> {
    let text = |kind: ColumnType| assigned.get(&kind).map(|c| c.text.as_str());

    let quantity = text(ColumnType::Quantity).and_then(parse_number);
    let total_price = text(ColumnType::TotalPrice).and_then(parse_number);
    let unit_price = text(ColumnType::UnitPrice)
        .and_then(parse_number)
        .or_else(|| back_compute_unit_price(quantity, total_price));

    if quantity.is_none() && unit_price.is_none() && total_price.is_none() {
        return None;
    }

    let description = text(ColumnType::Description)
        .map(collapse_whitespace)
        .unwrap_or_default();

    let mut item = LineItem::new(description.clone());
    item.description = description;
    item.line_number = text(ColumnType::LineNumber)
        .and_then(|s| s.trim_end_matches(['.', ')']).parse().ok());
    item.hs_code = text(ColumnType::HsCode).and_then(normalize_hs_code);
    item.unit = text(ColumnType::Unit).map(str::to_string);
    item.quantity = quantity;
    item.unit_price = unit_price;
    item.total_price = total_price;
    Some(item)
}

fn back_compute_unit_price(quantity: Option<Decimal>, total: Option<Decimal>) -> Option<Decimal> {
    let (quantity, total) = (quantity?, total?);
    if quantity.is_zero() {
        return None;
    }
    total.checked_div(quantity).map(|p| p.round_dp(4))
}
