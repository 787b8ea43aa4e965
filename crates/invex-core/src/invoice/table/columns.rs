//! Header keyword groups, column maps and cell-to-column assignment.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::invoice::rules::{is_numeric_token, split_cells_by_whitespace, Cell};

/// Added to the distance when a cell's content cannot belong to the column.
const TYPE_MISMATCH_PENALTY: f32 = 1000.0;

/// Keyword groups that must co-occur on a line for it to count as a header.
pub const MIN_HEADER_GROUPS: usize = 3;

/// Kind of data a table column holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    LineNumber,
    Description,
    HsCode,
    Quantity,
    Unit,
    UnitPrice,
    TotalPrice,
}

impl ColumnType {
    /// Columns whose cells should contain digits.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ColumnType::LineNumber
                | ColumnType::HsCode
                | ColumnType::Quantity
                | ColumnType::UnitPrice
                | ColumnType::TotalPrice
        )
    }

    fn rejects(self, cell: &Cell) -> bool {
        match self {
            ColumnType::Unit => is_numeric_token(&cell.text),
            ColumnType::Description => false,
            _ => !cell.is_numeric(),
        }
    }
}

lazy_static! {
    // The six column concepts used to recognize a header line.
    static ref HEADER_GROUPS: [Regex; 6] = [
        Regex::new(r"(?i)\b(?:description|desc|items?|products?|goods|particulars|articles?|details|designation|commodity)\b|الوصف|البيان|الصنف|المنتج|السلعة").unwrap(),
        Regex::new(r"(?i)\b(?:qty|quantity|quant|qnty)\b|الكمية|العدد").unwrap(),
        Regex::new(r"(?i)\b(?:unit|units|uom|u/m)\b|الوحدة").unwrap(),
        Regex::new(r"(?i)\b(?:unit\s*price|u\.?\s*price|price|rate|unit\s*cost)\b|سعر\s*الوحدة|السعر").unwrap(),
        Regex::new(r"(?i)\b(?:total|amount|total\s*price|line\s*total|value|ext\.?\s*price)\b|الإجمالي|المبلغ|القيمة|المجموع").unwrap(),
        Regex::new(r"(?i)\b(?:hs\s*code|hs|hts|tariff|h\.s)\b|رمز\s*النظام|البند\s*الجمركي|الرمز\s*الجمركي").unwrap(),
    ];

    // Header cell classification, checked in order.
    static ref CELL_CLASSIFIERS: Vec<(ColumnType, Regex)> = vec![
        (ColumnType::LineNumber, Regex::new(r"(?i)^\s*(?:no\.?|#|s\.?\s*no\.?|sr\.?(?:\s*no\.?)?|sl\.?(?:\s*no\.?)?|item\s*no\.?|line|م|الرقم|رقم)\s*$").unwrap()),
        (ColumnType::HsCode, Regex::new(r"(?i)\b(?:hs\s*code|hs|hts|tariff|h\.s)\b|رمز\s*النظام|الجمركي").unwrap()),
        (ColumnType::Quantity, Regex::new(r"(?i)\b(?:qty|quantity|quant|qnty)\b|الكمية|العدد").unwrap()),
        (ColumnType::TotalPrice, Regex::new(r"(?i)\b(?:total|amount|value|line\s*total)\b|الإجمالي|المبلغ|القيمة|المجموع").unwrap()),
        (ColumnType::UnitPrice, Regex::new(r"(?i)\b(?:unit\s*price|u\.?\s*price|price|rate|unit\s*cost)\b|سعر").unwrap()),
        (ColumnType::Unit, Regex::new(r"(?i)\b(?:unit|units|uom|u/m)\b|الوحدة").unwrap()),
        (ColumnType::Description, Regex::new(r"(?i)\b(?:description|desc|items?|products?|goods|particulars|articles?|details|designation|commodity)\b|الوصف|البيان|الصنف|المنتج|السلعة").unwrap()),
    ];
}

/// Number of header keyword groups present on a line.
pub fn header_group_count(line: &str) -> usize {
    HEADER_GROUPS.iter().filter(|re| re.is_match(line)).count()
}

/// Classify a header cell.
pub fn classify_header_cell(text: &str) -> Option<ColumnType> {
    CELL_CLASSIFIERS
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(kind, _)| *kind)
}

/// A column recognized in the header row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub kind: ColumnType,
    pub start: usize,
    pub end: usize,
}

impl Column {
    pub fn center(&self) -> f32 {
        (self.start + self.end) as f32 / 2.0
    }
}

/// Column positions derived from the header row, left to right.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColumnMap {
    pub columns: Vec<Column>,
}

impl ColumnMap {
    /// Build a column map from a header line. Repeated column types keep the
    /// leftmost occurrence; unrecognized header cells are ignored.
    pub fn from_header(line: &str, min_gap: usize) -> Self {
        let mut columns: Vec<Column> = Vec::new();
        for cell in split_cells_by_whitespace(line, min_gap) {
            let Some(kind) = classify_header_cell(&cell.text) else {
                continue;
            };
            if columns.iter().any(|c| c.kind == kind) {
                continue;
            }
            columns.push(Column {
                kind,
                start: cell.start,
                end: cell.end,
            });
        }
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, kind: ColumnType) -> Option<&Column> {
        self.columns.iter().find(|c| c.kind == kind)
    }

    /// Column type -> `[start, end]`, for result metadata.
    pub fn to_metadata(&self) -> BTreeMap<ColumnType, [usize; 2]> {
        self.columns
            .iter()
            .map(|c| (c.kind, [c.start, c.end]))
            .collect()
    }

    /// Assign each column the nearest unused cell.
    ///
    /// Distance is measured centre to centre; a cell whose content cannot
    /// belong to the column is penalized and, if still the best choice, left
    /// unassigned so another column can claim it.
    pub fn assign<'a>(&self, cells: &'a [Cell]) -> BTreeMap<ColumnType, &'a Cell> {
        let mut used = vec![false; cells.len()];
        let mut assigned = BTreeMap::new();

        for column in &self.columns {
            let best = cells
                .iter()
                .enumerate()
                .filter(|(i, _)| !used[*i])
                .map(|(i, cell)| {
                    let mut cost = (cell.center() - column.center()).abs();
                    if column.kind.rejects(cell) {
                        cost += TYPE_MISMATCH_PENALTY;
                    }
                    (i, cell, cost)
                })
                .min_by(|a, b| a.2.total_cmp(&b.2));

            if let Some((i, cell, cost)) = best {
                if cost < TYPE_MISMATCH_PENALTY {
                    used[i] = true;
                    assigned.insert(column.kind, cell);
                }
            }
        }

        assigned
    }
}

/// Locate the header row and build its column map.
///
/// With a caller pattern, the first matching line is used; otherwise the first
/// line carrying at least three keyword groups. Either way the row must yield
/// at least two distinct columns.
pub fn find_header(
    lines: &[&str],
    pattern: Option<&Regex>,
    min_gap: usize,
) -> Option<(usize, ColumnMap)> {
    lines.iter().enumerate().find_map(|(idx, line)| {
        let is_candidate = match pattern {
            Some(re) => re.is_match(line),
            None => header_group_count(line) >= MIN_HEADER_GROUPS,
        };
        if !is_candidate {
            return None;
        }
        let map = ColumnMap::from_header(line, min_gap);
        (map.len() >= 2).then_some((idx, map))
    })
}
