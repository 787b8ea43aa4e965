//! Line classification and whitespace-based cell splitting.

use serde::Serialize;

use super::numbers::is_numeric_token;
use super::patterns::{
    BANK_KEYWORDS, GRAND_TOTAL_MARKER, IBAN, META_LINE, REMITTANCE_MARKER, SUMMARY_LINE, SWIFT_BIC,
};

/// Number of lines above the first data row kept as a probable header.
const HEADER_LINES_KEPT: usize = 2;

/// A cell produced by splitting a line on whitespace gaps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cell {
    /// Cell text without surrounding whitespace.
    pub text: String,
    /// Character offset of the first character.
    pub start: usize,
    /// Character offset one past the last character.
    pub end: usize,
}

impl Cell {
    /// Horizontal centre of the cell in character positions.
    pub fn center(&self) -> f32 {
        (self.start + self.end) as f32 / 2.0
    }

    /// Whether the cell holds a digit.
    pub fn is_numeric(&self) -> bool {
        self.text.chars().any(|c| c.is_ascii_digit())
    }
}

/// Check whether a line carries bank or remittance details.
pub fn is_bank_line(line: &str) -> bool {
    BANK_KEYWORDS.is_match(line) || IBAN.is_match(line) || SWIFT_BIC.is_match(line)
}

/// Check whether a line is a total/tax/boilerplate/page line rather than an item.
pub fn is_summary_or_meta_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.chars().count() < 3 {
        return true;
    }
    SUMMARY_LINE.is_match(trimmed) || META_LINE.is_match(trimmed)
}

/// Collapse runs of whitespace into single spaces.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether the line has two consecutive numeric tokens.
pub fn has_adjacent_numeric_tokens(line: &str) -> bool {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    tokens
        .windows(2)
        .any(|pair| is_numeric_token(pair[0]) && is_numeric_token(pair[1]))
}

/// Cut the text down to the region most likely to hold the item table.
///
/// Leading lines are dropped up to the first line with two adjacent numeric
/// tokens (keeping up to two lines above it as the header). Trailing lines are
/// dropped from the first bank/remittance or grand-total marker onwards.
pub fn extract_table_block(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();

    let Some(first_data) = lines.iter().position(|l| has_adjacent_numeric_tokens(l)) else {
        return text.to_string();
    };
    let start = first_data.saturating_sub(HEADER_LINES_KEPT);

    let end = lines[first_data + 1..]
        .iter()
        .position(|l| is_table_end_marker(l))
        .map(|offset| first_data + 1 + offset)
        .unwrap_or(lines.len());

    lines[start..end].join("\n")
}

fn is_table_end_marker(line: &str) -> bool {
    is_bank_line(line) || REMITTANCE_MARKER.is_match(line) || GRAND_TOTAL_MARKER.is_match(line)
}

/// Split a line into cells wherever at least `min_gap` whitespace characters
/// occur in a row. A tab always separates cells.
///
/// Offsets are character positions, not byte positions, so columns line up for
/// non-ASCII text.
pub fn split_cells_by_whitespace(line: &str, min_gap: usize) -> Vec<Cell> {
    let min_gap = min_gap.max(1);
    let chars: Vec<char> = line.chars().collect();
    let mut cells = Vec::new();

    let mut cell_start: Option<usize> = None;
    let mut last_non_ws = 0;
    let mut i = 0;

    while i < chars.len() {
        if chars[i].is_whitespace() {
            let run_start = i;
            let mut has_tab = false;
            while i < chars.len() && chars[i].is_whitespace() {
                has_tab |= chars[i] == '\t';
                i += 1;
            }
            if i - run_start >= min_gap || has_tab {
                if let Some(start) = cell_start.take() {
                    cells.push(make_cell(&chars, start, run_start));
                }
            }
            continue;
        }

        if cell_start.is_none() {
            cell_start = Some(i);
        }
        last_non_ws = i;
        i += 1;
    }

    if let Some(start) = cell_start {
        cells.push(make_cell(&chars, start, last_non_ws + 1));
    }

    cells
}

fn make_cell(chars: &[char], start: usize, end: usize) -> Cell {
    Cell {
        text: chars[start..end].iter().collect(),
        start,
        end,
    }
}
