//! Normalization utilities shared by every extraction strategy.

pub mod header;
pub mod lines;
pub mod numbers;
pub mod patterns;

pub use header::{extract_header_fields, HeaderFields};
pub use lines::{
    collapse_whitespace, extract_table_block, has_adjacent_numeric_tokens, is_bank_line,
    is_summary_or_meta_line, split_cells_by_whitespace, Cell,
};
pub use numbers::{is_numeric_token, normalize_hs_code, parse_number};
