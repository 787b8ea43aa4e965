//! Core library for invoice extraction.
//!
//! This crate provides:
//! - Normalization rules (numbers, HS codes, header fields, cell splitting)
//! - A template strategy driven by per-vendor JSON definitions
//! - A table-aware strategy for column and vertical block layouts
//! - A vision strategy backed by an OpenAI-compatible model
//! - Retry and circuit breaker protection for the vision call
//! - A registry running the strategies by priority with confidence fallback

pub mod error;
pub mod invoice;
pub mod models;
pub mod resilience;

pub use error::{InvexError, Result};
pub use invoice::{
    InvoiceParser, ParseHints, ParserRegistry, ParserResult, ParserTiming, TableAwareParser,
    TemplateDetector, TemplateLibrary, TemplateParser, VisionClient, VisionParser, VisionResponse,
};
#[cfg(feature = "http")]
pub use invoice::vision::OpenAiVisionClient;
pub use models::config::InvexConfig;
pub use models::invoice::{Invoice, LineItem, ParsingStatus, RowType};
pub use resilience::{CircuitBreaker, ResilientVisionClient};
