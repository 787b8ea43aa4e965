//! Invoice extraction strategies and the registry that orchestrates them.

pub mod parser;
pub mod registry;
pub mod rules;
pub mod table;
pub mod template;
pub mod vision;

pub use parser::{InvoiceParser, ParseHints, ParserResult};
pub use registry::{ParserRegistry, ParserTiming};
pub use table::TableAwareParser;
pub use template::{TemplateDetector, TemplateLibrary, TemplateParser};
pub use vision::{VisionClient, VisionParser, VisionResponse};
