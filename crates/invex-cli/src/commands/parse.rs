//! Parse command - extract an invoice from an OCR text file.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use clap::Args;
use console::style;
use tracing::{debug, info, warn};

use invex_core::error::VisionError;
use invex_core::{
    InvexConfig, OpenAiVisionClient, ParseHints, ParserRegistry, ParserResult, VisionClient,
    VisionResponse,
};

/// Arguments for the parse command.
#[derive(Args)]
pub struct ParseArgs {
    /// OCR text of the invoice
    #[arg(required = true)]
    input: PathBuf,

    /// Invoice image for the vision strategy
    #[arg(long)]
    image: Option<PathBuf>,

    /// Let the vision strategy claim the document
    #[arg(long)]
    prefer_vision: bool,

    /// Whitespace run separating table cells
    #[arg(long)]
    min_gap: Option<usize>,

    /// Regex matching the table header row
    #[arg(long)]
    header_pattern: Option<String>,

    /// Run only this strategy (template, table_aware, vision)
    #[arg(long)]
    parser: Option<String>,

    /// Template directory (overrides the config file)
    #[arg(long)]
    templates: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Plain text summary
    Text,
}

/// Stands in for the HTTP client when no API key is configured.
struct UnconfiguredVision {
    reason: String,
}

#[async_trait]
impl VisionClient for UnconfiguredVision {
    async fn analyze_image(
        &self,
        _image_path: &Path,
        _prompt: &str,
        _max_tokens: u32,
    ) -> Result<VisionResponse, VisionError> {
        Err(VisionError::Config(self.reason.clone()))
    }
}

fn vision_client(config: &InvexConfig) -> Arc<dyn VisionClient> {
    match OpenAiVisionClient::from_config(&config.vision) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            debug!("Vision client unavailable: {}", e);
            Arc::new(UnconfiguredVision {
                reason: e.to_string(),
            })
        }
    }
}

pub async fn run(args: ParseArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut config = super::load_config(config_path)?;
    if let Some(dir) = &args.templates {
        config.template.template_dir = Some(dir.clone());
    }

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }
    if let Some(image) = &args.image {
        if !image.exists() {
            anyhow::bail!("Image file not found: {}", image.display());
        }
    }

    let text = fs::read_to_string(&args.input)?;
    let filename = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    info!("Processing file: {}", args.input.display());

    let registry = ParserRegistry::with_defaults(&config, vision_client(&config))?;
    let hints = build_hints(&args);

    let result = match &args.parser {
        Some(name) => registry.parse_with_parser(name, &text, &filename, &hints).await,
        None => registry.parse(&text, &filename, &hints).await,
    };

    let output = match args.format {
        OutputFormat::Json => serde_json::to_string_pretty(&result)?,
        OutputFormat::Text => format_text(&result),
    };

    if let Some(output_path) = &args.output {
        fs::write(output_path, &output)?;
        eprintln!(
            "{} Output written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        println!("{}", output);
    }

    debug!("Total processing time: {:?}", start.elapsed());

    if !result.success {
        anyhow::bail!(
            "Extraction failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    if result.is_below_threshold() {
        warn!(
            "Best result from {} is below the confidence threshold ({:.2})",
            result.parser_name, result.confidence
        );
    }

    Ok(())
}

fn build_hints(args: &ParseArgs) -> ParseHints {
    let mut hints = ParseHints::new().with_prefer_vision(args.prefer_vision);
    if let Some(image) = &args.image {
        hints = hints.with_image(image);
    }
    if let Some(min_gap) = args.min_gap {
        hints = hints.with_min_gap(min_gap);
    }
    if let Some(pattern) = &args.header_pattern {
        hints = hints.with_header_row_pattern(pattern);
    }
    hints
}

fn format_text(result: &ParserResult) -> String {
    let mut output = String::new();

    if !result.success {
        let _ = writeln!(
            output,
            "Extraction failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
        return output;
    }

    let _ = writeln!(
        output,
        "Parser: {} (confidence {:.2})",
        result.parser_name, result.confidence
    );

    if let Some(invoice) = &result.invoice {
        let field = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        let _ = writeln!(output, "Invoice: {}", field(&invoice.invoice_number));
        let _ = writeln!(output, "Date: {}", field(&invoice.invoice_date));
        let _ = writeln!(output, "Seller: {}", field(&invoice.seller_name));
        let _ = writeln!(output, "Buyer: {}", field(&invoice.buyer_name));
        let currency = invoice.currency.as_deref().unwrap_or("");
        if let Some(total) = invoice.total_amount {
            let _ = writeln!(output, "Total: {} {}", total, currency);
        }
        let _ = writeln!(output, "Status: {:?}", invoice.status);
    }

    output.push('\n');
    let _ = writeln!(output, "Items ({}):", result.items.len());
    for item in &result.items {
        let number = item
            .line_number
            .map(|n| format!("{n}."))
            .unwrap_or_default();
        let quantity = item.quantity.map(|q| q.to_string()).unwrap_or_default();
        let total = item.total_price.map(|t| t.to_string()).unwrap_or_default();
        let _ = writeln!(
            output,
            "  {} {} | qty {} | total {}",
            number, item.item_name, quantity, total
        );
    }

    output
}
