//! Vision-model extraction from the invoice image.
//!
//! The image is sent with an extraction prompt to a [`VisionClient`]; the
//! answer is searched for a JSON payload, validated leniently and mapped onto
//! the shared invoice model. In the default pipeline the client is wrapped in
//! [`ResilientVisionClient`](crate::resilience::ResilientVisionClient).

mod client;
mod payload;

pub use client::{VisionClient, VisionResponse};
#[cfg(feature = "http")]
pub use client::OpenAiVisionClient;
pub use payload::{extract_json_payload, PayloadSource, VisionItem, VisionPayload};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::ParserError;
use crate::invoice::parser::{InvoiceParser, ParseHints, ParserResult};
use crate::models::config::VisionConfig;

/// Strategy name.
pub const VISION_PARSER: &str = "vision";

/// OCR text appended to the prompt is cut to this many characters.
const MAX_CONTEXT_CHARS: usize = 4000;

const EXTRACTION_PROMPT: &str = r#"You are reading a commercial invoice. Extract its contents and answer with a single JSON object, no commentary, using this shape:
{
  "invoice_number": string|null,
  "invoice_date": string|null,
  "seller_name": string|null,
  "buyer_name": string|null,
  "currency": ISO 4217 code|null,
  "subtotal": number|null,
  "tax_amount": number|null,
  "discount_amount": number|null,
  "total_amount": number|null,
  "items": [
    {"line_number": number|null, "item_name": string, "description": string|null,
     "hs_code": string|null, "unit": string|null, "brand": string|null, "model": string|null,
     "quantity": number|null, "unit_price": number|null, "total_price": number|null}
  ]
}
Use null for anything not printed on the invoice. Do not include subtotal, tax or total rows in "items"."#;

/// Build the extraction prompt, with OCR text as optional context.
pub fn build_prompt(ocr_text: &str) -> String {
    let mut prompt = EXTRACTION_PROMPT.to_string();
    let context = ocr_text.trim();
    if !context.is_empty() {
        prompt.push_str("\n\nOCR text of the same page (may contain recognition errors):\n");
        prompt.extend(context.chars().take(MAX_CONTEXT_CHARS));
    }
    prompt
}

/// Extracts invoices by asking a vision model to read the image.
pub struct VisionParser {
    client: Arc<dyn VisionClient>,
    config: VisionConfig,
}

impl VisionParser {
    pub fn new(client: Arc<dyn VisionClient>, config: VisionConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl InvoiceParser for VisionParser {
    fn name(&self) -> &str {
        VISION_PARSER
    }

    fn priority(&self) -> i32 {
        60
    }

    fn can_parse(&self, _text: &str, hints: &ParseHints) -> f32 {
        if !self.config.enabled || hints.image_path.is_none() {
            return 0.0;
        }
        if hints.prefer_vision { 0.95 } else { 0.5 }
    }

    async fn parse(
        &self,
        text: &str,
        filename: &str,
        hints: &ParseHints,
    ) -> Result<ParserResult, ParserError> {
        if !self.config.enabled {
            return Ok(ParserResult::failure(VISION_PARSER, "vision parsing is disabled"));
        }
        let Some(image_path) = hints.image_path.as_deref() else {
            return Ok(ParserResult::failure(VISION_PARSER, "no image provided"));
        };

        let prompt = build_prompt(text);
        let response = match self
            .client
            .analyze_image(image_path, &prompt, self.config.max_tokens)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Vision call for {} failed: {}", filename, e);
                return Ok(ParserResult::failure(VISION_PARSER, e.to_string()));
            }
        };

        if let Some(error) = response.error {
            return Ok(ParserResult::failure(VISION_PARSER, error)
                .with_metadata("model", response.model));
        }

        let payload = extract_json_payload(&response.text)
            .and_then(|(value, source)| VisionPayload::from_value(value).map(|p| (p, source)));
        let (payload, source) = match payload {
            Ok(found) => found,
            Err(e) => {
                warn!("Vision answer for {} unusable: {}", filename, e);
                return Ok(ParserResult::failure(VISION_PARSER, e.to_string())
                    .with_metadata("model", response.model));
            }
        };

        let confidence = payload.confidence();
        let (invoice, items) = payload.into_invoice();

        info!(
            "Vision extracted {} items from {} (confidence {:.2})",
            items.len(),
            filename,
            confidence
        );

        Ok(ParserResult::success(VISION_PARSER, invoice, items, confidence)
            .with_metadata("model", response.model)
            .with_metadata("payload_source", source.as_str()))
    }
}
