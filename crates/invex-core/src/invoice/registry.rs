//! Runs extraction strategies in priority order and picks the result.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{InvexError, RegistryError};
use crate::invoice::parser::{InvoiceParser, ParseHints, ParserResult};
use crate::invoice::table::TableAwareParser;
use crate::invoice::template::{TemplateDetector, TemplateLibrary, TemplateParser};
use crate::invoice::vision::{VisionClient, VisionParser};
use crate::models::config::{InvexConfig, RegistryConfig};
use crate::resilience::{CircuitBreaker, ResilientVisionClient};

/// `parser_name` on results produced by the registry itself.
pub const REGISTRY_NAME: &str = "registry";

/// One strategy invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserTiming {
    pub parser: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ordered set of extraction strategies.
///
/// Strategies run highest priority first. The first success at or above the
/// confidence threshold wins; otherwise the most confident success is
/// returned, flagged `below_threshold`.
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn InvoiceParser>>,
    confidence_threshold: f32,
    min_can_parse: f32,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::from_config(&RegistryConfig::default())
    }
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self {
            parsers: Vec::new(),
            confidence_threshold: config.confidence_threshold,
            min_can_parse: config.min_can_parse,
        }
    }

    /// Build the standard template / table-aware / vision pipeline.
    ///
    /// The vision client is wrapped with retries and a circuit breaker built
    /// from `config.vision`.
    pub fn with_defaults(
        config: &InvexConfig,
        vision_client: Arc<dyn VisionClient>,
    ) -> Result<Self, InvexError> {
        let breaker = Arc::new(CircuitBreaker::from_config(&config.vision));
        Self::with_breaker(config, vision_client, breaker)
    }

    /// Like [`with_defaults`](Self::with_defaults), sharing an existing breaker.
    pub fn with_breaker(
        config: &InvexConfig,
        vision_client: Arc<dyn VisionClient>,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, InvexError> {
        let library = match &config.template.template_dir {
            Some(dir) => TemplateLibrary::load_dir(dir)?,
            None => TemplateLibrary::new(),
        };
        let detector = TemplateDetector::with_config(Arc::new(library), &config.template);

        let resilient = ResilientVisionClient::new(vision_client, breaker, &config.vision);

        let mut registry = Self::from_config(&config.registry);
        registry.register(Arc::new(TemplateParser::new(Arc::new(detector))))?;
        registry.register(Arc::new(TableAwareParser::new(config.table.clone())))?;
        registry.register(Arc::new(VisionParser::new(
            Arc::new(resilient),
            config.vision.clone(),
        )))?;
        Ok(registry)
    }

    /// Set the early-stop confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Add a strategy. Equal priorities keep registration order.
    pub fn register(&mut self, parser: Arc<dyn InvoiceParser>) -> Result<(), RegistryError> {
        if self.get(parser.name()).is_some() {
            return Err(RegistryError::DuplicateParser(parser.name().to_string()));
        }
        let position = self
            .parsers
            .iter()
            .position(|p| p.priority() < parser.priority())
            .unwrap_or(self.parsers.len());
        debug!(
            "Registered parser {} (priority {}) at position {}",
            parser.name(),
            parser.priority(),
            position
        );
        self.parsers.insert(position, parser);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn InvoiceParser>> {
        self.parsers.iter().find(|p| p.name() == name)
    }

    /// Strategy names in evaluation order.
    pub fn names(&self) -> Vec<&str> {
        self.parsers.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    /// Extract an invoice with the registered strategies.
    pub async fn parse(&self, text: &str, filename: &str, hints: &ParseHints) -> ParserResult {
        if self.parsers.is_empty() {
            return finish(
                ParserResult::failure(REGISTRY_NAME, "no parsers registered"),
                Vec::new(),
                filename,
            );
        }

        let mut timings = Vec::new();
        let mut failures = Vec::new();
        let mut best: Option<ParserResult> = None;

        for parser in &self.parsers {
            let score = parser.can_parse(text, hints);
            if score < self.min_can_parse {
                debug!("Skipping {} for {} (can_parse {:.2})", parser.name(), filename, score);
                continue;
            }

            let (result, timing) = run_parser(parser.as_ref(), text, filename, hints).await;
            timings.push(timing);

            if !result.success {
                failures.push(format!(
                    "{}: {}",
                    parser.name(),
                    result.error.as_deref().unwrap_or("unknown error")
                ));
                continue;
            }

            if result.confidence >= self.confidence_threshold {
                info!(
                    "{} parsed {} with confidence {:.2}",
                    parser.name(),
                    filename,
                    result.confidence
                );
                return finish(result, timings, filename);
            }

            if best.as_ref().is_none_or(|b| result.confidence > b.confidence) {
                best = Some(result);
            }
        }

        if let Some(best) = best {
            info!(
                "Best result for {} is {} at {:.2}, below threshold {:.2}",
                filename, best.parser_name, best.confidence, self.confidence_threshold
            );
            return finish(best.with_metadata("below_threshold", true), timings, filename);
        }

        let error = if timings.is_empty() {
            "no parser could handle this content".to_string()
        } else {
            format!("all parsers failed: {}", failures.join("; "))
        };
        warn!("Could not parse {}: {}", filename, error);
        finish(ParserResult::failure(REGISTRY_NAME, error), timings, filename)
    }

    /// Run exactly one named strategy, bypassing its pre-filter.
    pub async fn parse_with_parser(
        &self,
        name: &str,
        text: &str,
        filename: &str,
        hints: &ParseHints,
    ) -> ParserResult {
        let Some(parser) = self.get(name) else {
            return finish(
                ParserResult::failure(REGISTRY_NAME, format!("unknown parser: {name}")),
                Vec::new(),
                filename,
            );
        };
        let (result, timing) = run_parser(parser.as_ref(), text, filename, hints).await;
        finish(result, vec![timing], filename)
    }
}

/// Invoke one strategy, converting faults and panics into failed results.
async fn run_parser(
    parser: &dyn InvoiceParser,
    text: &str,
    filename: &str,
    hints: &ParseHints,
) -> (ParserResult, ParserTiming) {
    let started_at = Utc::now();
    let clock = Instant::now();

    let outcome = AssertUnwindSafe(parser.parse(text, filename, hints))
        .catch_unwind()
        .await;

    let result = match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!("Parser {} failed on {}: {}", parser.name(), filename, e);
            ParserResult::failure(parser.name(), e.to_string())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!("Parser {} panicked on {}: {}", parser.name(), filename, message);
            ParserResult::failure(parser.name(), format!("parser panicked: {message}"))
        }
    };

    let timing = ParserTiming {
        parser: parser.name().to_string(),
        started_at,
        finished_at: Utc::now(),
        duration_ms: clock.elapsed().as_millis() as u64,
        success: result.success,
        confidence: result.confidence,
        error: result.error.clone(),
    };
    (result, timing)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn finish(result: ParserResult, timings: Vec<ParserTiming>, filename: &str) -> ParserResult {
    let timings = serde_json::to_value(&timings).unwrap_or_default();
    result
        .with_metadata("timings", timings)
        .with_metadata("filename", filename)
}
