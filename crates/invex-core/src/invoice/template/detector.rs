//! Template detection with a fingerprint-keyed cache.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::models::config::TemplateConfig;

use super::TemplateLibrary;

/// The template that best matches a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateMatch {
    pub template_id: String,
    pub name: String,
    /// Detection score (0.0 - 1.0).
    pub confidence: f32,
    pub company_key: String,
    pub parser_hints: BTreeMap<String, Value>,
}

/// Scores documents against the template library.
pub struct TemplateDetector {
    library: Arc<TemplateLibrary>,
    min_confidence: f32,
    capacity: usize,
    fingerprint_chars: usize,
    cache: Mutex<HashMap<String, Option<TemplateMatch>>>,
}

impl TemplateDetector {
    /// Create a detector with default settings.
    pub fn new(library: Arc<TemplateLibrary>) -> Self {
        Self::with_config(library, &TemplateConfig::default())
    }

    /// Create a detector from configuration.
    pub fn with_config(library: Arc<TemplateLibrary>, config: &TemplateConfig) -> Self {
        Self {
            library,
            min_confidence: config.min_confidence,
            capacity: config.cache_capacity,
            fingerprint_chars: config.fingerprint_chars,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Set the minimum accepted detection score.
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// The template library this detector scores against.
    pub fn library(&self) -> &Arc<TemplateLibrary> {
        &self.library
    }

    /// Find the best-scoring template that meets the confidence floor.
    pub fn detect(&self, text: &str) -> Option<TemplateMatch> {
        if self.library.is_empty() {
            return None;
        }

        let key = self.fingerprint(text);
        if let Some(cached) = self.cache_get(&key) {
            return cached;
        }

        let detected = self.detect_uncached(text);
        self.cache_put(key, detected.clone());
        detected
    }

    /// Score every template, highest first. Ignores the confidence floor.
    pub fn score_all(&self, text: &str) -> Vec<(String, f32)> {
        let mut scores: Vec<(String, f32)> = self
            .library
            .iter()
            .map(|t| (t.id.clone(), t.detection_score(text)))
            .collect();
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));
        scores
    }

    /// Drop all cached detection results.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    /// Number of cached detection results.
    pub fn cache_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn detect_uncached(&self, text: &str) -> Option<TemplateMatch> {
        // Strictly greater keeps the first-loaded template on ties.
        let mut best: Option<(&super::CompiledTemplate, f32)> = None;
        for template in self.library.iter() {
            let score = template.detection_score(text);
            debug!("Template {} scored {:.2}", template.id, score);
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((template.as_ref(), score));
            }
        }

        let (template, score) = best?;
        if score < self.min_confidence || score <= 0.0 {
            return None;
        }

        Some(TemplateMatch {
            template_id: template.id.clone(),
            name: template.name.clone(),
            confidence: score,
            company_key: template.company_key.clone(),
            parser_hints: template.parser_hints.clone(),
        })
    }

    fn fingerprint(&self, text: &str) -> String {
        let prefix: String = text.chars().take(self.fingerprint_chars).collect();
        format!("{:x}", Sha256::digest(prefix.as_bytes()))
    }

    fn cache_get(&self, key: &str) -> Option<Option<TemplateMatch>> {
        self.cache.lock().ok()?.get(key).cloned()
    }

    fn cache_put(&self, key: String, value: Option<TemplateMatch>) {
        if self.capacity == 0 {
            return;
        }
        if let Ok(mut cache) = self.cache.lock() {
            if cache.len() >= self.capacity {
                cache.clear();
            }
            cache.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::template::tests::acme_definition;
    use crate::invoice::template::TemplateDefinition;

    fn library() -> Arc<TemplateLibrary> {
        let other: TemplateDefinition = serde_json::from_value(serde_json::json!({
            "id": "globex_v2",
            "name": "Globex",
            "detection_patterns": ["Globex Corporation", "(?i)commercial invoice"]
        }))
        .unwrap();
        Arc::new(TemplateLibrary::from_definitions([acme_definition(), other]).unwrap())
    }

    #[test]
    fn test_detects_best_template() {
        let detector = TemplateDetector::new(library());
        let found = detector
            .detect("ACME Trading LLC\nTax Invoice\nTRN 100200300")
            .unwrap();
        assert_eq!(found.template_id, "acme_v1");
        assert_eq!(found.confidence, 1.0);
        assert_eq!(found.company_key, "acme");
        assert_eq!(found.parser_hints.get("min_gap"), Some(&serde_json::json!(3)));
    }

    #[test]
    fn test_confidence_floor() {
        let detector = TemplateDetector::new(library()).with_min_confidence(0.7);
        // 2 of 3 acme patterns
        assert!(detector.detect("ACME Trading LLC tax invoice").is_none());

        let lenient = TemplateDetector::new(library()).with_min_confidence(0.5);
        let found = lenient.detect("ACME Trading LLC tax invoice").unwrap();
        assert_eq!(found.template_id, "acme_v1");
    }

    #[test]
    fn test_no_match_without_patterns_hit() {
        let detector = TemplateDetector::new(library()).with_min_confidence(0.0);
        assert!(detector.detect("nothing relevant").is_none());
    }

    #[test]
    fn test_cache_reuses_and_bounds() {
        let config = TemplateConfig {
            cache_capacity: 2,
            ..TemplateConfig::default()
        };
        let detector = TemplateDetector::with_config(library(), &config);

        detector.detect("Globex Corporation commercial invoice");
        detector.detect("Globex Corporation commercial invoice");
        assert_eq!(detector.cache_len(), 1);

        detector.detect("second document");
        assert_eq!(detector.cache_len(), 2);
        detector.detect("third document");
        assert_eq!(detector.cache_len(), 1);

        detector.clear_cache();
        assert_eq!(detector.cache_len(), 0);
    }

    #[test]
    fn test_score_all_sorted() {
        let detector = TemplateDetector::new(library());
        let scores = detector.score_all("Globex Corporation");
        assert_eq!(scores[0], ("globex_v2".to_string(), 0.5));
        assert_eq!(scores[1], ("acme_v1".to_string(), 0.0));
    }
}
