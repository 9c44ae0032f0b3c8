//! OCR normalizer (§4.5): maps each OCR provider's native output shape into
//! one `NormalizedOcr`, so every downstream stage (extraction, validation,
//! the LLM prompt) is provider-agnostic.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A named entity pulled from OCR output, with the provider's confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityValue {
    pub value: String,
    pub confidence: f64,
}

/// A parser-ready candidate line item surfaced directly by the OCR
/// provider (Document AI and Textract both emit these; Vision never does).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedLineItem {
    pub raw_text: String,
    pub product_name: Option<String>,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    pub unit_price: Option<f64>,
    pub line_total: Option<f64>,
    #[serde(default)]
    pub is_on_sale: bool,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrMetadata {
    pub ocr_provider: String,
    /// The provider's raw response, kept for debug artifact persistence.
    pub original_data: Value,
}

/// The single OCR result shape every store parser, validator, and prompt
/// formatter consumes, regardless of which provider produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedOcr {
    pub raw_text: String,
    pub merchant_name: Option<String>,
    pub entities: HashMap<String, EntityValue>,
    pub line_items: Vec<NormalizedLineItem>,
    pub metadata: OcrMetadata,
}

/// The subset of a `NormalizedOcr` that matters to downstream stages:
/// trusted hints, the provider's own total guess, and its candidate items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedInfo {
    pub raw_text: String,
    pub merchant_name: Option<String>,
    pub trusted_hints: HashMap<String, TrustedHint>,
    pub total: Option<f64>,
    pub line_items: Vec<NormalizedLineItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedHint {
    pub value: String,
    pub confidence: f64,
    pub source: String,
}

/// Confidence floor for an entity to be promoted into `trusted_hints`.
pub const TRUSTED_HINT_CONFIDENCE: f64 = 0.95;

/// Normalizes one provider's raw JSON payload into a `NormalizedOcr`.
///
/// `provider` selects the mapping. Google Vision only delivers text, so its
/// `entities`/`line_items` come back empty; Document AI and Textract both
/// carry entities and candidate line items through largely unchanged.
pub fn normalize_ocr_result(payload: &Value, provider: &str) -> NormalizedOcr {
    match provider {
        "google_vision" => normalize_vision(payload),
        _ => normalize_structured(payload, provider),
    }
}

fn normalize_vision(payload: &Value) -> NormalizedOcr {
    let raw_text = payload
        .get("text")
        .or_else(|| payload.get("raw_text"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    NormalizedOcr {
        raw_text,
        merchant_name: None,
        entities: HashMap::new(),
        line_items: Vec::new(),
        metadata: OcrMetadata {
            ocr_provider: "google_vision".to_string(),
            original_data: payload.clone(),
        },
    }
}

fn normalize_structured(payload: &Value, provider: &str) -> NormalizedOcr {
    let raw_text = payload.get("raw_text").and_then(Value::as_str).unwrap_or_default().to_string();
    let merchant_name = payload.get("merchant_name").and_then(Value::as_str).map(str::to_string);

    let entities = payload
        .get("entities")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| {
                    let value = v.get("value")?.as_str()?.to_string();
                    let confidence = v.get("confidence").and_then(Value::as_f64).unwrap_or(0.0);
                    Some((k.clone(), EntityValue { value, confidence }))
                })
                .collect()
        })
        .unwrap_or_default();

    let line_items = payload
        .get("line_items")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(normalize_line_item).collect())
        .unwrap_or_default();

    NormalizedOcr {
        raw_text,
        merchant_name,
        entities,
        line_items,
        metadata: OcrMetadata {
            ocr_provider: provider.to_string(),
            original_data: payload.clone(),
        },
    }
}

fn normalize_line_item(item: &Value) -> NormalizedLineItem {
    NormalizedLineItem {
        raw_text: item.get("raw_text").and_then(Value::as_str).unwrap_or_default().to_string(),
        product_name: item.get("product_name").and_then(Value::as_str).map(str::to_string),
        quantity: to_float(item.get("quantity")),
        unit: item.get("unit").and_then(Value::as_str).map(str::to_string),
        unit_price: to_float(item.get("unit_price")),
        line_total: to_float(item.get("line_total")),
        is_on_sale: item.get("is_on_sale").and_then(Value::as_bool).unwrap_or(false),
        category: item.get("category").and_then(Value::as_str).map(str::to_string),
    }
}

fn to_float(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned = s.replace('$', "").replace(',', "");
            cleaned.trim().parse::<f64>().ok()
        }
        _ => None,
    }
}

/// Extracts the subset of `normalized` relevant to parsing and validation:
/// trusted hints (entities at or above `TRUSTED_HINT_CONFIDENCE`) and the
/// provider's own total guess, if it reported one as an entity.
pub fn extract_unified_info(normalized: &NormalizedOcr) -> UnifiedInfo {
    let mut trusted_hints = HashMap::new();
    let mut total = None;

    for (entity_type, entity) in &normalized.entities {
        if entity.confidence >= TRUSTED_HINT_CONFIDENCE {
            trusted_hints.insert(
                entity_type.clone(),
                TrustedHint {
                    value: entity.value.clone(),
                    confidence: entity.confidence,
                    source: normalized.metadata.ocr_provider.clone(),
                },
            );
            if entity_type == "total_amount" {
                total = entity.value.replace('$', "").replace(',', "").trim().parse::<f64>().ok();
            }
        }
    }

    UnifiedInfo {
        raw_text: normalized.raw_text.clone(),
        merchant_name: normalized.merchant_name.clone(),
        trusted_hints,
        total,
        line_items: normalized.line_items.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vision_provider_has_only_raw_text() {
        let payload = json!({"text": "MILK $3.99"});
        let normalized = normalize_ocr_result(&payload, "google_vision");
        assert_eq!(normalized.raw_text, "MILK $3.99");
        assert!(normalized.entities.is_empty());
        assert!(normalized.line_items.is_empty());
    }

    #[test]
    fn test_structured_provider_normalizes_line_items() {
        let payload = json!({
            "raw_text": "MILK $3.99",
            "merchant_name": "Costco",
            "entities": {
                "total_amount": {"value": "3.99", "confidence": 0.99},
                "store_phone": {"value": "555-1234", "confidence": 0.4}
            },
            "line_items": [
                {"raw_text": "MILK $3.99", "product_name": "MILK", "line_total": "$3.99"}
            ]
        });
        let normalized = normalize_ocr_result(&payload, "google_documentai");
        assert_eq!(normalized.merchant_name.as_deref(), Some("Costco"));
        assert_eq!(normalized.line_items[0].line_total, Some(3.99));

        let unified = extract_unified_info(&normalized);
        assert_eq!(unified.total, Some(3.99));
        assert!(unified.trusted_hints.contains_key("total_amount"));
        assert!(!unified.trusted_hints.contains_key("store_phone"));
    }
}
