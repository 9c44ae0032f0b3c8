//! LLM prompt formatter (§4.8): composes the system/user message pair sent
//! to an [`crate::providers::LlmProvider`], with a merchant-specific
//! override (via the repository contracts) falling back to the default
//! prompt on any lookup miss.

use crate::repository::PromptRepository;
use handlebars::Handlebars;
use receipt_core::ocr_normalizer::TrustedHint;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A RAG snippet external to this crate's concern (the RAG library itself
/// is out of scope): just a tag and a content string the caller has
/// already decided is enabled for this receipt.
#[derive(Debug, Clone)]
pub struct RagSnippet {
    pub tag: String,
    pub content: String,
}

/// What was merged into the prompt, for debug-artifact persistence.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RagMetadata {
    pub applied_tags: Vec<String>,
}

const DEFAULT_SYSTEM_MESSAGE: &str = "You are a receipt parsing expert. Your task is to extract structured information from receipt text and trusted hints from OCR.\n\nKey requirements:\n1. Output ONLY valid JSON, no additional text\n2. Follow the exact schema provided\n3. Perform validation: quantity x unit_price ~= line_total (tolerance: +/-0.01)\n4. Sum of all line_totals must ~= total (tolerance: +/-0.01)\n5. If information is missing or uncertain, set to null and document in tbd\n6. Do not hallucinate or guess values";

const DEFAULT_USER_TEMPLATE: &str = "Parse the following receipt text and extract structured information.\n\n## Raw Text:\n{{raw_text}}\n\n## Trusted Hints (high confidence fields from OCR):\n{{trusted_hints_json}}\n{{#if initial_parse_result_json}}\n## Initial Parse Result:\n{{initial_parse_result_json}}\n{{/if}}\n{{#if rag_snippets}}\n## Additional Guidance:\n{{#each rag_snippets}}\n- {{this}}\n{{/each}}\n{{/if}}\n\n## Output Schema:\n{{output_schema_json}}\n\n## Instructions:\n1. Extract receipt-level fields (merchant, date, time, amounts, payment method)\n2. Extract all line items from raw_text, ensuring each item has:\n   - product_name (cleaned, no extra formatting)\n   - quantity and unit (if available)\n   - unit_price (if available)\n   - line_total (must match quantity x unit_price if both are present)\n3. Validate calculations:\n   - For each item: if quantity and unit_price exist, verify: quantity x unit_price ~= line_total (+/-0.01)\n   - Sum all line_totals and verify: sum ~= total (+/-0.01)\n4. Document any issues in the \"tbd\" section:\n   - Items with inconsistent price calculations\n   - Field conflicts between raw_text and trusted_hints\n   - Missing information\n\n## Currency Logic:\n- If address is in USA, default currency is USD\n- If address is in Canada, default currency is CAD\n- If currency is explicitly mentioned in raw_text, use that\n\n## Important:\n- If raw_text conflicts with trusted_hints, prefer raw_text and document conflict in tbd\n- Do not invent or guess values - use null if information is not available\n- Output must be valid JSON matching the schema exactly\n\nOutput the JSON now:";

fn default_output_schema() -> Value {
    json!({
        "receipt": {
            "merchant_name": "string or null",
            "merchant_address": "string or null",
            "merchant_phone": "string or null",
            "country": "string or null",
            "currency": "string (USD, CAD, etc.)",
            "purchase_date": "string (YYYY-MM-DD) or null",
            "purchase_time": "string (HH:MM:SS) or null",
            "subtotal": "number or null",
            "tax": "number or null",
            "total": "number",
            "payment_method": "string or null",
            "card_last4": "string or null"
        },
        "items": [{
            "raw_text": "string",
            "product_name": "string or null",
            "quantity": "number or null",
            "unit": "string or null",
            "unit_price": "number or null",
            "line_total": "number or null",
            "is_on_sale": "boolean",
            "category": "string or null"
        }],
        "tbd": {
            "items_with_inconsistent_price": [{
                "raw_text": "string",
                "product_name": "string or null",
                "reason": "string"
            }],
            "field_conflicts": {
                "field_name": {
                    "from_raw_text": "value or null",
                    "from_trusted_hints": "value or null",
                    "reason": "string"
                }
            },
            "missing_info": ["string"],
            "total_mismatch": {
                "calculated_total": "number",
                "documented_total": "number",
                "difference": "number",
                "reason": "string"
            }
        }
    })
}

/// A resolved prompt bundle, either the default or a merchant override.
struct ResolvedPrompt {
    user_template: String,
    system_message: String,
    model_name: String,
    temperature: f64,
    output_schema: Value,
}

fn default_prompt() -> ResolvedPrompt {
    ResolvedPrompt {
        user_template: DEFAULT_USER_TEMPLATE.to_string(),
        system_message: DEFAULT_SYSTEM_MESSAGE.to_string(),
        model_name: "gpt-4o-mini".to_string(),
        temperature: 0.0,
        output_schema: default_output_schema(),
    }
}

/// Composes the system/user message pair the orchestrator hands to an LLM
/// provider (§4.8).
pub struct PromptFormatter {
    repository: Arc<dyn PromptRepository>,
    raw_text_budget_chars: usize,
}

impl PromptFormatter {
    pub fn new(repository: Arc<dyn PromptRepository>, raw_text_budget_chars: usize) -> Self {
        Self { repository, raw_text_budget_chars }
    }

    /// Resolves the prompt bundle for this merchant, falling back to the
    /// default on any lookup miss — mirrors the original's
    /// try/except-then-default behavior.
    fn resolve(&self, merchant_id: Option<&str>, merchant_name: Option<&str>) -> ResolvedPrompt {
        match self.repository.get_merchant_prompt(merchant_id, merchant_name) {
            Ok(Some(prompt)) => ResolvedPrompt {
                user_template: prompt.prompt_template,
                system_message: prompt.system_message,
                model_name: prompt.model_name,
                temperature: prompt.temperature,
                output_schema: prompt.output_schema,
            },
            Ok(None) => default_prompt(),
            Err(err) => {
                tracing::warn!("merchant prompt lookup failed, using default: {err}");
                default_prompt()
            }
        }
    }

    /// Builds the `(system_message, user_message, rag_metadata)` triple for
    /// one LLM call.
    pub fn format(
        &self,
        raw_text: &str,
        trusted_hints: &HashMap<String, TrustedHint>,
        merchant_id: Option<&str>,
        merchant_name: Option<&str>,
        initial_parse_result: Option<&Value>,
        rag_snippets: &[RagSnippet],
    ) -> (String, String, RagMetadata, String, f64) {
        let prompt = self.resolve(merchant_id, merchant_name);
        let truncated_raw_text = truncate_chars(raw_text, self.raw_text_budget_chars);

        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);

        let mut data = serde_json::Map::new();
        data.insert("raw_text".to_string(), Value::String(truncated_raw_text));
        data.insert("trusted_hints_json".to_string(), Value::String(pretty_json(&trusted_hints)));
        data.insert("output_schema_json".to_string(), Value::String(pretty_json(&prompt.output_schema)));
        if let Some(initial) = initial_parse_result {
            let mut trimmed = initial.clone();
            receipt_shared::money::round_json_floats(&mut trimmed, 2);
            data.insert("initial_parse_result_json".to_string(), Value::String(pretty_json(&trimmed)));
        }
        if !rag_snippets.is_empty() {
            let contents: Vec<Value> = rag_snippets.iter().map(|s| Value::String(s.content.clone())).collect();
            data.insert("rag_snippets".to_string(), Value::Array(contents));
        }

        let user_message = registry
            .render_template(&prompt.user_template, &Value::Object(data))
            .unwrap_or_else(|err| {
                tracing::error!("prompt template render failed, falling back to raw text: {err}");
                truncate_chars(raw_text, self.raw_text_budget_chars)
            });

        let rag_metadata = RagMetadata { applied_tags: rag_snippets.iter().map(|s| s.tag.clone()).collect() };

        (prompt.system_message, user_message, rag_metadata, prompt.model_name, prompt.temperature)
    }
}

fn pretty_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn truncate_chars(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    text.chars().take(budget).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryPromptRepository;

    #[test]
    fn test_format_falls_back_to_default_on_lookup_miss() {
        let repo = Arc::new(InMemoryPromptRepository::new());
        let formatter = PromptFormatter::new(repo, 2000);
        let (system_message, user_message, _, model_name, temperature) =
            formatter.format("MILK $3.99", &HashMap::new(), None, Some("Unknown Store"), None, &[]);
        assert!(system_message.contains("receipt parsing expert"));
        assert!(user_message.contains("MILK $3.99"));
        assert_eq!(model_name, "gpt-4o-mini");
        assert_eq!(temperature, 0.0);
    }

    #[test]
    fn test_format_includes_initial_parse_result_when_present() {
        let repo = Arc::new(InMemoryPromptRepository::new());
        let formatter = PromptFormatter::new(repo, 2000);
        let initial = json!({"items": []});
        let (_, user_message, _, _, _) = formatter.format("MILK $3.99", &HashMap::new(), None, None, Some(&initial), &[]);
        assert!(user_message.contains("Initial Parse Result"));
    }

    #[test]
    fn test_format_truncates_raw_text_to_budget() {
        let repo = Arc::new(InMemoryPromptRepository::new());
        let formatter = PromptFormatter::new(repo, 5);
        let (_, user_message, _, _, _) = formatter.format("ABCDEFGHIJ", &HashMap::new(), None, None, None, &[]);
        assert!(user_message.contains("ABCDE"));
        assert!(!user_message.contains("ABCDEFGHIJ"));
    }

    #[test]
    fn test_rag_snippets_are_recorded_in_metadata() {
        let repo = Arc::new(InMemoryPromptRepository::new());
        let formatter = PromptFormatter::new(repo, 2000);
        let snippets = vec![RagSnippet { tag: "deposit_and_fee".to_string(), content: "Bottle deposits are separate line items.".to_string() }];
        let (_, user_message, metadata, _, _) = formatter.format("MILK $3.99", &HashMap::new(), None, None, None, &snippets);
        assert_eq!(metadata.applied_tags, vec!["deposit_and_fee".to_string()]);
        assert!(user_message.contains("Bottle deposits"));
    }
}
