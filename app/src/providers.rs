//! OCR and LLM provider contracts (§6). Both are plain Rust traits, not
//! network clients — a production binary wires them to whatever HTTP client
//! it likes, and tests wire them to the fixture doubles below.

use receipt_core::geometry::TextBlock;
use receipt_shared::error::ReceiptResult;
use serde_json::Value;

/// One OCR provider's output, in whichever shape that provider natively
/// returns it. [`receipt_core::ocr_normalizer::normalize_ocr_result`] maps
/// each variant into a `NormalizedOcr`.
#[derive(Debug, Clone)]
pub enum ProviderOutput {
    /// A bare list of positioned blocks, no entities or candidate items —
    /// the shape a pure layout-OCR engine returns.
    BlockForm(Value),
    /// Document AI / Textract style: entities and candidate line items
    /// alongside the raw text.
    EntityForm(Value),
    /// Vision-style: raw text only.
    TextOnly(String),
}

/// An OCR backend. `provider_name` identifies which normalizer branch and
/// which debug-artifact suffix (`_ocr_primary`/`_ocr_fallback`) a result
/// belongs to.
#[async_trait::async_trait]
pub trait OcrProvider: Send + Sync {
    fn provider_name(&self) -> &str;

    async fn parse(&self, image_bytes: &[u8], mime_type: &str) -> ReceiptResult<ProviderOutput>;
}

/// An LLM backend. Implementations must tolerate a response wrapped in a
/// Markdown code fence (` ```json ... ``` `) — every real provider in the
/// original pipeline did this at least occasionally.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_name(&self) -> &str;

    async fn generate(&self, system_message: &str, user_message: &str, model: &str, temperature: f64) -> ReceiptResult<Value>;
}

/// Converts a provider's native output into the JSON payload shape
/// [`receipt_core::ocr_normalizer::normalize_ocr_result`] expects.
pub fn to_normalizer_payload(output: &ProviderOutput) -> Value {
    match output {
        ProviderOutput::BlockForm(value) | ProviderOutput::EntityForm(value) => value.clone(),
        ProviderOutput::TextOnly(text) => serde_json::json!({ "text": text }),
    }
}

/// Maps a "block-form" OCR payload (a bare list of positioned blocks, see
/// §6) into the `TextBlock`s the geometry pipeline builds rows from.
/// Accepts either a top-level array or an array under a `"blocks"` key.
/// Each block is assigned a sequential id; `center_x`/`center_y` derive
/// from the top-left corner plus half the box size when a width/height is
/// reported, matching [`TextBlock::new`]'s no-size fallback otherwise.
pub fn text_blocks_from_block_form(value: &Value) -> Vec<TextBlock> {
    let array = value.get("blocks").and_then(Value::as_array).or_else(|| value.as_array()).cloned().unwrap_or_default();

    array
        .into_iter()
        .enumerate()
        .filter_map(|(idx, block)| {
            let text = block.get("text")?.as_str()?.to_string();
            let x = block.get("x")?.as_f64()?;
            let y = block.get("y")?.as_f64()?;
            let width = block.get("width").and_then(Value::as_f64);
            let height = block.get("height").and_then(Value::as_f64);
            let is_amount = block.get("is_amount").and_then(Value::as_bool).unwrap_or(false);
            let amount = block.get("amount").and_then(Value::as_f64);
            let page_number = block.get("page_number").and_then(Value::as_u64).unwrap_or(1) as u32;

            let center_x = width.map_or(x, |w| x + w / 2.0);
            let center_y = height.map_or(y, |h| y + h / 2.0);

            let mut text_block = TextBlock::new(idx as u32, text, x, y).with_center(center_x, center_y).with_page(page_number);
            text_block.width = width;
            text_block.height = height;
            if is_amount {
                text_block = text_block.with_amount(amount.unwrap_or(0.0));
            }
            Some(text_block)
        })
        .collect()
}

/// Strips a Markdown code fence from an LLM response, if present, before
/// `serde_json::from_str`. Matches the `json.loads(strip_markdown(...))`
/// step every LLM client in the original pipeline applied.
pub fn strip_markdown_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\n', '\r']);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

pub mod fixtures {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// An OCR double that returns a pre-recorded [`ProviderOutput`] for a
    /// given image, or an error if asked to fail (for fallback-ladder
    /// tests).
    pub struct FixtureOcrProvider {
        name: String,
        responses: HashMap<Vec<u8>, ReceiptResult<ProviderOutput>>,
        default: Option<ReceiptResult<ProviderOutput>>,
    }

    impl FixtureOcrProvider {
        pub fn new(name: impl Into<String>) -> Self {
            Self { name: name.into(), responses: HashMap::new(), default: None }
        }

        pub fn with_default(mut self, output: ReceiptResult<ProviderOutput>) -> Self {
            self.default = Some(output);
            self
        }

        pub fn with_response(mut self, image_bytes: impl Into<Vec<u8>>, output: ReceiptResult<ProviderOutput>) -> Self {
            self.responses.insert(image_bytes.into(), output);
            self
        }
    }

    #[async_trait::async_trait]
    impl OcrProvider for FixtureOcrProvider {
        fn provider_name(&self) -> &str {
            &self.name
        }

        async fn parse(&self, image_bytes: &[u8], _mime_type: &str) -> ReceiptResult<ProviderOutput> {
            if let Some(response) = self.responses.get(image_bytes) {
                return response.clone();
            }
            self.default.clone().unwrap_or_else(|| {
                Err(receipt_shared::error::ReceiptError::OcrFailure {
                    provider: self.name.clone(),
                    message: "no fixture response configured".to_string(),
                })
            })
        }
    }

    /// An LLM double that returns a fixed JSON document, or an error, on
    /// every call. Call counts are tracked for rate-limit-interaction tests.
    pub struct FixtureLlmProvider {
        name: String,
        response: Mutex<Option<ReceiptResult<Value>>>,
        call_count: Mutex<u32>,
    }

    impl FixtureLlmProvider {
        pub fn new(name: impl Into<String>, response: ReceiptResult<Value>) -> Self {
            Self { name: name.into(), response: Mutex::new(Some(response)), call_count: Mutex::new(0) }
        }

        pub fn call_count(&self) -> u32 {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for FixtureLlmProvider {
        fn provider_name(&self) -> &str {
            &self.name
        }

        async fn generate(&self, _system_message: &str, _user_message: &str, _model: &str, _temperature: f64) -> ReceiptResult<Value> {
            *self.call_count.lock().unwrap() += 1;
            self.response.lock().unwrap().clone().unwrap_or_else(|| {
                Err(receipt_shared::error::ReceiptError::LlmFailure {
                    provider: self.name.clone(),
                    message: "fixture response already consumed".to_string(),
                })
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use serde_json::json;

        #[tokio::test]
        async fn test_fixture_ocr_provider_returns_default_when_no_match() {
            let provider = FixtureOcrProvider::new("google_documentai").with_default(Ok(ProviderOutput::TextOnly("MILK $3.99".to_string())));
            let result = provider.parse(b"unknown", "image/jpeg").await.unwrap();
            matches!(result, ProviderOutput::TextOnly(_));
        }

        #[tokio::test]
        async fn test_fixture_llm_provider_counts_calls() {
            let provider = FixtureLlmProvider::new("gemini", Ok(json!({"receipt": {}})));
            provider.generate("sys", "user", "gemini-pro", 0.0).await.unwrap();
            provider.generate("sys", "user", "gemini-pro", 0.0).await.unwrap();
            assert_eq!(provider.call_count(), 2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_blocks_from_block_form_derives_center_from_size() {
        let payload = json!({"blocks": [
            {"text": "MILK", "x": 0.1, "y": 0.2, "width": 0.1, "height": 0.02},
            {"text": "$3.99", "x": 0.8, "y": 0.2, "is_amount": true, "amount": 3.99}
        ]});
        let blocks = text_blocks_from_block_form(&payload);
        assert_eq!(blocks.len(), 2);
        assert!((blocks[0].center_x - 0.15).abs() < 1e-9);
        assert!(blocks[1].is_amount);
        assert_eq!(blocks[1].amount, Some(3.99));
        assert_eq!(blocks[1].center_x, 0.8);
    }

    #[test]
    fn test_strip_markdown_fence_removes_json_fence() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_markdown_fence(raw), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_markdown_fence_passes_through_bare_json() {
        assert_eq!(strip_markdown_fence("{\"a\": 1}"), "{\"a\": 1}");
    }
}
