//! Demo fixture format: a single JSON document describing one receipt's
//! canned OCR/LLM responses, so the binary can exercise the full workflow
//! without a live OCR or LLM backend.

use receipt_app::providers::ProviderOutput;
use receipt_app::ReceiptUpload;
use receipt_shared::error::{ReceiptError, ReceiptResult};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureOutputKind {
    BlockForm,
    EntityForm,
    TextOnly,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureOcrResponse {
    pub provider: String,
    pub kind: FixtureOutputKind,
    pub payload: Value,
}

impl FixtureOcrResponse {
    pub fn into_output(self) -> ProviderOutput {
        match self.kind {
            FixtureOutputKind::BlockForm => ProviderOutput::BlockForm(self.payload),
            FixtureOutputKind::EntityForm => ProviderOutput::EntityForm(self.payload),
            FixtureOutputKind::TextOnly => ProviderOutput::TextOnly(self.payload.as_str().unwrap_or_default().to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FixtureLlmResponse {
    pub provider: String,
    pub response: Value,
}

#[derive(Debug, Deserialize)]
pub struct DemoFixture {
    pub user_id: String,
    pub mime_type: String,
    #[serde(default)]
    pub merchant_id_hint: Option<String>,
    #[serde(default)]
    pub merchant_name_hint: Option<String>,
    #[serde(default)]
    pub chain_id_hint: Option<String>,
    pub ocr_primary: FixtureOcrResponse,
    pub ocr_fallback: FixtureOcrResponse,
    pub llm_primary: FixtureLlmResponse,
    pub llm_fallback: FixtureLlmResponse,
}

impl DemoFixture {
    pub fn load(path: &Path) -> ReceiptResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ReceiptError::StoreConfig(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text).map_err(|e| ReceiptError::StoreConfig(format!("{}: {e}", path.display())))
    }

    pub fn upload(&self) -> ReceiptUpload {
        ReceiptUpload {
            user_id: self.user_id.clone(),
            image_bytes: Vec::new(),
            mime_type: self.mime_type.clone(),
            merchant_id_hint: self.merchant_id_hint.clone(),
            merchant_name_hint: self.merchant_name_hint.clone(),
            chain_id_hint: self.chain_id_hint.clone(),
            rag_snippets: Vec::new(),
        }
    }
}
