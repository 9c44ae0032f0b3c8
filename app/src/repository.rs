//! Receipt and statistics repositories (§6). The in-memory implementation
//! uses a `RwLock<HashMap<...>>` rather than a concurrent read/write-split
//! map — there is exactly one writer per receipt id and reads are
//! infrequent enough that the split-map machinery buys nothing here.

use receipt_core::geometry::ExtractedItem;
use receipt_core::summary::{ProcessingRun, ReceiptSummary};
use receipt_shared::error::{ReceiptError, ReceiptResult};
use std::collections::HashMap;
use std::sync::RwLock;

/// Storage contract for a receipt's committed summary, its extracted items,
/// and its per-stage processing runs. A production binary backs this with a
/// database; the in-memory implementation below backs tests and the demo
/// binary.
pub trait ReceiptRepository: Send + Sync {
    fn create_receipt(&self, receipt_id: &str) -> ReceiptResult<()>;

    fn save_receipt_summary(&self, receipt_id: &str, summary: &ReceiptSummary) -> ReceiptResult<()>;

    fn save_receipt_items(&self, receipt_id: &str, items: &[ExtractedItem]) -> ReceiptResult<()>;

    fn save_processing_run(&self, run: ProcessingRun) -> ReceiptResult<()>;

    fn get_receipt_summary(&self, receipt_id: &str) -> ReceiptResult<Option<ReceiptSummary>>;

    fn get_receipt_items(&self, receipt_id: &str) -> ReceiptResult<Vec<ExtractedItem>>;

    fn get_processing_runs(&self, receipt_id: &str) -> ReceiptResult<Vec<ProcessingRun>>;
}

#[derive(Default)]
struct ReceiptStore {
    summaries: HashMap<String, ReceiptSummary>,
    items: HashMap<String, Vec<ExtractedItem>>,
    runs: HashMap<String, Vec<ProcessingRun>>,
}

/// In-memory [`ReceiptRepository`]. One process-wide instance is shared
/// behind an `Arc` by the workflow's `Dependencies`.
#[derive(Default)]
pub struct InMemoryReceiptRepository {
    store: RwLock<ReceiptStore>,
}

impl InMemoryReceiptRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_write(&self) -> ReceiptResult<std::sync::RwLockWriteGuard<'_, ReceiptStore>> {
        self.store.write().map_err(|_| ReceiptError::RepositoryError("receipt store lock poisoned".to_string()))
    }

    fn lock_read(&self) -> ReceiptResult<std::sync::RwLockReadGuard<'_, ReceiptStore>> {
        self.store.read().map_err(|_| ReceiptError::RepositoryError("receipt store lock poisoned".to_string()))
    }
}

impl ReceiptRepository for InMemoryReceiptRepository {
    fn create_receipt(&self, receipt_id: &str) -> ReceiptResult<()> {
        let mut store = self.lock_write()?;
        store.runs.entry(receipt_id.to_string()).or_default();
        Ok(())
    }

    fn save_receipt_summary(&self, receipt_id: &str, summary: &ReceiptSummary) -> ReceiptResult<()> {
        let mut store = self.lock_write()?;
        store.summaries.insert(receipt_id.to_string(), summary.clone());
        Ok(())
    }

    fn save_receipt_items(&self, receipt_id: &str, items: &[ExtractedItem]) -> ReceiptResult<()> {
        let mut store = self.lock_write()?;
        store.items.insert(receipt_id.to_string(), items.to_vec());
        Ok(())
    }

    fn save_processing_run(&self, run: ProcessingRun) -> ReceiptResult<()> {
        let mut store = self.lock_write()?;
        store.runs.entry(run.receipt_id.clone()).or_default().push(run);
        Ok(())
    }

    fn get_receipt_summary(&self, receipt_id: &str) -> ReceiptResult<Option<ReceiptSummary>> {
        let store = self.lock_read()?;
        Ok(store.summaries.get(receipt_id).cloned())
    }

    fn get_receipt_items(&self, receipt_id: &str) -> ReceiptResult<Vec<ExtractedItem>> {
        let store = self.lock_read()?;
        Ok(store.items.get(receipt_id).cloned().unwrap_or_default())
    }

    fn get_processing_runs(&self, receipt_id: &str) -> ReceiptResult<Vec<ProcessingRun>> {
        let store = self.lock_read()?;
        Ok(store.runs.get(receipt_id).cloned().unwrap_or_default())
    }
}

/// A merchant-specific prompt override, as looked up by [`crate::prompt::PromptFormatter`].
#[derive(Debug, Clone)]
pub struct MerchantPrompt {
    pub prompt_template: String,
    pub system_message: String,
    pub model_name: String,
    pub temperature: f64,
    pub output_schema: serde_json::Value,
}

/// Storage contract for merchant-specific prompt overrides. Separate from
/// [`ReceiptRepository`] since it is read-mostly and keyed by merchant
/// rather than by receipt.
pub trait PromptRepository: Send + Sync {
    fn get_merchant_prompt(&self, merchant_id: Option<&str>, merchant_name: Option<&str>) -> ReceiptResult<Option<MerchantPrompt>>;
}

/// In-memory [`PromptRepository`]: exact merchant-id lookup, then a
/// case-insensitive substring match on merchant name, mirroring the
/// original cache-then-`ILIKE` lookup order.
#[derive(Default)]
pub struct InMemoryPromptRepository {
    by_id: RwLock<HashMap<String, MerchantPrompt>>,
    by_name: RwLock<HashMap<String, MerchantPrompt>>,
}

impl InMemoryPromptRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, merchant_id: Option<&str>, merchant_name: Option<&str>, prompt: MerchantPrompt) {
        if let Some(id) = merchant_id {
            self.by_id.write().unwrap().insert(id.to_string(), prompt.clone());
        }
        if let Some(name) = merchant_name {
            self.by_name.write().unwrap().insert(name.to_lowercase(), prompt);
        }
    }
}

impl PromptRepository for InMemoryPromptRepository {
    fn get_merchant_prompt(&self, merchant_id: Option<&str>, merchant_name: Option<&str>) -> ReceiptResult<Option<MerchantPrompt>> {
        if let Some(id) = merchant_id {
            if let Some(prompt) = self.by_id.read().unwrap().get(id) {
                return Ok(Some(prompt.clone()));
            }
        }
        if let Some(name) = merchant_name {
            let needle = name.to_lowercase();
            let by_name = self.by_name.read().unwrap();
            if let Some(prompt) = by_name.iter().find(|(k, _)| k.contains(&needle) || needle.contains(k.as_str())).map(|(_, v)| v.clone()) {
                return Ok(Some(prompt));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(receipt_id: &str) -> ProcessingRun {
        ProcessingRun {
            receipt_id: receipt_id.to_string(),
            stage: receipt_core::summary::ProcessingStage::Ocr,
            model_provider: "google_documentai".to_string(),
            model_name: None,
            status: receipt_core::summary::RunStatus::Pass,
            validation_status: None,
            input_payload: serde_json::Value::Null,
            output_payload: serde_json::Value::Null,
            error_message: None,
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn test_save_and_retrieve_receipt_summary() {
        let repo = InMemoryReceiptRepository::new();
        repo.create_receipt("r1").unwrap();
        repo.save_receipt_summary("r1", &ReceiptSummary { total: Some(9.99), ..Default::default() }).unwrap();
        let summary = repo.get_receipt_summary("r1").unwrap().unwrap();
        assert_eq!(summary.total, Some(9.99));
    }

    #[test]
    fn test_save_and_retrieve_receipt_items() {
        let repo = InMemoryReceiptRepository::new();
        let item = ExtractedItem::new("MILK", 3.99, 0, 0);
        repo.save_receipt_items("r1", &[item]).unwrap();
        let items = repo.get_receipt_items("r1").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].product_name, "MILK");
    }

    #[test]
    fn test_processing_runs_accumulate_per_receipt() {
        let repo = InMemoryReceiptRepository::new();
        repo.save_processing_run(run("r1")).unwrap();
        repo.save_processing_run(run("r1")).unwrap();
        assert_eq!(repo.get_processing_runs("r1").unwrap().len(), 2);
    }

    #[test]
    fn test_prompt_repository_falls_back_to_name_substring_match() {
        let repo = InMemoryPromptRepository::new();
        repo.insert(
            None,
            Some("Costco Wholesale"),
            MerchantPrompt {
                prompt_template: "tmpl".to_string(),
                system_message: "sys".to_string(),
                model_name: "gemini-1.5-flash".to_string(),
                temperature: 0.0,
                output_schema: serde_json::Value::Null,
            },
        );
        let found = repo.get_merchant_prompt(None, Some("costco")).unwrap();
        assert!(found.is_some());
    }
}
