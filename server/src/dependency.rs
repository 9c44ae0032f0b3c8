//! Wires a [`Services`] aggregate from a loaded [`DemoFixture`]. The demo
//! binary has no live OCR/LLM backend, so every collaborator is either the
//! in-memory repository or a fixture double seeded from the loaded JSON.

use crate::fixture::DemoFixture;
use receipt_app::providers::fixtures::{FixtureLlmProvider, FixtureOcrProvider};
use receipt_app::{
    InMemoryPromptRepository, InMemoryReceiptRepository, PromptFormatter, RateLimiter, Services, StatisticsManager, TestDependencies,
};
use receipt_core::store_config::StoreConfigRegistry;
use std::sync::Arc;

pub type DemoDependencies = TestDependencies<FixtureOcrProvider, FixtureOcrProvider, FixtureLlmProvider, FixtureLlmProvider, InMemoryReceiptRepository, InMemoryPromptRepository>;

/// Builds one [`Services`] instance from the fixture's canned responses.
/// Every real OCR call in the workflow resolves through `with_default`
/// since the demo fixture carries no actual image bytes to key a per-image
/// response off of.
pub fn build_services(fixture: &DemoFixture, store_configs: Arc<StoreConfigRegistry>, raw_text_budget_chars: usize, rate_limit_max_requests: u32) -> Services<DemoDependencies> {
    let ocr_primary = FixtureOcrProvider::new(fixture.ocr_primary.provider.clone()).with_default(Ok(fixture.ocr_primary.clone().into_output()));
    let ocr_fallback = FixtureOcrProvider::new(fixture.ocr_fallback.provider.clone()).with_default(Ok(fixture.ocr_fallback.clone().into_output()));
    let llm_primary = FixtureLlmProvider::new(fixture.llm_primary.provider.clone(), Ok(fixture.llm_primary.response.clone()));
    let llm_fallback = FixtureLlmProvider::new(fixture.llm_fallback.provider.clone(), Ok(fixture.llm_fallback.response.clone()));

    let prompts = Arc::new(PromptFormatter::new(Arc::new(InMemoryPromptRepository::new()), raw_text_budget_chars));

    Services {
        ocr_primary,
        ocr_fallback,
        llm_primary,
        llm_fallback,
        receipts: InMemoryReceiptRepository::new(),
        prompts,
        rate_limiter: Arc::new(RateLimiter::new(rate_limit_max_requests)),
        statistics: Arc::new(StatisticsManager::new()),
        store_configs,
    }
}
