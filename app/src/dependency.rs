//! Type-level dependency injection for the workflow: one associated type per
//! swappable collaborator, one factory function per type, and a
//! `Services<D>` aggregate holding one instance of each. Production wiring
//! picks concrete types at compile time; tests pick the in-memory/fixture
//! doubles via [`TestDependencies`].

#[cfg(any(feature = "test-doubles", test))]
pub use test_doubles::TestDependencies;

use crate::prompt::PromptFormatter;
use crate::providers::{LlmProvider, OcrProvider};
use crate::rate_limiter::RateLimiter;
use crate::repository::{PromptRepository, ReceiptRepository};
use crate::statistics::StatisticsManager;
use receipt_core::store_config::StoreConfigRegistry;
use std::sync::Arc;

/// Everything the workflow needs to process one receipt, built once per
/// process from a `Dependencies` implementation.
pub struct Services<D: Dependencies> {
    pub ocr_primary: D::OcrPrimary,
    pub ocr_fallback: D::OcrFallback,
    pub llm_primary: D::LlmPrimary,
    pub llm_fallback: D::LlmFallback,
    pub receipts: D::Receipts,
    pub prompts: Arc<PromptFormatter>,
    pub rate_limiter: Arc<RateLimiter>,
    pub statistics: Arc<StatisticsManager>,
    pub store_configs: Arc<StoreConfigRegistry>,
}

impl<D: Dependencies> Services<D> {
    pub fn new(_: D, store_configs: Arc<StoreConfigRegistry>, raw_text_budget_chars: usize, rate_limit_max_requests: u32) -> Self {
        let prompt_repository: Arc<dyn PromptRepository> = Arc::new(D::prompts());
        Self {
            ocr_primary: D::ocr_primary(),
            ocr_fallback: D::ocr_fallback(),
            llm_primary: D::llm_primary(),
            llm_fallback: D::llm_fallback(),
            receipts: D::receipts(),
            prompts: Arc::new(PromptFormatter::new(prompt_repository, raw_text_budget_chars)),
            rate_limiter: Arc::new(RateLimiter::new(rate_limit_max_requests)),
            statistics: Arc::new(StatisticsManager::new()),
            store_configs,
        }
    }
}

/// Marker trait bounding every associated type with the `Send + Sync +
/// 'static` the `tokio::task::spawn`-per-receipt concurrency model (§5)
/// requires. Blanket-implemented, mirroring the upstream pattern's
/// `DependenciesThreadSafe`.
pub trait DependenciesThreadSafe:
    Dependencies<
        OcrPrimary: Send + Sync + 'static,
        OcrFallback: Send + Sync + 'static,
        LlmPrimary: Send + Sync + 'static,
        LlmFallback: Send + Sync + 'static,
        Receipts: Send + Sync + 'static,
        Prompts: Send + Sync + 'static,
    > + Send
    + 'static
{
}

impl<
    T: Dependencies<
            OcrPrimary: Send + Sync + 'static,
            OcrFallback: Send + Sync + 'static,
            LlmPrimary: Send + Sync + 'static,
            LlmFallback: Send + Sync + 'static,
            Receipts: Send + Sync + 'static,
            Prompts: Send + Sync + 'static,
        > + Send
        + 'static,
> DependenciesThreadSafe for T
{
}

pub trait Dependencies {
    type OcrPrimary: OcrProvider;
    type OcrFallback: OcrProvider;
    type LlmPrimary: LlmProvider;
    type LlmFallback: LlmProvider;
    type Receipts: ReceiptRepository;
    type Prompts: PromptRepository;

    fn ocr_primary() -> Self::OcrPrimary;
    fn ocr_fallback() -> Self::OcrFallback;
    fn llm_primary() -> Self::LlmPrimary;
    fn llm_fallback() -> Self::LlmFallback;
    fn receipts() -> Self::Receipts;
    fn prompts() -> Self::Prompts;
}

#[cfg(any(feature = "test-doubles", test))]
mod test_doubles {
    use super::Dependencies;
    use crate::providers::fixtures::{FixtureLlmProvider, FixtureOcrProvider};
    use crate::repository::InMemoryPromptRepository;
    use crate::repository::InMemoryReceiptRepository;

    /// Default in-memory/fixture doubles for every associated type. Like
    /// the upstream pattern, the factory functions are not meant to be
    /// called: tests construct `Services` fields by hand so each test can
    /// script exactly the OCR/LLM responses it needs.
    pub struct TestDependencies<
        OP = FixtureOcrProvider,
        OF = FixtureOcrProvider,
        LP = FixtureLlmProvider,
        LF = FixtureLlmProvider,
        R = InMemoryReceiptRepository,
        PR = InMemoryPromptRepository,
    >(std::marker::PhantomData<(OP, OF, LP, LF, R, PR)>);

    impl<
        OP: crate::providers::OcrProvider,
        OF: crate::providers::OcrProvider,
        LP: crate::providers::LlmProvider,
        LF: crate::providers::LlmProvider,
        R: crate::repository::ReceiptRepository,
        PR: crate::repository::PromptRepository,
    > Dependencies for TestDependencies<OP, OF, LP, LF, R, PR>
    {
        type OcrPrimary = OP;
        type OcrFallback = OF;
        type LlmPrimary = LP;
        type LlmFallback = LF;
        type Receipts = R;
        type Prompts = PR;

        fn ocr_primary() -> Self::OcrPrimary {
            unimplemented!("dependencies are constructed manually in tests")
        }

        fn ocr_fallback() -> Self::OcrFallback {
            unimplemented!("dependencies are constructed manually in tests")
        }

        fn llm_primary() -> Self::LlmPrimary {
            unimplemented!("dependencies are constructed manually in tests")
        }

        fn llm_fallback() -> Self::LlmFallback {
            unimplemented!("dependencies are constructed manually in tests")
        }

        fn receipts() -> Self::Receipts {
            unimplemented!("dependencies are constructed manually in tests")
        }

        fn prompts() -> Self::Prompts {
            unimplemented!("dependencies are constructed manually in tests")
        }
    }
}
