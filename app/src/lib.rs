pub mod artifacts;
pub mod dependency;
pub mod prompt;
pub mod providers;
pub mod rate_limiter;
pub mod repository;
pub mod statistics;
pub mod timeline;
pub mod workflow;

pub use {
    artifacts::ArtifactWriter,
    dependency::{Dependencies, DependenciesThreadSafe, Services},
    prompt::{PromptFormatter, RagMetadata, RagSnippet},
    providers::{strip_markdown_fence, text_blocks_from_block_form, to_normalizer_payload, LlmProvider, OcrProvider, ProviderOutput},
    rate_limiter::RateLimiter,
    repository::{InMemoryPromptRepository, InMemoryReceiptRepository, MerchantPrompt, PromptRepository, ReceiptRepository},
    statistics::{DailyStats, StatisticsManager},
    timeline::{TimelineEntry, TimelineRecorder, TimelineReport},
    workflow::{process_receipt, CancellationToken, ReceiptUpload, TerminalStatus, WorkflowOutcome},
};

#[cfg(any(feature = "test-doubles", test))]
pub use dependency::TestDependencies;
