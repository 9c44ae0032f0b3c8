//! Receipt geometry, store-specific parsing, and the math/sum validation
//! pipeline that sits between OCR and the LLM fallback stages.

pub mod amount_column;
pub mod geometry;
pub mod merchant_cleanup;
pub mod ocr_normalizer;
pub mod parsed_receipt;
pub mod parsers;
pub mod regions;
pub mod rows;
pub mod store_config;
pub mod summary;
pub mod validation;

pub use amount_column::detect_amount_column;
pub use geometry::{AmountColumn, AmountColumns, ExtractedItem, PhysicalRow, ReceiptRegions, RowType, TextBlock, TotalsSequence};
pub use merchant_cleanup::{clean_tt_items, is_tt_merchant};
pub use ocr_normalizer::{normalize_ocr_result, NormalizedOcr, TrustedHint, UnifiedInfo};
pub use parsed_receipt::{ParsedReceipt, ValidationBlock};
pub use parsers::parse_receipt;
pub use regions::{split_regions, RegionMarkers};
pub use rows::reconstruct_rows;
pub use store_config::{LayoutFamily, StoreConfig, StoreConfigRegistry};
pub use summary::{ProcessingRun, ProcessingStage, ReceiptSummary, RunStatus};
