//! Receipt summary and processing-run records (§3): the denormalized,
//! logical view of a receipt that repositories persist and that the
//! conflict resolver patches when trusted hints disagree with the parse.

use serde::{Deserialize, Serialize};

/// One labeled tax line (e.g. Costco CA's separate HST/GST), or a bare
/// scalar when the layout reports a single combined tax.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxLine {
    pub label: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeLine {
    pub label: String,
    pub amount: f64,
}

/// The denormalized receipt summary described in §3 — what repositories
/// write once a run reaches a committed candidate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiptSummary {
    pub merchant_name: Option<String>,
    pub store_chain_id: Option<String>,
    pub address: Option<String>,
    pub purchase_date: Option<String>,
    pub purchase_time: Option<String>,
    pub currency: Option<String>,
    pub subtotal: Option<f64>,
    pub tax: Option<Vec<TaxLine>>,
    pub fees: Option<Vec<FeeLine>>,
    pub total: Option<f64>,
    pub payment_method: Option<String>,
    pub card_last4: Option<String>,
    pub membership_id: Option<String>,
    pub item_count: Option<u32>,
    /// Whether the loyalty-points line was present but suppressed from
    /// items (membership/points rows on T&T-style layouts).
    pub points_line_suppressed: bool,
    /// Store-operational metadata only a handful of layouts print (the
    /// Trader Joe's family); no LLM prompt schema asks for these so they
    /// are carried over from the rule-based candidate untouched.
    pub store_number: Option<String>,
    pub till_number: Option<String>,
    pub transaction_number: Option<String>,
    pub cashier: Option<String>,
}

impl ReceiptSummary {
    /// Total tax as a single scalar, summing labeled lines when present.
    pub fn tax_total(&self) -> f64 {
        self.tax.as_ref().map(|lines| lines.iter().map(|l| l.amount).sum()).unwrap_or(0.0)
    }

    pub fn fees_total(&self) -> f64 {
        self.fees.as_ref().map(|lines| lines.iter().map(|l| l.amount).sum()).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Ocr,
    LlmPrimary,
    LlmFallback,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pass,
    Fail,
    NeedsReview,
}

/// Per-stage processing record (§3's "Processing run (logical)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRun {
    pub receipt_id: String,
    pub stage: ProcessingStage,
    pub model_provider: String,
    pub model_name: Option<String>,
    pub status: RunStatus,
    pub validation_status: Option<String>,
    pub input_payload: serde_json::Value,
    pub output_payload: serde_json::Value,
    pub error_message: Option<String>,
    pub created_at: String,
}
