//! The common output shape every store parser returns (§4.4's
//! `(blocks, store_config, merchant_name) → ParsedReceipt` contract).

use crate::geometry::{ExtractedItem, TotalsSequence};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationBlock {
    pub passed: bool,
    pub notes: Vec<String>,
}

/// Store-operational metadata that only a handful of layouts print and
/// that no LLM prompt schema asks for — carried separately so a parser
/// that doesn't populate it doesn't need to touch every other field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionMeta {
    pub store_number: Option<String>,
    pub till_number: Option<String>,
    pub transaction_number: Option<String>,
    pub cashier: Option<String>,
}

/// What one store parser produces from a receipt's rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedReceipt {
    pub method: String,
    pub chain_id: String,
    pub store_name: Option<String>,
    pub address: Option<String>,
    pub currency: String,
    pub membership_id: Option<String>,
    pub points_line_suppressed: bool,
    #[serde(default)]
    pub transaction_meta: TransactionMeta,
    pub items: Vec<ExtractedItem>,
    pub totals: TotalsSequence,
    pub validation: ValidationBlock,
    pub error_log: Vec<String>,
}

impl ParsedReceipt {
    pub fn empty(method: impl Into<String>, chain_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            chain_id: chain_id.into(),
            store_name: None,
            address: None,
            currency: "USD".to_string(),
            membership_id: None,
            points_line_suppressed: false,
            transaction_meta: TransactionMeta::default(),
            items: Vec::new(),
            totals: TotalsSequence::default(),
            validation: ValidationBlock::default(),
            error_log: vec![reason.into()],
        }
    }
}

/// Finds the item whose `sku` matches `target` exactly, falling back to a
/// match on the last three digits — the common-parser-behavior rule used
/// by every SKU-bearing layout (Costco's three variants) to attach a
/// discount row to the item it discounts.
pub fn find_item_by_sku<'a>(items: &'a [ExtractedItem], target: &str) -> Option<usize> {
    if let Some(idx) = items.iter().position(|i| i.sku.as_deref() == Some(target)) {
        return Some(idx);
    }
    if target.len() < 3 {
        return None;
    }
    let suffix = &target[target.len() - 3..];
    items.iter().position(|i| i.sku.as_deref().map(|s| s.len() >= 3 && &s[s.len() - 3..] == suffix).unwrap_or(false))
}

/// Fills an empty product name from a known SKU, per common parser rules.
pub fn fill_empty_product_name(name: Option<String>, sku: Option<&str>) -> String {
    match (name, sku) {
        (Some(n), _) if !n.trim().is_empty() => n,
        (_, Some(sku)) => format!("Item {sku}"),
        _ => String::new(),
    }
}
