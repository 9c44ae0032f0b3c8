//! Geometry primitives: the shapes every store parser builds from and
//! returns. `TextBlock` is the unit OCR gives us; everything else is
//! derived from a list of blocks by the row/region/amount-column modules.

use std::collections::HashMap;

/// An OCR-detected token with normalized position.
///
/// Invariant: `x`/`y`/`center_x`/`center_y` lie in `[0, 1]`; `amount` is
/// `Some` iff `is_amount` is true.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TextBlock {
    pub block_id: u32,
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub center_x: f64,
    pub center_y: f64,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub is_amount: bool,
    pub amount: Option<f64>,
    #[serde(default = "default_page_number")]
    pub page_number: u32,
}

fn default_page_number() -> u32 {
    1
}

impl TextBlock {
    /// Builds a block from bare text/position fields, deriving `center_x`
    /// and `center_y` from the top-left corner when width/height are
    /// unknown, matching the original OCR-dictionary loader.
    pub fn new(block_id: u32, text: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            block_id,
            text: text.into(),
            x,
            y,
            center_x: x,
            center_y: y,
            width: None,
            height: None,
            is_amount: false,
            amount: None,
            page_number: 1,
        }
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.is_amount = true;
        self.amount = Some(amount);
        self
    }

    pub fn with_page(mut self, page_number: u32) -> Self {
        self.page_number = page_number;
        self
    }

    pub fn with_center(mut self, center_x: f64, center_y: f64) -> Self {
        self.center_x = center_x;
        self.center_y = center_y;
        self
    }
}

/// Row classification assigned during region splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum RowType {
    Unknown,
    Header,
    Item,
    Totals,
    Payment,
}

/// An ordered collection of blocks sharing a y-band.
///
/// Invariant: `blocks` is sorted by `center_x` ascending.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PhysicalRow {
    pub row_id: u32,
    pub blocks: Vec<TextBlock>,
    pub y_top: f64,
    pub y_bottom: f64,
    pub y_center: f64,
    pub text: String,
    pub row_type: RowType,
}

impl PhysicalRow {
    pub fn amount_blocks(&self) -> Vec<&TextBlock> {
        self.blocks.iter().filter(|b| b.is_amount && b.amount.is_some()).collect()
    }

    pub fn text_blocks(&self) -> Vec<&TextBlock> {
        self.blocks.iter().filter(|b| !b.is_amount).collect()
    }

    /// Row text with punctuation stripped and uppercased, the form every
    /// region-marker regex matches against.
    pub fn normalized_text(&self) -> String {
        self.text
            .to_uppercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect()
    }
}

/// A partition of rows into the four `RowType` buckets.
///
/// Invariant: concatenating the buckets in order reproduces the sorted rows
/// of the receipt.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ReceiptRegions {
    pub header_rows: Vec<PhysicalRow>,
    pub item_rows: Vec<PhysicalRow>,
    pub totals_rows: Vec<PhysicalRow>,
    pub payment_rows: Vec<PhysicalRow>,
}

impl ReceiptRegions {
    pub fn all_rows(&self) -> Vec<&PhysicalRow> {
        self.header_rows
            .iter()
            .chain(self.item_rows.iter())
            .chain(self.totals_rows.iter())
            .chain(self.payment_rows.iter())
            .collect()
    }
}

/// A detected vertical band where monetary values cluster.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AmountColumn {
    pub center_x: f64,
    pub tolerance: f64,
    pub confidence: f64,
    pub block_count: usize,
}

impl AmountColumn {
    pub fn contains(&self, block: &TextBlock) -> bool {
        (block.center_x - self.center_x).abs() <= self.tolerance
    }
}

/// All detected amount columns on a receipt; `main_column` is the one used
/// for item-price extraction.
#[derive(Debug, Clone)]
pub struct AmountColumns {
    pub main_column: AmountColumn,
    pub all_columns: Vec<AmountColumn>,
}

/// Tracks which amount blocks have been consumed and in what role, so a
/// single amount block is never double-counted within one parser run.
#[derive(Debug, Clone, Default)]
pub struct AmountUsageTracker {
    used_block_ids: HashMap<u32, String>,
    usage_log: Vec<UsageLogEntry>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct UsageLogEntry {
    pub block_id: u32,
    pub amount: Option<f64>,
    pub role: String,
    pub row_id: Option<u32>,
}

impl AmountUsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_used(&mut self, block: &TextBlock, role: impl Into<String>, row_id: Option<u32>) {
        let role = role.into();
        self.used_block_ids.insert(block.block_id, role.clone());
        self.usage_log.push(UsageLogEntry {
            block_id: block.block_id,
            amount: block.amount,
            role,
            row_id,
        });
    }

    pub fn is_used(&self, block: &TextBlock) -> bool {
        self.used_block_ids.contains_key(&block.block_id)
    }

    pub fn role_of(&self, block: &TextBlock) -> Option<&str> {
        self.used_block_ids.get(&block.block_id).map(String::as_str)
    }

    pub fn usage_log(&self) -> &[UsageLogEntry] {
        &self.usage_log
    }
}

/// A candidate line item produced by a store parser.
///
/// Invariant when both `quantity` and `unit_price` are present:
/// `|quantity * unit_price - line_total| <= MATH_TOLERANCE`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExtractedItem {
    pub product_name: String,
    pub line_total: f64,
    pub amount_block_id: u32,
    pub row_id: u32,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    pub unit: Option<String>,
    pub sku: Option<String>,
    pub raw_text: String,
    pub confidence: f64,
    pub on_sale: bool,
    pub is_deposit_or_fee: bool,
}

impl ExtractedItem {
    pub fn new(product_name: impl Into<String>, line_total: f64, amount_block_id: u32, row_id: u32) -> Self {
        Self {
            product_name: product_name.into(),
            line_total,
            amount_block_id,
            row_id,
            quantity: None,
            unit_price: None,
            unit: None,
            sku: None,
            raw_text: String::new(),
            confidence: 1.0,
            on_sale: false,
            is_deposit_or_fee: false,
        }
    }
}

/// Ordered view of the totals region: `subtotal`, labeled middle amounts
/// (taxes, fees, deposits), and `total`.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TotalsSequence {
    pub subtotal: Option<LabeledAmount>,
    pub total: Option<LabeledAmount>,
    pub middle_amounts: Vec<LabeledAmount>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LabeledAmount {
    pub label: String,
    pub amount: f64,
    pub block_id: u32,
    pub row_id: u32,
}

impl TotalsSequence {
    /// `subtotal + sum(middle_amounts)`, or 0.0 if there is no subtotal.
    pub fn calculated_total(&self) -> f64 {
        let subtotal = match &self.subtotal {
            Some(s) => s.amount,
            None => return 0.0,
        };
        subtotal + self.middle_amounts.iter().map(|m| m.amount).sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_text_strips_punctuation_and_uppercases() {
        let row = PhysicalRow {
            row_id: 0,
            blocks: vec![],
            y_top: 0.0,
            y_bottom: 0.0,
            y_center: 0.0,
            text: "Sub-Total:".to_string(),
            row_type: RowType::Unknown,
        };
        assert_eq!(row.normalized_text(), "SubTotal");
    }

    #[test]
    fn test_amount_usage_tracker_marks_and_queries() {
        let mut tracker = AmountUsageTracker::new();
        let block = TextBlock::new(1, "$1.00", 0.5, 0.5).with_amount(1.0);
        assert!(!tracker.is_used(&block));
        tracker.mark_used(&block, "subtotal", Some(3));
        assert!(tracker.is_used(&block));
        assert_eq!(tracker.role_of(&block), Some("subtotal"));
    }
}
