//! Region splitting (§4.2): partitions ordered rows into
//! Header/Items/Totals/Payment buckets via a small state machine driven by
//! configurable marker regexes.

use crate::geometry::{PhysicalRow, ReceiptRegions, RowType};
use regex::Regex;

/// Compiled marker regexes for one store layout. Built once per store
/// config (see `store_config::StoreConfig::compile_markers`) and reused
/// across every receipt of that chain.
#[derive(Debug, Clone)]
pub struct RegionMarkers {
    pub member: Regex,
    pub subtotal: Regex,
    pub tax: Regex,
    pub total: Regex,
    pub items_sold: Regex,
}

impl RegionMarkers {
    /// The default marker set, covering the common English-language
    /// receipt vocabulary. Store configs may override any pattern.
    pub fn default_markers() -> Self {
        Self {
            member: Regex::new(r"(?i)MEMBER").unwrap(),
            subtotal: Regex::new(r"(?i)SUB\s*-?\s*TOTAL").unwrap(),
            tax: Regex::new(r"(?i)\bTAX\b|\bHST\b|\bGST\b|\bPST\b").unwrap(),
            total: Regex::new(r"(?i)\bTOTAL\b").unwrap(),
            items_sold: Regex::new(r"(?i)ITEMS?\s*SOLD").unwrap(),
        }
    }

    fn is_subtotal(&self, text: &str) -> bool {
        self.subtotal.is_match(text)
    }

    fn is_total(&self, text: &str) -> bool {
        self.total.is_match(text) && !self.is_subtotal(text) && !self.items_sold.is_match(text)
    }
}

impl Default for RegionMarkers {
    fn default() -> Self {
        Self::default_markers()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Items,
    Totals,
    Payment,
}

/// Splits `rows` into header/item/totals/payment buckets.
///
/// A row that looks like a plausible item (carries an amount block) forces
/// the header to close even if no `MEMBER` marker was ever seen, so a
/// receipt without membership info doesn't swallow its items into the
/// header.
pub fn split_regions(rows: Vec<PhysicalRow>, markers: &RegionMarkers) -> ReceiptRegions {
    let mut regions = ReceiptRegions::default();
    let mut state = State::Header;

    for mut row in rows {
        let text = row.normalized_text();

        match state {
            State::Header => {
                let looks_like_item = row.blocks.iter().any(|b| b.is_amount);
                if markers.member.is_match(&text) {
                    row.row_type = RowType::Header;
                    regions.header_rows.push(row);
                    state = State::Items;
                } else if looks_like_item {
                    row.row_type = RowType::Item;
                    regions.item_rows.push(row);
                    state = State::Items;
                } else {
                    row.row_type = RowType::Header;
                    regions.header_rows.push(row);
                }
            }
            State::Items => {
                if markers.is_subtotal(&text) {
                    row.row_type = RowType::Totals;
                    regions.totals_rows.push(row);
                    state = State::Totals;
                } else {
                    row.row_type = RowType::Item;
                    regions.item_rows.push(row);
                }
            }
            State::Totals => {
                row.row_type = RowType::Totals;
                let closes = markers.is_total(&text);
                regions.totals_rows.push(row);
                if closes {
                    state = State::Payment;
                }
            }
            State::Payment => {
                row.row_type = RowType::Payment;
                regions.payment_rows.push(row);
            }
        }
    }

    regions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::TextBlock;

    fn row(id: u32, text: &str, amount: Option<f64>) -> PhysicalRow {
        let mut block = TextBlock::new(id, text, 0.5, id as f64 * 0.05);
        if let Some(a) = amount {
            block = block.with_amount(a);
        }
        PhysicalRow {
            row_id: id,
            blocks: vec![block],
            y_top: 0.0,
            y_bottom: 0.0,
            y_center: 0.0,
            text: text.to_string(),
            row_type: RowType::Unknown,
        }
    }

    #[test]
    fn test_partition_is_total_and_ordered() {
        let markers = RegionMarkers::default_markers();
        let rows = vec![
            row(0, "MEMBER 12345", None),
            row(1, "MILK", Some(3.99)),
            row(2, "BREAD", Some(2.50)),
            row(3, "SUBTOTAL", Some(6.49)),
            row(4, "TAX", Some(0.50)),
            row(5, "TOTAL", Some(6.99)),
            row(6, "VISA", None),
        ];
        let total_input = rows.len();
        let regions = split_regions(rows, &markers);
        let total_output = regions.all_rows().len();
        assert_eq!(total_input, total_output);
        assert_eq!(regions.header_rows.len(), 1);
        assert_eq!(regions.item_rows.len(), 2);
        assert_eq!(regions.totals_rows.len(), 3);
        assert_eq!(regions.payment_rows.len(), 1);
    }

    #[test]
    fn test_missing_member_marker_falls_back_to_first_amount_row() {
        let markers = RegionMarkers::default_markers();
        let rows = vec![row(0, "STORE ADDRESS", None), row(1, "MILK", Some(3.99))];
        let regions = split_regions(rows, &markers);
        assert_eq!(regions.header_rows.len(), 1);
        assert_eq!(regions.item_rows.len(), 1);
    }

    #[test]
    fn test_total_excludes_items_sold_row() {
        let markers = RegionMarkers::default_markers();
        let rows = vec![
            row(0, "MEMBER", None),
            row(1, "MILK", Some(3.99)),
            row(2, "SUBTOTAL", Some(3.99)),
            row(3, "TOTAL NUMBER OF ITEMS SOLD 1", None),
            row(4, "TOTAL", Some(3.99)),
        ];
        let regions = split_regions(rows, &markers);
        // Payment should start only after the real TOTAL row (row 4), so
        // nothing follows it here; both totals-bucket rows after SUBTOTAL
        // stay in Totals because "ITEMS SOLD" doesn't close the region.
        assert_eq!(regions.totals_rows.len(), 3);
        assert!(regions.payment_rows.is_empty());
    }
}
