//! Trader Joe's parser (§4.4).
//!
//! No SKU codes: items are a bare `PRODUCT NAME … $X.XX` pair, right-aligned
//! price. A leading `T ` marks a taxable item and is stripped from the
//! name. A leading `N@ $X.XX ` marks an embedded quantity/unit price. The
//! true total is the `TOTAL PURCHASE` line near the bottom of the
//! receipt, not the earlier `Balance to pay` line — the two can differ
//! when a card surcharge or rounding adjustment lands between them.

use crate::geometry::{AmountColumns, ExtractedItem, LabeledAmount, PhysicalRow, ReceiptRegions, TextBlock, TotalsSequence};
use crate::parsed_receipt::{fill_empty_product_name, ParsedReceipt, ValidationBlock};
use crate::store_config::StoreConfig;
use receipt_shared::money::SUM_TOLERANCE;
use regex::Regex;
use std::sync::OnceLock;

fn quantity_prefix_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)\s*@\s*\$(\d+\.\d{2})\s+(.+)$").unwrap())
}

const EXCLUDED_KEYWORDS: [&str; 6] = ["TAX", "TOTAL", "BALANCE", "SUBTOTAL", "VISA", "ITEMS IN"];

fn looks_like_totals_line(name: &str) -> bool {
    let upper = name.to_uppercase();
    EXCLUDED_KEYWORDS.iter().any(|kw| upper.contains(kw))
}

fn strip_taxable_prefix(name: &str) -> String {
    name.strip_prefix("T ").unwrap_or(name).trim().to_string()
}

fn parse_quantity_unit_price(name: &str) -> (f64, Option<f64>, String) {
    match quantity_prefix_pattern().captures(name) {
        Some(caps) => {
            let quantity: f64 = caps[1].parse().unwrap_or(1.0);
            let unit_price: f64 = caps[2].parse().unwrap_or(0.0);
            (quantity, Some(unit_price), caps[3].trim().to_string())
        }
        None => (1.0, None, name.to_string()),
    }
}

pub fn parse(regions: &ReceiptRegions, amount_columns: &AmountColumns, config: &StoreConfig, merchant_name: Option<&str>) -> ParsedReceipt {
    let mut items = Vec::new();

    for row in &regions.item_rows {
        items.extend(extract_items_from_row(row, amount_columns));
    }

    let (totals, used_balance_fallback) = extract_totals(&regions.totals_rows, amount_columns);
    let store_name = merchant_name.map(str::to_string).or_else(|| Some(config.identification.primary_name.clone()));
    let transaction_meta = extract_transaction_meta(&regions.header_rows, &regions.payment_rows);

    let items_sum: f64 = items.iter().map(|i| i.line_total).sum();
    let tax_sum: f64 = totals.middle_amounts.iter().map(|m| m.amount).sum();
    let mut error_log = Vec::new();
    let mut passed = true;

    if used_balance_fallback {
        error_log.push("low_confidence_total: using Balance to pay fallback, TOTAL PURCHASE not found".to_string());
    }

    match totals.total.as_ref() {
        Some(total) => {
            let calculated = items_sum + tax_sum;
            if (calculated - total.amount).abs() > SUM_TOLERANCE {
                passed = false;
                error_log.push(format!("items+tax mismatch: calculated {:.2} vs total {:.2}", calculated, total.amount));
            }
        }
        None => {
            passed = false;
            error_log.push("TOTAL PURCHASE not found".to_string());
        }
    }

    ParsedReceipt {
        method: "trader_joes".to_string(),
        chain_id: config.chain_id.clone(),
        store_name,
        address: None,
        currency: "USD".to_string(),
        membership_id: None,
        points_line_suppressed: false,
        transaction_meta,
        items,
        totals,
        validation: ValidationBlock { passed, notes: error_log.clone() },
        error_log,
    }
}

fn store_number_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)STORE\s*#\s*(\d+)").unwrap())
}

fn till_number_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(?:TILL|REGISTER)\s*#?\s*(\d+)").unwrap())
}

fn transaction_number_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)TRANS(?:ACTION)?\s*#?\s*(\d+)").unwrap())
}

fn cashier_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)CASHIER:?\s*(.+)").unwrap())
}

/// Operational footer fields (store/till/transaction number, cashier) that
/// only Trader Joe's receipts in this layout family print and that a
/// generic LLM summary schema has no slot for.
fn extract_transaction_meta(header_rows: &[PhysicalRow], payment_rows: &[PhysicalRow]) -> TransactionMeta {
    let mut meta = TransactionMeta::default();
    for row in header_rows.iter().chain(payment_rows.iter()) {
        let text = row.text.trim();
        if meta.store_number.is_none() {
            if let Some(caps) = store_number_pattern().captures(text) {
                meta.store_number = Some(caps[1].to_string());
            }
        }
        if meta.till_number.is_none() {
            if let Some(caps) = till_number_pattern().captures(text) {
                meta.till_number = Some(caps[1].to_string());
            }
        }
        if meta.transaction_number.is_none() {
            if let Some(caps) = transaction_number_pattern().captures(text) {
                meta.transaction_number = Some(caps[1].to_string());
            }
        }
        if meta.cashier.is_none() {
            if let Some(caps) = cashier_pattern().captures(text) {
                meta.cashier = Some(caps[1].trim().to_string());
            }
        }
    }
    meta
}

fn price_blocks<'a>(row: &'a PhysicalRow, amount_columns: &AmountColumns) -> Vec<&'a TextBlock> {
    row.amount_blocks()
        .into_iter()
        .filter(|b| b.amount.map(|a| a > 0.0).unwrap_or(false) && amount_columns.main_column.contains(b))
        .collect()
}

fn build_item(raw_name: &str, price: f64, amount_block_id: u32, row: &PhysicalRow, confidence: f64) -> Option<ExtractedItem> {
    if looks_like_totals_line(raw_name) {
        return None;
    }
    let untaxed = strip_taxable_prefix(raw_name.trim());
    let (quantity, unit_price, cleaned_name) = parse_quantity_unit_price(&untaxed);
    let product_name = fill_empty_product_name(Some(cleaned_name), None);
    if product_name.is_empty() {
        return None;
    }
    let mut item = ExtractedItem::new(product_name, price, amount_block_id, row.row_id);
    item.quantity = Some(quantity);
    item.unit_price = unit_price;
    item.raw_text = row.text.clone();
    item.confidence = confidence;
    Some(item)
}

fn extract_items_from_row(row: &PhysicalRow, amount_columns: &AmountColumns) -> Vec<ExtractedItem> {
    let prices = price_blocks(row, amount_columns);
    if prices.is_empty() {
        return Vec::new();
    }

    let name_blocks: Vec<&TextBlock> = row.blocks.iter().filter(|b| !b.is_amount && !b.text.trim().is_empty()).collect();

    if prices.len() == 1 {
        if name_blocks.is_empty() {
            return Vec::new();
        }
        let name = name_blocks.iter().map(|b| b.text.trim()).collect::<Vec<_>>().join(" ");
        let Some(amount) = prices[0].amount else { return Vec::new() };
        return build_item(&name, amount, prices[0].block_id, row, 1.0).into_iter().collect();
    }

    let mut results = Vec::new();
    if name_blocks.len() >= prices.len() {
        for (name_block, price_block) in name_blocks.iter().zip(prices.iter()) {
            let Some(amount) = price_block.amount else { continue };
            if let Some(item) = build_item(name_block.text.trim(), amount, price_block.block_id, row, 0.8) {
                results.push(item);
            }
        }
    } else if !name_blocks.is_empty() {
        let name = name_blocks.iter().map(|b| b.text.trim()).collect::<Vec<_>>().join(" ");
        if let Some(amount) = prices[0].amount {
            if let Some(item) = build_item(&name, amount, prices[0].block_id, row, 0.6) {
                results.push(item);
            }
        }
    }
    results
}

/// Returns the totals sequence plus whether the "Balance to pay" fallback
/// was used in place of a missing "TOTAL PURCHASE" line.
fn extract_totals(totals_rows: &[PhysicalRow], amount_columns: &AmountColumns) -> (TotalsSequence, bool) {
    let mut totals = TotalsSequence::default();
    let mut tax: Option<f64> = None;
    let mut balance_to_pay: Option<LabeledAmount> = None;

    for row in totals_rows {
        let norm = row.normalized_text();
        let is_tax_line = norm.contains("TAX") && (row.text.contains('@') || row.text.contains(':'));
        if is_tax_line {
            for block in row.amount_blocks() {
                if let Some(amount) = block.amount {
                    if amount > 0.0 && amount < 100.0 {
                        tax = Some(tax.map_or(amount, |current: f64| current.min(amount)));
                    }
                }
            }
        }

        if norm.contains("TOTAL") && norm.contains("PURCHASE") {
            let found = row
                .amount_blocks()
                .into_iter()
                .find(|b| b.amount.map(|a| a > 0.0).unwrap_or(false) && amount_columns.main_column.contains(b))
                .or_else(|| row.amount_blocks().into_iter().find(|b| b.amount.map(|a| a > 0.0).unwrap_or(false)));
            if let Some(block) = found {
                if let Some(amount) = block.amount {
                    totals.total = Some(LabeledAmount { label: "TOTAL PURCHASE".to_string(), amount, block_id: block.block_id, row_id: row.row_id });
                }
            }
        } else if norm.contains("BALANCE") && norm.contains("PAY") && balance_to_pay.is_none() {
            if let Some(block) = row.amount_blocks().into_iter().find(|b| b.amount.map(|a| a > 0.0).unwrap_or(false)) {
                if let Some(amount) = block.amount {
                    balance_to_pay = Some(LabeledAmount { label: "Balance to pay".to_string(), amount, block_id: block.block_id, row_id: row.row_id });
                }
            }
        }
    }

    let used_balance_fallback = totals.total.is_none() && balance_to_pay.is_some();
    if totals.total.is_none() {
        totals.total = balance_to_pay;
    }

    if let Some(tax_amount) = tax {
        totals.middle_amounts.push(LabeledAmount { label: "TAX".to_string(), amount: tax_amount, block_id: 0, row_id: 0 });
    }

    (totals, used_balance_fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{AmountColumn, RowType};
    use crate::store_config::{Identification, LayoutFamily};

    fn config() -> StoreConfig {
        StoreConfig {
            chain_id: "trader_joes".to_string(),
            layout_family: LayoutFamily::TraderJoes,
            extends: None,
            identification: Identification { primary_name: "TRADER JOE'S".to_string(), aliases: vec![] },
            pipeline: Default::default(),
            items: Default::default(),
            wash_data: Default::default(),
            validation: Default::default(),
            region_markers: Default::default(),
        }
    }

    fn amount_columns() -> AmountColumns {
        let col = AmountColumn { center_x: 0.9, tolerance: 0.05, confidence: 1.0, block_count: 1 };
        AmountColumns { main_column: col, all_columns: vec![col] }
    }

    fn item_row(id: u32, text: &str, price: f64) -> PhysicalRow {
        PhysicalRow {
            row_id: id,
            blocks: vec![
                TextBlock::new(id * 10, text, 0.2, id as f64 * 0.05).with_center(0.2, id as f64 * 0.05),
                TextBlock::new(id * 10 + 1, &format!("${price:.2}"), 0.9, id as f64 * 0.05).with_amount(price).with_center(0.9, id as f64 * 0.05),
            ],
            y_top: 0.0,
            y_bottom: 0.0,
            y_center: 0.0,
            text: format!("{text} ${price:.2}"),
            row_type: RowType::Item,
        }
    }

    fn totals_row(id: u32, text: &str, amount: f64) -> PhysicalRow {
        PhysicalRow {
            row_id: id,
            blocks: vec![
                TextBlock::new(id * 10, text, 0.2, id as f64 * 0.05).with_center(0.2, id as f64 * 0.05),
                TextBlock::new(id * 10 + 1, &format!("${amount:.2}"), 0.9, id as f64 * 0.05).with_amount(amount).with_center(0.9, id as f64 * 0.05),
            ],
            y_top: 0.0,
            y_bottom: 0.0,
            y_center: 0.0,
            text: format!("{text} ${amount:.2}"),
            row_type: RowType::Totals,
        }
    }

    #[test]
    fn test_taxable_prefix_stripped_and_quantity_parsed() {
        let row = item_row(0, "T 2@ $3.99 SPARKLING WATER", 7.98);
        let items = extract_items_from_row(&row, &amount_columns());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].product_name, "SPARKLING WATER");
        assert_eq!(items[0].quantity, Some(2.0));
        assert_eq!(items[0].unit_price, Some(3.99));
    }

    #[test]
    fn test_total_purchase_wins_over_balance_to_pay() {
        let rows = vec![totals_row(0, "Balance to pay", 10.00), totals_row(1, "TOTAL PURCHASE", 10.50)];
        let (totals, used_fallback) = extract_totals(&rows, &amount_columns());
        assert_eq!(totals.total.unwrap().amount, 10.50);
        assert!(!used_fallback);
    }

    #[test]
    fn test_balance_to_pay_used_when_total_purchase_missing() {
        let rows = vec![totals_row(0, "Balance to pay", 10.00)];
        let (totals, used_fallback) = extract_totals(&rows, &amount_columns());
        assert_eq!(totals.total.unwrap().amount, 10.00);
        assert!(used_fallback);
    }

    #[test]
    fn test_balance_to_pay_fallback_notes_low_confidence_without_failing() {
        let regions = ReceiptRegions {
            header_rows: vec![],
            item_rows: vec![item_row(0, "BANANAS", 1.99)],
            totals_rows: vec![totals_row(1, "Balance to pay", 1.99)],
            payment_rows: vec![],
        };
        let parsed = parse(&regions, &amount_columns(), &config(), None);
        assert!(parsed.validation.passed, "{:?}", parsed.validation.notes);
        assert!(parsed.validation.notes.iter().any(|n| n.starts_with("low_confidence_total")));
    }

    #[test]
    fn test_end_to_end_validation_passes_with_tax() {
        let regions = ReceiptRegions {
            header_rows: vec![],
            item_rows: vec![item_row(0, "BANANAS", 1.99)],
            totals_rows: vec![totals_row(1, "Tax: @ 10.2%", 0.20), totals_row(2, "TOTAL PURCHASE", 2.19)],
            payment_rows: vec![],
        };
        let parsed = parse(&regions, &amount_columns(), &config(), None);
        assert!(parsed.validation.passed, "{:?}", parsed.validation.notes);
    }

    fn text_row(id: u32, text: &str) -> PhysicalRow {
        PhysicalRow {
            row_id: id,
            blocks: vec![TextBlock::new(id * 10, text, 0.2, id as f64 * 0.05).with_center(0.2, id as f64 * 0.05)],
            y_top: 0.0,
            y_bottom: 0.0,
            y_center: 0.0,
            text: text.to_string(),
            row_type: RowType::Payment,
        }
    }

    #[test]
    fn test_extract_transaction_meta_reads_store_till_trans_and_cashier() {
        let payment_rows = vec![text_row(0, "STORE #123 TILL #04 TRANS #5678"), text_row(1, "CASHIER: JANE D")];
        let meta = extract_transaction_meta(&[], &payment_rows);
        assert_eq!(meta.store_number.as_deref(), Some("123"));
        assert_eq!(meta.till_number.as_deref(), Some("04"));
        assert_eq!(meta.transaction_number.as_deref(), Some("5678"));
        assert_eq!(meta.cashier.as_deref(), Some("JANE D"));
    }
}
