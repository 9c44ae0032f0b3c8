//! T&T Supermarket parser (§4.4), Canada/US.
//!
//! Weight items split across two rows: `X.XX lb @ $Y.YY/lb` carries the
//! quantity and unit price, the following row (often tagged with an
//! amount suffix like `FP`) carries the line total. Membership-card and
//! loyalty-points rows are both zero-amount and get suppressed from
//! `items`, but a membership card number is preserved separately. The CA
//! variant disables skew correction and lets deposit/fee rows contribute
//! to the grocery-mode total; both differences live in `StoreConfig`, not
//! here.

use crate::geometry::{AmountColumns, ExtractedItem, LabeledAmount, PhysicalRow, ReceiptRegions, TotalsSequence};
use crate::parsed_receipt::{ParsedReceipt, TransactionMeta, ValidationBlock};
use crate::store_config::StoreConfig;
use receipt_shared::money::{round2, SUM_TOLERANCE};
use regex::Regex;
use std::sync::OnceLock;

fn weight_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d+\.\d+)\s*lb\s*@\s*\$?\s*(\d+\.\d+)\s*/\s*lb").unwrap())
}

fn membership_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\*{3,}(\d{4,})$").unwrap())
}

fn points_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bpoints?\b|\bpts\b").unwrap())
}

fn default_fee_patterns() -> Vec<Regex> {
    vec![
        Regex::new(r"(?i)env(iro(nmental)?)?\s*fee\s*\(?crf\)?").unwrap(),
        Regex::new(r"(?i)bottle\s*deposit").unwrap(),
    ]
}

fn is_membership_row(text: &str, amount: Option<f64>) -> bool {
    amount.map(|a| a == 0.0).unwrap_or(true) && membership_pattern().is_match(text.trim())
}

fn is_points_row(text: &str, amount: Option<f64>) -> bool {
    amount.map(|a| a == 0.0).unwrap_or(true) && points_pattern().is_match(text)
}

fn is_fee_row(text: &str, patterns: &[Regex]) -> bool {
    patterns.iter().any(|p| p.is_match(text))
}

fn strip_amount_suffix(name: &str, suffixes: &[String]) -> String {
    let mut result = name.trim().to_string();
    for suffix in suffixes {
        let trimmed = suffix.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(stripped) = result.strip_suffix(trimmed) {
            result = stripped.trim_end().to_string();
        }
    }
    result
}

pub fn parse(regions: &ReceiptRegions, amount_columns: &AmountColumns, config: &StoreConfig, merchant_name: Option<&str>) -> ParsedReceipt {
    let fee_patterns: Vec<Regex> = if config.wash_data.fee_row_patterns.is_empty() {
        default_fee_patterns()
    } else {
        config
            .wash_data
            .fee_row_patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    };

    let mut items: Vec<ExtractedItem> = Vec::new();
    let mut membership_id = None;
    let mut points_line_suppressed = false;
    let mut pending_weight: Option<(f64, f64)> = None;

    for row in &regions.item_rows {
        let text = row.text.trim();
        let amount = row
            .amount_blocks()
            .into_iter()
            .find(|b| amount_columns.main_column.contains(b))
            .and_then(|b| b.amount);

        if let Some(caps) = weight_pattern().captures(text) {
            let quantity: f64 = caps[1].parse().unwrap_or(0.0);
            let unit_price: f64 = caps[2].parse().unwrap_or(0.0);
            pending_weight = Some((quantity, unit_price));
            continue;
        }

        if is_membership_row(text, amount) {
            if let Some(caps) = membership_pattern().captures(text.trim()) {
                membership_id = Some(caps[1].to_string());
            }
            continue;
        }

        if is_points_row(text, amount) {
            points_line_suppressed = true;
            continue;
        }

        let Some(amount) = amount else { continue };

        let product_name = strip_amount_suffix(&product_name_from_row(row), &config.items.layout.amount_suffixes);
        if product_name.is_empty() {
            continue;
        }

        let amount_block_id = row.amount_blocks().into_iter().find(|b| amount_columns.main_column.contains(b)).map(|b| b.block_id).unwrap_or(0);
        let mut item = ExtractedItem::new(product_name.clone(), amount, amount_block_id, row.row_id);
        item.raw_text = row.text.clone();
        item.is_deposit_or_fee = is_fee_row(&product_name, &fee_patterns);

        if let Some((quantity, unit_price)) = pending_weight.take() {
            item.quantity = Some(quantity);
            item.unit_price = Some(unit_price);
            item.unit = Some("lb".to_string());
        } else {
            item.quantity = Some(1.0);
        }

        items.push(item);
    }

    let totals = extract_totals(&regions.totals_rows, amount_columns);
    let store_name = merchant_name.map(str::to_string).or_else(|| Some(config.identification.primary_name.clone()));

    let has_fees_among_items = items.iter().any(|i| i.is_deposit_or_fee);
    let items_sum: f64 = items.iter().map(|i| i.line_total).sum();
    let mut error_log = Vec::new();
    let mut passed = true;

    match totals.subtotal.as_ref().map(|s| s.amount) {
        Some(subtotal) if (items_sum - subtotal).abs() <= SUM_TOLERANCE => {}
        Some(subtotal) if has_fees_among_items => {
            // Grocery mode: the subtotal sometimes excludes deposit/fee
            // items entirely, so retry with those excluded before failing.
            let without_fees: f64 = items.iter().filter(|i| !i.is_deposit_or_fee).map(|i| i.line_total).sum();
            if (without_fees - subtotal).abs() > SUM_TOLERANCE {
                passed = false;
                error_log.push(format!("items sum mismatch: calculated {:.2} vs subtotal {:.2}", items_sum, subtotal));
            }
        }
        Some(subtotal) => {
            passed = false;
            error_log.push(format!("items sum mismatch: calculated {:.2} vs subtotal {:.2}", items_sum, subtotal));
        }
        None if !items.is_empty() => {
            // No subtotal row at all: fall back to grocery mode, where the
            // calculated total (items + taxes) must match TOTAL directly.
            let calculated = round2(items_sum + totals.middle_amounts.iter().map(|m| m.amount).sum::<f64>());
            if let Some(total) = totals.total.as_ref() {
                if (calculated - total.amount).abs() > SUM_TOLERANCE {
                    passed = false;
                    error_log.push(format!("grocery-mode total mismatch: calculated {:.2} vs total {:.2}", calculated, total.amount));
                }
            } else {
                passed = false;
                error_log.push("TOTAL not found".to_string());
            }
        }
        None => {}
    }

    ParsedReceipt {
        method: "tt_supermarket".to_string(),
        chain_id: config.chain_id.clone(),
        store_name,
        address: None,
        currency: if config.chain_id.contains("ca") { "CAD".to_string() } else { "USD".to_string() },
        membership_id,
        points_line_suppressed,
        transaction_meta: TransactionMeta::default(),
        items,
        totals,
        validation: ValidationBlock { passed, notes: error_log.clone() },
        error_log,
    }
}

fn product_name_from_row(row: &PhysicalRow) -> String {
    row.text_blocks().into_iter().map(|b| b.text.trim()).filter(|t| !t.is_empty()).collect::<Vec<_>>().join(" ")
}

fn extract_totals(totals_rows: &[PhysicalRow], amount_columns: &AmountColumns) -> TotalsSequence {
    let mut totals = TotalsSequence::default();

    for row in totals_rows {
        let norm = row.normalized_text();
        let amount = row
            .amount_blocks()
            .into_iter()
            .find(|b| amount_columns.main_column.contains(b))
            .or_else(|| row.amount_blocks().into_iter().next())
            .and_then(|b| b.amount);
        let Some(amount) = amount else { continue };

        if norm.contains("SUBTOTAL") {
            totals.subtotal = Some(LabeledAmount { label: "SUBTOTAL".to_string(), amount, block_id: row.row_id, row_id: row.row_id });
        } else if norm.contains("GST") || norm.contains("HST") || norm.contains("PST") || norm == "TAX" || norm.contains("TOTALTAX") {
            totals.middle_amounts.push(LabeledAmount { label: "TAX".to_string(), amount, block_id: row.row_id, row_id: row.row_id });
        } else if norm.contains("TOTAL") && !norm.contains("SUB") {
            totals.total = Some(LabeledAmount { label: "TOTAL".to_string(), amount, block_id: row.row_id, row_id: row.row_id });
        }
    }

    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{AmountColumn, RowType, TextBlock};
    use crate::store_config::{Identification, LayoutFamily};

    fn config() -> StoreConfig {
        StoreConfig {
            chain_id: "tt_supermarket_ca".to_string(),
            layout_family: LayoutFamily::TtSupermarket,
            extends: None,
            identification: Identification { primary_name: "T&T SUPERMARKET".to_string(), aliases: vec![] },
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

    fn row(id: u32, text: &str, amount: Option<f64>) -> PhysicalRow {
        let mut blocks = vec![TextBlock::new(id * 10, text, 0.2, id as f64 * 0.05).with_center(0.2, id as f64 * 0.05)];
        if let Some(a) = amount {
            blocks.push(TextBlock::new(id * 10 + 1, &format!("{a:.2}"), 0.9, id as f64 * 0.05).with_amount(a).with_center(0.9, id as f64 * 0.05));
        }
        PhysicalRow {
            row_id: id,
            blocks,
            y_top: 0.0,
            y_bottom: 0.0,
            y_center: 0.0,
            text: if amount.is_some() { format!("{text} {:.2}", amount.unwrap()) } else { text.to_string() },
            row_type: RowType::Item,
        }
    }

    #[test]
    fn test_weight_item_merges_across_rows() {
        let regions = ReceiptRegions {
            header_rows: vec![],
            item_rows: vec![row(0, "BOK CHOY 1.20 lb @ $1.99/lb", None), row(1, "BOK CHOY", Some(2.39))],
            totals_rows: vec![],
            payment_rows: vec![],
        };
        let parsed = parse(&regions, &amount_columns(), &config(), None);
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].quantity, Some(1.20));
        assert_eq!(parsed.items[0].unit_price, Some(1.99));
        assert_eq!(parsed.items[0].unit.as_deref(), Some("lb"));
        assert_eq!(parsed.items[0].line_total, 2.39);
    }

    #[test]
    fn test_membership_and_points_rows_suppressed() {
        let regions = ReceiptRegions {
            header_rows: vec![],
            item_rows: vec![row(0, "MILK", Some(3.99)), row(1, "***600032371", Some(0.0)), row(2, "Points", Some(0.0))],
            totals_rows: vec![],
            payment_rows: vec![],
        };
        let parsed = parse(&regions, &amount_columns(), &config(), None);
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.membership_id.as_deref(), Some("600032371"));
        assert!(parsed.points_line_suppressed);
    }

    #[test]
    fn test_fee_row_marked_deposit_or_fee() {
        let regions = ReceiptRegions {
            header_rows: vec![],
            item_rows: vec![row(0, "SODA CASE", Some(5.99)), row(1, "Bottle Deposit", Some(0.20))],
            totals_rows: vec![],
            payment_rows: vec![],
        };
        let parsed = parse(&regions, &amount_columns(), &config(), None);
        assert!(parsed.items.iter().any(|i| i.is_deposit_or_fee));
    }
}
