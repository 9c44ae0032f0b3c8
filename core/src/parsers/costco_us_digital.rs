//! Costco US digital receipt parser (§4.4).
//!
//! Discount rows carry two SKUs (`369985/990929`, or a 10–14 digit token the
//! OCR concatenated without the `/`) with a negative amount; the target is
//! the *last* SKU. Amount blocks are only accepted in `X.XX` form, so a bare
//! SKU fragment like `371` from a misread `371808` never passes as a price.
//! `TOTA`/`TOTAL` are both accepted for the total line, but "TOTAL NUMBER OF
//! ITEMS SOLD" rows are excluded.

use crate::geometry::{AmountColumns, ExtractedItem, LabeledAmount, PhysicalRow, ReceiptRegions, TotalsSequence};
use crate::parsed_receipt::{fill_empty_product_name, find_item_by_sku, ParsedReceipt, TransactionMeta, ValidationBlock};
use crate::store_config::StoreConfig;
use receipt_shared::money::SUM_TOLERANCE;
use regex::Regex;
use std::sync::OnceLock;

fn sku_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4,7})\b(.*)$").unwrap())
}

fn discount_two_skus() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4,7})\s*/\s*(\d{4,7})").unwrap())
}

fn discount_concatenated() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{10,14})$").unwrap())
}

fn composite_sku_name_amount() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4,7})\s+(.+?)\s+(\d+\.\d{2})\s*[NY]?$").unwrap())
}

fn valid_price_text(text: &str) -> bool {
    Regex::new(r"\d+\.\d{2}").unwrap().is_match(text)
}

fn is_discount_row(row: &PhysicalRow) -> bool {
    row.text.contains('/') && discount_two_skus().is_match(&row.text)
}

/// Splits a 10–14 digit token the OCR glued together into two SKUs by
/// trying the midpoint first, then nearby splits, preferring a split that
/// leaves both halves in the 4–7 digit SKU range.
fn split_concatenated_skus(token: &str) -> Option<(String, String)> {
    let len = token.len();
    for left_len in 4..=7usize {
        let right_len = len.saturating_sub(left_len);
        if (4..=7).contains(&right_len) && left_len + right_len == len {
            return Some((token[..left_len].to_string(), token[left_len..].to_string()));
        }
    }
    None
}

fn target_sku_from_discount_row(row_text: &str) -> Option<String> {
    if let Some(caps) = discount_two_skus().captures(row_text) {
        return Some(caps[2].to_string());
    }
    for token in row_text.split_whitespace() {
        if let Some(caps) = discount_concatenated().captures(token) {
            if let Some((_, right)) = split_concatenated_skus(&caps[1]) {
                return Some(right);
            }
        }
    }
    None
}

pub fn parse(regions: &ReceiptRegions, amount_columns: &AmountColumns, config: &StoreConfig, merchant_name: Option<&str>) -> ParsedReceipt {
    let mut items: Vec<ExtractedItem> = Vec::new();

    for row in &regions.item_rows {
        if is_discount_row(row) {
            apply_discount(row, &mut items);
            continue;
        }
        if let Some(item) = extract_item(row, amount_columns) {
            items.push(item);
        }
    }

    let totals = extract_totals(&regions.totals_rows, amount_columns);
    let membership_id = find_membership_id(&regions.header_rows);
    let store_name = merchant_name.map(str::to_string).or_else(|| Some(config.identification.primary_name.clone()));

    let items_sum: f64 = items.iter().map(|i| i.line_total).sum();
    let mut error_log = Vec::new();
    let mut passed = true;

    match totals.subtotal.as_ref().map(|s| s.amount) {
        Some(subtotal) if (items_sum - subtotal).abs() <= SUM_TOLERANCE => {}
        Some(subtotal) => {
            passed = false;
            error_log.push(format!("items sum mismatch: calculated {:.2} vs subtotal {:.2}", items_sum, subtotal));
        }
        None => {
            passed = false;
            error_log.push("subtotal not found".to_string());
        }
    }

    match (totals.subtotal.as_ref(), totals.total.as_ref()) {
        (Some(subtotal), Some(total)) => {
            let calculated = subtotal.amount + totals.middle_amounts.iter().map(|m| m.amount).sum::<f64>();
            if (calculated - total.amount).abs() > SUM_TOLERANCE {
                passed = false;
                error_log.push(format!("totals mismatch: calculated {:.2} vs total {:.2}", calculated, total.amount));
            }
        }
        _ => {
            passed = false;
            error_log.push("TOTAL not found".to_string());
        }
    }

    ParsedReceipt {
        method: "costco_us_digital".to_string(),
        chain_id: config.chain_id.clone(),
        store_name,
        address: None,
        currency: "USD".to_string(),
        membership_id,
        points_line_suppressed: false,
        transaction_meta: TransactionMeta::default(),
        items,
        totals,
        validation: ValidationBlock { passed, notes: error_log.clone() },
        error_log,
    }
}

fn extract_item(row: &PhysicalRow, amount_columns: &AmountColumns) -> Option<ExtractedItem> {
    // Single-block rows like "369985 KS OLIVE OIL 19.99 N" need the
    // composite regex since there's no separate amount block to anchor on.
    if row.blocks.len() == 1 {
        if let Some(caps) = composite_sku_name_amount().captures(&row.blocks[0].text) {
            let amount: f64 = caps[3].parse().ok()?;
            let sku = caps[1].to_string();
            let name = fill_empty_product_name(Some(caps[2].trim().to_string()), Some(&sku));
            let mut item = ExtractedItem::new(name, amount, row.blocks[0].block_id, row.row_id);
            item.sku = Some(sku);
            item.quantity = Some(1.0);
            item.raw_text = row.text.clone();
            return Some(item);
        }
    }

    let amount_block = row
        .amount_blocks()
        .into_iter()
        .filter(|b| valid_price_text(&b.text))
        .find(|b| amount_columns.main_column.contains(b))
        .or_else(|| row.amount_blocks().into_iter().find(|b| valid_price_text(&b.text)))?;
    let amount = amount_block.amount?;
    if amount < 0.0 {
        return None;
    }

    let mut sku = None;
    let mut name_parts = Vec::new();
    for block in &row.blocks {
        if block.block_id == amount_block.block_id {
            continue;
        }
        let text = block.text.trim();
        if text.is_empty() || (block.is_amount && valid_price_text(text)) {
            continue;
        }
        if let Some(caps) = sku_pattern().captures(text) {
            if sku.is_none() {
                sku = Some(caps[1].to_string());
            }
            let rest = caps[2].trim();
            if !rest.is_empty() {
                name_parts.push(rest.to_string());
            }
        } else {
            name_parts.push(text.to_string());
        }
    }

    let product_name = fill_empty_product_name(Some(name_parts.join(" ").trim().to_string()), sku.as_deref());
    if product_name.is_empty() {
        return None;
    }

    let mut item = ExtractedItem::new(product_name, amount, amount_block.block_id, row.row_id);
    item.sku = sku;
    item.quantity = Some(1.0);
    item.raw_text = row.text.clone();
    Some(item)
}

fn apply_discount(row: &PhysicalRow, items: &mut [ExtractedItem]) {
    let Some(target_sku) = target_sku_from_discount_row(&row.text) else {
        return;
    };
    let discount = row
        .amount_blocks()
        .into_iter()
        .filter(|b| valid_price_text(&b.text))
        .find_map(|b| b.amount)
        .filter(|a| *a < 0.0);
    let Some(discount) = discount else { return };
    let Some(idx) = find_item_by_sku(items, &target_sku) else {
        return;
    };
    let item = &mut items[idx];
    let original = item.line_total;
    item.line_total = receipt_shared::money::round2(original + discount);
    item.unit_price = Some(original);
    item.on_sale = true;
}

fn extract_totals(totals_rows: &[PhysicalRow], amount_columns: &AmountColumns) -> TotalsSequence {
    let mut totals = TotalsSequence::default();
    let mut tax: Option<f64> = None;

    for row in totals_rows {
        let norm = row.normalized_text();
        if norm.contains("ITEMSSOLD") || norm.contains("NUMBEROFITEMS") {
            continue;
        }
        let amount = row
            .amount_blocks()
            .into_iter()
            .filter(|b| valid_price_text(&b.text))
            .find(|b| amount_columns.main_column.contains(b))
            .or_else(|| row.amount_blocks().into_iter().find(|b| valid_price_text(&b.text)))
            .and_then(|b| b.amount);
        let Some(amount) = amount else { continue };

        if norm.contains("SUBTOTAL") {
            totals.subtotal = Some(LabeledAmount {
                label: "SUBTOTAL".to_string(),
                amount,
                block_id: row.row_id,
                row_id: row.row_id,
            });
        } else if norm == "TAX" || norm.contains("TOTALTAX") {
            if amount > 0.0 {
                tax = Some(amount);
            }
        } else if (norm.contains("TOTAL") || norm.contains("TOTA")) && !norm.contains("SUB") && amount > 0.0 {
            totals.total = Some(LabeledAmount {
                label: "TOTAL".to_string(),
                amount,
                block_id: row.row_id,
                row_id: row.row_id,
            });
        }
    }

    if let Some(tax_amount) = tax {
        totals.middle_amounts.push(LabeledAmount {
            label: "TAX".to_string(),
            amount: tax_amount,
            block_id: 0,
            row_id: 0,
        });
    }

    totals
}

fn find_membership_id(header_rows: &[PhysicalRow]) -> Option<String> {
    let pattern = Regex::new(r"(?i)Member\s*(\d{10,12})").unwrap();
    header_rows.iter().find_map(|row| pattern.captures(&row.text).map(|c| c[1].to_string()))
}
