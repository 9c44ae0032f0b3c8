//! Costco US physical receipt parser (§4.4).
//!
//! Four-column layout: `E | SKU | NAME | PRICE`. OCR sometimes collapses
//! two physically adjacent item lines into one `PhysicalRow`, carrying two
//! amount blocks; each is matched back to the name block closest to it in
//! `y`. Discount rows read `/targetSKU` on the left with a trailing-minus
//! amount. Short non-Latin runs (stray Cyrillic/Tamil OCR garbage) are
//! stripped from product names.

use crate::geometry::{AmountColumns, ExtractedItem, LabeledAmount, PhysicalRow, ReceiptRegions, TextBlock, TotalsSequence};
use crate::parsed_receipt::{fill_empty_product_name, find_item_by_sku, ParsedReceipt, TransactionMeta, ValidationBlock};
use crate::store_config::StoreConfig;
use receipt_shared::money::SUM_TOLERANCE;
use regex::Regex;
use std::sync::OnceLock;

const LINE_Y_EPS: f64 = 0.012;

fn sku_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{3,7})\s+(.+)$").unwrap())
}

fn discount_target_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/\s*(\d{4,7})\s*$").unwrap())
}

fn noise_script_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\u{0400}-\u{04FF}\u{0B80}-\u{0BFF}]").unwrap())
}

/// True for short non-Latin OCR garbage tokens (stray Cyrillic/Tamil runs).
fn is_ocr_noise_word(token: &str) -> bool {
    !token.is_empty() && token.chars().count() <= 4 && noise_script_pattern().is_match(token)
}

fn clean_product_name(name: &str) -> String {
    name.split_whitespace().filter(|w| !is_ocr_noise_word(w)).collect::<Vec<_>>().join(" ")
}

fn is_discount_row(row: &PhysicalRow) -> bool {
    row.text.contains('/') && discount_target_pattern().is_match(&row.text)
}

pub fn parse(regions: &ReceiptRegions, amount_columns: &AmountColumns, config: &StoreConfig, merchant_name: Option<&str>) -> ParsedReceipt {
    let mut items: Vec<ExtractedItem> = Vec::new();

    for row in &regions.item_rows {
        if is_discount_row(row) {
            apply_discount(row, &mut items);
            continue;
        }
        let extracted = extract_items_from_row(row, amount_columns);
        items.extend(extracted);
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
        method: "costco_us_physical".to_string(),
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

fn amount_blocks_in_column<'a>(row: &'a PhysicalRow, amount_columns: &AmountColumns) -> Vec<&'a TextBlock> {
    row.amount_blocks()
        .into_iter()
        .filter(|b| b.amount.map(|a| a >= 0.0).unwrap_or(false) && amount_columns.main_column.contains(b))
        .collect()
}

fn extract_items_from_row(row: &PhysicalRow, amount_columns: &AmountColumns) -> Vec<ExtractedItem> {
    let amount_blocks = amount_blocks_in_column(row, amount_columns);
    if amount_blocks.is_empty() {
        return Vec::new();
    }
    if amount_blocks.len() == 1 {
        return extract_single(row, amount_blocks[0]).into_iter().collect();
    }
    extract_multi(row, &amount_blocks)
}

fn extract_single(row: &PhysicalRow, amount_block: &TextBlock) -> Option<ExtractedItem> {
    let amount = amount_block.amount?;
    let (sku, name) = extract_sku_and_name(&row.blocks, amount_block.block_id);
    let product_name = fill_empty_product_name(Some(name), sku.as_deref());
    if product_name.is_empty() {
        return None;
    }
    let mut item = ExtractedItem::new(product_name, amount, amount_block.block_id, row.row_id);
    item.sku = sku;
    item.quantity = Some(1.0);
    item.raw_text = row.text.clone();
    Some(item)
}

fn extract_multi(row: &PhysicalRow, amount_blocks: &[&TextBlock]) -> Vec<ExtractedItem> {
    let name_blocks: Vec<&TextBlock> = row
        .blocks
        .iter()
        .filter(|b| !b.is_amount && !b.text.trim().is_empty() && !Regex::new(r"^E+$").unwrap().is_match(b.text.trim()))
        .collect();

    let mut sorted_amounts = amount_blocks.to_vec();
    sorted_amounts.sort_by(|a, b| a.center_y.total_cmp(&b.center_y));

    let mut results = Vec::new();
    for amount_block in sorted_amounts {
        let Some(amount) = amount_block.amount else { continue };
        if amount < 0.0 {
            continue;
        }
        let mut sorted_closest: Vec<&TextBlock> = name_blocks
            .iter()
            .copied()
            .filter(|nb| (nb.center_y - amount_block.center_y).abs() <= LINE_Y_EPS)
            .collect();
        sorted_closest.sort_by(|a, b| a.center_x.total_cmp(&b.center_x));

        let mut sku = None;
        let mut name_parts = Vec::new();
        for block in &sorted_closest {
            let text = block.text.trim();
            if text.is_empty() || is_ocr_noise_word(text) {
                continue;
            }
            if let Some(caps) = sku_pattern().captures(text) {
                if sku.is_none() && caps[1].len() >= 4 {
                    sku = Some(caps[1].to_string());
                }
                let part = caps[2].trim();
                if !part.is_empty() {
                    name_parts.push(part.to_string());
                }
            } else {
                name_parts.push(text.to_string());
            }
        }
        let name = clean_product_name(&name_parts.join(" "));
        if name.is_empty() {
            continue;
        }
        let mut item = ExtractedItem::new(name, amount, amount_block.block_id, row.row_id);
        item.sku = sku;
        item.quantity = Some(1.0);
        item.raw_text = row.text.clone();
        results.push(item);
    }
    results
}

fn extract_sku_and_name(blocks: &[TextBlock], amount_block_id: u32) -> (Option<String>, String) {
    let mut sku = None;
    let mut name_parts = Vec::new();
    for block in blocks {
        if block.block_id == amount_block_id {
            continue;
        }
        let text = block.text.trim();
        if text.is_empty() || is_ocr_noise_word(text) {
            continue;
        }
        if let Some(caps) = sku_pattern().captures(text) {
            if sku.is_none() && caps[1].len() >= 4 {
                sku = Some(caps[1].to_string());
            }
            let part = caps[2].trim();
            if !part.is_empty() {
                name_parts.push(part.to_string());
            }
        } else {
            name_parts.push(text.to_string());
        }
    }
    (sku, clean_product_name(&name_parts.join(" ")))
}

fn apply_discount(row: &PhysicalRow, items: &mut [ExtractedItem]) {
    let Some(target_sku) = discount_target_pattern().captures(&row.text).map(|c| c[1].to_string()) else {
        return;
    };
    let discount = row.amount_blocks().into_iter().find_map(|b| b.amount).filter(|a| *a < 0.0);
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
            .find(|b| amount_columns.main_column.contains(b))
            .or_else(|| row.amount_blocks().into_iter().next())
            .and_then(|b| b.amount);
        let Some(amount) = amount else { continue };

        if norm.contains("SUBTOTAL") || norm.contains("SUBTOTA") {
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
    let pattern = Regex::new(r"(?i)Membe[r]?\s*(\d{10,12})").unwrap();
    header_rows.iter().find_map(|row| pattern.captures(&row.text).map(|c| c[1].to_string()))
}
