//! Costco Canada digital receipt parser (§4.4).
//!
//! Items carry a left SKU (4–7 digits) and a right amount. Discount rows
//! read `SKU TPD/targetSKU` with a negative amount and merge into the item
//! bearing `targetSKU`. Totals reconcile `(A)HST`/`(B)5%GST` against
//! `TOTAL TAX` when they disagree by more than tolerance.

use crate::geometry::{AmountColumns, ExtractedItem, PhysicalRow, ReceiptRegions, TotalsSequence};
use crate::parsed_receipt::{fill_empty_product_name, find_item_by_sku, ParsedReceipt, TransactionMeta, ValidationBlock};
use crate::store_config::StoreConfig;
use receipt_shared::money::SUM_TOLERANCE;
use regex::Regex;
use std::sync::OnceLock;

fn sku_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4,7})\b(.*)$").unwrap())
}

fn tpd_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\d{4,7}\s+TPD/(\d{4,7})").unwrap())
}

fn is_tpd_row(row: &PhysicalRow) -> bool {
    row.text.to_uppercase().contains("TPD/")
}

pub fn parse(regions: &ReceiptRegions, amount_columns: &AmountColumns, config: &StoreConfig, merchant_name: Option<&str>) -> ParsedReceipt {
    let mut items: Vec<ExtractedItem> = Vec::new();

    for row in &regions.item_rows {
        if is_tpd_row(row) {
            apply_tpd_discount(row, &mut items);
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

    if let Some(subtotal) = totals.subtotal.as_ref().map(|s| s.amount) {
        if (items_sum - subtotal).abs() > SUM_TOLERANCE {
            passed = false;
            error_log.push(format!("items sum mismatch: calculated {:.2} vs subtotal {:.2}", items_sum, subtotal));
        }
    } else {
        passed = false;
        error_log.push("subtotal not found".to_string());
    }

    if let (Some(subtotal), Some(total)) = (totals.subtotal.as_ref(), totals.total.as_ref()) {
        let calculated = subtotal.amount + totals.middle_amounts.iter().map(|m| m.amount).sum::<f64>();
        if (calculated - total.amount).abs() > SUM_TOLERANCE {
            passed = false;
            error_log.push(format!("totals mismatch: calculated {:.2} vs total {:.2}", calculated, total.amount));
        }
    } else {
        passed = false;
        error_log.push("TOTAL not found".to_string());
    }

    ParsedReceipt {
        method: "costco_ca_digital".to_string(),
        chain_id: config.chain_id.clone(),
        store_name,
        address: None,
        currency: "CAD".to_string(),
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
    let amount_block = row
        .amount_blocks()
        .into_iter()
        .find(|b| amount_columns.main_column.contains(b))
        .or_else(|| row.amount_blocks().into_iter().next())?;
    let amount = amount_block.amount?;
    if amount < 0.0 {
        return None;
    }

    let mut sku = None;
    let mut name_parts = Vec::new();
    for block in &row.blocks {
        if block.is_amount || block.block_id == amount_block.block_id {
            continue;
        }
        let text = block.text.trim();
        if text.is_empty() {
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

fn apply_tpd_discount(row: &PhysicalRow, items: &mut [ExtractedItem]) {
    let Some(target_sku) = tpd_pattern().captures(&row.text).map(|c| c[1].to_string()) else {
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
    let mut hst: Option<f64> = None;
    let mut gst: Option<f64> = None;
    let mut total_tax: Option<f64> = None;

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
            totals.subtotal = Some(crate::geometry::LabeledAmount {
                label: "SUBTOTAL".to_string(),
                amount,
                block_id: row.row_id,
                row_id: row.row_id,
            });
        } else if norm.contains("AHST") || (norm.contains("HST") && row.text.contains("(A)")) {
            if amount > 0.0 {
                hst = Some(amount);
            }
        } else if norm.contains("B5GST") || norm.contains("5GST") || (norm.contains("GST") && row.text.contains("(B)")) {
            if amount > 0.0 {
                gst = Some(amount);
            }
        } else if norm.contains("TOTALTAX") {
            if amount > 0.0 {
                total_tax = Some(amount);
            }
        } else if norm.contains("TOTAL") && !norm.contains("SUB") && !norm.contains("TAX") && amount > 10.0 {
            totals.total = Some(crate::geometry::LabeledAmount {
                label: "TOTAL".to_string(),
                amount,
                block_id: row.row_id,
                row_id: row.row_id,
            });
        }
    }

    if hst.is_some() || gst.is_some() {
        let mut hst_val = hst.unwrap_or(0.0);
        let mut gst_val = gst.unwrap_or(0.0);
        if let Some(tt) = total_tax {
            if (hst_val + gst_val - tt).abs() > SUM_TOLERANCE {
                if hst.is_some() && gst.is_some() {
                    hst_val = receipt_shared::money::round2(tt - gst_val);
                } else if hst.is_some() {
                    hst_val = receipt_shared::money::round2(tt);
                    gst_val = 0.0;
                } else {
                    gst_val = receipt_shared::money::round2(tt);
                }
            }
        }
        if hst_val > 0.0 {
            totals.middle_amounts.push(crate::geometry::LabeledAmount {
                label: "HST".to_string(),
                amount: hst_val,
                block_id: 0,
                row_id: 0,
            });
        }
        if gst_val > 0.0 {
            totals.middle_amounts.push(crate::geometry::LabeledAmount {
                label: "GST".to_string(),
                amount: gst_val,
                block_id: 0,
                row_id: 0,
            });
        }
    } else if let Some(tt) = total_tax {
        totals.middle_amounts.push(crate::geometry::LabeledAmount {
            label: "TOTAL TAX".to_string(),
            amount: receipt_shared::money::round2(tt),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{AmountColumn, RowType, TextBlock};
    use crate::store_config::{Identification, LayoutFamily, Pipeline, StoreConfig, Validation, WashData};

    fn config() -> StoreConfig {
        StoreConfig {
            chain_id: "costco_ca".to_string(),
            layout_family: LayoutFamily::CostcoCaDigital,
            extends: None,
            identification: Identification {
                primary_name: "COSTCO WHOLESALE".to_string(),
                aliases: vec![],
            },
            pipeline: Pipeline::default(),
            items: crate::store_config::Items::default(),
            wash_data: WashData::default(),
            validation: Validation::default(),
            region_markers: crate::store_config::RegionMarkerPatterns::default(),
        }
    }

    fn amount_columns() -> AmountColumns {
        let col = AmountColumn {
            center_x: 0.9,
            tolerance: 0.05,
            confidence: 1.0,
            block_count: 1,
        };
        AmountColumns { main_column: col, all_columns: vec![col] }
    }

    fn item_row(id: u32, sku: &str, name: &str, amount: f64) -> PhysicalRow {
        let sku_block = TextBlock::new(id * 10, format!("{sku} {name}"), 0.1, 0.1);
        let amount_block = TextBlock::new(id * 10 + 1, format!("{amount:.2}"), 0.9, 0.1).with_amount(amount);
        PhysicalRow {
            row_id: id,
            blocks: vec![sku_block, amount_block],
            y_top: 0.0,
            y_bottom: 0.0,
            y_center: 0.0,
            text: format!("{sku} {name} {amount:.2}"),
            row_type: RowType::Item,
        }
    }

    #[test]
    fn test_tax_reconciliation_adjusts_hst_to_match_total_tax() {
        let subtotal_row = PhysicalRow {
            row_id: 10,
            blocks: vec![TextBlock::new(100, "18.00", 0.9, 0.5).with_amount(18.00)],
            y_top: 0.0,
            y_bottom: 0.0,
            y_center: 0.0,
            text: "SUBTOTAL 18.00".to_string(),
            row_type: RowType::Totals,
        };
        let hst_row = PhysicalRow {
            row_id: 11,
            blocks: vec![TextBlock::new(101, "13.00", 0.9, 0.6).with_amount(13.00)],
            y_top: 0.0,
            y_bottom: 0.0,
            y_center: 0.0,
            text: "(A)HST 13.00".to_string(),
            row_type: RowType::Totals,
        };
        let gst_row = PhysicalRow {
            row_id: 12,
            blocks: vec![TextBlock::new(102, "5.00", 0.9, 0.7).with_amount(5.00)],
            y_top: 0.0,
            y_bottom: 0.0,
            y_center: 0.0,
            text: "(B)5%GST 5.00".to_string(),
            row_type: RowType::Totals,
        };
        let total_tax_row = PhysicalRow {
            row_id: 13,
            blocks: vec![TextBlock::new(103, "19.00", 0.9, 0.8).with_amount(19.00)],
            y_top: 0.0,
            y_bottom: 0.0,
            y_center: 0.0,
            text: "TOTAL TAX 19.00".to_string(),
            row_type: RowType::Totals,
        };
        let total_row = PhysicalRow {
            row_id: 14,
            blocks: vec![TextBlock::new(104, "37.00", 0.9, 0.9).with_amount(37.00)],
            y_top: 0.0,
            y_bottom: 0.0,
            y_center: 0.0,
            text: "TOTAL 37.00".to_string(),
            row_type: RowType::Totals,
        };
        let totals = extract_totals(&[subtotal_row, hst_row, gst_row, total_tax_row, total_row], &amount_columns());
        let hst = totals.middle_amounts.iter().find(|m| m.label == "HST").unwrap();
        let gst = totals.middle_amounts.iter().find(|m| m.label == "GST").unwrap();
        assert_eq!(hst.amount, 14.00);
        assert_eq!(gst.amount, 5.00);
    }

    #[test]
    fn test_discount_attaches_to_item_by_sku() {
        let regions = ReceiptRegions {
            header_rows: vec![],
            item_rows: vec![
                item_row(0, "369985", "ITEM A", 10.00),
                PhysicalRow {
                    row_id: 1,
                    blocks: vec![
                        TextBlock::new(20, "369985 TPD/369985", 0.1, 0.2),
                        TextBlock::new(21, "-2.00", 0.9, 0.2).with_amount(-2.00),
                    ],
                    y_top: 0.0,
                    y_bottom: 0.0,
                    y_center: 0.0,
                    text: "369985 TPD/369985 -2.00".to_string(),
                    row_type: RowType::Item,
                },
            ],
            totals_rows: vec![],
            payment_rows: vec![],
        };
        let receipt = parse(&regions, &amount_columns(), &config(), None);
        assert_eq!(receipt.items.len(), 1);
        assert_eq!(receipt.items[0].line_total, 8.00);
        assert!(receipt.items[0].on_sale);
    }
}
