//! Sum checker & conflict resolver (§4.7): end-to-end arithmetic
//! consistency across items/subtotal/tax/total, package-price promotion
//! detection, and trusted-hint conflict resolution.

use crate::geometry::ExtractedItem;
use crate::summary::ReceiptSummary;
use receipt_shared::money::{round2, SUM_TOLERANCE};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageDiscount {
    pub pattern: String,
    pub pattern_type: String,
    pub quantity: usize,
    pub package_price: f64,
    pub matched_items: Vec<ExtractedItem>,
    pub item_sum: f64,
    pub valid: bool,
}

struct PackagePattern {
    regex: Regex,
    label: &'static str,
}

fn package_patterns() -> &'static [PackagePattern] {
    static PATTERNS: OnceLock<Vec<PackagePattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            PackagePattern {
                regex: Regex::new(r"(?i)(\d+)/\$(\d+\.?\d*)").unwrap(),
                label: "quantity/$price",
            },
            PackagePattern {
                regex: Regex::new(r"(?i)(\d+)\s+for\s+\$(\d+\.?\d*)").unwrap(),
                label: "quantity for $price",
            },
            PackagePattern {
                regex: Regex::new(r"(?i)(\d+)\s+for\s+(\d+\.?\d*)").unwrap(),
                label: "quantity for price",
            },
        ]
    })
}

/// Detects `N/$X` / `N for $X` / `N for X` package-price promotions in
/// `raw_text` and checks whether `quantity` on-sale items sum to the
/// package price, trying small combinatoric subsets (`quantity <= 3`) when
/// the first `quantity` on-sale items in order don't already match.
pub fn detect_package_price_discounts(raw_text: &str, items: &[ExtractedItem]) -> Vec<PackageDiscount> {
    let sale_items: Vec<&ExtractedItem> = items.iter().filter(|i| i.on_sale).collect();
    let mut detected = Vec::new();

    for pattern in package_patterns() {
        for cap in pattern.regex.captures_iter(raw_text) {
            let quantity: usize = match cap[1].parse() {
                Ok(q) => q,
                Err(_) => continue,
            };
            let price: f64 = match cap[2].parse() {
                Ok(p) => p,
                Err(_) => continue,
            };
            if quantity == 0 || sale_items.len() < quantity {
                continue;
            }

            let mut matched: Option<Vec<&ExtractedItem>> = None;
            let first_n = &sale_items[..quantity];
            let first_n_sum: f64 = first_n.iter().map(|i| i.line_total).sum();
            if (first_n_sum - price).abs() <= SUM_TOLERANCE {
                matched = Some(first_n.to_vec());
            } else if quantity <= 3 {
                for combo in combinations(sale_items.len(), quantity) {
                    let combo_items: Vec<&ExtractedItem> = combo.iter().map(|&i| sale_items[i]).collect();
                    let combo_sum: f64 = combo_items.iter().map(|i| i.line_total).sum();
                    if (combo_sum - price).abs() <= SUM_TOLERANCE {
                        matched = Some(combo_items);
                        break;
                    }
                }
            }

            if let Some(matched_items) = matched {
                let item_sum = round2(matched_items.iter().map(|i| i.line_total).sum());
                detected.push(PackageDiscount {
                    pattern: cap[0].to_string(),
                    pattern_type: pattern.label.to_string(),
                    quantity,
                    package_price: price,
                    valid: (item_sum - price).abs() <= SUM_TOLERANCE,
                    matched_items: matched_items.into_iter().cloned().collect(),
                    item_sum,
                });
            }
        }
    }

    detected
}

/// All `k`-subsets of `0..n`, as index lists. `n` and `k` are small
/// (`k <= 3`) in every caller — this is a combinatoric search bound, not a
/// general-purpose combinator.
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    fn go(start: usize, n: usize, k: usize, acc: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if acc.len() == k {
            out.push(acc.clone());
            return;
        }
        for i in start..n {
            acc.push(i);
            go(i + 1, n, k, acc, out);
            acc.pop();
        }
    }
    let mut out = Vec::new();
    go(0, n, k, &mut Vec::new(), &mut out);
    out
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckDetail {
    pub passed: bool,
    pub calculated: f64,
    pub expected: Option<f64>,
    pub difference: Option<f64>,
    pub note: Option<String>,
}

/// Full sum-check report (§4.7), mirroring `ReceiptSummary`'s fields
/// against the extracted items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SumCheckReport {
    pub line_total_sum: f64,
    pub deposit_fee_sum: f64,
    pub subtotal: Option<f64>,
    pub tax: f64,
    pub total: Option<f64>,
    pub line_total_sum_check: Option<CheckDetail>,
    pub subtotal_tax_sum_check: Option<CheckDetail>,
    pub package_discounts: Vec<PackageDiscount>,
    pub errors: Vec<String>,
    pub passed: bool,
}

/// Checks receipt-level arithmetic, covering the grocery-mode (no
/// subtotal), standard, and deposit/fee-adjusted branches.
pub fn check_receipt_sums(items: &[ExtractedItem], summary: &ReceiptSummary, raw_text: &str) -> SumCheckReport {
    let package_discounts = detect_package_price_discounts(raw_text, items);
    let tax = summary.tax_total();
    let line_total_sum = items.iter().map(|i| i.line_total).sum::<f64>();
    let deposit_fee_sum = items.iter().filter(|i| i.is_deposit_or_fee).map(|i| i.line_total).sum::<f64>();

    let mut report = SumCheckReport {
        line_total_sum: round2(line_total_sum),
        deposit_fee_sum: round2(deposit_fee_sum),
        subtotal: summary.subtotal,
        tax: round2(tax),
        total: summary.total,
        package_discounts,
        ..Default::default()
    };

    let Some(total) = summary.total else {
        report.errors.push("total is null, cannot perform sum check".to_string());
        report.line_total_sum_check = Some(CheckDetail {
            passed: false,
            calculated: round2(line_total_sum),
            expected: None,
            difference: None,
            note: Some("total_is_null".to_string()),
        });
        report.passed = false;
        return report;
    };

    // Grocery mode: no subtotal reported, compare items sum directly to total.
    let Some(subtotal) = summary.subtotal else {
        let diff = (line_total_sum - total).abs();
        let passed = diff <= SUM_TOLERANCE;
        report.line_total_sum_check = Some(CheckDetail {
            passed,
            calculated: round2(line_total_sum),
            expected: Some(round2(total)),
            difference: Some(round2(diff)),
            note: Some("grocery: items sum = total (no subtotal)".to_string()),
        });
        if !passed {
            report.errors.push(format!(
                "line total sum mismatch (subtotal is null): calculated {:.2}, expected {:.2}",
                line_total_sum, total
            ));
        }
        report.passed = passed;
        return report;
    };

    let product_line_total_sum = line_total_sum - deposit_fee_sum;
    let line_total_diff = (product_line_total_sum - subtotal).abs();
    let mut line_total_passed = line_total_diff <= SUM_TOLERANCE;
    if !line_total_passed && (line_total_sum - subtotal).abs() <= SUM_TOLERANCE {
        line_total_passed = true;
    }
    report.line_total_sum_check = Some(CheckDetail {
        passed: line_total_passed,
        calculated: round2(product_line_total_sum),
        expected: Some(round2(subtotal)),
        difference: Some(round2(line_total_diff)),
        note: Some("sum of product line_totals (excluding deposits/fees) vs subtotal".to_string()),
    });
    if !line_total_passed {
        report
            .errors
            .push(format!("line total sum mismatch: calculated {:.2}, expected {:.2}", line_total_sum, subtotal));
    }

    if !line_total_passed {
        let line_total_plus_tax = line_total_sum + tax;
        if (line_total_plus_tax - total).abs() <= SUM_TOLERANCE {
            report.subtotal_tax_sum_check = Some(CheckDetail {
                passed: true,
                calculated: round2(line_total_plus_tax),
                expected: Some(round2(total)),
                difference: Some(round2((line_total_plus_tax - total).abs())),
                note: Some("line_total_sum + tax = total".to_string()),
            });
            report.passed = true;
            return report;
        }
    }

    let subtotal_plus_tax_plus_fees = subtotal + tax + deposit_fee_sum;
    let total_diff = (subtotal_plus_tax_plus_fees - total).abs();
    let mut total_passed = total_diff <= SUM_TOLERANCE;
    if total_passed {
        report.subtotal_tax_sum_check = Some(CheckDetail {
            passed: true,
            calculated: round2(subtotal_plus_tax_plus_fees),
            expected: Some(round2(total)),
            difference: Some(round2(total_diff)),
            note: Some("subtotal + tax + deposits/fees = total".to_string()),
        });
    } else if (subtotal + tax - total).abs() <= SUM_TOLERANCE {
        total_passed = true;
        report.subtotal_tax_sum_check = Some(CheckDetail {
            passed: true,
            calculated: round2(subtotal + tax),
            expected: Some(round2(total)),
            difference: Some(round2((subtotal + tax - total).abs())),
            note: Some("subtotal + tax = total (deposits/fees already in subtotal)".to_string()),
        });
    } else {
        report.subtotal_tax_sum_check = Some(CheckDetail {
            passed: false,
            calculated: round2(subtotal_plus_tax_plus_fees),
            expected: Some(round2(total)),
            difference: Some(round2(total_diff)),
            note: Some("subtotal + tax + deposits/fees = total".to_string()),
        });
        report
            .errors
            .push(format!("total sum mismatch: calculated {:.2}, expected {:.2}", subtotal_plus_tax_plus_fees, total));
    }

    report.passed = line_total_passed && total_passed;
    report
}

/// A trusted-hint/raw-text value pair for a disputed field, and the
/// resolution once one wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConflict {
    pub from_raw_text: Option<String>,
    pub from_trusted_hints: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedConflict {
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: String,
    pub source: String,
}

/// Typed replacement for the original "tbd" scratch structure: field
/// conflicts discovered during LLM reconciliation, and the resolutions
/// applied once the sum check passes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub field_conflicts: HashMap<String, FieldConflict>,
    pub resolved_conflicts: Vec<ResolvedConflict>,
    /// Write-target for an out-of-scope reviewer UI: never set by this
    /// pipeline, but defined so a future reviewer-override surface has
    /// somewhere to record its decision without widening this type.
    pub reviewer_override: Option<String>,
}

const RESOLVABLE_FIELDS: &[&str] = &[
    "merchant_name",
    "total",
    "subtotal",
    "tax",
    "purchase_date",
    "purchase_time",
    "currency",
    "payment_method",
    "card_last4",
];

/// If the sum check passed and `resolution` carries field conflicts,
/// overwrites the disputed `summary` fields with the trusted-hint value and
/// clears the conflict list, recording what changed.
pub fn apply_field_conflicts_resolution(summary: &mut ReceiptSummary, resolution: &mut ResolutionReport) {
    if resolution.field_conflicts.is_empty() {
        return;
    }

    let mut resolved = Vec::new();
    for (field, conflict) in &resolution.field_conflicts {
        let Some(new_value) = &conflict.from_trusted_hints else {
            continue;
        };
        if !RESOLVABLE_FIELDS.contains(&field.as_str()) {
            continue;
        }
        let old_value = apply_field(summary, field, new_value);
        resolved.push(ResolvedConflict {
            field: field.clone(),
            old_value,
            new_value: new_value.clone(),
            source: "trusted_hints".to_string(),
        });
    }

    if !resolved.is_empty() {
        resolution.resolved_conflicts.extend(resolved);
        resolution.field_conflicts.clear();
    }
}

fn apply_field(summary: &mut ReceiptSummary, field: &str, new_value: &str) -> Option<String> {
    match field {
        "merchant_name" => std::mem::replace(&mut summary.merchant_name, Some(new_value.to_string())),
        "purchase_date" => std::mem::replace(&mut summary.purchase_date, Some(new_value.to_string())),
        "purchase_time" => std::mem::replace(&mut summary.purchase_time, Some(new_value.to_string())),
        "currency" => std::mem::replace(&mut summary.currency, Some(new_value.to_string())),
        "payment_method" => std::mem::replace(&mut summary.payment_method, Some(new_value.to_string())),
        "card_last4" => std::mem::replace(&mut summary.card_last4, Some(new_value.to_string())),
        "total" => {
            let old = summary.total.map(|v| v.to_string());
            summary.total = new_value.parse::<f64>().ok();
            old
        }
        "subtotal" => {
            let old = summary.subtotal.map(|v| v.to_string());
            summary.subtotal = new_value.parse::<f64>().ok();
            old
        }
        "tax" => {
            let old = summary.tax.as_ref().map(|lines| lines.iter().map(|l| l.amount).sum::<f64>().to_string());
            if let Ok(parsed) = new_value.parse::<f64>() {
                summary.tax = Some(vec![crate::summary::TaxLine {
                    label: "TAX".to_string(),
                    amount: parsed,
                }]);
            }
            old
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sale_item(total: f64) -> ExtractedItem {
        let mut item = ExtractedItem::new("ITEM", total, 0, 0);
        item.on_sale = true;
        item
    }

    #[test]
    fn test_package_discount_detected_from_first_n_sale_items() {
        let items = vec![sale_item(4.50), sale_item(4.50)];
        let discounts = detect_package_price_discounts("2/$9.00 DEAL", &items);
        assert_eq!(discounts.len(), 1);
        assert!(discounts[0].valid);
        assert_eq!(discounts[0].quantity, 2);
    }

    #[test]
    fn test_package_discount_tries_combinations_when_first_n_fails() {
        // Three on-sale items; only items[0] and items[2] sum to the package price.
        let items = vec![sale_item(4.50), sale_item(1.00), sale_item(4.50)];
        let discounts = detect_package_price_discounts("2 for $9.00", &items);
        assert_eq!(discounts.len(), 1);
        assert!(discounts[0].valid);
    }

    #[test]
    fn test_grocery_mode_passes_with_fees_in_items() {
        let mut bread = ExtractedItem::new("BREAD", 53.99, 0, 0);
        bread.is_deposit_or_fee = false;
        let mut deposit = ExtractedItem::new("Bottle deposit", 0.10, 1, 1);
        deposit.is_deposit_or_fee = true;
        let mut fee = ExtractedItem::new("Env fee (CRF)", 0.01, 2, 2);
        fee.is_deposit_or_fee = true;
        let items = vec![bread, deposit, fee];

        let summary = ReceiptSummary {
            subtotal: None,
            total: Some(54.10),
            ..Default::default()
        };
        let report = check_receipt_sums(&items, &summary, "");
        assert!(report.passed);
    }

    #[test]
    fn test_field_conflict_resolution_overwrites_from_trusted_hints() {
        let mut summary = ReceiptSummary {
            total: Some(10.00),
            ..Default::default()
        };
        let mut resolution = ResolutionReport::default();
        resolution.field_conflicts.insert(
            "total".to_string(),
            FieldConflict {
                from_raw_text: Some("10.00".to_string()),
                from_trusted_hints: Some("10.50".to_string()),
            },
        );
        apply_field_conflicts_resolution(&mut summary, &mut resolution);
        assert_eq!(summary.total, Some(10.50));
        assert!(resolution.field_conflicts.is_empty());
        assert_eq!(resolution.resolved_conflicts.len(), 1);
    }
}
