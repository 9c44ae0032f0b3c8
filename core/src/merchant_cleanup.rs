//! Post-LLM cleanup for T&T Supermarket receipts (§4.4 Expansion).
//!
//! The geometric T&T parser (`parsers::tt_supermarket`) already suppresses
//! membership-card and loyalty-points rows before the LLM ever sees the
//! receipt, but the LLM call runs over the same raw text and routinely
//! reintroduces them as ordinary line items. This pass runs as a distinct
//! step after LLM extraction, independent of the geometric parser, and
//! removes the same class of row a second time.

use crate::geometry::ExtractedItem;
use regex::Regex;
use std::sync::OnceLock;

fn merchant_name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*t\s*&\s*t\b|^\s*t\s*and\s*t\b|^\s*tnt\b").unwrap())
}

/// Whether `merchant_name` identifies a T&T Supermarket variant: "t&t",
/// "t & t", "tnt", or "t and t".
pub fn is_tt_merchant(merchant_name: &str) -> bool {
    merchant_name_pattern().is_match(merchant_name.trim())
}

fn card_label_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)member(?:ship)?|\bcard\b|会员|卡号").unwrap())
}

fn card_number_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:member(?:ship)?|card|会员|卡号)\D{0,10}(\d{4,})").unwrap())
}

fn points_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bpoints?\b|\bpts\b|积分").unwrap())
}

fn is_zero_amount(item: &ExtractedItem) -> bool {
    item.line_total.abs() < 1e-9
}

fn row_text(item: &ExtractedItem) -> &str {
    if item.raw_text.is_empty() {
        &item.product_name
    } else {
        &item.raw_text
    }
}

/// Removes membership-card and loyalty-points line items the LLM
/// reintroduced for a T&T receipt. Returns the cleaned item list, the
/// membership number recovered from a removed row (if any), and whether a
/// points row was suppressed.
///
/// Only meaningful when [`is_tt_merchant`] matched the receipt's merchant
/// name; calling it on any other receipt is a harmless no-op as long as
/// none of its items happen to match these patterns.
pub fn clean_tt_items(items: Vec<ExtractedItem>) -> (Vec<ExtractedItem>, Option<String>, bool) {
    let mut membership_id = None;
    let mut suppressed = false;

    let kept = items
        .into_iter()
        .filter(|item| {
            if !is_zero_amount(item) {
                return true;
            }
            let text = row_text(item);
            if card_label_pattern().is_match(text) {
                if let Some(caps) = card_number_pattern().captures(text) {
                    membership_id = Some(caps[1].to_string());
                }
                suppressed = true;
                return false;
            }
            if points_pattern().is_match(text) {
                suppressed = true;
                return false;
            }
            true
        })
        .collect();

    (kept, membership_id, suppressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(product_name: &str, line_total: f64, raw_text: &str) -> ExtractedItem {
        let mut item = ExtractedItem::new(product_name, line_total, 0, 0);
        item.raw_text = raw_text.to_string();
        item
    }

    #[test]
    fn test_is_tt_merchant_matches_variants() {
        for name in ["T&T Supermarket", "t & t", "TNT", "T and T Foods"] {
            assert!(is_tt_merchant(name), "{name} should match");
        }
        assert!(!is_tt_merchant("Costco Wholesale"));
    }

    #[test]
    fn test_clean_tt_items_removes_membership_row_and_extracts_number() {
        let items = vec![
            item("MILK", 3.99, "MILK $3.99"),
            item("Member Card 600032371", 0.0, "Member Card 600032371"),
        ];
        let (cleaned, membership_id, suppressed) = clean_tt_items(items);
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].product_name, "MILK");
        assert_eq!(membership_id.as_deref(), Some("600032371"));
        assert!(suppressed);
    }

    #[test]
    fn test_clean_tt_items_removes_points_row() {
        let items = vec![item("MILK", 3.99, "MILK $3.99"), item("Points", 0.0, "Points $0.00")];
        let (cleaned, membership_id, suppressed) = clean_tt_items(items);
        assert_eq!(cleaned.len(), 1);
        assert_eq!(membership_id, None);
        assert!(suppressed);
    }

    #[test]
    fn test_clean_tt_items_recognizes_chinese_keywords() {
        let items = vec![item("会员卡号 600032371", 0.0, "会员卡号 600032371"), item("积分", 0.0, "积分 0")];
        let (cleaned, membership_id, suppressed) = clean_tt_items(items);
        assert!(cleaned.is_empty());
        assert_eq!(membership_id.as_deref(), Some("600032371"));
        assert!(suppressed);
    }

    #[test]
    fn test_clean_tt_items_is_noop_without_matching_rows() {
        let items = vec![item("MILK", 3.99, "MILK $3.99"), item("BREAD", 2.49, "BREAD $2.49")];
        let (cleaned, membership_id, suppressed) = clean_tt_items(items);
        assert_eq!(cleaned.len(), 2);
        assert_eq!(membership_id, None);
        assert!(!suppressed);
    }
}
