//! Math validator (§4.6): per-item quantity × unit_price ≈ line_total, with
//! a fallback that tries every ordered pair of numbers found in the row
//! text when the parser didn't populate both fields directly.

use crate::geometry::ExtractedItem;
use receipt_shared::money::{extract_all_numbers, MATH_TOLERANCE};

/// Validates one item's math in place and returns its confidence.
///
/// Confidence is `1.0` on an exact (within-tolerance) match — whether from
/// the parser's own `quantity`/`unit_price` or recovered from `row_text` —
/// and `0.5` otherwise, matching the "can't disprove it, can't prove it"
/// semantics of a degraded OCR row.
pub fn validate_item_math(item: &mut ExtractedItem, row_text: &str) -> f64 {
    if let (Some(q), Some(p)) = (item.quantity, item.unit_price) {
        if (q * p - item.line_total).abs() < MATH_TOLERANCE {
            item.confidence = 1.0;
            return 1.0;
        }
    }

    let numbers = extract_all_numbers(row_text);
    if numbers.len() < 2 {
        item.confidence = 0.5;
        return 0.5;
    }

    for i in 0..numbers.len() {
        for j in 0..numbers.len() {
            if i == j {
                continue;
            }
            let (a, b) = (numbers[i], numbers[j]);
            if (a * b - item.line_total).abs() < MATH_TOLERANCE {
                item.quantity = Some(a);
                item.unit_price = Some(b);
                item.confidence = 1.0;
                return 1.0;
            }
        }
    }

    item.confidence = 0.5;
    0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_quantity_and_price_match() {
        let mut item = ExtractedItem::new("PEAR", 7.72, 1, 0);
        item.quantity = Some(0.92);
        item.unit_price = Some(8.39);
        let confidence = validate_item_math(&mut item, "0.92 lb @ $8.39/lb FP $7.72");
        assert_eq!(confidence, 1.0);
    }

    #[test]
    fn test_recovers_quantity_and_price_from_row_text() {
        let mut item = ExtractedItem::new("BANANAS", 7.98, 1, 0);
        let confidence = validate_item_math(&mut item, "2@ $3.99 BANANAS $7.98");
        assert_eq!(confidence, 1.0);
        assert_eq!(item.quantity, Some(2.0));
        assert_eq!(item.unit_price, Some(3.99));
    }

    #[test]
    fn test_falls_back_to_half_confidence_when_unprovable() {
        let mut item = ExtractedItem::new("MYSTERY ITEM", 5.00, 1, 0);
        let confidence = validate_item_math(&mut item, "MYSTERY ITEM $5.00");
        assert_eq!(confidence, 0.5);
    }
}
