//! Money handling: a 2-decimal float during extraction, an integer number of
//! cents at the persistence boundary. Conversion always rounds half-to-even.

/// Per-item tolerance: `|quantity * unit_price - line_total| <= MATH_TOLERANCE`.
pub const MATH_TOLERANCE: f64 = 0.02;

/// Aggregate tolerance for subtotal/total/sum-of-items comparisons.
pub const SUM_TOLERANCE: f64 = 0.03;

/// Rounds `value` to `decimals` fractional digits using round-half-to-even
/// (banker's rounding), matching the storage-boundary rule in the external
/// interfaces contract.
pub fn round_half_even(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    let scaled = value * factor;
    let floor = scaled.floor();
    let diff = scaled - floor;

    let rounded = if (diff - 0.5).abs() < 1e-9 {
        if (floor as i64).rem_euclid(2) == 0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        scaled.round()
    };

    rounded / factor
}

/// Converts a float dollar amount to an integer number of cents.
pub fn to_cents(amount: f64) -> i64 {
    round_half_even(amount * 100.0, 0) as i64
}

/// Converts an integer number of cents back to a float dollar amount. Exact
/// by construction: no rounding is needed on this direction.
pub fn from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Rounds `amount` to 2 decimal places, the canonical precision for a
/// receipt field held as a float during extraction.
pub fn round2(amount: f64) -> f64 {
    round_half_even(amount, 2)
}

/// Parses a currency-formatted string (e.g. `"$12.34"`, `"1,234.56"`) into a
/// float, stripping currency symbols and thousands separators. Returns
/// `None` if no number can be recovered.
pub fn parse_money_str(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

/// Recursively rounds every JSON number to `decimals` fractional digits.
/// Run over a document before it is embedded in an LLM prompt: geometry
/// and OCR normalization routinely carry 10+ digits of float noise that
/// adds nothing but prompt tokens.
pub fn round_json_floats(value: &mut serde_json::Value, decimals: i32) {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if let Some(rounded) = serde_json::Number::from_f64(round_half_even(f, decimals)) {
                    *n = rounded;
                }
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(|v| round_json_floats(v, decimals)),
        serde_json::Value::Object(fields) => fields.values_mut().for_each(|v| round_json_floats(v, decimals)),
        _ => {}
    }
}

/// Extracts every bare number (`\d+(\.\d+)?`) appearing in `text`, in order
/// of appearance. Used by the math validator to recover `quantity` and
/// `unit_price` when they were not extracted directly.
pub fn extract_all_numbers(text: &str) -> Vec<f64> {
    let mut numbers = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i < bytes.len() && bytes[i] == b'.' {
                let mut j = i + 1;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if j > i + 1 {
                    i = j;
                }
            }
            if let Ok(value) = text[start..i].parse::<f64>() {
                numbers.push(value);
            }
        } else {
            i += 1;
        }
    }
    numbers
}

#[cfg(test)]
mod tests {
    use {super::*, test_case::test_case};

    #[test_case(0.125, 2, 0.12; "round down on even preceding digit")]
    #[test_case(0.135, 2, 0.14; "round up on odd preceding digit")]
    #[test_case(2.0, 2, 2.0; "already rounded")]
    fn test_round_half_even(value: f64, decimals: i32, expected: f64) {
        let actual = round_half_even(value, decimals);
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }

    #[test]
    fn test_cents_round_trip_is_exact() {
        for cents in [0_i64, 1, 42, -250, 1999] {
            let amount = from_cents(cents);
            assert_eq!(to_cents(amount), cents);
        }
    }

    #[test_case("$12.34", Some(12.34); "dollar sign")]
    #[test_case("1,234.56", Some(1234.56); "thousands separator stripped as digits")]
    #[test_case("", None; "empty")]
    fn test_parse_money_str(raw: &str, expected: Option<f64>) {
        let actual = parse_money_str(raw);
        match (actual, expected) {
            (Some(a), Some(e)) => assert!((a - e).abs() < 1e-6),
            (a, e) => assert_eq!(a, e),
        }
    }

    #[test]
    fn test_extract_all_numbers_finds_quantity_and_price() {
        let numbers = extract_all_numbers("0.92 lb @ $8.39/lb");
        assert_eq!(numbers, vec![0.92, 8.39]);
    }

    #[test]
    fn test_round_json_floats_trims_nested_numbers() {
        let mut doc = serde_json::json!({
            "total": 12.345_678_9,
            "items": [{"line_total": 3.991_234}, {"line_total": 1.5}],
            "label": "unchanged",
        });
        round_json_floats(&mut doc, 2);
        assert_eq!(doc["total"], serde_json::json!(12.35));
        assert_eq!(doc["items"][0]["line_total"], serde_json::json!(3.99));
        assert_eq!(doc["items"][1]["line_total"], serde_json::json!(1.5));
        assert_eq!(doc["label"], serde_json::json!("unchanged"));
    }
}
