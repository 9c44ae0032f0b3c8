//! Amount-column detection (§4.3): locates the x-band where item prices
//! cluster, by splitting the sorted x-distribution at its two largest gaps
//! and taking the rightmost resulting cluster.

use crate::geometry::{AmountColumn, AmountColumns, PhysicalRow};

const DISTINCT_EPSILON: f64 = 1e-6;

/// Detects the primary amount column among `rows`.
///
/// Discount rows (row text containing `/`, or a negative-valued amount
/// block) are excluded from the clustering sample — their amounts sit in
/// the same x-band as real prices but would bias the mean.
///
/// Falls back to `fallback` when fewer than 3 distinct x-positions survive
/// filtering, since two points can't be clustered into a rightmost group
/// with a meaningful preceding gap.
pub fn detect_amount_column(rows: &[PhysicalRow], fallback: AmountColumn) -> AmountColumns {
    let mut xs: Vec<f64> = Vec::new();
    for row in rows {
        let is_discount_row = row.text.contains('/');
        if is_discount_row {
            continue;
        }
        for block in &row.blocks {
            if !block.is_amount {
                continue;
            }
            let amount = block.amount.unwrap_or(0.0);
            if amount < 0.0 {
                continue;
            }
            xs.push(block.center_x);
        }
    }
    xs.sort_by(|a, b| a.total_cmp(b));

    if distinct_count(&xs) < 3 {
        return AmountColumns {
            main_column: fallback,
            all_columns: vec![fallback],
        };
    }

    let gaps: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
    let mut gap_order: Vec<usize> = (0..gaps.len()).collect();
    gap_order.sort_by(|&a, &b| gaps[b].total_cmp(&gaps[a]));
    let mut splits: Vec<usize> = gap_order.into_iter().take(2).collect();
    splits.sort_unstable();

    let (i0, i1) = (splits[0], splits[1]);
    let segments: Vec<&[f64]> = vec![&xs[..=i0], &xs[i0 + 1..=i1], &xs[i1 + 1..]];

    let preceding_gap = gaps[i1];
    let columns: Vec<AmountColumn> = segments
        .iter()
        .map(|seg| AmountColumn {
            center_x: mean(seg),
            tolerance: preceding_gap / 2.0,
            confidence: seg.len() as f64 / xs.len() as f64,
            block_count: seg.len(),
        })
        .collect();

    let main_column = *columns.last().unwrap();
    AmountColumns {
        main_column,
        all_columns: columns,
    }
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn distinct_count(sorted_xs: &[f64]) -> usize {
    let mut count = 0usize;
    let mut last: Option<f64> = None;
    for &x in sorted_xs {
        if last.map(|l| (x - l).abs() > DISTINCT_EPSILON).unwrap_or(true) {
            count += 1;
            last = Some(x);
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{RowType, TextBlock};

    fn amount_row(id: u32, text: &str, amount: f64, x: f64) -> PhysicalRow {
        PhysicalRow {
            row_id: id,
            blocks: vec![TextBlock::new(id, text, x, 0.1).with_amount(amount).with_center(x, 0.1)],
            y_top: 0.0,
            y_bottom: 0.0,
            y_center: 0.0,
            text: text.to_string(),
            row_type: RowType::Item,
        }
    }

    #[test]
    fn test_rightmost_cluster_wins() {
        // name column around 0.1-0.15, a stray SKU-ish column around 0.4,
        // the real amount column tight around 0.85-0.9.
        let rows = vec![
            amount_row(0, "1.00", 1.0, 0.10),
            amount_row(1, "2.00", 2.0, 0.13),
            amount_row(2, "3.00", 3.0, 0.42),
            amount_row(3, "4.00", 4.0, 0.86),
            amount_row(4, "5.00", 5.0, 0.89),
        ];
        let fallback = AmountColumn {
            center_x: 0.5,
            tolerance: 0.05,
            confidence: 0.0,
            block_count: 0,
        };
        let columns = detect_amount_column(&rows, fallback);
        assert!(columns.main_column.center_x > 0.8, "expected rightmost cluster, got {}", columns.main_column.center_x);
    }

    #[test]
    fn test_falls_back_below_three_distinct_values() {
        let rows = vec![amount_row(0, "1.00", 1.0, 0.5), amount_row(1, "2.00", 2.0, 0.5)];
        let fallback = AmountColumn {
            center_x: 0.9,
            tolerance: 0.05,
            confidence: 0.0,
            block_count: 0,
        };
        let columns = detect_amount_column(&rows, fallback);
        assert_eq!(columns.main_column, fallback);
    }

    #[test]
    fn test_discount_rows_excluded_from_sample() {
        let mut discount = amount_row(0, "123456 TPD/654321 -1.00", -1.0, 0.5);
        discount.text = "123456 TPD/654321 -1.00".to_string();
        let rows = vec![
            amount_row(1, "1.00", 1.0, 0.10),
            amount_row(2, "2.00", 2.0, 0.13),
            amount_row(3, "3.00", 3.0, 0.90),
            discount,
        ];
        let fallback = AmountColumn {
            center_x: 0.5,
            tolerance: 0.05,
            confidence: 0.0,
            block_count: 0,
        };
        let columns = detect_amount_column(&rows, fallback);
        assert!(columns.main_column.center_x > 0.8);
    }
}
