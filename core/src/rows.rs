//! Row reconstruction (§4.1): groups OCR blocks sharing a y-band into
//! `PhysicalRow`s, sorted top-to-bottom (or `(page, y, x)` for multi-page
//! input).

use crate::geometry::{PhysicalRow, RowType, TextBlock};

/// Builds physical rows from a flat block list.
///
/// `epsilon` is the y-banding tolerance (store-configured; dense digital
/// receipts use ~0.008, spaced physical layouts use more). When
/// `split_on_second_amount` is set, a block with `is_amount == true` never
/// joins a row that already holds an amount — two prices on the same band
/// are almost always two different items in compact layouts.
pub fn reconstruct_rows(blocks: &[TextBlock], epsilon: f64, split_on_second_amount: bool) -> Vec<PhysicalRow> {
    if blocks.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<&TextBlock> = blocks.iter().collect();
    sorted.sort_by(|a, b| {
        a.page_number
            .cmp(&b.page_number)
            .then(a.center_y.total_cmp(&b.center_y))
            .then(a.center_x.total_cmp(&b.center_x))
    });

    let mut rows: Vec<PhysicalRow> = Vec::new();
    let mut current: Vec<&TextBlock> = Vec::new();
    let mut reference_y = sorted[0].center_y;
    let mut reference_page = sorted[0].page_number;

    for block in sorted {
        let same_band = block.page_number == reference_page && (block.y - reference_y).abs() <= epsilon;
        let breaks_on_amount = split_on_second_amount
            && block.is_amount
            && current.iter().any(|b| b.is_amount);

        if same_band && !breaks_on_amount && !current.is_empty() {
            current.push(block);
        } else {
            if !current.is_empty() {
                rows.push(finish_row(rows.len() as u32, std::mem::take(&mut current)));
            }
            reference_y = block.y;
            reference_page = block.page_number;
            current.push(block);
        }
    }
    if !current.is_empty() {
        rows.push(finish_row(rows.len() as u32, current));
    }

    rows
}

fn finish_row(row_id: u32, mut blocks: Vec<&TextBlock>) -> PhysicalRow {
    blocks.sort_by(|a, b| a.center_x.total_cmp(&b.center_x));
    let y_top = blocks.iter().map(|b| b.y).fold(f64::INFINITY, f64::min);
    let y_bottom = blocks
        .iter()
        .map(|b| b.y + b.height.unwrap_or(0.0))
        .fold(f64::NEG_INFINITY, f64::max);
    let y_center = blocks.iter().map(|b| b.center_y).sum::<f64>() / blocks.len() as f64;
    let text = blocks.iter().map(|b| b.text.as_str()).collect::<Vec<_>>().join(" ");

    PhysicalRow {
        row_id,
        blocks: blocks.into_iter().cloned().collect(),
        y_top,
        y_bottom,
        y_center,
        text,
        row_type: RowType::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: u32, text: &str, x: f64, y: f64) -> TextBlock {
        TextBlock::new(id, text, x, y)
    }

    #[test]
    fn test_empty_input_yields_empty_rows() {
        assert!(reconstruct_rows(&[], 0.01, false).is_empty());
    }

    #[test]
    fn test_block_count_is_preserved() {
        let blocks = vec![
            block(1, "A", 0.1, 0.1),
            block(2, "B", 0.2, 0.101),
            block(3, "C", 0.1, 0.3),
        ];
        let rows = reconstruct_rows(&blocks, 0.01, false);
        let total: usize = rows.iter().map(|r| r.blocks.len()).sum();
        assert_eq!(total, blocks.len());
    }

    #[test]
    fn test_rows_are_x_sorted_within_band() {
        let blocks = vec![block(1, "RIGHT", 0.8, 0.1), block(2, "LEFT", 0.1, 0.1)];
        let rows = reconstruct_rows(&blocks, 0.01, false);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].blocks[0].text, "LEFT");
        assert_eq!(rows[0].blocks[1].text, "RIGHT");
    }

    #[test]
    fn test_reference_y_is_first_block_not_previous_preventing_drift() {
        // Each successive block drifts by just under epsilon from the
        // previous one, but more than epsilon from the row's first block.
        // Using the previous block as reference would merge everything
        // into one row; the first-block reference must split it.
        let blocks = vec![
            block(1, "A", 0.1, 0.100),
            block(2, "B", 0.2, 0.108),
            block(3, "C", 0.3, 0.116),
        ];
        let rows = reconstruct_rows(&blocks, 0.01, false);
        assert!(rows.len() > 1, "drifting blocks must not all merge into one row");
    }

    #[test]
    fn test_single_amount_only_block_forms_a_row() {
        let blocks = vec![block(1, "$5.00", 0.9, 0.5).with_amount(5.0)];
        let rows = reconstruct_rows(&blocks, 0.01, false);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].blocks[0].is_amount);
    }

    #[test]
    fn test_split_on_second_amount_starts_new_row() {
        let blocks = vec![
            block(1, "$1.00", 0.4, 0.1).with_amount(1.0),
            block(2, "$2.00", 0.9, 0.1).with_amount(2.0),
        ];
        let rows = reconstruct_rows(&blocks, 0.01, true);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_multi_page_orders_by_page_then_y_then_x() {
        let blocks = vec![
            block(1, "PAGE2", 0.1, 0.1).with_page(2),
            block(2, "PAGE1", 0.1, 0.9).with_page(1),
        ];
        let rows = reconstruct_rows(&blocks, 0.01, false);
        assert_eq!(rows[0].text, "PAGE1");
        assert_eq!(rows[1].text, "PAGE2");
    }
}
