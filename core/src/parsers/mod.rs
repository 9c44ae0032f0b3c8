//! Store parser family (§4.4). Each module implements one layout family's
//! `(ReceiptRegions, AmountColumns, StoreConfig, merchant_name) ->
//! ParsedReceipt` contract, reusing the shared row/region/amount-column
//! infrastructure rather than re-deriving rows per store.

mod costco_ca_digital;
mod costco_us_digital;
mod costco_us_physical;
mod tt_supermarket;
mod trader_joes;

use crate::geometry::AmountColumns;
use crate::geometry::ReceiptRegions;
use crate::parsed_receipt::ParsedReceipt;
use crate::store_config::{LayoutFamily, StoreConfig};

/// Dispatches to the parser for `config.layout_family`.
pub fn parse_receipt(
    regions: &ReceiptRegions,
    amount_columns: &AmountColumns,
    config: &StoreConfig,
    merchant_name: Option<&str>,
) -> ParsedReceipt {
    match config.layout_family {
        LayoutFamily::CostcoCaDigital => costco_ca_digital::parse(regions, amount_columns, config, merchant_name),
        LayoutFamily::CostcoUsDigital => costco_us_digital::parse(regions, amount_columns, config, merchant_name),
        LayoutFamily::CostcoUsPhysical => costco_us_physical::parse(regions, amount_columns, config, merchant_name),
        LayoutFamily::TtSupermarket => tt_supermarket::parse(regions, amount_columns, config, merchant_name),
        LayoutFamily::TraderJoes => trader_joes::parse(regions, amount_columns, config, merchant_name),
    }
}
