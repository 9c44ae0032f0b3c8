mod math_validator;
mod sum_checker;

pub use math_validator::validate_item_math;
pub use sum_checker::{
    apply_field_conflicts_resolution, check_receipt_sums, detect_package_price_discounts, CheckDetail, FieldConflict,
    PackageDiscount, ResolutionReport, ResolvedConflict, SumCheckReport,
};
