pub mod validation;

pub use validation::{luhn_valid, validate_order_number, ValidatedJson};
