mod amount;
mod helpers;

pub mod op;
mod secret;

pub use amount::{Amount, AmountParseError, DEFAULT_CURRENCY, MINOR_UNITS_PER_MAJOR};
pub use helpers::parse_boolean_flag;
pub use secret::Secret;
