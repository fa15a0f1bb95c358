pub mod date_to_timestamp;
pub mod to_precision;
