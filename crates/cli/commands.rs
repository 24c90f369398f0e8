pub mod aggregate;
pub mod aggregation;
pub mod common;
