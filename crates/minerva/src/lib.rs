pub mod aggregate;
pub mod aggregation;
pub mod aggregation_generation;
pub mod data_type;
pub mod error;
pub mod formula;
pub mod granularity;
pub mod instance;
pub mod interval;
pub mod partition;
pub mod relation;
pub mod trend_materialization;
pub mod trend_store;
