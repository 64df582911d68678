pub mod aggregation;
pub mod fleet;
pub mod history;
pub mod ingest;
pub mod ota;
