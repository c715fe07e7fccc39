//! Ingestion of NIR instrument exports and Dumas assay tables into a
//! versioned SQLite store.

pub mod assay;
pub mod config;
pub mod data;
pub mod driver;
pub mod report;
pub mod scd2;
pub mod store;
