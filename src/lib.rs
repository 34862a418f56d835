pub mod config;
pub mod effects;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod phase;
pub mod ports;
pub mod pricing;
pub mod sweep;
pub mod validation;
pub mod wal;
