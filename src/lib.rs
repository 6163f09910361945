pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod remote;
pub mod store;
pub mod view;
pub mod wal;
