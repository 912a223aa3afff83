pub mod api;
pub mod client;
pub mod config;
pub mod errors;
pub mod exchanges;
pub mod ingestor;
pub mod models;
pub mod orderbook;
pub mod registry;
pub mod supervisor;
pub mod sync;
