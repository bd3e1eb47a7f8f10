pub mod types;
pub mod error;
pub mod config;
pub mod time;
pub mod broker;
pub mod market_data;
pub mod sheets;
pub mod events;
pub mod state;
pub mod orchestrator;
pub mod server;

pub use types::*;
pub use error::{Result, TrackerError};
