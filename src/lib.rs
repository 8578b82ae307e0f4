// capture thread -> bounded queue -> graph writer -> broadcast hub -> websocket viewers

pub mod config;
pub mod dashboard;
pub mod error;
pub mod graph;
pub mod hub;
pub mod logging;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod query;
pub mod session;
pub mod sniff;

pub use error::{NetPulseError, Result};
pub use session::{Session, Shutdown};
