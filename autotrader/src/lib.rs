//! Automated trading execution core.
//!
//! Strategies bound to investment universes are turned into broker orders under
//! a per-strategy capital budget, with operator kill switches on top.

pub mod broker;
pub mod control;
pub mod error;
pub mod services;
pub mod state;

pub use control::TradingControl;
pub use error::{TradingError, TradingResult};
pub use state::{EngineSettings, TradingServices};
