//! Core of AgentBloom: records, analytics, credits and the collaborators
//! behind them.

pub mod analytics;
pub mod changes;
pub mod db;
pub mod error;
pub mod frames;
pub mod llm;
pub mod models;
pub mod staking;
pub mod store;
pub mod wallet;

pub use error::{BloomError, Result};
