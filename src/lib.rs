#![forbid(unsafe_code)]

//! Extracts tagged action blocks from streamed LLM output and relays the
//! resulting instructions to a remote execution sandbox.

pub mod audit;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod extractor;
pub mod grammar;
pub mod persistence;
pub mod relay;
pub mod session;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
