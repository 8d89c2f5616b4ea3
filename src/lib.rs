pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod pipeline;

pub use error::*;
pub use models::*;
pub use pipeline::{Engine, EngineState, EngineStatus, EventBus, PipelineEvent};

#[cfg(test)]
mod integration_tests;
