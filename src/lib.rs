pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod samples;
pub mod stage;
pub mod stages;
pub mod utils;

pub use error::{PipelineError, Result};
