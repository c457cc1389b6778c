pub mod agent;
pub mod cli;
pub mod error;
pub mod http;
pub mod llm;
pub mod logging;
pub mod settings;
pub mod speech;

pub use error::{Error, Result};
