//! Built-in push-style outputs

mod discard;
mod log;

pub use discard::DiscardOutput;
pub use log::{LogLevel, LogOutput, LogOutputConfig};
