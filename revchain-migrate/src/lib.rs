//! Command-line front end for `revchain` and the events app's revision history

pub mod cli;
pub mod error;
pub mod revisions;
pub mod template;

pub use cli::{Cli, Commands, RunArgs};
pub use error::CliError;
