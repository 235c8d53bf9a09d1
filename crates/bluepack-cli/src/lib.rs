//! bluepack CLI library
//!
//! Configuration, argument parsing and the interactive chat loop behind the
//! `bluepack` binary.

pub mod chat;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use chat::{ChatInput, ChatSession};
pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::{AppConfig, CliConfig, ConfigOverrides};
pub use error::{CliError, Result};
