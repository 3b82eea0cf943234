//! devshell: command-line client and agent launcher
//!
//! Talks the framed shell protocol to a running agent, either
//! interactively or one command at a time.

pub mod client;
pub mod commands;
pub mod output;

pub use client::{ClientError, Output, ShellClient};
