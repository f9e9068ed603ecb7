//! API Module
//!
//! Invocation boundary between the CLI and the pipeline.
//!
//! - commands.rs: argument parsing, job handlers, exit status

pub mod commands;
