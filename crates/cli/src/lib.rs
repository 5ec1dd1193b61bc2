//! Command-line surface and daemon for the session replay engine.

pub mod cli;
pub mod commands;
pub mod daemon;
pub mod driver;
pub mod logging;
