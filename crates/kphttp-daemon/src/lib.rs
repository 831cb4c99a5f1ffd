//! kphttp Daemon Library
//!
//! Pieces of the host binary that are worth testing on their own:
//! - Newline-delimited JSON request loop
//! - Terminal approval prompt

pub mod prompt;
pub mod server;
