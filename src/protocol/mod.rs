//! Protocol Module
//!
//! RESP wire codec and the command dispatcher built on top of it.

mod commands;
mod resp;

pub use commands::{glob_match, CommandHandler};
pub use resp::{Parser, Value};
