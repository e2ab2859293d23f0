//! Background Tasks Module
//!
//! Tasks that run beside the connection loops during server operation.
//!
//! # Tasks
//! - Cache maintenance: purges expired entries and reclaims capacity at
//!   configured intervals, or immediately on capacity pressure

mod cleanup;

pub use cleanup::spawn_cleanup_task;
