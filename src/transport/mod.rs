//! Bundled transports.

pub use memory::*;

mod memory;
