pub mod config;
pub mod connector;
pub mod error;
pub mod lifecycle;
pub mod message;
pub mod pool;
mod test;
pub mod threading;
pub mod transport;
pub mod utils;

pub mod prelude;
