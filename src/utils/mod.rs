pub use cancel_token::*;
pub use health_flag::*;

pub mod backoff;
mod cancel_token;
mod health_flag;
pub mod logger;
pub mod params_io;
