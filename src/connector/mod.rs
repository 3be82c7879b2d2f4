pub use base::*;
pub use context::*;
pub use endpoint::*;
pub use outbound::*;
pub use receiver::*;
pub use transport::*;

mod base;
mod context;
mod endpoint;
mod outbound;
mod receiver;
mod transport;
