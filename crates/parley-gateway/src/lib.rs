pub mod connection;
pub mod error;
pub mod subscription;

pub use connection::{Gateway, GatewayConfig, direct_room, endpoint};
pub use error::StreamError;
pub use subscription::{LiveStream, Subscription};
