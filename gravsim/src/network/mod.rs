pub mod protocol;
pub mod codec;
pub mod session;
pub mod server;
pub mod transport;
