// qnet-common — wire format, control protocol, and channel state shared
// between the client and server crates.

pub mod control;
pub mod entity;
pub mod error;
pub mod msg;
pub mod net;
pub mod net_chan;
pub mod svc;
pub mod wire;

pub use error::NetError;
