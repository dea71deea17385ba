pub mod ai;
pub mod channel;
pub mod error;
pub mod files;
pub mod interface;
pub mod markup;
pub mod message;
pub mod session;
pub mod transport;
