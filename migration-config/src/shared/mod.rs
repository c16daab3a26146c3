mod base;
mod connection;
mod kvs;
mod migration;
mod retry;
mod service;
mod store;

pub use base::*;
pub use connection::*;
pub use kvs::*;
pub use migration::*;
pub use retry::*;
pub use service::*;
pub use store::*;
