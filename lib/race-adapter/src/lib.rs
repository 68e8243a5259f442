#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod config;
pub mod net;

pub use config::AdapterConfig;
pub use net::context::{Callbacks, Cancellation, RemoteEndpoint, RemoteIdAllocator, Settings};
pub use net::engine::{accept, client, connect, run_polling, run_threaded, server, Connection};
pub use net::socket::Socket;

pub use race_proto::message;
pub use race_proto::{AdapterError, AdapterResult, Buffer};