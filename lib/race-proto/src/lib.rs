#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod buffer;
pub mod error;
pub mod logging;
pub mod message;
pub mod time;

pub use buffer::Buffer;
pub use error::{
    AdapterError, AdapterResult, ErrorKind, ErrorUtils, FramingError, ProtocolError, ResourceError,
};