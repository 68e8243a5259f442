use std::fmt;
use std::io;

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Top-level error returned across module boundaries (handshake, send/receive, hash-map
/// rehash). Mirrors the retry-worthy/fatal split of the wire protocol itself: a `Wait`
/// condition is not a failure, it just means there was nothing to do this tick.
#[derive(Debug, Eq, PartialEq)]
pub enum AdapterError {
    Wait,
    Fatal(ErrorKind),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Socket creation, bind, resolve, thread spawn.
    Resource(ResourceError),
    /// Length mismatch, unknown message type, truncated string, bounds overflow.
    Framing(FramingError),
    /// Wrong sender id, out-of-order send-time, message not valid in the current state.
    Protocol(ProtocolError),
    /// Peer replied Reject with a reason bitset.
    Rejected(u32),
    Io(io::ErrorKind),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ResourceError {
    SocketCreate,
    Bind,
    Resolve,
    ThreadSpawn,
}

#[derive(Debug, Eq, PartialEq)]
pub enum FramingError {
    LengthMismatch { expected: usize, actual: usize },
    UnknownMessageType(u16),
    TruncatedString,
    BufferOverflow,
}

#[derive(Debug, Eq, PartialEq)]
pub enum ProtocolError {
    UnexpectedSender { expected: u32, actual: u32 },
    OutOfOrder { last: i64, received: i64 },
    UnexpectedMessage,
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::Wait => write!(f, "would block"),
            AdapterError::Fatal(kind) => write!(f, "{}", kind),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Resource(e) => write!(f, "resource error: {:?}", e),
            ErrorKind::Framing(e) => write!(f, "framing error: {:?}", e),
            ErrorKind::Protocol(e) => write!(f, "protocol error: {:?}", e),
            ErrorKind::Rejected(reason) => write!(f, "connection rejected, reason = 0x{:x}", reason),
            ErrorKind::Io(kind) => write!(f, "io error: {:?}", kind),
        }
    }
}

impl std::error::Error for AdapterError {}

impl From<io::Error> for AdapterError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => AdapterError::Wait,
            kind => AdapterError::Fatal(ErrorKind::Io(kind)),
        }
    }
}

impl From<std::net::AddrParseError> for AdapterError {
    #[inline]
    fn from(_: std::net::AddrParseError) -> Self {
        AdapterError::Fatal(ErrorKind::Resource(ResourceError::Resolve))
    }
}

pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for AdapterResult<T> {
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(AdapterError::Wait) => false,
            _ => true,
        }
    }
}
