//! The capability set a caller supplies to drive a connection, and the runtime state the
//! engine tracks per local/remote endpoint.

use race_proto::message::{DATA_RECEIVER, DATA_SENDER};
use race_proto::Buffer;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Required collaborator a caller supplies to drive handshake acceptance, payload
/// composition, and payload consumption. Modeled as a trait rather than individual function
/// pointers so application code can close over whatever state it needs.
pub trait Callbacks: Send + Sync {
    /// Approve or reject an incoming `Request`. May adjust `sim_time_ms`/`interval_ms` before
    /// they are echoed back in the `Accept`. Returning non-zero rejects with that reason
    /// bitset.
    fn check_request(
        &self,
        peer: SocketAddr,
        flags: i32,
        schema: &str,
        sim_time_ms: &mut i64,
        interval_ms: &mut i32,
    ) -> i32 {
        let _ = (peer, flags, schema, sim_time_ms, interval_ms);
        0
    }

    /// Composes a `Request` for the client handshake.
    fn write_request(&self, buf: &mut Buffer, pos: usize) -> Option<usize>;

    /// Produces the application payload for one send tick. Returning `None` or `Some(pos)`
    /// equal to the position passed in means "no data this tick".
    fn write_data(&self, buf: &mut Buffer, pos: usize) -> Option<usize>;

    /// Consumes the application payload of a validated `Data` message.
    fn read_data(&self, buf: &Buffer, pos: usize);

    fn connection_started(&self, _remote_id: i32) {}
    fn connection_paused(&self, _remote_id: i32) {}
    fn connection_resumed(&self, _remote_id: i32) {}
    fn connection_terminated(&self, _remote_id: i32) {}
}

/// Static, caller-supplied configuration for one local endpoint.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub schema: String,
    pub flags: i32,
    pub default_interval_ms: i32,
    /// `0` disables reconnection.
    pub reconnect_interval_ms: u64,
}

impl Settings {
    pub fn is_sender(&self) -> bool {
        self.flags & DATA_SENDER != 0
    }

    pub fn is_receiver(&self) -> bool {
        self.flags & DATA_RECEIVER != 0
    }
}

/// Caller-owned handle for requesting shutdown of a running connection from another thread.
#[derive(Clone)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Cancellation {
        Cancellation {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    #[inline]
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Cancellation::new()
    }
}

/// Runtime state of the single peer on the other end of a connection.
pub struct RemoteEndpoint {
    pub addr: SocketAddr,
    pub id: i32,
    pub requested_at: Instant,
    /// Most recent accepted `send_time_ms`; datagrams below this are dropped as out of
    /// order. Only ever written by the receiver thread, but shared with the sender thread
    /// via `Arc`, so it needs atomic access.
    time_last: std::sync::atomic::AtomicI64,
    pub stopped: AtomicBool,
    pub paused: AtomicBool,
}

impl RemoteEndpoint {
    pub fn new(addr: SocketAddr, id: i32) -> RemoteEndpoint {
        RemoteEndpoint {
            addr,
            id,
            requested_at: Instant::now(),
            time_last: std::sync::atomic::AtomicI64::new(i64::MIN),
            stopped: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn time_last(&self) -> i64 {
        self.time_last.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn set_time_last(&self, value: i64) {
        self.time_last.store(value, Ordering::SeqCst);
    }
}

/// Monotonic allocator for remote endpoint ids, starting at 1 (`0` is reserved for the
/// server's own id, `-1` for "no id yet").
pub struct RemoteIdAllocator {
    next: i32,
}

impl RemoteIdAllocator {
    pub fn new() -> RemoteIdAllocator {
        RemoteIdAllocator { next: 1 }
    }

    pub fn allocate(&mut self) -> i32 {
        let id = self.next;
        self.next += 1;
        id
    }
}

impl Default for RemoteIdAllocator {
    fn default() -> Self {
        RemoteIdAllocator::new()
    }
}
