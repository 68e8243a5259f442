//! Wire envelope and the seven message types exchanged between a local and a remote endpoint.

use crate::buffer::{Buffer, MAX_STRING_LEN};

/// Every datagram carries this 16-byte header: `(type, length, sender_id, send_time_ms)`.
pub const HEADER_LEN: usize = 16;

pub const ACCEPT_LEN: usize = HEADER_LEN + 20;
pub const REJECT_LEN: usize = HEADER_LEN + 4;
pub const STOP_LEN: usize = HEADER_LEN;
pub const PAUSE_LEN: usize = HEADER_LEN;
pub const RESUME_LEN: usize = HEADER_LEN;

/// Maximum size of a single datagram, including the header, chosen to stay clear of IP
/// fragmentation on a typical MTU.
pub const MAX_MSG_LEN: usize = 2048;

/// A send-time and a local/remote wallclock no farther apart than this are assumed to be
/// the same clock; beyond it the difference is recorded as a standing skew.
pub const MAX_TIME_DIFF: i64 = 1000;

pub const MAX_SCHEMA_LEN: usize = MAX_STRING_LEN;

/// Capability flags carried on `Request`/`Accept`.
pub const DATA_SENDER: i32 = 0x1;
pub const DATA_RECEIVER: i32 = 0x2;

/// Reject reason bitset carried on `Reject`. `0` is never transmitted -- it means accept.
pub const NO_MORE_CONNECTIONS: i32 = 0x1;
pub const UNKNOWN_DATA: i32 = 0x2;
pub const UNSUPPORTED_INTERVAL: i32 = 0x4;

/// No preferred send interval was requested.
pub const NO_INTERVAL_PREFERENCE: i32 = -1;

pub const SERVER_ID: i32 = 0;
pub const NO_ID: i32 = -1;

/// Default adapter ports and host.
pub const DEFAULT_SERVER_PORT: u16 = 50036;
pub const DEFAULT_CLIENT_PORT: u16 = 50037;
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Upper bound on datagrams drained per tick by the single-threaded polling variant.
pub const MAX_POLLED_MSGS: usize = 42;

/// Bounded-wait timeout applied to the client handshake's response receive.
pub const RECV_TIMEOUT_MILLIS: u64 = 300;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(i16)]
pub enum MessageType {
    Request = 1,
    Accept = 2,
    Reject = 3,
    Data = 4,
    Stop = 5,
    Pause = 6,
    Resume = 7,
}

impl MessageType {
    #[inline]
    pub fn from_i16(value: i16) -> Option<MessageType> {
        Some(match value {
            1 => MessageType::Request,
            2 => MessageType::Accept,
            3 => MessageType::Reject,
            4 => MessageType::Data,
            5 => MessageType::Stop,
            6 => MessageType::Pause,
            7 => MessageType::Resume,
            _ => return None,
        })
    }
}

/// The 16-byte header common to every message.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Header {
    pub msg_type: MessageType,
    pub msg_length: i16,
    pub sender_id: i32,
    pub send_time_ms: i64,
}

#[derive(Debug)]
pub enum FrameError {
    /// The declared `msg_length` did not equal the number of bytes actually received.
    LengthMismatch { declared: i16, received: usize },
    /// The leading type id was not one of the seven known message types.
    UnknownType(i16),
    /// The buffer was too short to even hold a header.
    Truncated,
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::LengthMismatch { declared, received } => write!(
                f,
                "msg_length {} does not match {} bytes received",
                declared, received
            ),
            FrameError::UnknownType(t) => write!(f, "unknown message type id {}", t),
            FrameError::Truncated => write!(f, "datagram too short for a header"),
        }
    }
}

impl std::error::Error for FrameError {}

impl Header {
    #[inline]
    pub fn write(buf: &mut Buffer, pos: usize, msg_type: MessageType, sender_id: i32, send_time_ms: i64) -> Option<usize> {
        let pos = buf.write_i16(pos, msg_type as i16)?;
        // msg_length is patched in once the full message length is known.
        let pos = buf.write_i16(pos, 0)?;
        let pos = buf.write_i32(pos, sender_id)?;
        buf.write_i64(pos, send_time_ms)
    }

    /// Validates, in order: the buffer holds a full header; the type id is recognized; the
    /// declared `msg_length` equals `received_len` (the actual datagram size).
    pub fn read(buf: &Buffer, received_len: usize) -> Result<(Header, usize), FrameError> {
        let (raw_type, pos) = buf.read_i16(0).ok_or(FrameError::Truncated)?;
        let msg_type = MessageType::from_i16(raw_type).ok_or(FrameError::UnknownType(raw_type))?;
        let (msg_length, pos) = buf.read_i16(pos).ok_or(FrameError::Truncated)?;
        let (sender_id, pos) = buf.read_i32(pos).ok_or(FrameError::Truncated)?;
        let (send_time_ms, pos) = buf.read_i64(pos).ok_or(FrameError::Truncated)?;

        if msg_length as usize != received_len {
            return Err(FrameError::LengthMismatch {
                declared: msg_length,
                received: received_len,
            });
        }

        Ok((
            Header {
                msg_type,
                msg_length,
                sender_id,
                send_time_ms,
            },
            pos,
        ))
    }

    /// Back-fills `msg_length` at its fixed offset (2) once the full message has been composed.
    #[inline]
    pub fn patch_length(buf: &mut Buffer, total_len: usize) -> Option<()> {
        buf.set_i16(2, total_len as i16)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub flags: i32,
    pub schema: String,
    pub sim_time_ms: i64,
    pub interval_ms: i32,
}

impl Request {
    pub fn write(buf: &mut Buffer, sender_id: i32, send_time_ms: i64, req: &Request) -> Option<usize> {
        let pos = Header::write(buf, 0, MessageType::Request, sender_id, send_time_ms)?;
        let pos = buf.write_i32(pos, req.flags)?;
        let pos = buf.write_str(pos, &req.schema)?;
        let pos = buf.write_i64(pos, req.sim_time_ms)?;
        let pos = buf.write_i32(pos, req.interval_ms)?;
        Header::patch_length(buf, pos)?;
        Some(pos)
    }

    pub fn read(buf: &Buffer, pos: usize) -> Option<(Request, usize)> {
        let (flags, pos) = buf.read_i32(pos)?;
        let (schema, pos) = buf.read_str_truncated(pos, MAX_SCHEMA_LEN)?;
        let (sim_time_ms, pos) = buf.read_i64(pos)?;
        let (interval_ms, pos) = buf.read_i32(pos)?;
        Some((
            Request {
                flags,
                schema,
                sim_time_ms,
                interval_ms,
            },
            pos,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accept {
    pub server_flags: i32,
    pub sim_time_ms: i64,
    pub interval_ms: i32,
    pub client_id: i32,
}

impl Accept {
    pub fn write(buf: &mut Buffer, sender_id: i32, send_time_ms: i64, accept: &Accept) -> Option<usize> {
        let pos = Header::write(buf, 0, MessageType::Accept, sender_id, send_time_ms)?;
        let pos = buf.write_i32(pos, accept.server_flags)?;
        let pos = buf.write_i64(pos, accept.sim_time_ms)?;
        let pos = buf.write_i32(pos, accept.interval_ms)?;
        let pos = buf.write_i32(pos, accept.client_id)?;
        Header::patch_length(buf, ACCEPT_LEN)?;
        Some(pos)
    }

    pub fn read(buf: &Buffer, pos: usize) -> Option<(Accept, usize)> {
        let (server_flags, pos) = buf.read_i32(pos)?;
        let (sim_time_ms, pos) = buf.read_i64(pos)?;
        let (interval_ms, pos) = buf.read_i32(pos)?;
        let (client_id, pos) = buf.read_i32(pos)?;
        Some((
            Accept {
                server_flags,
                sim_time_ms,
                interval_ms,
                client_id,
            },
            pos,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reject {
    pub reason: i32,
}

impl Reject {
    pub fn write(buf: &mut Buffer, sender_id: i32, send_time_ms: i64, reject: &Reject) -> Option<usize> {
        let pos = Header::write(buf, 0, MessageType::Reject, sender_id, send_time_ms)?;
        let pos = buf.write_i32(pos, reject.reason)?;
        Header::patch_length(buf, REJECT_LEN)?;
        Some(pos)
    }

    pub fn read(buf: &Buffer, pos: usize) -> Option<(Reject, usize)> {
        let (reason, pos) = buf.read_i32(pos)?;
        Some((Reject { reason }, pos))
    }
}

/// Writes a `Data` header only; the caller's `write_data` callback appends the application
/// payload starting at the returned position, and the engine patches `msg_length` afterwards.
#[inline]
pub fn write_data_header(buf: &mut Buffer, sender_id: i32, send_time_ms: i64) -> Option<usize> {
    Header::write(buf, 0, MessageType::Data, sender_id, send_time_ms)
}

#[inline]
pub fn write_control(buf: &mut Buffer, msg_type: MessageType, sender_id: i32, send_time_ms: i64) -> Option<usize> {
    debug_assert!(matches!(msg_type, MessageType::Stop | MessageType::Pause | MessageType::Resume));
    let pos = Header::write(buf, 0, msg_type, sender_id, send_time_ms)?;
    Header::patch_length(buf, HEADER_LEN)?;
    Some(pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let mut buf = Buffer::new(MAX_MSG_LEN);
        let req = Request {
            flags: DATA_RECEIVER,
            schema: "gov.nasa.race.air.SimpleTrackProtocol".to_string(),
            sim_time_ms: 1_700_000_000_000,
            interval_ms: 2000,
        };
        let end = Request::write(&mut buf, SERVER_ID, 123, &req).unwrap();

        let (header, pos) = Header::read(&buf, end).unwrap();
        assert_eq!(header.msg_type, MessageType::Request);
        assert_eq!(header.sender_id, SERVER_ID);
        assert_eq!(header.send_time_ms, 123);

        let (decoded, pos) = Request::read(&buf, pos).unwrap();
        assert_eq!(pos, end);
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_accept_fixed_length() {
        let mut buf = Buffer::new(MAX_MSG_LEN);
        let accept = Accept {
            server_flags: DATA_SENDER | DATA_RECEIVER,
            sim_time_ms: 42,
            interval_ms: 2000,
            client_id: 1,
        };
        let end = Accept::write(&mut buf, SERVER_ID, 99, &accept).unwrap();
        assert_eq!(end, ACCEPT_LEN);

        let (header, _) = Header::read(&buf, end).unwrap();
        assert_eq!(header.msg_type, MessageType::Accept);
        assert_eq!(header.msg_length as usize, ACCEPT_LEN);
    }

    #[test]
    fn test_header_rejects_length_mismatch() {
        let mut buf = Buffer::new(MAX_MSG_LEN);
        write_control(&mut buf, MessageType::Stop, 1, 0).unwrap();
        let err = Header::read(&buf, STOP_LEN + 1).unwrap_err();
        assert!(matches!(err, FrameError::LengthMismatch { .. }));
    }

    #[test]
    fn test_header_rejects_unknown_type() {
        let mut buf = Buffer::new(MAX_MSG_LEN);
        buf.write_i16(0, 99).unwrap();
        let err = Header::read(&buf, HEADER_LEN).unwrap_err();
        assert!(matches!(err, FrameError::UnknownType(99)));
    }
}
