//! Handshake, data-exchange loops (threaded and single-threaded polling variants), and the
//! per-remote state machine.

use crate::net::context::{Callbacks, Cancellation, RemoteEndpoint, RemoteIdAllocator, Settings};
use crate::net::socket::Socket;
use race_proto::message::{
    self, Accept, Header, MessageType, Reject, Request, HEADER_LEN, MAX_MSG_LEN, MAX_POLLED_MSGS,
    MAX_TIME_DIFF, RECV_TIMEOUT_MILLIS,
};
use race_proto::time::timestamp_millis;
use race_proto::{AdapterError, AdapterResult, Buffer, ErrorKind, ProtocolError};
use slog::{debug, error, o, trace, warn, Logger};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// An established connection: one local endpoint driving exactly one remote. A server
/// accepting several simultaneous peers runs one `Connection` per accepted peer.
pub struct Connection {
    pub socket: Socket,
    pub remote: Arc<RemoteEndpoint>,
    pub local_id: i32,
    pub interval_ms: i32,
    pub time_diff_ms: i64,
}

/// Runs the server side of the handshake: blocks for one `Request`, asks the caller whether
/// to accept it, and replies `Accept` or `Reject`.
pub fn accept(
    socket: &Socket,
    settings: &Settings,
    callbacks: &dyn Callbacks,
    ids: &mut RemoteIdAllocator,
    log: &Logger,
) -> AdapterResult<Connection> {
    socket.set_nonblocking(false)?;
    socket.set_recv_timeout(None)?;

    let mut scratch = Buffer::new(MAX_MSG_LEN);
    let (len, peer) = socket.recv_from(scratch.as_mut_slice())?;

    let (header, pos) = Header::read(&scratch, len).map_err(|_| {
        AdapterError::Fatal(ErrorKind::Framing(race_proto::error::FramingError::BufferOverflow))
    })?;

    if header.msg_type != MessageType::Request {
        warn!(log, "expected Request, dropping datagram"; "context" => "accept", "peer" => ?peer);
        return Err(AdapterError::Fatal(ErrorKind::Protocol(ProtocolError::UnexpectedMessage)));
    }

    let (request, _) = Request::read(&scratch, pos)
        .ok_or_else(|| AdapterError::Fatal(ErrorKind::Framing(race_proto::error::FramingError::TruncatedString)))?;

    let mut sim_time_ms = request.sim_time_ms;
    let mut interval_ms = request.interval_ms;

    let reason = callbacks.check_request(peer, request.flags, &request.schema, &mut sim_time_ms, &mut interval_ms);

    if reason != 0 {
        debug!(log, "rejecting connection request"; "context" => "accept", "peer" => ?peer, "reason" => reason);
        let mut reply = Buffer::new(MAX_MSG_LEN);
        Reject::write(&mut reply, message::SERVER_ID, timestamp_millis(), &Reject { reason })
            .ok_or_else(|| AdapterError::Fatal(ErrorKind::Framing(race_proto::error::FramingError::BufferOverflow)))?;
        socket.send_to(&reply.as_slice()[..message::REJECT_LEN], peer)?;
        return Err(AdapterError::Fatal(ErrorKind::Rejected(reason as u32)));
    }

    let remote_id = ids.allocate();
    let local_now = timestamp_millis();
    let time_diff_ms = if (local_now - sim_time_ms).abs() > MAX_TIME_DIFF {
        local_now - sim_time_ms
    } else {
        0
    };

    let mut reply = Buffer::new(MAX_MSG_LEN);
    let accept_msg = Accept {
        server_flags: settings.flags,
        sim_time_ms,
        interval_ms,
        client_id: remote_id,
    };
    Accept::write(&mut reply, message::SERVER_ID, local_now, &accept_msg)
        .ok_or_else(|| AdapterError::Fatal(ErrorKind::Framing(race_proto::error::FramingError::BufferOverflow)))?;
    socket.send_to(&reply.as_slice()[..message::ACCEPT_LEN], peer)?;

    debug!(log, "accepted connection"; "context" => "accept", "peer" => ?peer, "remote_id" => remote_id);
    callbacks.connection_started(remote_id);

    Ok(Connection {
        socket: socket.try_clone()?,
        remote: Arc::new(RemoteEndpoint::new(peer, remote_id)),
        local_id: message::SERVER_ID,
        interval_ms,
        time_diff_ms,
    })
}

/// Runs the client side of the handshake, retrying the `Request` send every
/// `settings.reconnect_interval_ms` until accepted, rejected, or retries are disabled
/// (`reconnect_interval_ms == 0`).
pub fn connect(socket: Socket, remote_addr: SocketAddr, settings: &Settings, callbacks: &dyn Callbacks, log: &Logger) -> AdapterResult<Connection> {
    socket.set_recv_timeout(Some(Duration::from_millis(RECV_TIMEOUT_MILLIS)))?;

    loop {
        let mut send_buf = Buffer::new(MAX_MSG_LEN);
        let pos = callbacks
            .write_request(&mut send_buf, 0)
            .ok_or_else(|| AdapterError::Fatal(ErrorKind::Framing(race_proto::error::FramingError::BufferOverflow)))?;
        socket.send_to(&send_buf.as_slice()[..pos], remote_addr)?;
        trace!(log, "sent connection request"; "context" => "connect", "peer" => ?remote_addr);

        let mut recv_buf = Buffer::new(MAX_MSG_LEN);
        match socket.recv_from(recv_buf.as_mut_slice()) {
            Ok((len, from)) => {
                let (header, pos) = Header::read(&recv_buf, len).map_err(|_| {
                    AdapterError::Fatal(ErrorKind::Framing(race_proto::error::FramingError::BufferOverflow))
                })?;

                match header.msg_type {
                    MessageType::Accept => {
                        let (accept_msg, _) = Accept::read(&recv_buf, pos).ok_or_else(|| {
                            AdapterError::Fatal(ErrorKind::Framing(race_proto::error::FramingError::TruncatedString))
                        })?;

                        let local_now = timestamp_millis();
                        let time_diff_ms = if (local_now - accept_msg.sim_time_ms).abs() > MAX_TIME_DIFF {
                            local_now - accept_msg.sim_time_ms
                        } else {
                            0
                        };

                        socket.set_recv_timeout(None)?;
                        debug!(log, "connection accepted"; "context" => "connect", "client_id" => accept_msg.client_id);
                        callbacks.connection_started(accept_msg.client_id);

                        return Ok(Connection {
                            socket,
                            remote: Arc::new(RemoteEndpoint::new(from, message::SERVER_ID)),
                            local_id: accept_msg.client_id,
                            interval_ms: accept_msg.interval_ms,
                            time_diff_ms,
                        });
                    }
                    MessageType::Reject => {
                        let (reject_msg, _) = Reject::read(&recv_buf, pos).ok_or_else(|| {
                            AdapterError::Fatal(ErrorKind::Framing(race_proto::error::FramingError::TruncatedString))
                        })?;
                        warn!(log, "connection rejected"; "context" => "connect", "reason" => reject_msg.reason);
                        return Err(AdapterError::Fatal(ErrorKind::Rejected(reject_msg.reason as u32)));
                    }
                    _ => {
                        warn!(log, "unexpected message during handshake"; "context" => "connect");
                        continue;
                    }
                }
            }
            Err(AdapterError::Wait) => {
                if settings.reconnect_interval_ms == 0 {
                    return Err(AdapterError::Fatal(ErrorKind::Io(std::io::ErrorKind::TimedOut)));
                }
                thread::sleep(Duration::from_millis(settings.reconnect_interval_ms));
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Sender loop body shared by the threaded and polling variants: composes and sends one
/// `Data` datagram for the current tick, returning `true` if a payload was actually sent.
fn send_data_tick(socket: &Socket, remote_addr: SocketAddr, local_id: i32, callbacks: &dyn Callbacks, log: &Logger) -> AdapterResult<bool> {
    let mut buf = Buffer::new(MAX_MSG_LEN);
    let send_time = timestamp_millis();
    let header_end = message::write_data_header(&mut buf, local_id, send_time)
        .ok_or_else(|| AdapterError::Fatal(ErrorKind::Framing(race_proto::error::FramingError::BufferOverflow)))?;

    let end = match callbacks.write_data(&mut buf, header_end) {
        Some(end) if end > header_end => end,
        _ => {
            trace!(log, "no data produced this tick"; "context" => "send_data_tick");
            return Ok(false);
        }
    };

    Header::patch_length(&mut buf, end)
        .ok_or_else(|| AdapterError::Fatal(ErrorKind::Framing(race_proto::error::FramingError::BufferOverflow)))?;
    socket.send_to(&buf.as_slice()[..end], remote_addr)?;
    Ok(true)
}

fn send_control(socket: &Socket, remote_addr: SocketAddr, local_id: i32, msg_type: MessageType) -> AdapterResult<()> {
    let mut buf = Buffer::new(HEADER_LEN);
    let end = message::write_control(&mut buf, msg_type, local_id, timestamp_millis())
        .ok_or_else(|| AdapterError::Fatal(ErrorKind::Framing(race_proto::error::FramingError::BufferOverflow)))?;
    socket.send_to(&buf.as_slice()[..end], remote_addr)?;
    Ok(())
}

/// Dispatches one already-received datagram on the receive side: `Stop`/`Pause`/`Resume`
/// update remote state, `Data` is validated (sender id, monotonic send-time) and handed to
/// `read_data`.
fn dispatch_incoming(
    buf: &Buffer,
    len: usize,
    remote: &RemoteEndpoint,
    settings: &Settings,
    callbacks: &dyn Callbacks,
    log: &Logger,
) -> AdapterResult<()> {
    let (header, pos) = match Header::read(buf, len) {
        Ok(ok) => ok,
        Err(e) => {
            warn!(log, "dropping malformed datagram"; "context" => "dispatch_incoming", "error" => ?e);
            return Ok(());
        }
    };

    match header.msg_type {
        MessageType::Stop => {
            if header.sender_id == remote.id {
                remote.mark_stopped();
                debug!(log, "remote requested stop"; "context" => "dispatch_incoming", "remote_id" => remote.id);
            }
        }
        MessageType::Pause => {
            if header.sender_id == remote.id {
                remote.paused.store(true, Ordering::SeqCst);
                callbacks.connection_paused(remote.id);
            }
        }
        MessageType::Resume => {
            if header.sender_id == remote.id {
                remote.paused.store(false, Ordering::SeqCst);
                callbacks.connection_resumed(remote.id);
            }
        }
        MessageType::Data => {
            if !settings.is_receiver() {
                return Ok(());
            }
            if header.sender_id != remote.id {
                warn!(log, "data from unexpected sender"; "context" => "dispatch_incoming", "sender_id" => header.sender_id);
                return Ok(());
            }
            let time_last = remote.time_last();
            if header.send_time_ms < time_last {
                warn!(log, "dropping out-of-order data"; "context" => "dispatch_incoming", "send_time_ms" => header.send_time_ms, "time_last" => time_last);
                return Ok(());
            }
            remote.set_time_last(header.send_time_ms);
            callbacks.read_data(buf, pos);
        }
        other => {
            warn!(log, "unexpected message in data loop"; "context" => "dispatch_incoming", "msg_type" => ?other);
        }
    }

    Ok(())
}

/// Receiver thread body for the threaded variant: blocks on `recv_from` until the remote
/// stops, cancellation is requested, or a fatal error occurs. The blocking receive is run
/// with a modest timeout so the cancellation flag can be polled between waits -- the
/// memory-safe substitute for the forced thread cancellation the original implementation
/// uses.
fn receiver_loop(
    socket: Socket,
    remote: Arc<RemoteEndpoint>,
    settings: Settings,
    callbacks: Arc<dyn Callbacks>,
    cancellation: Cancellation,
    log: Logger,
) {
    let _ = socket.set_recv_timeout(Some(Duration::from_millis(250)));

    while !remote.is_stopped() && !cancellation.is_stop_requested() {
        let mut buf = Buffer::new(MAX_MSG_LEN);
        match socket.recv_from(buf.as_mut_slice()) {
            Ok((len, from)) => {
                if from != remote.addr {
                    continue;
                }
                if let Err(e) = dispatch_incoming(&buf, len, &remote, &settings, callbacks.as_ref(), &log) {
                    trace!(log, "dropped datagram"; "context" => "receiver_loop", "error" => ?e);
                }
            }
            Err(AdapterError::Wait) => continue,
            Err(e) => {
                warn!(log, "receiver loop fatal error"; "context" => "receiver_loop", "error" => ?e);
                break;
            }
        }
    }
}

/// Runs the two-thread variant: a dedicated receiver thread plus the sender loop on the
/// calling thread. On shutdown (`stop_local`), sends one final `Data` then `Stop`, signals
/// the receiver to stop, and joins it.
pub fn run_threaded(
    connection: Connection,
    settings: Settings,
    callbacks: Arc<dyn Callbacks>,
    cancellation: Cancellation,
    log: Logger,
) -> AdapterResult<()> {
    let Connection {
        socket,
        remote,
        local_id,
        interval_ms,
        ..
    } = connection;

    let receiver_socket = socket.try_clone()?;
    let receiver_remote = Arc::clone(&remote);
    let receiver_settings = settings.clone();
    let receiver_callbacks = Arc::clone(&callbacks);
    let receiver_cancellation = cancellation.clone();
    let receiver_log = log.new(o!("role" => "receiver"));

    let receiver = thread::Builder::new()
        .name("race-adapter-receiver".into())
        .spawn(move || {
            receiver_loop(
                receiver_socket,
                receiver_remote,
                receiver_settings,
                receiver_callbacks,
                receiver_cancellation,
                receiver_log,
            )
        })
        .map_err(|_| AdapterError::Fatal(ErrorKind::Resource(race_proto::ResourceError::ThreadSpawn)))?;

    let mut fatal: Option<AdapterError> = None;

    while !remote.is_stopped() && !cancellation.is_stop_requested() {
        if !remote.paused.load(Ordering::SeqCst) {
            if let Err(e) = send_data_tick(&socket, remote.addr, local_id, callbacks.as_ref(), &log) {
                warn!(log, "sender tick failed, terminating connection"; "context" => "run_threaded", "error" => ?e);
                fatal = Some(e);
                break;
            }
        }
        thread::sleep(Duration::from_millis(interval_ms.max(0) as u64));
    }

    if fatal.is_none() && cancellation.is_stop_requested() && !remote.is_stopped() {
        if let Err(e) = send_data_tick(&socket, remote.addr, local_id, callbacks.as_ref(), &log) {
            warn!(log, "final data flush failed"; "context" => "run_threaded", "error" => ?e);
            fatal = Some(e);
        }
    }

    if !remote.is_stopped() {
        if let Err(e) = send_control(&socket, remote.addr, local_id, MessageType::Stop) {
            warn!(log, "best-effort stop send failed"; "context" => "run_threaded", "error" => ?e);
        }
        remote.mark_stopped();
    }

    cancellation.request_stop();
    let _ = receiver.join();
    callbacks.connection_terminated(remote.id);

    match fatal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Runs the single-threaded variant: before each sleep, drains up to `MAX_POLLED_MSGS`
/// pending datagrams via a non-blocking readability check instead of spawning a receiver
/// thread.
pub fn run_polling(connection: Connection, settings: Settings, callbacks: Arc<dyn Callbacks>, cancellation: Cancellation, log: Logger) -> AdapterResult<()> {
    let Connection {
        socket,
        remote,
        local_id,
        interval_ms,
        ..
    } = connection;

    socket.set_nonblocking(true)?;

    let mut fatal: Option<AdapterError> = None;

    'outer: while !remote.is_stopped() && !cancellation.is_stop_requested() {
        if !remote.paused.load(Ordering::SeqCst) {
            if let Err(e) = send_data_tick(&socket, remote.addr, local_id, callbacks.as_ref(), &log) {
                warn!(log, "sender tick failed, terminating connection"; "context" => "run_polling", "error" => ?e);
                fatal = Some(e);
                break;
            }
        }

        let mut drained = 0;
        while drained < MAX_POLLED_MSGS && socket.check_available()? {
            let mut buf = Buffer::new(MAX_MSG_LEN);
            match socket.recv_from(buf.as_mut_slice()) {
                Ok((len, from)) if from == remote.addr => {
                    if let Err(e) = dispatch_incoming(&buf, len, &remote, &settings, callbacks.as_ref(), &log) {
                        warn!(log, "receive poll failed, terminating connection"; "context" => "run_polling", "error" => ?e);
                        fatal = Some(e);
                        break 'outer;
                    }
                }
                Ok(_) => {}
                Err(AdapterError::Wait) => break,
                Err(e) => {
                    warn!(log, "receive poll failed, terminating connection"; "context" => "run_polling", "error" => ?e);
                    fatal = Some(e);
                    break 'outer;
                }
            }
            drained += 1;
        }

        thread::sleep(Duration::from_millis(interval_ms.max(0) as u64));
    }

    if fatal.is_none() && cancellation.is_stop_requested() && !remote.is_stopped() {
        if let Err(e) = send_data_tick(&socket, remote.addr, local_id, callbacks.as_ref(), &log) {
            warn!(log, "final data flush failed"; "context" => "run_polling", "error" => ?e);
            fatal = Some(e);
        }
    }

    if !remote.is_stopped() {
        if let Err(e) = send_control(&socket, remote.addr, local_id, MessageType::Stop) {
            warn!(log, "best-effort stop send failed"; "context" => "run_polling", "error" => ?e);
        }
        remote.mark_stopped();
    }

    callbacks.connection_terminated(remote.id);

    match fatal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Top-level server entry point: binds the server socket, then loops accepting one peer at a
/// time and driving its threaded data-exchange loop to completion before waiting for the next
/// request -- the outer "accept the next peer after one terminates" reconnect loop the original
/// `race_server` runs around `run_connection_threaded` (race.c). Per §7, a connection that ends
/// in a mid-session fatal error does not abort the server -- it logs and returns to this outer
/// loop to await the next peer. Returns `false` only if the server socket itself could not be
/// bound; returns `true` once `cancellation.request_stop()` ends the loop.
pub fn server(settings: &Settings, callbacks: Arc<dyn Callbacks>, cancellation: Cancellation, log: Logger) -> bool {
    let socket = match Socket::server(settings.port) {
        Ok(socket) => socket,
        Err(e) => {
            error!(log, "failed to bind server socket"; "context" => "server", "error" => ?e);
            return false;
        }
    };

    let mut ids = RemoteIdAllocator::new();

    while !cancellation.is_stop_requested() {
        let connection = match accept(&socket, settings, callbacks.as_ref(), &mut ids, &log) {
            Ok(connection) => connection,
            Err(e) => {
                warn!(log, "handshake failed"; "context" => "server", "error" => ?e);
                continue;
            }
        };

        let connection_log = log.new(o!("role" => "connection"));
        if let Err(e) = run_threaded(connection, settings.clone(), Arc::clone(&callbacks), cancellation.clone(), connection_log) {
            warn!(log, "connection terminated with error"; "context" => "server", "error" => ?e);
        }
    }

    true
}

/// Top-level client entry point: resolves the server address, runs the handshake, and drives
/// the threaded data-exchange loop to completion -- the direct analogue of the original
/// `race_client` (race.c), which wires `initialize_local_client` + `establish_connection` +
/// `run_connection_threaded` into a single call. Returns `false` if the socket could not be
/// created, the handshake failed or was rejected, or the connection ended in a mid-session
/// fatal error; returns `true` on a graceful stop (local or peer-initiated).
pub fn client(settings: &Settings, callbacks: Arc<dyn Callbacks>, cancellation: Cancellation, log: Logger) -> bool {
    let (socket, remote_addr) = match Socket::client(&settings.host, settings.port) {
        Ok(ok) => ok,
        Err(e) => {
            error!(log, "failed to resolve server address"; "context" => "client", "error" => ?e);
            return false;
        }
    };

    let connection = match connect(socket, remote_addr, settings, callbacks.as_ref(), &log) {
        Ok(connection) => connection,
        Err(e) => {
            warn!(log, "handshake failed"; "context" => "client", "error" => ?e);
            return false;
        }
    };

    match run_threaded(connection, settings.clone(), callbacks, cancellation, log.clone()) {
        Ok(()) => true,
        Err(e) => {
            warn!(log, "connection terminated with error"; "context" => "client", "error" => ?e);
            false
        }
    }
}
