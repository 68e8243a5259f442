//! End-to-end handshake and data exchange over real loopback UDP sockets.

use race_adapter::net::context::{Callbacks, Cancellation, RemoteIdAllocator, Settings};
use race_adapter::net::engine::{accept, client, connect, server};
use race_adapter::net::socket::Socket;
use race_proto::message::{self, DATA_RECEIVER, DATA_SENDER, UNKNOWN_DATA};
use race_proto::Buffer;
use slog::{Discard, Logger};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct EchoCallbacks {
    schema: String,
    received: AtomicUsize,
}

impl Callbacks for EchoCallbacks {
    fn check_request(
        &self,
        _peer: std::net::SocketAddr,
        _flags: i32,
        schema: &str,
        _sim_time_ms: &mut i64,
        _interval_ms: &mut i32,
    ) -> i32 {
        if schema == self.schema {
            0
        } else {
            UNKNOWN_DATA
        }
    }

    fn write_request(&self, buf: &mut Buffer, _pos: usize) -> Option<usize> {
        let req = race_proto::message::Request {
            flags: DATA_SENDER | DATA_RECEIVER,
            schema: self.schema.clone(),
            sim_time_ms: race_proto::time::timestamp_millis(),
            interval_ms: 50,
        };
        race_proto::message::Request::write(buf, message::NO_ID, race_proto::time::timestamp_millis(), &req)
    }

    fn write_data(&self, buf: &mut Buffer, pos: usize) -> Option<usize> {
        buf.write_str(pos, "ping")
    }

    fn read_data(&self, _buf: &Buffer, _pos: usize) {
        self.received.fetch_add(1, Ordering::SeqCst);
    }
}

fn silent_log() -> Logger {
    Logger::root(Discard, slog::o!())
}

#[test]
fn test_server_accepts_matching_schema() {
    let server_socket = Socket::server(0).unwrap();
    let server_port = server_socket.local_addr().unwrap().port();

    let server_settings = Settings {
        host: "127.0.0.1".to_string(),
        port: server_port,
        schema: "gov.nasa.race.air.SimpleTrackProtocol".to_string(),
        flags: DATA_SENDER | DATA_RECEIVER,
        default_interval_ms: 50,
        reconnect_interval_ms: 0,
    };

    let server_callbacks: Arc<EchoCallbacks> = Arc::new(EchoCallbacks {
        schema: "gov.nasa.race.air.SimpleTrackProtocol".to_string(),
        received: AtomicUsize::new(0),
    });

    let server_thread = {
        let callbacks = Arc::clone(&server_callbacks);
        let log = silent_log();
        thread::spawn(move || {
            let mut ids = RemoteIdAllocator::new();
            accept(&server_socket, &server_settings, callbacks.as_ref(), &mut ids, &log)
        })
    };

    let (client_socket, remote_addr) = Socket::client("127.0.0.1", server_port).unwrap();
    let client_settings = Settings {
        host: "127.0.0.1".to_string(),
        port: server_port,
        schema: "gov.nasa.race.air.SimpleTrackProtocol".to_string(),
        flags: DATA_SENDER | DATA_RECEIVER,
        default_interval_ms: 50,
        reconnect_interval_ms: 0,
    };
    let client_callbacks: Arc<EchoCallbacks> = Arc::new(EchoCallbacks {
        schema: "gov.nasa.race.air.SimpleTrackProtocol".to_string(),
        received: AtomicUsize::new(0),
    });

    let log = silent_log();
    let client_connection = connect(client_socket, remote_addr, &client_settings, client_callbacks.as_ref(), &log);
    assert!(client_connection.is_ok());

    let server_connection = server_thread.join().unwrap();
    assert!(server_connection.is_ok());
}

#[test]
fn test_server_rejects_unknown_schema() {
    let server_socket = Socket::server(0).unwrap();
    let server_port = server_socket.local_addr().unwrap().port();

    let server_settings = Settings {
        host: "127.0.0.1".to_string(),
        port: server_port,
        schema: "gov.nasa.race.air.SimpleTrackProtocol".to_string(),
        flags: DATA_SENDER | DATA_RECEIVER,
        default_interval_ms: 50,
        reconnect_interval_ms: 0,
    };
    let server_callbacks: Arc<EchoCallbacks> = Arc::new(EchoCallbacks {
        schema: "gov.nasa.race.air.SimpleTrackProtocol".to_string(),
        received: AtomicUsize::new(0),
    });

    let server_thread = {
        let callbacks = Arc::clone(&server_callbacks);
        let log = silent_log();
        thread::spawn(move || {
            let mut ids = RemoteIdAllocator::new();
            accept(&server_socket, &server_settings, callbacks.as_ref(), &mut ids, &log)
        })
    };

    let (client_socket, remote_addr) = Socket::client("127.0.0.1", server_port).unwrap();
    let client_settings = Settings {
        host: "127.0.0.1".to_string(),
        port: server_port,
        schema: "unknown".to_string(),
        flags: DATA_SENDER | DATA_RECEIVER,
        default_interval_ms: 50,
        reconnect_interval_ms: 0,
    };
    let client_callbacks: Arc<EchoCallbacks> = Arc::new(EchoCallbacks {
        schema: "unknown".to_string(),
        received: AtomicUsize::new(0),
    });

    let log = silent_log();
    let client_result = connect(client_socket, remote_addr, &client_settings, client_callbacks.as_ref(), &log);
    assert!(client_result.is_err());

    let server_result = server_thread.join().unwrap();
    assert!(server_result.is_err());
}

/// Drives a full session through the top-level `server`/`client` entry points: handshake,
/// several `Data` ticks exchanged in both directions, then a client-initiated stop.
#[test]
fn test_server_client_exchange_data_and_stop() {
    let reserved = Socket::server(0).unwrap();
    let server_port = reserved.local_addr().unwrap().port();
    drop(reserved);

    let schema = "gov.nasa.race.air.SimpleTrackProtocol".to_string();

    let settings = Settings {
        host: "127.0.0.1".to_string(),
        port: server_port,
        schema: schema.clone(),
        flags: DATA_SENDER | DATA_RECEIVER,
        default_interval_ms: 20,
        reconnect_interval_ms: 0,
    };

    let server_callbacks: Arc<EchoCallbacks> = Arc::new(EchoCallbacks {
        schema: schema.clone(),
        received: AtomicUsize::new(0),
    });
    let client_callbacks: Arc<EchoCallbacks> = Arc::new(EchoCallbacks {
        schema: schema.clone(),
        received: AtomicUsize::new(0),
    });

    let server_cancellation = Cancellation::new();
    let client_cancellation = Cancellation::new();

    {
        let settings = settings.clone();
        let callbacks = Arc::clone(&server_callbacks);
        let cancellation = server_cancellation.clone();
        let log = silent_log();
        thread::spawn(move || {
            server(&settings, callbacks, cancellation, log);
        });
    }

    // give the server time to bind before the client starts sending requests
    thread::sleep(Duration::from_millis(50));

    let client_thread = {
        let settings = settings.clone();
        let callbacks = Arc::clone(&client_callbacks);
        let cancellation = client_cancellation.clone();
        let log = silent_log();
        thread::spawn(move || client(&settings, callbacks, cancellation, log))
    };

    // let a handful of 50ms data ticks exchange in both directions
    thread::sleep(Duration::from_millis(300));

    client_cancellation.request_stop();
    let client_result = client_thread.join().unwrap();
    assert!(client_result, "client should report a graceful stop");

    assert!(
        client_callbacks.received.load(Ordering::SeqCst) > 0,
        "client should have received at least one Data tick from the server"
    );

    // give the Stop datagram time to reach the server's receiver thread
    thread::sleep(Duration::from_millis(100));
    assert!(
        server_callbacks.received.load(Ordering::SeqCst) > 0,
        "server should have received at least one Data tick from the client"
    );

    server_cancellation.request_stop();
}
