#[macro_use]
extern crate criterion;

use criterion::Criterion;
use race_proto::message::{self, Accept, Header, MessageType, Request, MAX_MSG_LEN};
use race_proto::Buffer;

fn request_roundtrip(c: &mut Criterion) {
    c.bench_function("encode/decode a Request envelope", |b| {
        let req = Request {
            flags: message::DATA_SENDER | message::DATA_RECEIVER,
            schema: "gov.nasa.race.air.SimpleTrackProtocol".to_string(),
            sim_time_ms: 1_700_000_000_000,
            interval_ms: 2000,
        };
        b.iter(|| {
            let mut buf = Buffer::new(MAX_MSG_LEN);
            let end = Request::write(&mut buf, message::NO_ID, 123, &req).unwrap();
            let (_, pos) = Header::read(&buf, end).unwrap();
            Request::read(&buf, pos).unwrap()
        })
    });
}

fn accept_roundtrip(c: &mut Criterion) {
    c.bench_function("encode/decode an Accept envelope", |b| {
        let accept = Accept {
            server_flags: message::DATA_SENDER | message::DATA_RECEIVER,
            sim_time_ms: 1_700_000_000_000,
            interval_ms: 2000,
            client_id: 1,
        };
        b.iter(|| {
            let mut buf = Buffer::new(MAX_MSG_LEN);
            let end = Accept::write(&mut buf, message::SERVER_ID, 99, &accept).unwrap();
            let (header, pos) = Header::read(&buf, end).unwrap();
            debug_assert_eq!(header.msg_type, MessageType::Accept);
            Accept::read(&buf, pos).unwrap()
        })
    });
}

fn data_header_patch(c: &mut Criterion) {
    c.bench_function("compose a Data envelope and patch msg_length", |b| {
        b.iter(|| {
            let mut buf = Buffer::new(MAX_MSG_LEN);
            let header_end = message::write_data_header(&mut buf, 1, 1_700_000_000_000).unwrap();
            let end = buf.write_str(header_end, "payload").unwrap();
            Header::patch_length(&mut buf, end).unwrap();
            end
        })
    });
}

criterion_group!(benches, request_roundtrip, accept_roundtrip, data_header_patch);
criterion_main!(benches);
