//! End-to-end tests: a real reactor on a loopback port, driven by the
//! blocking client and by raw sockets.

use bytes::Bytes;
use framekv::client::Client;
use framekv::config::Config;
use framekv::protocol::{encode_request, FrameLimits, Response, Status};
use framekv::runtime::{bind_listener, Reactor};
use framekv::storage::Store;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Start a reactor on an ephemeral port and return its address. The loop
/// thread lives until the test process exits.
fn start_server(config: Config) -> SocketAddr {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), 128).unwrap();
        let mut reactor = Reactor::new(listener, Store::new(), &config).unwrap();
        tx.send(reactor.local_addr().unwrap()).unwrap();
        reactor.run().unwrap();
    });
    rx.recv().unwrap()
}

fn connect(addr: SocketAddr) -> Client {
    let client = Client::connect(addr).unwrap();
    client
        .stream()
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client
}

fn frame(args: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_request(args, &FrameLimits::default(), &mut out).unwrap();
    out
}

/// Read until the peer closes. A reset counts as closed.
fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(_) => continue,
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => return,
            Err(e) => panic!("expected the server to close the connection, got {e}"),
        }
    }
}

#[test]
fn test_set_get_del_scenario() {
    let addr = start_server(Config::default());
    let mut client = connect(addr);

    assert_eq!(client.set("x", "1").unwrap(), Response::empty(Status::Ok));
    assert_eq!(client.get("x").unwrap(), Response::ok(Bytes::from("1")));
    assert_eq!(client.del("x").unwrap(), Response::empty(Status::Ok));
    assert_eq!(client.get("x").unwrap(), Response::empty(Status::NotFound));
}

#[test]
fn test_pipelined_frames_in_one_write() {
    let addr = start_server(Config::default());
    let mut client = connect(addr);

    let mut batch = frame(&["set", "k", "v"]);
    batch.extend(frame(&["get", "k"]));
    batch.extend(frame(&["del", "k"]));
    batch.extend(frame(&["get", "k"]));
    let mut stream = client.stream();
    stream.write_all(&batch).unwrap();

    assert_eq!(client.recv().unwrap(), Response::empty(Status::Ok));
    assert_eq!(client.recv().unwrap(), Response::ok(Bytes::from("v")));
    assert_eq!(client.recv().unwrap(), Response::empty(Status::Ok));
    assert_eq!(client.recv().unwrap(), Response::empty(Status::NotFound));
}

#[test]
fn test_request_split_into_single_bytes() {
    let addr = start_server(Config::default());
    let mut client = connect(addr);

    let mut stream = client.stream();
    for byte in frame(&["set", "slow", "drip"]) {
        stream.write_all(&[byte]).unwrap();
        thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(client.recv().unwrap(), Response::empty(Status::Ok));
    assert_eq!(client.get("slow").unwrap(), Response::ok(Bytes::from("drip")));
}

#[test]
fn test_command_errors_keep_connection_open() {
    let addr = start_server(Config::default());
    let mut client = connect(addr);

    assert_eq!(
        client.query(&["foo", "a"]).unwrap(),
        Response::empty(Status::Error)
    );
    assert_eq!(
        client.query(&["set", "a"]).unwrap(),
        Response::empty(Status::Error)
    );
    assert_eq!(
        client.query::<&str>(&[]).unwrap(),
        Response::empty(Status::Error)
    );

    assert_eq!(client.set("a", "1").unwrap(), Response::empty(Status::Ok));
    assert_eq!(client.get("a").unwrap(), Response::ok(Bytes::from("1")));
}

#[test]
fn test_binary_keys_and_values() {
    let addr = start_server(Config::default());
    let mut client = connect(addr);

    let key = [0u8, 255, b'\r', b'\n'];
    let value = [0u8; 16];
    assert_eq!(client.set(key, value).unwrap(), Response::empty(Status::Ok));
    assert_eq!(
        client.get(key).unwrap(),
        Response::ok(Bytes::copy_from_slice(&value))
    );
}

#[test]
fn test_large_value_round_trip() {
    let addr = start_server(Config::default());
    let mut client = connect(addr);

    // Larger than a socket buffer, so both sides see partial transfers.
    let value: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    assert_eq!(client.set("big", &value).unwrap(), Response::empty(Status::Ok));

    let response = client.get("big").unwrap();
    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.payload.len(), value.len());
    assert_eq!(&response.payload[..], &value[..]);
}

#[test]
fn test_oversized_frame_closes_connection() {
    let addr = start_server(Config {
        max_message_size: 4096,
        ..Config::default()
    });

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(&u32::MAX.to_le_bytes()).unwrap();
    assert_closed(&mut stream);

    // The server keeps serving everyone else.
    let mut client = connect(addr);
    assert_eq!(client.get("x").unwrap(), Response::empty(Status::NotFound));
}

#[test]
fn test_violation_after_valid_request() {
    let addr = start_server(Config::default());

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    // A valid request followed by a frame with trailing garbage.
    let mut batch = frame(&["set", "before", "ok"]);
    let mut bad = frame(&["get", "before"]);
    bad.push(0xAA);
    let len = (bad.len() - 4) as u32;
    bad[..4].copy_from_slice(&len.to_le_bytes());
    batch.extend(bad);
    stream.write_all(&batch).unwrap();

    // The first request is answered before the connection goes away.
    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).unwrap();
    assert_eq!(&reply[..4], &4u32.to_le_bytes());
    assert_eq!(&reply[4..], &Status::Ok.code().to_le_bytes());
    assert_closed(&mut stream);

    let mut client = connect(addr);
    assert_eq!(client.get("before").unwrap(), Response::ok(Bytes::from("ok")));
}

#[test]
fn test_many_clients_share_one_store() {
    let addr = start_server(Config::default());

    let workers: Vec<_> = (0..8)
        .map(|id| {
            thread::spawn(move || {
                let mut client = connect(addr);
                for i in 0..50 {
                    let key = format!("client{id}:key{i}");
                    let value = format!("value{i}");
                    assert_eq!(client.set(&key, &value).unwrap(), Response::empty(Status::Ok));
                    assert_eq!(client.get(&key).unwrap(), Response::ok(Bytes::from(value)));
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    // Writes from one connection are visible on another.
    let mut client = connect(addr);
    assert_eq!(
        client.get("client3:key49").unwrap(),
        Response::ok(Bytes::from("value49"))
    );
}

#[test]
fn test_abrupt_disconnect_mid_frame() {
    let addr = start_server(Config::default());

    let mut stream = TcpStream::connect(addr).unwrap();
    let request = frame(&["set", "half", "written"]);
    stream.write_all(&request[..request.len() / 2]).unwrap();
    drop(stream);

    // The partial frame is discarded; nothing was stored.
    let mut client = connect(addr);
    assert_eq!(client.get("half").unwrap(), Response::empty(Status::NotFound));
}
