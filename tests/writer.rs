//! End-to-end `Writer` tests over a real loopback TCP pair; see
//! `tests/reader.rs` for why a real socket is used instead of a hand-rolled
//! fake channel.

extern crate tk_transfer;
extern crate tokio_core;
extern crate tokio_io;
extern crate futures;
extern crate env_logger;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Once, ONCE_INIT};

use futures::{Future, Stream};
use tokio_core::net::{TcpListener, TcpStream};
use tokio_core::reactor::Core;
use tokio_io::io::read_to_end;

use tk_transfer::{Flow, TransferEncoding, WriteCallbacks, write_start};

static LOG_INIT: Once = ONCE_INIT;

fn loopback(core: &mut Core) -> (Rc<RefCell<TcpStream>>, TcpStream) {
    LOG_INIT.call_once(|| { let _ = env_logger::init(); });
    let handle = core.handle();
    let listener = TcpListener::bind(&"127.0.0.1:0".parse().unwrap(), &handle).unwrap();
    let addr = listener.local_addr().unwrap();
    let connect = TcpStream::connect(&addr, &handle);
    let accept = listener.incoming().into_future().map_err(|(e, _)| e);
    let (accepted, client) = core.run(accept.join(connect)).unwrap();
    let (server, _peer_addr) = accepted.unwrap();
    (Rc::new(RefCell::new(server)), client)
}

/// Feeds `chunks` to a writer's `produce_body` one at a time (the last one
/// paired with `Flow::End`), returns the wire bytes the peer actually saw.
fn capture_wire(header: &[u8], encoding: TransferEncoding, chunks: Vec<Vec<u8>>) -> Vec<u8> {
    let mut core = Core::new().unwrap();
    let (server, client) = loopback(&mut core);
    let handle = core.handle();

    let pending = Rc::new(RefCell::new(chunks));
    let headers_seen = Rc::new(RefCell::new(false));
    let headers_seen_cb = headers_seen.clone();

    let callbacks = WriteCallbacks {
        headers_done: Box::new(move || {
            *headers_seen_cb.borrow_mut() = true;
            Flow::Continue
        }),
        produce_body: Box::new(move |out: &mut Vec<u8>| {
            let mut pending = pending.borrow_mut();
            if pending.is_empty() {
                return Flow::End;
            }
            let next = pending.remove(0);
            out.extend_from_slice(&next);
            if pending.is_empty() { Flow::End } else { Flow::Continue }
        }),
        done: Box::new(|| {}),
        error: Box::new(|headers_reported| {
            panic!("unexpected write error (headers_reported={})", headers_reported)
        }),
    };

    let _writer_handle = write_start(server, header, None, encoding, callbacks, &handle);
    // The writer (and its only remaining handle to the shared socket) is
    // torn down once `done` fires, which closes our end and lets
    // `read_to_end` on the peer observe EOF.
    let (_client, wire) = core.run(read_to_end(client, Vec::new())).unwrap();
    assert!(*headers_seen.borrow(), "headers_done never fired");
    wire
}

#[test]
fn content_length_writer_streams_body_and_closes() {
    let header = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n";
    let wire = capture_wire(
        header,
        TransferEncoding::ContentLength(5),
        vec![b"hello".to_vec()],
    );
    assert_eq!(wire, b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello".to_vec());
}

#[test]
fn chunked_writer_frames_each_chunk() {
    let header = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
    let wire = capture_wire(
        header,
        TransferEncoding::Chunked,
        vec![b"Wiki".to_vec(), b"pedia".to_vec()],
    );
    let mut expected = header.to_vec();
    expected.extend(b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n");
    assert_eq!(wire, expected);
}

#[test]
fn empty_chunked_body_still_writes_terminator() {
    let header = b"HTTP/1.1 204 No Content\r\nTransfer-Encoding: chunked\r\n\r\n";
    let wire = capture_wire(header, TransferEncoding::Chunked, vec![]);
    let mut expected = header.to_vec();
    expected.extend(b"0\r\n");
    assert_eq!(wire, expected);
}

#[test]
fn initial_body_is_flushed_before_produce_body_is_consulted() {
    let mut core = Core::new().unwrap();
    let (server, client) = loopback(&mut core);
    let handle = core.handle();

    let header = b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\n";
    let callbacks = WriteCallbacks {
        headers_done: Box::new(|| Flow::Continue),
        produce_body: Box::new(|out: &mut Vec<u8>| {
            out.extend_from_slice(b"world");
            Flow::End
        }),
        done: Box::new(|| {}),
        error: Box::new(|headers_reported| {
            panic!("unexpected write error (headers_reported={})", headers_reported)
        }),
    };

    let _writer_handle = write_start(
        server,
        header,
        Some(b"hello"),
        TransferEncoding::ContentLength(11),
        callbacks,
        &handle,
    );
    let (_client, wire) = core.run(read_to_end(client, Vec::new())).unwrap();
    let mut expected = header.to_vec();
    expected.extend(b"helloworld");
    assert_eq!(wire, expected);
}
